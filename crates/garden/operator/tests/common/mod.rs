#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use garden_api::shoot::{
    deletion_confirmation_value, LastOperation, LastOperationState, LastOperationType, ShootCrd,
    ShootEventReason, ShootSpec, ShootStatus,
};
use garden_operator::{
    flow::{Flow, FlowError},
    lifecycle::{Phase, ShootLifecycle},
    status::{EventSeverity, StatusRecorder},
};
use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, chrono::Utc};
use kube::{api::ObjectMeta, ResourceExt};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Start(LastOperationType),
    Success(LastOperationType),
    Error(LastOperationType, String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub severity: EventSeverity,
    pub reason: ShootEventReason,
    pub message: String,
}

#[derive(Default)]
pub struct FakeRecorder {
    calls: Mutex<Vec<Call>>,
    events: Mutex<Vec<RecordedEvent>>,
    fail_on: Option<Phase>,
}

impl FakeRecorder {
    pub fn failing_on(phase: Phase) -> Self {
        Self {
            fail_on: Some(phase),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, phase: Phase, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail_on == Some(phase) {
            bail!("the object has been modified; please apply your changes to the latest version");
        }
        Ok(())
    }
}

#[async_trait]
impl StatusRecorder for FakeRecorder {
    async fn record_start(
        &self,
        _shoot: &ShootCrd,
        operation: LastOperationType,
        operation_id: &str,
    ) -> Result<()> {
        assert_eq!(operation_id.len(), 8);
        self.record(Phase::Start, Call::Start(operation))
    }

    async fn record_success(&self, _shoot: &ShootCrd, operation: LastOperationType) -> Result<()> {
        self.record(Phase::Success, Call::Success(operation))
    }

    async fn record_error(
        &self,
        _shoot: &ShootCrd,
        operation: LastOperationType,
        description: &str,
    ) -> Result<()> {
        self.record(Phase::Error, Call::Error(operation, description.into()))
    }

    async fn event(
        &self,
        _shoot: &ShootCrd,
        severity: EventSeverity,
        reason: ShootEventReason,
        message: String,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            severity,
            reason,
            message,
        })
    }
}

pub struct FakeFlow {
    result: Result<(), FlowError>,
    calls: AtomicUsize,
}

impl FakeFlow {
    pub fn succeeding() -> Self {
        Self {
            result: Ok(()),
            calls: AtomicUsize::default(),
        }
    }

    pub fn failing(description: &str) -> Self {
        Self {
            result: Err(FlowError::new(description)),
            calls: AtomicUsize::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Flow for FakeFlow {
    async fn execute(&self, _shoot: &ShootCrd) -> Result<(), FlowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

pub struct Fixture {
    pub recorder: Arc<FakeRecorder>,
    pub reconciler: Arc<FakeFlow>,
    pub deleter: Arc<FakeFlow>,
}

impl Fixture {
    pub fn new(recorder: FakeRecorder, reconciler: FakeFlow, deleter: FakeFlow) -> Self {
        Self {
            recorder: Arc::new(recorder),
            reconciler: Arc::new(reconciler),
            deleter: Arc::new(deleter),
        }
    }

    pub fn lifecycle(&self) -> ShootLifecycle {
        ShootLifecycle::new(
            self.recorder.clone(),
            self.reconciler.clone(),
            self.deleter.clone(),
        )
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new(
            FakeRecorder::default(),
            FakeFlow::succeeding(),
            FakeFlow::succeeding(),
        )
    }
}

pub const NAMESPACE: &str = "garden-core";
pub const NAME: &str = "dev";

pub fn shoot(generation: i64) -> ShootCrd {
    ShootCrd {
        metadata: ObjectMeta {
            name: Some(NAME.into()),
            namespace: Some(NAMESPACE.into()),
            generation: Some(generation),
            finalizers: Some(vec![ShootCrd::FINALIZER_NAME.into()]),
            ..Default::default()
        },
        spec: ShootSpec::default(),
        status: None,
    }
}

pub fn with_last_operation(
    mut shoot: ShootCrd,
    type_: LastOperationType,
    state: LastOperationState,
    observed_generation: i64,
) -> ShootCrd {
    shoot.status = Some(ShootStatus {
        observed_generation: Some(observed_generation),
        last_operation: Some(LastOperation {
            type_,
            state,
            description: String::default(),
            progress: 100,
            last_update_time: Utc::now(),
        }),
        ..Default::default()
    });
    shoot
}

pub fn terminating(mut shoot: ShootCrd, confirmation: Option<String>) -> ShootCrd {
    let timestamp = Time(Utc::now());
    if let Some(value) = confirmation {
        shoot
            .annotations_mut()
            .insert(ShootCrd::ANNOTATION_CONFIRM_DELETION.into(), value);
    }
    shoot.metadata.deletion_timestamp = Some(timestamp);
    shoot
}

pub fn confirmed(shoot: ShootCrd) -> ShootCrd {
    let mut shoot = terminating(shoot, None);
    let value = deletion_confirmation_value(shoot.metadata.deletion_timestamp.as_ref().unwrap());
    shoot
        .annotations_mut()
        .insert(ShootCrd::ANNOTATION_CONFIRM_DELETION.into(), value);
    shoot
}
