use std::sync::Arc;

use ark_core_k8s::manager::{object_key, Outcome};
use garden_api::shoot::{LastOperationState, LastOperationType, ShootCrd, ShootEventReason};
use kube::ResourceExt;
use strum::{Display, IntoStaticStr};
use thiserror::Error;
use tracing::{debug, error, info, instrument, Level};
use uuid::Uuid;

use crate::{
    flow::{Flow, FlowError},
    status::{EventSeverity, StatusRecorder},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to record {phase} of {operation}: {source}")]
    StatusUpdate {
        operation: LastOperationType,
        phase: Phase,
        #[source]
        source: Box<dyn ::std::error::Error + Send + Sync>,
    },
    #[error("{0}")]
    FlowFailed(String),
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Start,
    Success,
    Error,
}

/// The state of a shoot, derived from its last operation.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum LifecycleState {
    NoOperationYet,
    Creating,
    Reconciling,
    Deleting,
    Succeeded,
    Failed,
}

impl LifecycleState {
    pub fn of(shoot: &ShootCrd) -> Self {
        match shoot.last_operation() {
            None => Self::NoOperationYet,
            Some(last) => match last.state {
                LastOperationState::Processing => match last.type_ {
                    LastOperationType::Create => Self::Creating,
                    LastOperationType::Reconcile => Self::Reconciling,
                    LastOperationType::Delete => Self::Deleting,
                },
                LastOperationState::Succeeded => Self::Succeeded,
                LastOperationState::Failed | LastOperationState::Error => Self::Failed,
            },
        }
    }
}

#[derive(Copy, Clone, Debug, Display, IntoStaticStr, PartialEq, Eq)]
pub enum SkipReason {
    DeletionNotConfirmed,
    FailedAndUnchanged,
}

/// What a reconciliation of a shoot should do.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Forget,
    Skip(SkipReason),
    Run(LastOperationType),
}

pub fn decide(shoot: &ShootCrd) -> Decision {
    if shoot.is_terminating() {
        if !shoot.has_finalizer() {
            return Decision::Forget;
        }
        if !shoot.is_deletion_confirmed() {
            return Decision::Skip(SkipReason::DeletionNotConfirmed);
        }
        return Decision::Run(LastOperationType::Delete);
    }

    match shoot.last_operation() {
        None => Decision::Run(LastOperationType::Create),
        Some(last)
            if last.type_ == LastOperationType::Create
                && last.state != LastOperationState::Succeeded =>
        {
            Decision::Run(LastOperationType::Create)
        }
        Some(last)
            if last.state == LastOperationState::Failed
                && shoot.generation() == shoot.observed_generation() =>
        {
            Decision::Skip(SkipReason::FailedAndUnchanged)
        }
        Some(_) => Decision::Run(LastOperationType::Reconcile),
    }
}

pub fn new_operation_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

struct Messages {
    start: (ShootEventReason, &'static str),
    success: (ShootEventReason, &'static str),
    error: ShootEventReason,
}

impl Messages {
    const fn of(operation: LastOperationType) -> Self {
        match operation {
            LastOperationType::Create | LastOperationType::Reconcile => Self {
                start: (
                    ShootEventReason::Reconciling,
                    "Reconciling Shoot cluster state",
                ),
                success: (
                    ShootEventReason::Reconciled,
                    "Reconciled Shoot cluster state",
                ),
                error: ShootEventReason::ReconcileError,
            },
            LastOperationType::Delete => Self {
                start: (ShootEventReason::Deleting, "Deleting Shoot cluster"),
                success: (ShootEventReason::Deleted, "Deleted Shoot cluster"),
                error: ShootEventReason::DeleteError,
            },
        }
    }
}

pub struct ShootLifecycle {
    recorder: Arc<dyn StatusRecorder>,
    reconciler: Arc<dyn Flow>,
    deleter: Arc<dyn Flow>,
}

impl ShootLifecycle {
    pub fn new(
        recorder: Arc<dyn StatusRecorder>,
        reconciler: Arc<dyn Flow>,
        deleter: Arc<dyn Flow>,
    ) -> Self {
        Self {
            recorder,
            reconciler,
            deleter,
        }
    }

    #[instrument(level = Level::INFO, skip_all, fields(name = %shoot.name_any(), namespace = shoot.namespace()), err(Display))]
    pub async fn reconcile(&self, shoot: &ShootCrd) -> Result<Outcome, Error> {
        let key = object_key(shoot).unwrap_or_default();
        let state = LifecycleState::of(shoot);

        match decide(shoot) {
            Decision::Forget => {
                debug!("Shoot {key:?} is being deleted without our finalizer; forgetting it");
                Ok(Outcome::Forget)
            }
            Decision::Skip(SkipReason::DeletionNotConfirmed) => {
                info!(
                    "Deletion of shoot {key:?} is not confirmed yet; set the annotation {:?} to its deletion timestamp",
                    ShootCrd::ANNOTATION_CONFIRM_DELETION,
                );
                Ok(Outcome::Skipped(SkipReason::DeletionNotConfirmed.into()))
            }
            Decision::Skip(SkipReason::FailedAndUnchanged) => {
                info!(
                    "Will not reconcile shoot {key:?} as the last operation has been {state} and the generation has not changed since then"
                );
                Ok(Outcome::Skipped(SkipReason::FailedAndUnchanged.into()))
            }
            Decision::Run(operation) => {
                info!("[SHOOT {operation}] {key} ({state})");
                self.run(shoot, operation)
                    .await
                    .map(|()| Outcome::Reconciled)
            }
        }
    }

    async fn run(&self, shoot: &ShootCrd, operation: LastOperationType) -> Result<(), Error> {
        let flow = match operation {
            LastOperationType::Create | LastOperationType::Reconcile => &self.reconciler,
            LastOperationType::Delete => &self.deleter,
        };
        let messages = Messages::of(operation);
        let operation_id = new_operation_id();

        let (reason, message) = messages.start;
        self.recorder
            .event(
                shoot,
                EventSeverity::Normal,
                reason,
                format!("[{operation_id}] {message}"),
            )
            .await;
        self.recorder
            .record_start(shoot, operation, &operation_id)
            .await
            .map_err(|error| status_update_error(operation, Phase::Start, error))?;

        match flow.execute(shoot).await {
            Ok(()) => {
                let (reason, message) = messages.success;
                self.recorder
                    .event(
                        shoot,
                        EventSeverity::Normal,
                        reason,
                        format!("[{operation_id}] {message}"),
                    )
                    .await;
                self.recorder
                    .record_success(shoot, operation)
                    .await
                    .map_err(|error| status_update_error(operation, Phase::Success, error))
            }
            Err(FlowError { description }) => {
                self.recorder
                    .event(
                        shoot,
                        EventSeverity::Warning,
                        messages.error,
                        format!("[{operation_id}] {description}"),
                    )
                    .await;
                self.recorder
                    .record_error(shoot, operation, &description)
                    .await
                    .map_err(|error| status_update_error(operation, Phase::Error, error))?;
                Err(Error::FlowFailed(description))
            }
        }
    }
}

fn status_update_error(
    operation: LastOperationType,
    phase: Phase,
    error: ::anyhow::Error,
) -> Error {
    error!("could not update the shoot status after {operation} {phase}: {error}");
    Error::StatusUpdate {
        operation,
        phase,
        source: error.into(),
    }
}
