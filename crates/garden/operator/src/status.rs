use anyhow::{anyhow, Result};
use ark_core::env::infer_opt;
use ark_core_k8s::manager::object_key;
use async_trait::async_trait;
use garden_api::shoot::{LastOperationState, LastOperationType, ShootCrd, ShootEventReason};
use k8s_openapi::chrono::{DateTime, Utc};
use kube::{
    api::{Patch, PatchParams},
    runtime::events::{Event, EventType, Recorder, Reporter},
    Api, Client, Error, Resource, ResourceExt,
};
use serde_json::{json, Map, Value};
use strum::Display;
use tracing::{debug, instrument, warn, Level};

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// Persists the outcome of each phase of an operation into the shoot status.
#[async_trait]
pub trait StatusRecorder
where
    Self: Send + Sync,
{
    async fn record_start(
        &self,
        shoot: &ShootCrd,
        operation: LastOperationType,
        operation_id: &str,
    ) -> Result<()>;

    async fn record_success(&self, shoot: &ShootCrd, operation: LastOperationType) -> Result<()>;

    async fn record_error(
        &self,
        shoot: &ShootCrd,
        operation: LastOperationType,
        description: &str,
    ) -> Result<()>;

    /// Publishes an event; failures are logged and never surfaced.
    async fn event(
        &self,
        shoot: &ShootCrd,
        severity: EventSeverity,
        reason: ShootEventReason,
        message: String,
    );
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatusTransition<'a> {
    Start { operation_id: &'a str },
    Success,
    Error { description: &'a str },
}

/// Builds the merge patch of the status subresource for a transition.
pub fn status_patch(
    shoot: &ShootCrd,
    operation: LastOperationType,
    transition: StatusTransition<'_>,
    now: DateTime<Utc>,
) -> Value {
    let mut last_operation = Map::default();
    last_operation.insert("type".into(), json!(operation));
    last_operation.insert("lastUpdateTime".into(), json!(now));

    let mut status = Map::default();
    match transition {
        StatusTransition::Start { operation_id } => {
            last_operation.insert("state".into(), json!(LastOperationState::Processing));
            last_operation.insert("description".into(), json!(format!("{operation} start")));
            last_operation.insert("progress".into(), json!(0));

            // a deletion does not process the spec
            if operation != LastOperationType::Delete {
                if let Some(generation) = shoot.generation() {
                    status.insert("observedGeneration".into(), json!(generation));
                }
            }
            status.insert("operationId".into(), json!(operation_id));
        }
        StatusTransition::Success => {
            let description = match operation {
                LastOperationType::Create => "Shoot cluster has been successfully created",
                LastOperationType::Reconcile => {
                    "Shoot cluster state has been successfully reconciled"
                }
                LastOperationType::Delete => "Shoot cluster has been successfully deleted",
            };
            last_operation.insert("state".into(), json!(LastOperationState::Succeeded));
            last_operation.insert("description".into(), json!(description));
            last_operation.insert("progress".into(), json!(100));
            status.insert("lastError".into(), Value::Null);
        }
        StatusTransition::Error { description } => {
            // the progress of the failed attempt is kept as is
            last_operation.insert("state".into(), json!(LastOperationState::Failed));
            last_operation.insert("description".into(), json!(description));
            status.insert("lastError".into(), json!({ "description": description }));
        }
    }
    status.insert("lastOperation".into(), Value::Object(last_operation));

    json!({
        "apiVersion": ShootCrd::api_version(&()),
        "kind": ShootCrd::kind(&()),
        "status": status,
    })
}

/// Returns `true` if a failed status write only means that a deleted shoot is gone.
///
/// Releasing the finalizer may have removed the shoot before its success is recorded.
pub fn is_already_removed(
    error: &Error,
    operation: LastOperationType,
    transition: StatusTransition<'_>,
) -> bool {
    matches!(error, Error::Api(response) if response.code == 404)
        && operation == LastOperationType::Delete
        && transition == StatusTransition::Success
}

/// Records shoot transitions through the Kubernetes API.
pub struct KubeStatusRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeStatusRecorder {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: crate::consts::NAME.into(),
                instance: infer_opt("POD_NAME"),
            },
        }
    }

    #[instrument(level = Level::INFO, skip_all, fields(name = %shoot.name_any(), namespace = shoot.namespace(), %operation), err(Display))]
    async fn patch(
        &self,
        shoot: &ShootCrd,
        operation: LastOperationType,
        transition: StatusTransition<'_>,
    ) -> Result<()> {
        let name = shoot.name_any();
        let namespace = shoot
            .namespace()
            .ok_or_else(|| anyhow!("shoot {name:?} has no namespace"))?;
        let api = Api::<ShootCrd>::namespaced(self.client.clone(), &namespace);

        let patch = Patch::Merge(status_patch(shoot, operation, transition, Utc::now()));
        let pp = PatchParams::apply(crate::consts::NAME);
        match api.patch_status(&name, &pp, &patch).await {
            Ok(_) => Ok(()),
            Err(error) if is_already_removed(&error, operation, transition) => {
                debug!("shoot {namespace}/{name} has already been removed");
                Ok(())
            }
            Err(error) => Err(anyhow!(
                "failed to update the status of shoot {namespace}/{name}: {error}"
            )),
        }
    }
}

#[async_trait]
impl StatusRecorder for KubeStatusRecorder {
    async fn record_start(
        &self,
        shoot: &ShootCrd,
        operation: LastOperationType,
        operation_id: &str,
    ) -> Result<()> {
        self.patch(shoot, operation, StatusTransition::Start { operation_id })
            .await
    }

    async fn record_success(&self, shoot: &ShootCrd, operation: LastOperationType) -> Result<()> {
        self.patch(shoot, operation, StatusTransition::Success).await
    }

    async fn record_error(
        &self,
        shoot: &ShootCrd,
        operation: LastOperationType,
        description: &str,
    ) -> Result<()> {
        self.patch(shoot, operation, StatusTransition::Error { description })
            .await
    }

    async fn event(
        &self,
        shoot: &ShootCrd,
        severity: EventSeverity,
        reason: ShootEventReason,
        message: String,
    ) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            shoot.object_ref(&()),
        );
        let event = Event {
            type_: match severity {
                EventSeverity::Normal => EventType::Normal,
                EventSeverity::Warning => EventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message),
            action: reason.to_string(),
            secondary: None,
        };

        if let Err(error) = recorder.publish(event).await {
            let key = object_key(shoot).unwrap_or_default();
            warn!("failed to publish {reason} event of shoot {key}: {error}");
        }
    }
}
