use std::{str::FromStr, time::Duration};

use duration_string::DurationString;
use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::Time,
    chrono::{DateTime, SecondsFormat, Utc},
};
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema, CustomResource)]
#[kube(
    group = "garden.ulagbulag.io",
    version = "v1alpha1",
    kind = "Shoot",
    root = "ShootCrd",
    status = "ShootStatus",
    shortname = "shoot",
    namespaced,
    printcolumn = r#"{
        "name": "operation",
        "type": "string",
        "description": "type of the last operation",
        "jsonPath": ".status.lastOperation.type"
    }"#,
    printcolumn = r#"{
        "name": "state",
        "type": "string",
        "description": "state of the last operation",
        "jsonPath": ".status.lastOperation.state"
    }"#,
    printcolumn = r#"{
        "name": "progress",
        "type": "integer",
        "description": "progress of the last operation",
        "jsonPath": ".status.lastOperation.progress"
    }"#,
    printcolumn = r#"{
        "name": "created-at",
        "type": "date",
        "description": "created time",
        "jsonPath": ".metadata.creationTimestamp"
    }"#,
    printcolumn = r#"{
        "name": "updated-at",
        "type": "date",
        "description": "updated time",
        "jsonPath": ".status.lastOperation.lastUpdateTime"
    }"#
)]
#[serde(rename_all = "camelCase")]
pub struct ShootSpec {
    #[serde(default)]
    pub cloud: ShootCloudSpec,
    #[serde(default)]
    pub kubernetes: ShootKubernetesSpec,
    #[serde(default)]
    pub hibernated: bool,
}

impl ShootCrd {
    pub const FINALIZER_NAME: &'static str = "garden.ulagbulag.io/finalizer-shoots";

    pub const ANNOTATION_CONFIRM_DELETION: &'static str =
        "confirmation.garden.ulagbulag.io/deletion-timestamp";
    pub const ANNOTATION_SYNC_PERIOD: &'static str = "shoot.garden.ulagbulag.io/sync-period";

    pub fn has_finalizer(&self) -> bool {
        self.finalizers()
            .iter()
            .any(|finalizer| finalizer == Self::FINALIZER_NAME)
    }

    pub fn is_terminating(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// Returns `true` if the deletion has been confirmed by the owner.
    ///
    /// The confirmation annotation must carry exactly the deletion timestamp,
    /// so a stale confirmation of a former incarnation is never honored.
    pub fn is_deletion_confirmed(&self) -> bool {
        let Some(timestamp) = self.meta().deletion_timestamp.as_ref() else {
            return false;
        };
        self.annotations()
            .get(Self::ANNOTATION_CONFIRM_DELETION)
            .is_some_and(|value| *value == deletion_confirmation_value(timestamp))
    }

    /// Returns the custom sync period requested by the owner, if it is valid.
    pub fn sync_period_overwrite(&self) -> Option<Duration> {
        self.annotations()
            .get(Self::ANNOTATION_SYNC_PERIOD)
            .and_then(|value| parse_sync_period(value))
    }

    pub fn generation(&self) -> Option<i64> {
        self.meta().generation
    }

    pub fn observed_generation(&self) -> Option<i64> {
        self.status.as_ref()?.observed_generation
    }

    pub fn last_operation(&self) -> Option<&LastOperation> {
        self.status.as_ref()?.last_operation.as_ref()
    }
}

/// Encodes a deletion timestamp the way it must appear in the confirmation annotation.
pub fn deletion_confirmation_value(timestamp: &Time) -> String {
    timestamp.0.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_sync_period(value: &str) -> Option<Duration> {
    DurationString::from_str(value.trim()).ok().map(Into::into)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootCloudSpec {
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub region: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootKubernetesSpec {
    #[serde(default)]
    pub version: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    #[serde(rename = "type")]
    pub type_: LastOperationType,
    pub state: LastOperationState,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub progress: i32,
    #[serde(default)]
    pub last_update_time: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub description: String,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    EnumString,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub enum LastOperationType {
    Create,
    Reconcile,
    Delete,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    EnumString,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub enum LastOperationState {
    Processing,
    Succeeded,
    /// The operation has failed and will not be retried until the spec changes.
    Failed,
    /// The operation has failed and will be retried.
    Error,
}

/// Reasons of the events recorded on a [`ShootCrd`].
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum ShootEventReason {
    Reconciling,
    Reconciled,
    ReconcileError,
    Deleting,
    Deleted,
    DeleteError,
}
