use ark_core_k8s::manager::{object_key, Ctx as _};
use async_trait::async_trait;
use garden_api::shoot::ShootCrd;
use kube::{Api, Client, ResourceExt};
use thiserror::Error;
use tracing::{info, instrument, Level};

/// A delegated action failed; only its human-readable description is kept.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{description}")]
pub struct FlowError {
    pub description: String,
}

impl FlowError {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

/// An opaque action driving a shoot towards its desired state.
#[async_trait]
pub trait Flow
where
    Self: Send + Sync,
{
    async fn execute(&self, shoot: &ShootCrd) -> Result<(), FlowError>;
}

fn api(client: &Client, shoot: &ShootCrd) -> Result<Api<ShootCrd>, FlowError> {
    shoot
        .namespace()
        .map(|namespace| Api::namespaced(client.clone(), &namespace))
        .ok_or_else(|| FlowError::new(format!("shoot {:?} has no namespace", shoot.name_any())))
}

/// Takes ownership of the shoot so that its deletion waits for the controller.
pub struct EnsureFinalizer {
    client: Client,
}

impl EnsureFinalizer {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Flow for EnsureFinalizer {
    #[instrument(level = Level::INFO, skip_all, fields(name = %shoot.name_any(), namespace = shoot.namespace()), err(Display))]
    async fn execute(&self, shoot: &ShootCrd) -> Result<(), FlowError> {
        if shoot.has_finalizer() {
            return Ok(());
        }

        let api = api(&self.client, shoot)?;
        crate::ctx::Ctx::add_finalizer(&api, shoot)
            .await
            .map_err(|error| FlowError::new(format!("failed to add finalizer: {error}")))?;

        info!("added finalizer tag ({})", object_key(shoot).unwrap_or_default());
        Ok(())
    }
}

/// Releases the shoot so that the garbage collector can remove it.
pub struct ReleaseFinalizer {
    client: Client,
}

impl ReleaseFinalizer {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Flow for ReleaseFinalizer {
    #[instrument(level = Level::INFO, skip_all, fields(name = %shoot.name_any(), namespace = shoot.namespace()), err(Display))]
    async fn execute(&self, shoot: &ShootCrd) -> Result<(), FlowError> {
        if !shoot.has_finalizer() {
            return Ok(());
        }

        let api = api(&self.client, shoot)?;
        crate::ctx::Ctx::remove_finalizer(&api, shoot)
            .await
            .map_err(|error| FlowError::new(format!("failed to remove finalizer: {error}")))?;

        info!("finalizing ({})", object_key(shoot).unwrap_or_default());
        Ok(())
    }
}
