use std::{sync::Arc, time::Duration};

use anyhow::Result;
use ark_core_k8s::manager::Outcome;
use async_trait::async_trait;
use garden_api::{config::ShootControllerArgs, shoot::ShootCrd};

use crate::{lifecycle::ShootLifecycle, scheduler};

pub struct Ctx {
    config: ShootControllerArgs,
    lifecycle: ShootLifecycle,
}

impl Ctx {
    pub fn new(config: ShootControllerArgs, lifecycle: ShootLifecycle) -> Self {
        Self { config, lifecycle }
    }
}

#[async_trait]
impl ::ark_core_k8s::manager::Ctx for Ctx {
    type Data = ShootCrd;

    const NAME: &'static str = crate::consts::NAME;
    const FINALIZER_NAME: &'static str =
        <Self as ::ark_core_k8s::manager::Ctx>::Data::FINALIZER_NAME;

    fn observed_generation(data: &<Self as ::ark_core_k8s::manager::Ctx>::Data) -> Option<i64> {
        data.observed_generation()
    }

    fn next_sync(
        &self,
        data: Option<&<Self as ::ark_core_k8s::manager::Ctx>::Data>,
        error_occurred: bool,
    ) -> Duration {
        scheduler::next_delay(data, error_occurred, &self.config)
    }

    async fn reconcile(
        &self,
        data: Arc<<Self as ::ark_core_k8s::manager::Ctx>::Data>,
    ) -> Result<Outcome> {
        self.lifecycle.reconcile(&data).await.map_err(Into::into)
    }
}
