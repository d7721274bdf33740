use std::{process::exit, sync::Arc};

use anyhow::Result;
use ark_core::{signal::FunctionSignal, tracer};
use ark_core_k8s::manager::Ctx as _;
use clap::Parser;
use garden_api::{config::ShootControllerArgs, shoot::ShootCrd};
use garden_operator::{
    consts::NAME,
    ctx::Ctx,
    flow::{EnsureFinalizer, ReleaseFinalizer},
    lifecycle::ShootLifecycle,
    status::KubeStatusRecorder,
};
use kube::{Api, Client};
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[command(flatten)]
    controller: ShootControllerArgs,
}

async fn try_main(args: Args) -> Result<()> {
    let Args { controller: config } = args;
    config.validate()?;

    let signal = FunctionSignal::default();
    signal.trap_on_sigint()?;

    let client = Client::try_default().await?;
    if config.install_crd {
        Ctx::init_crd(client.clone()).await?;
    }

    let api = match config.namespace.as_deref() {
        Some(namespace) => {
            info!("Watching shoots in namespace {namespace:?}");
            Api::<ShootCrd>::namespaced(client.clone(), namespace)
        }
        None => Api::<ShootCrd>::all(client.clone()),
    };

    let lifecycle = ShootLifecycle::new(
        Arc::new(KubeStatusRecorder::new(client.clone())),
        Arc::new(EnsureFinalizer::new(client.clone())),
        Arc::new(ReleaseFinalizer::new(client)),
    );
    let workers = config.concurrent_syncs;
    let ctx = Arc::new(Ctx::new(config, lifecycle));
    ctx.try_spawn(api, workers, signal).await
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracer::init_once();
    info!("Welcome to {NAME}!");

    match try_main(args).await {
        Ok(()) => {
            info!("Terminated.");
            tracer::shutdown();
        }
        Err(error) => {
            error!("{error}");
            tracer::shutdown();
            exit(1)
        }
    }
}
