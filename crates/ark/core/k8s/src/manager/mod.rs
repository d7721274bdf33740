pub mod queue;
pub mod source;

use std::{fmt, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Result};
use ark_core::signal::FunctionSignal;
use async_trait::async_trait;
use futures::future::join_all;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Patch, PatchParams, PostParams},
    runtime::reflector::{self, ObjectRef, Store},
    Api, Client, CustomResourceExt, Error, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tokio::{join, select, spawn};
use tracing::{debug, error, info, info_span, warn, Instrument};

use self::{queue::WorkQueue, source::EventSource};

/// The result of a single successful reconciliation attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Something was done; the object is scheduled again.
    Reconciled,
    /// Nothing was done by policy; the object is scheduled again.
    Skipped(&'static str),
    /// The object no longer needs this controller; its key is dropped.
    Forget,
}

#[async_trait]
pub trait Ctx
where
    Self: 'static + Send + Sync,
{
    type Data: 'static
        + Send
        + Sync
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Resource<DynamicType = ()>;

    const NAME: &'static str;
    const FINALIZER_NAME: &'static str = "";

    /// Returns the generation recorded by the last reconciliation, if any.
    fn observed_generation(data: &<Self as Ctx>::Data) -> Option<i64>;

    /// Returns the delay until the next reconciliation of the given object.
    ///
    /// `data` is `None` when the object could not be resolved.
    fn next_sync(&self, data: Option<&<Self as Ctx>::Data>, error_occurred: bool) -> Duration;

    async fn reconcile(&self, data: Arc<<Self as Ctx>::Data>) -> Result<Outcome>;

    async fn try_spawn(
        self: Arc<Self>,
        api: Api<<Self as Ctx>::Data>,
        workers: usize,
        signal: FunctionSignal,
    ) -> Result<()>
    where
        Self: Sized,
    {
        let kind = <<Self as Ctx>::Data as Resource>::kind(&());

        let (reader, writer) = reflector::store();
        let queue = Arc::new(WorkQueue::default());
        let source = EventSource::<Self>::new(queue.clone());
        let manager = Arc::new(Manager::new(
            self,
            queue.clone(),
            Arc::new(StoreResolver::new(reader.clone())),
        ));

        let watch = source.watch_forever(api, writer, signal.clone());
        let work = async {
            info!("Waiting for {kind} cache to be synced...");
            let is_ready = select! {
                biased;
                () = signal.wait_to_terminate() => false,
                result = reader.wait_until_ready() => result.is_ok(),
            };
            if is_ready {
                info!("Starting {workers} workers for {kind}...");
                manager.run_workers(workers).await;
            }
        };
        let shutdown = async {
            signal.wait_to_terminate().await;
            queue.shut_down();
        };

        join!(watch, work, shutdown);
        info!("Stopped {kind} manager");
        Ok(())
    }

    async fn init_crd(client: Client) -> Result<()>
    where
        <Self as Ctx>::Data: CustomResourceExt,
    {
        let api = Api::<CustomResourceDefinition>::all(client);
        let crd = <Self as Ctx>::Data::crd();
        let name = crd.name_any();

        if api.get_opt(&name).await?.is_none() {
            let pp = PostParams {
                dry_run: false,
                field_manager: Some(<Self as Ctx>::NAME.into()),
            };
            api.create(&pp, &crd).await?;

            info!("Created CRD: {name}");
        } else {
            let pp = PatchParams {
                dry_run: false,
                force: true,
                field_manager: Some(<Self as Ctx>::NAME.into()),
                ..Default::default()
            };
            api.patch(&name, &pp, &Patch::Apply(&crd)).await?;

            info!("Updated CRD: {name}");
        }
        Ok(())
    }

    async fn add_finalizer(
        api: &Api<<Self as Ctx>::Data>,
        data: &<Self as Ctx>::Data,
    ) -> Result<(), Error>
    where
        Self: Sized,
    {
        if data
            .finalizers()
            .iter()
            .any(|finalizer| finalizer == <Self as Ctx>::FINALIZER_NAME)
        {
            return Ok(());
        }

        let mut finalizers = data.finalizers().to_vec();
        finalizers.push(<Self as Ctx>::FINALIZER_NAME.into());
        <Self as Ctx>::patch_finalizers(api, data, finalizers).await
    }

    async fn remove_finalizer(
        api: &Api<<Self as Ctx>::Data>,
        data: &<Self as Ctx>::Data,
    ) -> Result<(), Error>
    where
        Self: Sized,
    {
        if !data
            .finalizers()
            .iter()
            .any(|finalizer| finalizer == <Self as Ctx>::FINALIZER_NAME)
        {
            return Ok(());
        }

        let finalizers = data
            .finalizers()
            .iter()
            .filter(|finalizer| *finalizer != <Self as Ctx>::FINALIZER_NAME)
            .cloned()
            .collect();
        <Self as Ctx>::patch_finalizers(api, data, finalizers).await
    }

    async fn patch_finalizers(
        api: &Api<<Self as Ctx>::Data>,
        data: &<Self as Ctx>::Data,
        finalizers: Vec<String>,
    ) -> Result<(), Error>
    where
        Self: Sized,
    {
        let patch = Patch::Merge(json!({
            "apiVersion": <<Self as Ctx>::Data as Resource>::api_version(&()),
            "kind": <<Self as Ctx>::Data as Resource>::kind(&()),
            "metadata": {
                "finalizers": finalizers,
            },
        }));
        let pp = PatchParams::apply(<Self as Ctx>::NAME);
        api.patch(&data.name_any(), &pp, &patch).await?;
        Ok(())
    }
}

/// Looks up the current state of an object by its identity.
#[async_trait]
pub trait Resolver<K>
where
    Self: Send + Sync,
{
    /// Returns `None` if the object does not exist (anymore).
    async fn resolve(&self, namespace: Option<&str>, name: &str) -> Result<Option<Arc<K>>>;
}

/// Resolves objects from the local cache fed by the watcher.
pub struct StoreResolver<K>
where
    K: 'static + Resource<DynamicType = ()> + Clone,
{
    store: Store<K>,
}

impl<K> StoreResolver<K>
where
    K: 'static + Resource<DynamicType = ()> + Clone,
{
    pub const fn new(store: Store<K>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<K> Resolver<K> for StoreResolver<K>
where
    K: 'static + Send + Sync + Resource<DynamicType = ()> + Clone,
{
    async fn resolve(&self, namespace: Option<&str>, name: &str) -> Result<Option<Arc<K>>> {
        let object = match namespace {
            Some(namespace) => ObjectRef::new(name).within(namespace),
            None => ObjectRef::new(name),
        };
        Ok(self.store.get(&object))
    }
}

/// Drains the work queue with a pool of workers.
pub struct Manager<C>
where
    C: Ctx,
{
    ctx: Arc<C>,
    queue: Arc<WorkQueue<String>>,
    resolver: Arc<dyn Resolver<<C as Ctx>::Data>>,
}

impl<C> Manager<C>
where
    C: Ctx,
{
    pub fn new(
        ctx: Arc<C>,
        queue: Arc<WorkQueue<String>>,
        resolver: Arc<dyn Resolver<<C as Ctx>::Data>>,
    ) -> Self {
        Self {
            ctx,
            queue,
            resolver,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue<String>> {
        &self.queue
    }

    pub async fn run_workers(self: Arc<Self>, workers: usize) {
        let workers = (0..workers.max(1)).map(|_| {
            let manager = self.clone();
            spawn(async move { while manager.process_next().await {} })
        });

        for result in join_all(workers).await {
            if let Err(error) = result {
                error!("worker has been stopped unexpectedly: {error}");
            }
        }
    }

    /// Processes a single key.
    ///
    /// Returns `false` once the queue is shutting down.
    pub async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let kind = <<C as Ctx>::Data as Resource>::kind(&());
        self.sync_key(&key)
            .instrument(info_span!("reconcile", %kind, %key))
            .await;
        self.queue.done(&key);
        true
    }

    async fn sync_key(&self, key: &String) {
        let kind = <<C as Ctx>::Data as Resource>::kind(&());

        let (namespace, name) = match split_key(key) {
            Ok(parsed) => parsed,
            Err(error) => {
                error!("{error}");
                self.queue.forget(key);
                return;
            }
        };

        let data = match self.resolver.resolve(namespace, name).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!("Skipping {kind} {key:?} because it has been deleted");
                self.queue.forget(key);
                return;
            }
            Err(error) => {
                let delay = self.ctx.next_sync(None, true);
                warn!("failed to resolve {kind} {key:?}: {error}");
                self.queue.add_rate_limited(key.clone(), delay);
                return;
            }
        };

        let result = self.ctx.reconcile(data.clone()).await;
        let error_occurred = match result {
            Ok(Outcome::Forget) => {
                debug!("Forgetting {kind} {key:?}");
                self.queue.forget(key);
                return;
            }
            Ok(Outcome::Skipped(reason)) => {
                debug!("Skipped {kind} {key:?}: {reason}");
                false
            }
            Ok(Outcome::Reconciled) => false,
            Err(error) => {
                warn!("failed to reconcile {kind} {key:?}: {error}");
                true
            }
        };

        let delay = self.ctx.next_sync(Some(&data), error_occurred);
        if error_occurred {
            self.queue.add_rate_limited(key.clone(), delay);
        } else {
            self.queue.forget(key);
            self.queue.add_after(key.clone(), delay);
        }
        info!("Scheduled next reconciliation for {kind} '{key}' in {delay:?}");
    }
}

/// Returns the `namespace/name` key of the object, or `name` if it is not namespaced.
pub fn object_key<K>(data: &K) -> Option<String>
where
    K: Resource,
{
    let meta = data.meta();
    let name = meta.name.as_deref().filter(|name| !name.is_empty())?;
    match meta.namespace.as_deref() {
        Some(namespace) if !namespace.is_empty() => Some(format!("{namespace}/{name}")),
        _ => Some(name.into()),
    }
}

/// Splits a key built by [`object_key`] into its namespace and name.
pub fn split_key(key: &str) -> Result<(Option<&str>, &str)> {
    let mut parts = key.split('/');
    let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) => (None, name),
        (Some(namespace), Some(name), None) => (Some(namespace).filter(|ns| !ns.is_empty()), name),
        _ => bail!("unexpected key format: {key:?}"),
    };

    if name.is_empty() {
        return Err(anyhow!("unexpected key format: {key:?}"));
    }
    Ok((namespace, name))
}
