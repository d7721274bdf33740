use std::{marker::PhantomData, sync::Arc, time::Duration};

use ark_core::signal::FunctionSignal;
use futures::StreamExt;
use kube::{
    runtime::{
        reflector::{store::Writer, ObjectRef},
        watcher::{watcher, Config, Event},
    },
    Api, Resource, ResourceExt,
};
use tokio::{select, time::sleep};
use tracing::{debug, error, info, warn};

use super::{object_key, queue::WorkQueue, Ctx};

/// Translates change notifications of `C::Data` into work queue insertions.
pub struct EventSource<C> {
    queue: Arc<WorkQueue<String>>,
    _ctx: PhantomData<fn() -> C>,
}

impl<C> EventSource<C>
where
    C: Ctx,
{
    pub fn new(queue: Arc<WorkQueue<String>>) -> Self {
        Self {
            queue,
            _ctx: PhantomData,
        }
    }

    pub fn on_add(&self, data: &<C as Ctx>::Data) {
        self.enqueue(data)
    }

    pub fn on_update(&self, old: &<C as Ctx>::Data, new: &<C as Ctx>::Data) {
        let name = new.name_any();
        if let Ok(old) = ::serde_json::to_string(old) {
            debug!("{name}: old: {old}");
        }
        if let Ok(new) = ::serde_json::to_string(new) {
            debug!("{name}: new: {new}");
        }

        // The periodic reconciliation is handled by the dispatcher, so updates
        // which did not touch the spec must not requeue the object; otherwise
        // our own status writes would trigger themselves forever.
        if new.meta().generation == <C as Ctx>::observed_generation(new) {
            debug!(
                "Do not need to do anything as the update event occurred due to .status field changes: {name}"
            );
            return;
        }

        self.enqueue(new)
    }

    pub fn on_delete(&self, data: &<C as Ctx>::Data) {
        self.enqueue(data)
    }

    fn enqueue(&self, data: &<C as Ctx>::Data) {
        match object_key(data) {
            Some(key) => self.queue.add(key),
            None => {
                let kind = <<C as Ctx>::Data as Resource>::kind(&());
                error!("couldn't get key for {kind} object: {data:?}");
            }
        }
    }

    /// Routes a watch event into the local cache and then into the handlers.
    pub fn handle_event(
        &self,
        writer: &mut Writer<<C as Ctx>::Data>,
        event: Event<<C as Ctx>::Data>,
    ) {
        let old = match &event {
            Event::Apply(data) => writer.as_reader().get(&ObjectRef::from_obj(data)),
            _ => None,
        };

        // keep the cache ahead of the queue so that workers resolve the newest object
        writer.apply_watcher_event(&event);

        match event {
            Event::Apply(data) => match old {
                Some(old) => self.on_update(&old, &data),
                None => self.on_add(&data),
            },
            Event::InitApply(data) => self.on_add(&data),
            Event::Delete(data) => self.on_delete(&data),
            Event::Init | Event::InitDone => (),
        }
    }

    pub async fn watch_forever(
        &self,
        api: Api<<C as Ctx>::Data>,
        mut writer: Writer<<C as Ctx>::Data>,
        signal: FunctionSignal,
    ) {
        let kind = <<C as Ctx>::Data as Resource>::kind(&());
        info!("Watching {kind} objects...");

        while !signal.is_terminating() {
            let mut stream = watcher(api.clone(), Config::default()).boxed();
            let error = loop {
                let next = select! {
                    next = stream.next() => next,
                    () = signal.wait_to_terminate() => return,
                };
                match next {
                    Some(Ok(event)) => self.handle_event(&mut writer, event),
                    Some(Err(error)) => break error.to_string(),
                    None => break "watch stream has been closed".into(),
                }
            };
            error!("failed to watch {kind} objects: {error}");

            let interval = Duration::from_secs(5);
            warn!("restarting {kind} watcher in {interval:?}...");
            select! {
                () = sleep(interval) => (),
                () = signal.wait_to_terminate() => return,
            }
        }
    }
}
