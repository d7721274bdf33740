use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{anyhow, Result};
use tokio::sync::Notify;
use tracing::info;

/// A cooperative termination flag shared by every task of a process.
#[derive(Clone, Debug, Default)]
pub struct FunctionSignal {
    inner: Arc<FunctionSignalInner>,
}

#[derive(Debug, Default)]
struct FunctionSignalInner {
    is_terminating: AtomicBool,
    notify: Notify,
}

impl FunctionSignal {
    pub fn trap_on_sigint(&self) -> Result<()> {
        let signal = self.clone();
        ::ctrlc::set_handler(move || signal.terminate())
            .map_err(|error| anyhow!("failed to set SIGINT handler: {error}"))
    }

    pub fn terminate(&self) {
        if !self.inner.is_terminating.swap(true, Ordering::SeqCst) {
            info!("Gracefully shutting down...");
        }
        self.inner.notify.notify_waiters()
    }

    pub fn is_terminating(&self) -> bool {
        self.inner.is_terminating.load(Ordering::SeqCst)
    }

    pub async fn wait_to_terminate(&self) {
        loop {
            // register before checking the flag so a concurrent `terminate` is never missed
            let notified = self.inner.notify.notified();
            if self.is_terminating() {
                break;
            }
            notified.await;
        }
    }
}
