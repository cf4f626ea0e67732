//! Trailing-edge debounce for rapid-fire queries.
//!
//! Search-as-you-type schedules a task per keystroke; only the last one
//! scheduled within the quiescence window actually runs. Earlier pending
//! tasks are aborted before their timer fires, so no fetch is ever issued
//! for an intermediate input.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::debounce";

pub struct Debouncer {
    window: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(None),
        }
    }

    /// Schedule a task to run after the quiescence window, replacing (and
    /// aborting) any task still waiting for its timer.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let window = self.window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            task.await;
        });

        let mut pending = mutex_lock(&self.pending, SOURCE, "schedule");
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
            debug!("Pending debounced task replaced");
        }
    }

    /// Abort the pending task, if any, without scheduling a replacement.
    pub fn cancel(&self) {
        if let Some(previous) = mutex_lock(&self.pending, SOURCE, "cancel").take() {
            previous.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
