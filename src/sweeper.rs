//! Cancellable periodic background job.
//!
//! The limiter registry and the CSRF store both own one of these to expire
//! entries. The task is spawned exactly once at construction and stopped
//! either explicitly through [`PeriodicTask::stop`] or implicitly when the
//! owner is dropped.

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    /// Spawns `job` on the current Tokio runtime, running it every `every`.
    ///
    /// The first run happens one full interval after construction.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<F>(name: &'static str, every: Duration, mut job: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let every = every.max(Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => job(),
                }
            }
            debug!(task = name, "periodic task stopped");
        });
        Self { name, cancel, handle: Mutex::new(Some(handle)) }
    }

    /// Signals the task to exit and waits until it has.
    ///
    /// Safe to call any number of times; later calls return immediately.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(task = self.name, error = %e, "periodic task ended abnormally");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
