//! Cancelable delayed task
//!
//! A `ScheduledTask` owns one spawned tokio task that sleeps, runs a step,
//! and sleeps again for as long as the step asks it to. Sleeping goes through
//! `tokio::time`, so a paused test clock drives it.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Handle to a spawned chain of delayed steps.
///
/// Dropping the handle detaches the task; only `cancel()` stops it.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `step` after `first_delay`, then again after whatever delay it
    /// returns, until it returns `None`.
    pub fn chain<F, Fut>(first_delay: Duration, mut step: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Option<Duration>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut delay = first_delay;
            loop {
                tokio::time::sleep(delay).await;
                match step().await {
                    Some(next) => delay = next,
                    None => break,
                }
            }
        });
        Self { handle }
    }

    /// Abort the task, including a step that is mid-await.
    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
