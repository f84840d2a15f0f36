//! Quiescence timer for keystroke-driven work.
//!
//! Arming the same [`Debouncer`] again before the delay elapses discards
//! the previously armed work, so a burst of N keystrokes inside the window
//! runs the armed future exactly once. The same primitive drives the
//! suggester's close-grace timer on blur.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    epoch: Arc<AtomicU64>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            epoch: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm `work` to run once the delay has elapsed without another
    /// `schedule` or `cancel` on this instance.
    pub fn schedule<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let gate = Arc::clone(&self.epoch);
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A newer schedule/cancel may have slipped in between the
            // abort below and this timer firing.
            if gate.load(Ordering::SeqCst) == epoch {
                work.await;
            }
        });
        let previous = self.pending.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Drop whatever is armed without running it.
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }
}
