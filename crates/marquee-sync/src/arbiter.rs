//! Per-channel request arbitration.
//!
//! A [`RequestChannel`] represents "the current search/load operation for
//! one field or section". Every attempt gets a monotonically increasing
//! sequence number; a completed attempt whose sequence is no longer the
//! latest is reported as [`Outcome::Superseded`] and its result is dropped
//! without touching visible state. This is what makes a slow response to an
//! early keystroke unable to overwrite the results of a faster, later one.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::fetch::CancelToken;

/// Result of one channel attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    Accepted(T),
    Superseded,
}

impl<T> Outcome<T> {
    pub fn accepted(self) -> Option<T> {
        match self {
            Outcome::Accepted(value) => Some(value),
            Outcome::Superseded => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Outcome::Superseded)
    }
}

/// One logical async operation at a time, newest wins.
#[derive(Debug)]
pub struct RequestChannel {
    label: String,
    seq: AtomicU64,
    inflight: Mutex<Option<CancelToken>>,
}

impl RequestChannel {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            seq: AtomicU64::new(0),
            inflight: Mutex::new(None),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run one operation on this channel. The operation receives a fresh
    /// [`CancelToken`]; the previous attempt's token is fired so an
    /// abortable transport can stop early. Whatever the operation returns
    /// is wrapped in [`Outcome::Accepted`] only while its sequence is still
    /// the latest issued on the channel.
    pub async fn attempt<T, F, Fut>(&self, op: F) -> Outcome<T>
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let (seq, token) = self.open();
        let value = op(token).await;
        if self.is_current(seq) {
            Outcome::Accepted(value)
        } else {
            debug!(
                target: "marquee::arbiter",
                channel = %self.label,
                seq,
                "dropping superseded response"
            );
            Outcome::Superseded
        }
    }

    /// Invalidate the current attempt, if any: its result will be reported
    /// as superseded and its transport is asked to stop. Best effort; never
    /// errors if the operation already completed.
    pub fn cancel(&self) {
        self.seq.fetch_add(1, Ordering::SeqCst);
        let token = self.inflight.lock().take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    fn open(&self) -> (u64, CancelToken) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancelToken::new();
        let previous = self.inflight.lock().replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        (seq, token)
    }

    fn is_current(&self, seq: u64) -> bool {
        self.seq.load(Ordering::SeqCst) == seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn newest_attempt_wins_even_when_it_resolves_first() {
        let channel = Arc::new(RequestChannel::new("test"));
        let (release_slow, gate_slow) = oneshot::channel::<()>();

        let slow_channel = Arc::clone(&channel);
        let slow = tokio::spawn(async move {
            slow_channel
                .attempt(|_cancel| async move {
                    let _ = gate_slow.await;
                    "slow"
                })
                .await
        });
        tokio::task::yield_now().await;

        let fast = channel.attempt(|_cancel| async move { "fast" }).await;
        assert_eq!(fast, Outcome::Accepted("fast"));

        release_slow.send(()).unwrap();
        assert_eq!(slow.await.unwrap(), Outcome::Superseded);
    }

    #[tokio::test]
    async fn opening_an_attempt_cancels_the_previous_token() {
        let channel = Arc::new(RequestChannel::new("test"));
        let (_keep, gate) = oneshot::channel::<()>();

        let first_channel = Arc::clone(&channel);
        let first = tokio::spawn(async move {
            first_channel
                .attempt(|cancel| async move {
                    tokio::select! {
                        _ = gate => false,
                        _ = cancel.cancelled() => true,
                    }
                })
                .await
        });
        tokio::task::yield_now().await;

        let second = channel.attempt(|_cancel| async move { () }).await;
        assert!(!second.is_superseded());

        // The first attempt observed its token and is also superseded.
        assert_eq!(first.await.unwrap(), Outcome::Superseded);
    }

    #[tokio::test]
    async fn cancel_orphans_the_inflight_attempt() {
        let channel = Arc::new(RequestChannel::new("test"));
        let (_keep, gate) = oneshot::channel::<()>();

        let inflight_channel = Arc::clone(&channel);
        let inflight = tokio::spawn(async move {
            inflight_channel
                .attempt(|cancel| async move {
                    tokio::select! {
                        _ = gate => "completed",
                        _ = cancel.cancelled() => "cancelled",
                    }
                })
                .await
        });
        tokio::task::yield_now().await;

        channel.cancel();
        assert_eq!(inflight.await.unwrap(), Outcome::Superseded);

        // Cancelling an idle channel is a no-op.
        channel.cancel();
    }
}
