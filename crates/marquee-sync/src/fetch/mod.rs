//! Fetch seams between the sync core and whatever transport feeds it.
//!
//! The core never talks to a network directly. A [`PageSource`] hands back
//! one page of a collection, a `SuggestionSource` (see [`crate::suggest`])
//! hands back lookup candidates, and both receive a [`CancelToken`] they
//! may honor mid-flight. Implementors fold server-reported failures
//! (`success = false` payloads) and transport errors into [`FetchError`];
//! the core treats them uniformly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::Notify;

use crate::page::RawPageMeta;
use crate::record::Record;

pub mod memory;

/// Why a fetch produced no usable data.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The transport was cancelled mid-flight. Not a failure; callers drop
    /// the attempt silently.
    #[error("request cancelled")]
    Cancelled,
    /// Connectivity problems or a non-success response with no field
    /// errors attached.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The server processed the request and rejected it; messages are
    /// surfaced verbatim to the caller.
    #[error("server rejected the request: {}", errors.join("; "))]
    Rejected { errors: Vec<String> },
}

impl FetchError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

/// Parameters of one page load. `new` trims the query so every caller
/// shares a single normalization point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub page_size: u64,
    pub query: String,
}

impl PageRequest {
    pub fn new(page: u64, page_size: u64, query: impl Into<String>) -> Self {
        let query = query.into().trim().to_owned();
        Self {
            page,
            page_size,
            query,
        }
    }
}

/// One page of records plus the raw pagination block that accompanied it.
#[derive(Debug, Clone)]
pub struct PageEnvelope<R> {
    pub items: Vec<R>,
    pub meta: RawPageMeta,
}

/// Best-effort cancellation handle threaded through every fetch.
///
/// Cancelling after the operation finished is a no-op; `cancelled()` may be
/// raced freely against `cancel()`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Async source of collection pages.
#[async_trait::async_trait]
pub trait PageSource<R: Record>: Send + Sync {
    async fn fetch_page(
        &self,
        request: &PageRequest,
        cancel: &CancelToken,
    ) -> Result<PageEnvelope<R>, FetchError>;
}
