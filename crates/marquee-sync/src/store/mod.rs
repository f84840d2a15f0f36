//! Per-section collection store.
//!
//! Holds the current page of records and its [`PageMeta`], issues loads
//! through a [`RequestChannel`], and reconciles optimistic local mutations
//! against authoritative server responses. Rendering and status reporting
//! go through injected sinks; cross-collection effects are emitted as
//! [`MutationEvent`]s to a weakly-held observer (normally the
//! consistency coordinator).

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::arbiter::{Outcome, RequestChannel};
use crate::coordinator::{MutationEvent, MutationObserver};
use crate::fetch::{FetchError, PageRequest, PageSource};
use crate::page::{pages_for, PageMeta};
use crate::record::{CollectionId, Record, RecordId};
use crate::telemetry;

/// Render sink for a section: called with the full page whenever it or
/// its pagination state changes.
pub trait CollectionView<R: Record>: Send + Sync {
    fn render(&self, items: &[R], meta: &PageMeta);
}

/// Receives user-facing status events. The wording of any message shown
/// to the user is the caller's concern; the store only names what
/// happened.
pub trait StatusSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    LoadFailed {
        collection: CollectionId,
        detail: String,
    },
    Created {
        collection: CollectionId,
    },
    Updated {
        collection: CollectionId,
    },
    Deleted {
        collection: CollectionId,
    },
    /// Server-side validation messages, verbatim.
    Rejected {
        collection: CollectionId,
        errors: Vec<String>,
    },
}

/// What a `load` did with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// The response replaced the visible page.
    Applied,
    /// The response was superseded or cancelled; visible state untouched.
    Discarded,
}

pub struct CollectionStore<R: Record> {
    shared: Arc<StoreShared<R>>,
}

impl<R: Record> Clone for CollectionStore<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct StoreShared<R: Record> {
    collection: CollectionId,
    source: Arc<dyn PageSource<R>>,
    view: Arc<dyn CollectionView<R>>,
    status: Arc<dyn StatusSink>,
    channel: RequestChannel,
    state: Mutex<StoreState<R>>,
    observer: Mutex<Option<Weak<dyn MutationObserver>>>,
}

struct StoreState<R> {
    items: Vec<R>,
    meta: PageMeta,
    extra: Map<String, Value>,
}

impl<R: Record> CollectionStore<R> {
    pub fn new(
        collection: impl Into<CollectionId>,
        source: Arc<dyn PageSource<R>>,
        view: Arc<dyn CollectionView<R>>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let collection = collection.into();
        let channel = RequestChannel::new(collection.as_str());
        Self {
            shared: Arc::new(StoreShared {
                collection,
                source,
                view,
                status,
                channel,
                state: Mutex::new(StoreState {
                    items: Vec::new(),
                    meta: PageMeta::default(),
                    extra: Map::new(),
                }),
                observer: Mutex::new(None),
            }),
        }
    }

    /// Register the mutation observer (normally the coordinator). Held
    /// weakly; the wiring layer owns the coordinator's lifetime.
    pub fn set_observer(&self, observer: Weak<dyn MutationObserver>) {
        *self.shared.observer.lock() = Some(observer);
    }

    pub fn collection(&self) -> &CollectionId {
        &self.shared.collection
    }

    pub fn items(&self) -> Vec<R> {
        self.shared.state.lock().items.clone()
    }

    pub fn meta(&self) -> PageMeta {
        self.shared.state.lock().meta.clone()
    }

    pub fn total_items(&self) -> u64 {
        self.shared.state.lock().meta.total_items
    }

    /// Capability hints the server rides along with the pagination block
    /// (`has_users`, `total_available`, ...). The store exposes them; any
    /// gating decision is the caller's.
    pub fn extra(&self, key: &str) -> Option<Value> {
        self.shared.state.lock().extra.get(key).cloned()
    }

    /// Fetch one page through this section's channel. An accepted response
    /// replaces items and meta wholesale; a superseded or cancelled one is
    /// a no-op; a failure leaves the last good page visible and emits
    /// [`Notice::LoadFailed`].
    pub async fn load(&self, request: PageRequest) -> Result<LoadStatus, FetchError> {
        let _guard = telemetry::PerfGuard::new("store_load");
        let source = Arc::clone(&self.shared.source);
        let fetch_request = request.clone();
        let outcome = self
            .shared
            .channel
            .attempt(|cancel| async move { source.fetch_page(&fetch_request, &cancel).await })
            .await;
        match outcome {
            Outcome::Superseded => Ok(LoadStatus::Discarded),
            Outcome::Accepted(Err(err)) if err.is_cancellation() => Ok(LoadStatus::Discarded),
            Outcome::Accepted(Err(err)) => {
                warn!(
                    target: "marquee::store",
                    collection = %self.shared.collection,
                    error = %err,
                    "load failed; keeping last good page"
                );
                self.shared.status.notify(Notice::LoadFailed {
                    collection: self.shared.collection.clone(),
                    detail: err.to_string(),
                });
                Err(err)
            }
            Outcome::Accepted(Ok(envelope)) => {
                {
                    let mut state = self.shared.state.lock();
                    state.meta = PageMeta::normalized(&envelope.meta, &state.meta);
                    state.extra = envelope.meta.extra;
                    state.items = envelope.items;
                }
                self.render();
                Ok(LoadStatus::Applied)
            }
        }
    }

    /// Reload whatever page/size/query is currently visible.
    pub async fn reload_current(&self) -> Result<LoadStatus, FetchError> {
        self.load(self.current_request()).await
    }

    /// Cancel any in-flight load, e.g. when the owning surface closes.
    pub fn cancel(&self) {
        self.shared.channel.cancel();
    }

    /// Fold a freshly created record into the view. On page 1 of an
    /// unfiltered view the record is prepended (newest-first) and the
    /// counts adjusted locally; any other page/query schedules a reload so
    /// ordering and totals stay authoritative.
    pub fn apply_created(&self, record: R) {
        let event = MutationEvent::created(self.shared.collection.clone(), &record);
        let reload = {
            let mut state = self.shared.state.lock();
            if state.meta.page == 1 && state.meta.query.is_empty() {
                let page_size = state.meta.page_size as usize;
                state.items.insert(0, record);
                state.items.truncate(page_size);
                state.meta.total_items += 1;
                state.meta.total_pages =
                    pages_for(state.meta.total_items, state.meta.page_size);
                state.meta.has_next = state.meta.page < state.meta.total_pages;
                None
            } else {
                Some(self.request_from(&state.meta))
            }
        };
        match reload {
            None => self.render(),
            Some(request) => self.spawn_reload(request),
        }
        self.shared.status.notify(Notice::Created {
            collection: self.shared.collection.clone(),
        });
        self.emit(event);
    }

    /// Replace the matching record in place. A record outside the current
    /// page is left to that page's next load.
    pub fn apply_updated(&self, record: R) {
        let event = MutationEvent::updated(self.shared.collection.clone(), &record);
        let id = record.id();
        let changed = {
            let mut state = self.shared.state.lock();
            match state.items.iter_mut().find(|item| item.id() == id) {
                Some(slot) => {
                    *slot = record;
                    true
                }
                None => false,
            }
        };
        if changed {
            self.render();
        }
        self.shared.status.notify(Notice::Updated {
            collection: self.shared.collection.clone(),
        });
        self.emit(event);
    }

    /// Drop the record locally and fix the visible counts, then reload so
    /// the server corrects pagination boundaries. A page emptied by the
    /// removal rolls back one page instead of asking for a page that no
    /// longer exists.
    pub fn apply_deleted(&self, id: impl Into<RecordId>) {
        let id = id.into();
        let event = MutationEvent::deleted(self.shared.collection.clone(), id.clone());
        let request = {
            let mut state = self.shared.state.lock();
            let before = state.items.len();
            state.items.retain(|item| item.id() != id);
            if state.items.len() != before {
                state.meta.total_items = state.meta.total_items.saturating_sub(1);
                state.meta.total_pages =
                    pages_for(state.meta.total_items, state.meta.page_size);
                state.meta.has_next = state.meta.page < state.meta.total_pages;
            }
            let page = if state.items.is_empty() && state.meta.page > 1 {
                state.meta.page - 1
            } else {
                state.meta.page
            };
            PageRequest::new(page, state.meta.page_size, state.meta.query.clone())
        };
        self.render();
        self.spawn_reload(request);
        self.shared.status.notify(Notice::Deleted {
            collection: self.shared.collection.clone(),
        });
        self.emit(event);
    }

    /// Surface a server-side validation rejection through the status sink.
    /// Local state is untouched; mutations apply only after a successful
    /// response.
    pub fn reject(&self, errors: Vec<String>) {
        self.shared.status.notify(Notice::Rejected {
            collection: self.shared.collection.clone(),
            errors,
        });
    }

    /// In-place patch of the visible page, used for denormalized updates
    /// propagated from another collection. Returns how many records
    /// changed; re-renders when any did. The closure must not call back
    /// into this store.
    pub fn patch_items<F>(&self, mut patch: F) -> usize
    where
        F: FnMut(&mut R) -> bool,
    {
        let patched = {
            let mut state = self.shared.state.lock();
            let mut patched = 0;
            for item in &mut state.items {
                if patch(item) {
                    patched += 1;
                }
            }
            patched
        };
        if patched > 0 {
            self.render();
        }
        patched
    }

    /// Optimistically drop every matching record and adjust the counts.
    /// The authoritative reload is the caller's (coordinator's) decision.
    pub fn discard_items<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&R) -> bool,
    {
        let dropped = {
            let mut state = self.shared.state.lock();
            let before = state.items.len();
            state.items.retain(|item| !predicate(item));
            let dropped = before - state.items.len();
            if dropped > 0 {
                state.meta.total_items =
                    state.meta.total_items.saturating_sub(dropped as u64);
                state.meta.total_pages =
                    pages_for(state.meta.total_items, state.meta.page_size);
                state.meta.has_next = state.meta.page < state.meta.total_pages;
            }
            dropped
        };
        if dropped > 0 {
            self.render();
        }
        dropped
    }

    fn current_request(&self) -> PageRequest {
        let state = self.shared.state.lock();
        self.request_from(&state.meta)
    }

    fn request_from(&self, meta: &PageMeta) -> PageRequest {
        PageRequest::new(meta.page, meta.page_size, meta.query.clone())
    }

    fn spawn_reload(&self, request: PageRequest) {
        let store = self.clone();
        tokio::spawn(async move {
            // load() already reported any failure through the status sink.
            let _ = store.load(request).await;
        });
    }

    fn render(&self) {
        let (items, meta) = {
            let state = self.shared.state.lock();
            (state.items.clone(), state.meta.clone())
        };
        self.shared.view.render(&items, &meta);
    }

    fn emit(&self, event: MutationEvent) {
        let observer = self.shared.observer.lock().clone();
        if let Some(observer) = observer.and_then(|weak| weak.upgrade()) {
            debug!(
                target: "marquee::store",
                collection = %event.collection,
                kind = ?event.kind,
                id = %event.id,
                "emitting mutation event"
            );
            observer.on_mutation(event);
        }
    }
}
