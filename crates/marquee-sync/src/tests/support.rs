//! Shared fixtures: venue/booking records, scripted sources, and
//! recording sinks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::fetch::memory::MemoryCollection;
use crate::fetch::{CancelToken, FetchError, PageEnvelope, PageRequest, PageSource};
use crate::page::{pages_for, PageMeta, RawPageMeta};
use crate::record::{Record, RecordId};
use crate::store::{CollectionView, Notice, StatusSink};
use crate::suggest::{SuggestPhase, SuggestView, Suggestion, SuggestionSource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: i64,
    pub title: String,
    pub location: String,
    pub price: u64,
}

impl Record for Venue {
    fn id(&self) -> RecordId {
        RecordId::Int(self.id)
    }
}

pub fn venue(id: i64, title: &str, location: &str) -> Venue {
    Venue {
        id,
        title: title.to_owned(),
        location: location.to_owned(),
        price: 120,
    }
}

pub fn venue_matcher(venue: &Venue, query: &str) -> bool {
    let needle = query.to_lowercase();
    venue.title.to_lowercase().contains(&needle)
        || venue.location.to_lowercase().contains(&needle)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueRef {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub username: String,
    pub venue: VenueRef,
    pub has_been_paid: bool,
}

impl Record for Booking {
    fn id(&self) -> RecordId {
        RecordId::Int(self.id)
    }
}

pub fn booking(id: i64, username: &str, venue_id: i64, venue_title: &str) -> Booking {
    Booking {
        id,
        username: username.to_owned(),
        venue: VenueRef {
            id: venue_id,
            title: venue_title.to_owned(),
        },
        has_been_paid: false,
    }
}

pub fn booking_matcher(booking: &Booking, query: &str) -> bool {
    let needle = query.to_lowercase();
    booking.username.to_lowercase().contains(&needle)
        || booking.venue.title.to_lowercase().contains(&needle)
}

/// Envelope shaped the way the real list endpoints answer.
pub fn envelope<R: Record>(
    items: Vec<R>,
    page: u64,
    page_size: u64,
    total_items: u64,
    query: &str,
) -> PageEnvelope<R> {
    let total_pages = pages_for(total_items, page_size);
    PageEnvelope {
        items,
        meta: RawPageMeta {
            page: Some(Value::from(page)),
            page_size: Some(Value::from(page_size)),
            total_items: Some(Value::from(total_items)),
            total_pages: Some(Value::from(total_pages)),
            has_previous: Some(page > 1),
            has_next: Some(page < total_pages),
            query: Some(query.to_owned()),
            extra: Map::new(),
        },
    }
}

struct ScriptedStep<T> {
    gate: Option<oneshot::Receiver<()>>,
    honor_cancel: bool,
    result: Result<T, FetchError>,
}

/// Page source answering from a queue of scripted steps. A gated step
/// parks until its sender fires; an uncancellable gate simulates a
/// transport that cannot abort, which is how slow stale responses are
/// produced.
pub struct ScriptedPages<R: Record> {
    steps: Mutex<VecDeque<ScriptedStep<PageEnvelope<R>>>>,
    requests: Mutex<Vec<PageRequest>>,
    calls: AtomicUsize,
}

impl<R: Record> ScriptedPages<R> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn push_ready(&self, result: Result<PageEnvelope<R>, FetchError>) {
        self.steps.lock().push_back(ScriptedStep {
            gate: None,
            honor_cancel: true,
            result,
        });
    }

    pub fn push_gated(&self, result: Result<PageEnvelope<R>, FetchError>) -> oneshot::Sender<()> {
        let (sender, gate) = oneshot::channel();
        self.steps.lock().push_back(ScriptedStep {
            gate: Some(gate),
            honor_cancel: true,
            result,
        });
        sender
    }

    pub fn push_gated_uncancellable(
        &self,
        result: Result<PageEnvelope<R>, FetchError>,
    ) -> oneshot::Sender<()> {
        let (sender, gate) = oneshot::channel();
        self.steps.lock().push_back(ScriptedStep {
            gate: Some(gate),
            honor_cancel: false,
            result,
        });
        sender
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl<R: Record> PageSource<R> for ScriptedPages<R> {
    async fn fetch_page(
        &self,
        request: &PageRequest,
        cancel: &CancelToken,
    ) -> Result<PageEnvelope<R>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let step = self
            .steps
            .lock()
            .pop_front()
            .expect("no scripted response left");
        if let Some(gate) = step.gate {
            if step.honor_cancel {
                tokio::select! {
                    _ = gate => {}
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                }
            } else {
                let _ = gate.await;
            }
        }
        step.result
    }
}

/// Counting pass-through over a [`MemoryCollection`].
pub struct CountingPages<R: Record> {
    pub inner: MemoryCollection<R>,
    calls: AtomicUsize,
}

impl<R: Record> CountingPages<R> {
    pub fn new(inner: MemoryCollection<R>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl<R: Record> PageSource<R> for CountingPages<R> {
    async fn fetch_page(
        &self,
        request: &PageRequest,
        cancel: &CancelToken,
    ) -> Result<PageEnvelope<R>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_page(request, cancel).await
    }
}

/// Suggestion source answering from scripted steps.
pub struct ScriptedSuggestions {
    steps: Mutex<VecDeque<ScriptedStep<Vec<Suggestion>>>>,
    queries: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedSuggestions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn push_ready(&self, result: Result<Vec<Suggestion>, FetchError>) {
        self.steps.lock().push_back(ScriptedStep {
            gate: None,
            honor_cancel: true,
            result,
        });
    }

    pub fn push_gated_uncancellable(
        &self,
        result: Result<Vec<Suggestion>, FetchError>,
    ) -> oneshot::Sender<()> {
        let (sender, gate) = oneshot::channel();
        self.steps.lock().push_back(ScriptedStep {
            gate: Some(gate),
            honor_cancel: false,
            result,
        });
        sender
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait::async_trait]
impl SuggestionSource for ScriptedSuggestions {
    async fn suggest(
        &self,
        query: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<Suggestion>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.to_owned());
        let step = self
            .steps
            .lock()
            .pop_front()
            .expect("no scripted suggestions left");
        if let Some(gate) = step.gate {
            if step.honor_cancel {
                tokio::select! {
                    _ = gate => {}
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                }
            } else {
                let _ = gate.await;
            }
        }
        step.result
    }
}

/// Records every render call for a section.
pub struct RecordingView<R: Record> {
    frames: Mutex<Vec<(Vec<R>, PageMeta)>>,
}

impl<R: Record> RecordingView<R> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn last(&self) -> Option<(Vec<R>, PageMeta)> {
        self.frames.lock().last().cloned()
    }
}

impl<R: Record> CollectionView<R> for RecordingView<R> {
    fn render(&self, items: &[R], meta: &PageMeta) {
        self.frames.lock().push((items.to_vec(), meta.clone()));
    }
}

/// Records every status notice.
pub struct RecordingStatus {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingStatus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            notices: Mutex::new(Vec::new()),
        })
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }
}

impl StatusSink for RecordingStatus {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

/// Records every panel render.
pub struct RecordingPanel {
    frames: Mutex<Vec<(SuggestPhase, Vec<Suggestion>, Option<usize>)>>,
}

impl RecordingPanel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
        })
    }

    pub fn last(&self) -> Option<(SuggestPhase, Vec<Suggestion>, Option<usize>)> {
        self.frames.lock().last().cloned()
    }
}

impl SuggestView for RecordingPanel {
    fn render(&self, phase: SuggestPhase, items: &[Suggestion], highlighted: Option<usize>) {
        self.frames.lock().push((phase, items.to_vec(), highlighted));
    }
}

/// Let spawned tasks make progress on the current-thread test runtime.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
