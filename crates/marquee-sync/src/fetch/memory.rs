//! In-memory sources.
//!
//! [`MemorySuggestions`] mirrors lookup surfaces that filter an
//! already-loaded collection locally instead of round-tripping to the
//! server; [`MemoryCollection`] paginates and filters an owned row set the
//! way the real list endpoints do. Both double as test backends.

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::fetch::{CancelToken, FetchError, PageEnvelope, PageRequest, PageSource};
use crate::page::{pages_for, RawPageMeta, MAX_PAGE_SIZE};
use crate::record::Record;
use crate::suggest::{Suggestion, SuggestionSource};

/// Case-insensitive substring lookup over an owned candidate list, capped
/// at `limit` results.
pub struct MemorySuggestions {
    entries: RwLock<Vec<Suggestion>>,
    limit: usize,
}

impl MemorySuggestions {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            limit,
        }
    }

    pub fn with_entries(entries: Vec<Suggestion>, limit: usize) -> Self {
        Self {
            entries: RwLock::new(entries),
            limit,
        }
    }

    /// Swap the candidate list, e.g. after the backing collection
    /// reloaded.
    pub fn replace(&self, entries: Vec<Suggestion>) {
        *self.entries.write() = entries;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait::async_trait]
impl SuggestionSource for MemorySuggestions {
    async fn suggest(
        &self,
        query: &str,
        _cancel: &CancelToken,
    ) -> Result<Vec<Suggestion>, FetchError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .filter(|entry| {
                entry.primary.to_lowercase().contains(&needle)
                    || entry
                        .secondary
                        .as_deref()
                        .map(|text| text.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .take(self.limit)
            .cloned()
            .collect())
    }
}

type RowMatcher<R> = dyn Fn(&R, &str) -> bool + Send + Sync;

/// An owned row set served page by page. Out-of-range pages clamp to the
/// last page, the way the real paginator answers them.
pub struct MemoryCollection<R: Record> {
    rows: RwLock<Vec<R>>,
    matcher: Box<RowMatcher<R>>,
    extra: RwLock<Map<String, Value>>,
}

impl<R: Record> MemoryCollection<R> {
    pub fn new(matcher: impl Fn(&R, &str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            matcher: Box::new(matcher),
            extra: RwLock::new(Map::new()),
        }
    }

    pub fn with_rows(
        rows: Vec<R>,
        matcher: impl Fn(&R, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        let collection = Self::new(matcher);
        *collection.rows.write() = rows;
        collection
    }

    pub fn replace(&self, rows: Vec<R>) {
        *self.rows.write() = rows;
    }

    pub fn push(&self, row: R) {
        self.rows.write().push(row);
    }

    pub fn remove(&self, predicate: impl Fn(&R) -> bool) {
        self.rows.write().retain(|row| !predicate(row));
    }

    /// Attach a capability hint to every pagination block.
    pub fn set_extra(&self, key: impl Into<String>, value: Value) {
        self.extra.write().insert(key.into(), value);
    }
}

#[async_trait::async_trait]
impl<R: Record> PageSource<R> for MemoryCollection<R> {
    async fn fetch_page(
        &self,
        request: &PageRequest,
        _cancel: &CancelToken,
    ) -> Result<PageEnvelope<R>, FetchError> {
        let filtered: Vec<R> = {
            let rows = self.rows.read();
            if request.query.is_empty() {
                rows.clone()
            } else {
                rows.iter()
                    .filter(|row| (self.matcher)(row, &request.query))
                    .cloned()
                    .collect()
            }
        };
        let page_size = request.page_size.clamp(1, MAX_PAGE_SIZE);
        let total_items = filtered.len() as u64;
        let total_pages = pages_for(total_items, page_size);
        let page = request.page.clamp(1, total_pages);
        let start = ((page - 1) * page_size) as usize;
        let items: Vec<R> = filtered
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();

        let meta = RawPageMeta {
            page: Some(Value::from(page)),
            page_size: Some(Value::from(page_size)),
            total_items: Some(Value::from(total_items)),
            total_pages: Some(Value::from(total_pages)),
            has_previous: Some(page > 1),
            has_next: Some(page < total_pages),
            query: Some(request.query.clone()),
            extra: self.extra.read().clone(),
        };
        Ok(PageEnvelope { items, meta })
    }
}
