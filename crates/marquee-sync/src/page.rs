//! Defensive pagination-metadata normalization.
//!
//! The pagination block attached to list payloads is only partially
//! trusted: its shape has drifted across server releases, numbers may
//! arrive as JSON numbers or numeric strings, and a buggy backend can
//! report a page beyond the page count. [`PageMeta::normalized`] folds a
//! [`RawPageMeta`] against the previous known-good state so the client
//! never renders a page number that contradicts the totals.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_PAGE_SIZE: u64 = 6;
pub const MAX_PAGE_SIZE: u64 = 50;

/// Normalized pagination state for one section. Invariants:
/// `page <= total_pages`, `page_size >= 1`, `total_pages >= 1`,
/// `query` trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub page: u64,
    pub page_size: u64,
    pub total_items: u64,
    pub total_pages: u64,
    pub has_previous: bool,
    pub has_next: bool,
    pub query: String,
}

impl Default for PageMeta {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            total_items: 0,
            total_pages: 1,
            has_previous: false,
            has_next: false,
            query: String::new(),
        }
    }
}

/// Wire-shaped pagination block. Every field is optional; integral fields
/// are kept loosely typed so a stringly-typed payload still normalizes.
/// Unknown keys (capability hints like `has_users` or `total_available`)
/// are preserved in `extra`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPageMeta {
    #[serde(default)]
    pub page: Option<Value>,
    #[serde(default)]
    pub page_size: Option<Value>,
    #[serde(default)]
    pub total_items: Option<Value>,
    #[serde(default)]
    pub total_pages: Option<Value>,
    #[serde(default)]
    pub has_previous: Option<bool>,
    #[serde(default)]
    pub has_next: Option<bool>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<&PageMeta> for RawPageMeta {
    fn from(meta: &PageMeta) -> Self {
        Self {
            page: Some(Value::from(meta.page)),
            page_size: Some(Value::from(meta.page_size)),
            total_items: Some(Value::from(meta.total_items)),
            total_pages: Some(Value::from(meta.total_pages)),
            has_previous: Some(meta.has_previous),
            has_next: Some(meta.has_next),
            query: Some(meta.query.clone()),
            extra: Map::new(),
        }
    }
}

impl PageMeta {
    /// Normalize a raw payload against the previous known-good state.
    ///
    /// Out-of-domain values (non-finite, zero where a count must be
    /// positive, unparsable strings) fall back to the previous value;
    /// `page` is clamped into `[1, total_pages]`. Explicit server
    /// `has_previous`/`has_next` booleans win over the derived ones.
    /// Normalizing an already-normalized value is a fixed point.
    pub fn normalized(raw: &RawPageMeta, fallback: &PageMeta) -> PageMeta {
        let page_size = positive(raw.page_size.as_ref(), fallback.page_size).min(MAX_PAGE_SIZE);
        let total_items = non_negative(raw.total_items.as_ref(), fallback.total_items);
        let total_pages = positive(raw.total_pages.as_ref(), fallback.total_pages);
        let page = positive(raw.page.as_ref(), fallback.page).min(total_pages);
        let has_previous = raw.has_previous.unwrap_or(page > 1);
        let has_next = raw.has_next.unwrap_or(page < total_pages);
        let query = match &raw.query {
            Some(query) => query.trim().to_owned(),
            None => fallback.query.clone(),
        };
        PageMeta {
            page,
            page_size,
            total_items,
            total_pages,
            has_previous,
            has_next,
            query,
        }
    }
}

/// Page count implied by a total and a page size; never below one.
pub(crate) fn pages_for(total_items: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        return 1;
    }
    total_items.div_ceil(page_size).max(1)
}

fn positive(value: Option<&Value>, fallback: u64) -> u64 {
    parse_int(value).filter(|parsed| *parsed >= 1).unwrap_or(fallback)
}

fn non_negative(value: Option<&Value>, fallback: u64) -> u64 {
    parse_int(value).unwrap_or(fallback)
}

fn parse_int(value: Option<&Value>) -> Option<u64> {
    let value = value?;
    if let Some(parsed) = value.as_u64() {
        return Some(parsed);
    }
    if let Some(parsed) = value.as_f64() {
        if parsed.is_finite() && parsed >= 0.0 && parsed.fract() == 0.0 {
            return Some(parsed as u64);
        }
        return None;
    }
    if let Some(text) = value.as_str() {
        return text.trim().parse::<u64>().ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(payload: Value) -> RawPageMeta {
        serde_json::from_value(payload).unwrap()
    }

    #[test]
    fn page_is_clamped_to_total_pages() {
        let meta = PageMeta::normalized(
            &raw(json!({"page": 9, "page_size": 6, "total_items": 12, "total_pages": 2})),
            &PageMeta::default(),
        );
        assert_eq!(meta.page, 2);
        assert!(meta.has_previous);
        assert!(!meta.has_next);
    }

    #[test]
    fn normalization_is_a_fixed_point() {
        let first = PageMeta::normalized(
            &raw(json!({"page": "3", "page_size": 10, "total_items": 37, "total_pages": 4, "query": " hall "})),
            &PageMeta::default(),
        );
        let second = PageMeta::normalized(&RawPageMeta::from(&first), &PageMeta::default());
        assert_eq!(first, second);
    }

    #[test]
    fn garbage_falls_back_to_previous_values() {
        let previous = PageMeta {
            page: 2,
            page_size: 12,
            total_items: 30,
            total_pages: 3,
            has_previous: true,
            has_next: true,
            query: "hall".to_owned(),
        };
        let meta = PageMeta::normalized(
            &raw(json!({"page": 0, "page_size": -4, "total_items": "many", "total_pages": 2.5})),
            &previous,
        );
        assert_eq!(meta.page, 2);
        assert_eq!(meta.page_size, 12);
        assert_eq!(meta.total_items, 30);
        assert_eq!(meta.total_pages, 3);
        assert_eq!(meta.query, "hall");
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let meta = PageMeta::normalized(
            &raw(json!({"page": "2", "page_size": "6", "total_items": "11", "total_pages": "2"})),
            &PageMeta::default(),
        );
        assert_eq!(meta.page, 2);
        assert_eq!(meta.page_size, 6);
        assert_eq!(meta.total_items, 11);
        assert_eq!(meta.total_pages, 2);
    }

    #[test]
    fn explicit_server_flags_override_derivation() {
        let meta = PageMeta::normalized(
            &raw(json!({
                "page": 1,
                "page_size": 6,
                "total_items": 20,
                "total_pages": 4,
                "has_previous": true,
                "has_next": false
            })),
            &PageMeta::default(),
        );
        assert!(meta.has_previous);
        assert!(!meta.has_next);
    }

    #[test]
    fn single_full_page_has_no_neighbours() {
        let meta = PageMeta::normalized(
            &raw(json!({"page": 1, "page_size": 6, "total_items": 6, "total_pages": 1, "query": ""})),
            &PageMeta::default(),
        );
        assert_eq!(meta.total_pages, 1);
        assert!(!meta.has_previous);
        assert!(!meta.has_next);
    }

    #[test]
    fn page_size_is_capped() {
        let meta = PageMeta::normalized(
            &raw(json!({"page": 1, "page_size": 500, "total_items": 0, "total_pages": 1})),
            &PageMeta::default(),
        );
        assert_eq!(meta.page_size, MAX_PAGE_SIZE);
    }

    #[test]
    fn capability_hints_survive_in_extra() {
        let block = raw(json!({"page": 1, "has_users": true, "total_available": 7}));
        assert_eq!(block.extra.get("has_users"), Some(&json!(true)));
        assert_eq!(block.extra.get("total_available"), Some(&json!(7)));
    }

    #[test]
    fn pages_for_rounds_up() {
        assert_eq!(pages_for(0, 6), 1);
        assert_eq!(pages_for(6, 6), 1);
        assert_eq!(pages_for(7, 6), 2);
        assert_eq!(pages_for(5, 0), 1);
    }
}
