//! Debounced, race-safe incremental search ("suggester").
//!
//! One instance per lookup surface. Input events arm the debouncer; the
//! fetch runs through a [`RequestChannel`] so only the latest issued
//! request can ever reach the rendered panel. Keyboard state (circular
//! highlight, commit, dismiss) lives here; presentation is delegated to an
//! injected [`SuggestView`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::arbiter::{Outcome, RequestChannel};
use crate::debounce::Debouncer;
use crate::fetch::{CancelToken, FetchError};
use crate::record::RecordId;
use crate::telemetry;

/// Tuning for one lookup surface. The stock panels use
/// (min_chars 1, 160 ms) for collection-local lookups and
/// (min_chars 2, 220 ms) for server-backed ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestConfig {
    /// Queries shorter than this close the panel instead of fetching.
    pub min_chars: usize,
    /// Quiet period between the last keystroke and the fetch.
    pub debounce: Duration,
    /// How long a blurred panel stays open so a pointer selection can
    /// still land.
    pub close_grace: Duration,
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            min_chars: 1,
            debounce: Duration::from_millis(200),
            close_grace: Duration::from_millis(120),
        }
    }
}

/// A transient lookup candidate: primary/secondary text for the panel and
/// the (display, id) pair a selection reduces to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub id: RecordId,
    pub primary: String,
    pub secondary: Option<String>,
    pub display: String,
}

impl Suggestion {
    pub fn new(id: impl Into<RecordId>, primary: impl Into<String>) -> Self {
        let primary = primary.into();
        Self {
            id: id.into(),
            display: primary.clone(),
            primary,
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: impl Into<String>) -> Self {
        self.secondary = Some(secondary.into());
        self
    }

    /// Override the value committed into the input on selection (defaults
    /// to the primary text).
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = display.into();
        self
    }
}

/// The committed (display value, id) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub display: String,
    pub id: RecordId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuggestPhase {
    #[default]
    Closed,
    Loading,
    Results,
    Empty,
}

/// Keys the panel reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestKey {
    ArrowDown,
    ArrowUp,
    Enter,
    Escape,
}

/// Async source of lookup candidates.
#[async_trait::async_trait]
pub trait SuggestionSource: Send + Sync {
    async fn suggest(
        &self,
        query: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<Suggestion>, FetchError>;
}

/// Render sink for the panel.
pub trait SuggestView: Send + Sync {
    fn render(&self, phase: SuggestPhase, items: &[Suggestion], highlighted: Option<usize>);
}

type SelectHook = Arc<dyn Fn(&Selection) + Send + Sync>;

#[derive(Clone)]
pub struct Suggester {
    shared: Arc<SuggestShared>,
}

struct SuggestShared {
    source: Arc<dyn SuggestionSource>,
    view: Arc<dyn SuggestView>,
    config: SuggestConfig,
    channel: RequestChannel,
    debounce: Debouncer,
    close_grace: Debouncer,
    on_select: Mutex<Option<SelectHook>>,
    state: Mutex<SuggestState>,
}

#[derive(Default)]
struct SuggestState {
    phase: SuggestPhase,
    query: String,
    items: Vec<Suggestion>,
    highlighted: Option<usize>,
    selection: Option<Selection>,
}

impl Suggester {
    pub fn new(
        label: impl Into<String>,
        source: Arc<dyn SuggestionSource>,
        view: Arc<dyn SuggestView>,
        config: SuggestConfig,
    ) -> Self {
        Self {
            shared: Arc::new(SuggestShared {
                source,
                view,
                channel: RequestChannel::new(label),
                debounce: Debouncer::new(config.debounce),
                close_grace: Debouncer::new(config.close_grace),
                config,
                on_select: Mutex::new(None),
                state: Mutex::new(SuggestState::default()),
            }),
        }
    }

    /// Side effect run when a selection commits (e.g. flipping a
    /// dependent capability on).
    pub fn on_select(&self, hook: impl Fn(&Selection) + Send + Sync + 'static) {
        *self.shared.on_select.lock() = Some(Arc::new(hook));
    }

    pub fn phase(&self) -> SuggestPhase {
        self.shared.state.lock().phase
    }

    pub fn query(&self) -> String {
        self.shared.state.lock().query.clone()
    }

    pub fn items(&self) -> Vec<Suggestion> {
        self.shared.state.lock().items.clone()
    }

    pub fn highlighted(&self) -> Option<usize> {
        self.shared.state.lock().highlighted
    }

    pub fn selection(&self) -> Option<Selection> {
        self.shared.state.lock().selection.clone()
    }

    /// Feed the latest input value. Editing invalidates any previously
    /// committed selection; queries below the threshold close the panel
    /// and cancel whatever is in flight.
    pub fn input_changed(&self, text: &str) {
        self.shared.close_grace.cancel();
        let query = text.trim().to_owned();
        {
            let mut state = self.shared.state.lock();
            state.selection = None;
            state.query = query.clone();
        }
        if query.chars().count() < self.shared.config.min_chars {
            self.shared.debounce.cancel();
            self.close();
            return;
        }
        let suggester = self.clone();
        self.shared.debounce.schedule(async move {
            suggester.issue(query).await;
        });
    }

    /// Re-run the current query immediately, bypassing the debounce. Used
    /// on focus and after the backing collection changed.
    pub fn refresh(&self) {
        let query = self.query();
        if query.chars().count() < self.shared.config.min_chars {
            return;
        }
        let suggester = self.clone();
        tokio::spawn(async move {
            suggester.issue(query).await;
        });
    }

    /// Focus cancels a pending grace-close and re-queries.
    pub fn focus(&self) {
        self.shared.close_grace.cancel();
        self.refresh();
    }

    /// Blur closes, but only after the grace period, so a pointer
    /// selection on the panel still registers.
    pub fn blur(&self) {
        let suggester = self.clone();
        self.shared.close_grace.schedule(async move {
            suggester.close();
        });
    }

    /// Keyboard contract: ArrowDown/ArrowUp move the highlight circularly,
    /// Enter commits the highlighted item, Escape dismisses. With no
    /// results only Escape is meaningful. Returns true when consumed.
    pub fn key(&self, key: SuggestKey) -> bool {
        let (len, highlighted, phase) = {
            let state = self.shared.state.lock();
            (state.items.len(), state.highlighted, state.phase)
        };
        if len == 0 {
            if key == SuggestKey::Escape && phase != SuggestPhase::Closed {
                self.close();
                return true;
            }
            return false;
        }
        match key {
            SuggestKey::ArrowDown => {
                let next = match highlighted {
                    Some(index) if index + 1 < len => index + 1,
                    _ => 0,
                };
                self.set_highlight(Some(next));
                true
            }
            SuggestKey::ArrowUp => {
                let next = match highlighted {
                    Some(index) if index > 0 => index - 1,
                    _ => len - 1,
                };
                self.set_highlight(Some(next));
                true
            }
            SuggestKey::Enter => match highlighted {
                Some(index) => {
                    self.select(index);
                    true
                }
                None => false,
            },
            SuggestKey::Escape => {
                self.close();
                true
            }
        }
    }

    /// Commit the suggestion at `index`, reducing it to its
    /// (display, id) pair.
    pub fn select(&self, index: usize) {
        let committed = {
            let mut state = self.shared.state.lock();
            let Some(item) = state.items.get(index) else {
                return;
            };
            let selection = Selection {
                display: item.display.clone(),
                id: item.id.clone(),
            };
            state.selection = Some(selection.clone());
            state.query = selection.display.clone();
            selection
        };
        let hook = self.shared.on_select.lock().clone();
        if let Some(hook) = hook {
            hook(&committed);
        }
        self.close();
    }

    /// Programmatically install a selection (e.g. when opening an edit
    /// form over an existing record).
    pub fn set_selection(&self, display: impl Into<String>, id: impl Into<RecordId>) {
        let display = display.into();
        {
            let mut state = self.shared.state.lock();
            state.query = display.clone();
            state.selection = Some(Selection {
                display,
                id: id.into(),
            });
        }
        self.close();
    }

    /// Clear both the query and any committed selection.
    pub fn clear(&self) {
        {
            let mut state = self.shared.state.lock();
            state.query.clear();
            state.selection = None;
        }
        self.close();
    }

    /// Dismiss the panel: discards candidates, cancels the debouncer, and
    /// orphans any in-flight fetch.
    pub fn close(&self) {
        self.shared.close_grace.cancel();
        self.shared.debounce.cancel();
        self.shared.channel.cancel();
        {
            let mut state = self.shared.state.lock();
            state.items.clear();
            state.highlighted = None;
            state.phase = SuggestPhase::Closed;
        }
        self.render();
    }

    async fn issue(&self, query: String) {
        let _guard = telemetry::PerfGuard::new("suggest_fetch");
        {
            let mut state = self.shared.state.lock();
            state.phase = SuggestPhase::Loading;
        }
        self.render();

        let source = Arc::clone(&self.shared.source);
        let outcome = self
            .shared
            .channel
            .attempt(|cancel| async move { source.suggest(&query, &cancel).await })
            .await;
        match outcome {
            Outcome::Superseded => {}
            Outcome::Accepted(Err(err)) if err.is_cancellation() => {}
            Outcome::Accepted(Err(err)) => {
                warn!(
                    target: "marquee::suggest",
                    channel = %self.shared.channel.label(),
                    error = %err,
                    "suggestion fetch failed"
                );
                self.close();
            }
            Outcome::Accepted(Ok(items)) => {
                {
                    let mut state = self.shared.state.lock();
                    state.phase = if items.is_empty() {
                        SuggestPhase::Empty
                    } else {
                        SuggestPhase::Results
                    };
                    state.items = items;
                    state.highlighted = None;
                }
                self.render();
            }
        }
    }

    fn set_highlight(&self, highlighted: Option<usize>) {
        {
            let mut state = self.shared.state.lock();
            state.highlighted = highlighted;
        }
        self.render();
    }

    fn render(&self) {
        let (phase, items, highlighted) = {
            let state = self.shared.state.lock();
            (state.phase, state.items.clone(), state.highlighted)
        };
        self.shared.view.render(phase, &items, highlighted);
    }
}
