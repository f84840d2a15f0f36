//! Cross-collection consistency propagation.
//!
//! A [`ConsistencyCoordinator`] holds a declarative map of
//! {source collection → dependent target → reaction}. A cosmetic change
//! (a denormalized title) is patched in place with no network round-trip;
//! a structural change (a deleted record other collections reference) is
//! answered with an authoritative reload of the dependent's current view.
//! Patches and discards run synchronously on dispatch; reloads are
//! spawned.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::fetch::FetchError;
use crate::record::{CollectionId, Record, RecordId};
use crate::store::CollectionStore;
use crate::suggest::Suggester;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Created,
    Updated,
    Deleted,
}

/// A mutation applied to a source collection, as seen by dependents.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub collection: CollectionId,
    pub kind: MutationKind,
    pub id: RecordId,
    /// Serialized record for denormalized patches; deletions carry none.
    pub snapshot: Option<Value>,
}

impl MutationEvent {
    pub fn created<R: Record>(collection: CollectionId, record: &R) -> Self {
        Self {
            collection,
            kind: MutationKind::Created,
            id: record.id(),
            snapshot: serde_json::to_value(record).ok(),
        }
    }

    pub fn updated<R: Record>(collection: CollectionId, record: &R) -> Self {
        Self {
            collection,
            kind: MutationKind::Updated,
            id: record.id(),
            snapshot: serde_json::to_value(record).ok(),
        }
    }

    pub fn deleted(collection: CollectionId, id: RecordId) -> Self {
        Self {
            collection,
            kind: MutationKind::Deleted,
            id,
            snapshot: None,
        }
    }

    /// A top-level string field from the snapshot, if present.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.snapshot.as_ref()?.get(key)?.as_str()
    }
}

/// Observes mutations on a source store. Implemented by the coordinator;
/// stores hold it weakly.
pub trait MutationObserver: Send + Sync {
    fn on_mutation(&self, event: MutationEvent);
}

/// How a dependent reacts to one kind of source mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Ignore,
    /// Patch denormalized copies in place; no network round-trip.
    Patch,
    /// Reload the dependent's current page/query.
    Refresh,
    /// Drop matching records immediately for responsiveness, then reload.
    DiscardThenRefresh,
}

/// Reactions per mutation kind. Defaults to ignoring everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reactions {
    pub on_created: Reaction,
    pub on_updated: Reaction,
    pub on_deleted: Reaction,
}

impl Default for Reactions {
    fn default() -> Self {
        Self {
            on_created: Reaction::Ignore,
            on_updated: Reaction::Ignore,
            on_deleted: Reaction::Ignore,
        }
    }
}

impl Reactions {
    pub fn on_created(mut self, reaction: Reaction) -> Self {
        self.on_created = reaction;
        self
    }

    pub fn on_updated(mut self, reaction: Reaction) -> Self {
        self.on_updated = reaction;
        self
    }

    pub fn on_deleted(mut self, reaction: Reaction) -> Self {
        self.on_deleted = reaction;
        self
    }

    fn for_kind(&self, kind: MutationKind) -> Reaction {
        match kind {
            MutationKind::Created => self.on_created,
            MutationKind::Updated => self.on_updated,
            MutationKind::Deleted => self.on_deleted,
        }
    }
}

/// Type-erased dependent surface.
#[async_trait::async_trait]
pub trait DependentTarget: Send + Sync {
    fn name(&self) -> &CollectionId;
    /// In-place denormalized patch. Returns how many records changed.
    fn patch(&self, event: &MutationEvent) -> usize;
    /// Optimistic local removal. Returns how many records dropped.
    fn discard(&self, event: &MutationEvent) -> usize;
    /// Authoritative reload of the dependent's current view.
    async fn refresh(&self) -> Result<(), FetchError>;
}

struct Link {
    source: CollectionId,
    reactions: Reactions,
    target: Arc<dyn DependentTarget>,
}

#[derive(Default)]
pub struct ConsistencyCoordinator {
    links: RwLock<Vec<Link>>,
}

impl ConsistencyCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `target` holds data denormalized from `source`.
    pub fn link(
        &self,
        source: impl Into<CollectionId>,
        target: Arc<dyn DependentTarget>,
        reactions: Reactions,
    ) {
        self.links.write().push(Link {
            source: source.into(),
            reactions,
            target,
        });
    }

    /// Apply one event: patches and discards run inline, reloads are
    /// spawned so the dispatching mutation returns immediately.
    pub fn dispatch(&self, event: &MutationEvent) {
        for (reaction, target) in self.plan_for(event) {
            match reaction {
                Reaction::Ignore => {}
                Reaction::Patch => {
                    let touched = target.patch(event);
                    debug!(
                        target: "marquee::coordinator",
                        source = %event.collection,
                        dependent = %target.name(),
                        touched,
                        "patched denormalized records"
                    );
                }
                Reaction::Refresh => spawn_refresh(target),
                Reaction::DiscardThenRefresh => {
                    let dropped = target.discard(event);
                    debug!(
                        target: "marquee::coordinator",
                        source = %event.collection,
                        dependent = %target.name(),
                        dropped,
                        "discarded dependents pending reload"
                    );
                    spawn_refresh(target);
                }
            }
        }
    }

    /// Like [`dispatch`](Self::dispatch), but awaits the reloads. Test and
    /// driver convenience.
    pub async fn propagate(&self, event: &MutationEvent) {
        for (reaction, target) in self.plan_for(event) {
            match reaction {
                Reaction::Ignore => {}
                Reaction::Patch => {
                    target.patch(event);
                }
                Reaction::Refresh => refresh_now(&target).await,
                Reaction::DiscardThenRefresh => {
                    target.discard(event);
                    refresh_now(&target).await;
                }
            }
        }
    }

    fn plan_for(&self, event: &MutationEvent) -> Vec<(Reaction, Arc<dyn DependentTarget>)> {
        self.links
            .read()
            .iter()
            .filter(|link| link.source == event.collection)
            .map(|link| (link.reactions.for_kind(event.kind), Arc::clone(&link.target)))
            .filter(|(reaction, _)| *reaction != Reaction::Ignore)
            .collect()
    }
}

impl MutationObserver for ConsistencyCoordinator {
    fn on_mutation(&self, event: MutationEvent) {
        self.dispatch(&event);
    }
}

fn spawn_refresh(target: Arc<dyn DependentTarget>) {
    tokio::spawn(async move {
        refresh_now(&target).await;
    });
}

async fn refresh_now(target: &Arc<dyn DependentTarget>) {
    if let Err(err) = target.refresh().await {
        warn!(
            target: "marquee::coordinator",
            dependent = %target.name(),
            error = %err,
            "dependent refresh failed"
        );
    }
}

type PatchFn<R> = dyn Fn(&mut R, &MutationEvent) -> bool + Send + Sync;
type MatchFn<R> = dyn Fn(&R, &MutationEvent) -> bool + Send + Sync;

/// Adapts a typed [`CollectionStore`] into the erased dependent seam.
pub struct StoreLink<R: Record> {
    store: CollectionStore<R>,
    patch: Option<Arc<PatchFn<R>>>,
    matcher: Option<Arc<MatchFn<R>>>,
}

impl<R: Record> StoreLink<R> {
    pub fn new(store: CollectionStore<R>) -> Self {
        Self {
            store,
            patch: None,
            matcher: None,
        }
    }

    /// How to patch one dependent record from a source event; return true
    /// when the record changed.
    pub fn with_patch(
        mut self,
        patch: impl Fn(&mut R, &MutationEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.patch = Some(Arc::new(patch));
        self
    }

    /// Which dependent records a source deletion invalidates.
    pub fn with_matcher(
        mut self,
        matcher: impl Fn(&R, &MutationEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.matcher = Some(Arc::new(matcher));
        self
    }
}

#[async_trait::async_trait]
impl<R: Record> DependentTarget for StoreLink<R> {
    fn name(&self) -> &CollectionId {
        self.store.collection()
    }

    fn patch(&self, event: &MutationEvent) -> usize {
        let Some(patch) = &self.patch else {
            return 0;
        };
        self.store.patch_items(|record| patch(record, event))
    }

    fn discard(&self, event: &MutationEvent) -> usize {
        let Some(matcher) = &self.matcher else {
            return 0;
        };
        self.store.discard_items(|record| matcher(record, event))
    }

    async fn refresh(&self) -> Result<(), FetchError> {
        self.store.reload_current().await.map(|_| ())
    }
}

/// Keeps a lookup surface in step with the collection backing it: source
/// changes re-run the current query, and deleting the record a committed
/// selection points at clears that selection.
pub struct SuggestLink {
    name: CollectionId,
    suggester: Suggester,
}

impl SuggestLink {
    pub fn new(name: impl Into<CollectionId>, suggester: Suggester) -> Self {
        Self {
            name: name.into(),
            suggester,
        }
    }
}

#[async_trait::async_trait]
impl DependentTarget for SuggestLink {
    fn name(&self) -> &CollectionId {
        &self.name
    }

    fn patch(&self, _event: &MutationEvent) -> usize {
        self.suggester.refresh();
        0
    }

    fn discard(&self, event: &MutationEvent) -> usize {
        let stale = self
            .suggester
            .selection()
            .map(|selection| selection.id == event.id)
            .unwrap_or(false);
        if stale {
            self.suggester.clear();
            1
        } else {
            0
        }
    }

    async fn refresh(&self) -> Result<(), FetchError> {
        self.suggester.refresh();
        Ok(())
    }
}
