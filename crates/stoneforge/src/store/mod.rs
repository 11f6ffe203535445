//! Element store abstraction.
//!
//! The [`ElementStore`] trait is the contract between the core and
//! whatever holds the data. The shipped implementation is
//! [`memory::MemoryStore`], a lock-guarded in-memory table with JSONL
//! directory persistence; the trait leaves room for database-backed
//! implementations without touching callers.
//!
//! All methods take `&self`: implementations use interior mutability so a
//! single store can be shared (`Arc<dyn ElementStore>`) between the sync
//! engine, the exchange, and API surfaces. Operations are serializable at
//! the granularity of a single element; `update` with
//! `expected_updated_at` adds optimistic concurrency on top.

pub mod memory;

use crate::domain::{
    DependencyEdge, DependencyType, Element, ElementEvent, ElementFilter, ElementPatch,
    GateEvent, NewDependency, NewElement, TreeDirection,
};
use crate::error::Result;
use crate::id::{ElementId, EntityId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Options for [`ElementStore::update`].
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Optimistic concurrency check: fail with `CONFLICT` if the stored
    /// `updated_at` differs.
    pub expected_updated_at: Option<DateTime<Utc>>,

    /// Entity to attribute the mutation to. Defaults to the element's
    /// creator.
    pub actor: Option<EntityId>,
}

/// Options for [`ElementStore::delete`].
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Why the element was deleted; recorded on the delete event.
    pub reason: Option<String>,

    /// Entity to attribute the deletion to.
    pub actor: Option<EntityId>,
}

/// A blocked task paired with its first blocker and a readable reason.
#[derive(Debug, Clone)]
pub struct BlockedEntry {
    /// The blocked task.
    pub element: Element,
    /// The first unsatisfied blocker, when it resolves to an element.
    pub blocker: Option<Element>,
    /// Human-readable reason drawn from the edge type and blocker state.
    pub reason: String,
}

/// Store-level counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCounts {
    /// Live (non-tombstoned) elements.
    pub elements: usize,
    /// Tombstoned elements.
    pub tombstones: usize,
    /// Dependency edges.
    pub edges: usize,
    /// Elements dirty since the last successful incremental export.
    pub dirty: usize,
}

/// Core storage trait for element management.
///
/// # Method Categories
///
/// - **CRUD**: `create`, `get`, `update`, `delete`, `list`, `events`
/// - **Dependencies**: `add_dependency`, `remove_dependency`, `outgoing`,
///   `incoming`, `dependencies_of_type`, `dependency_tree`, `are_related`,
///   `record_gate_event`, `is_blocked`
/// - **Readiness**: `ready`, `blocked`, `backlog`
/// - **Incremental sync**: `dirty_ids`, `mark_clean`, `counts`
/// - **Batch/exchange**: `export_elements`, `export_edges`,
///   `restore_element`, `restore_edge`
/// - **Audit**: `record_event`
/// - **Persistence**: `save`
#[async_trait]
pub trait ElementStore: Send + Sync {
    // ========== CRUD ==========

    /// Creates a new element, generating its id and stamping timestamps.
    ///
    /// Referential integrity is enforced: payload references (assignee,
    /// channels, documents, member tasks) must resolve to existing
    /// elements.
    ///
    /// # Errors
    ///
    /// Validation errors from the payload, `NOT_FOUND` for dangling
    /// references, `MEMBER_REQUIRED` for a message from a non-member.
    async fn create(&self, new: NewElement) -> Result<Element>;

    /// Gets an element by id. Tombstones resolve; absent ids yield
    /// `Ok(None)`.
    async fn get(&self, id: &ElementId) -> Result<Option<Element>>;

    /// Applies a partial update.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND`, `CONFLICT` (OCC mismatch), `IMMUTABLE` (messages,
    /// frozen documents, direct-channel invariants), `INVALID_STATUS`
    /// (transition outside the state machine), plus payload validation
    /// errors.
    async fn update(
        &self,
        id: &ElementId,
        patch: ElementPatch,
        opts: UpdateOptions,
    ) -> Result<Element>;

    /// Soft-deletes an element, leaving a tombstone.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if absent, `IMMUTABLE` for messages.
    async fn delete(&self, id: &ElementId, opts: DeleteOptions) -> Result<()>;

    /// Lists elements matching the filter. Tombstones are excluded unless
    /// the filter opts in.
    async fn list(&self, filter: &ElementFilter) -> Result<Vec<Element>>;

    /// The element's event log, oldest first, optionally limited to the
    /// most recent `limit` entries.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if the element never existed.
    async fn events(&self, id: &ElementId, limit: Option<usize>) -> Result<Vec<ElementEvent>>;

    /// Appends an event without mutating the element (sync attribution).
    async fn record_event(&self, event: ElementEvent) -> Result<()>;

    // ========== Dependencies ==========

    /// Adds a dependency edge. Blocking-family edges are cycle-checked
    /// atomically with insertion.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` for missing endpoints, `CYCLE_DETECTED`, `CONSTRAINT`
    /// for self-loops, derived types (`mentions`), or bad gate payloads.
    async fn add_dependency(&self, dep: NewDependency) -> Result<DependencyEdge>;

    /// Removes the edge `(blocked, blocker, type)`.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if the edge does not exist.
    async fn remove_dependency(
        &self,
        blocked: &ElementId,
        blocker: &ElementId,
        dep_type: DependencyType,
    ) -> Result<()>;

    /// Edges where `id` waits on something.
    async fn outgoing(&self, id: &ElementId) -> Result<Vec<DependencyEdge>>;

    /// Edges where something waits on `id`.
    async fn incoming(&self, id: &ElementId) -> Result<Vec<DependencyEdge>>;

    /// All edges of one type.
    async fn dependencies_of_type(
        &self,
        dep_type: DependencyType,
    ) -> Result<Vec<DependencyEdge>>;

    /// Walks the dependency tree from `id`, deduplicating visits, capping
    /// at `depth`, and terminating branches at tombstones.
    async fn dependency_tree(
        &self,
        id: &ElementId,
        direction: TreeDirection,
        depth: Option<usize>,
    ) -> Result<Vec<(DependencyEdge, usize)>>;

    /// Whether a `relates-to` edge joins `a` and `b` (either order).
    async fn are_related(&self, a: &ElementId, b: &ElementId) -> Result<bool>;

    /// Advances the gate on the awaits edge `(blocked, blocker)`.
    async fn record_gate_event(
        &self,
        blocked: &ElementId,
        blocker: &ElementId,
        event: GateEvent,
    ) -> Result<bool>;

    /// Cached blocked status of one element.
    async fn is_blocked(&self, id: &ElementId) -> Result<bool>;

    // ========== Readiness ==========

    /// Tasks ready to work: open or in-progress, unblocked, not scheduled
    /// for the future, not in a draft plan, owning workflow (if any) not
    /// ephemeral-terminal. Ordered by (priority asc, created_at asc, id
    /// asc).
    async fn ready(&self, filter: &ElementFilter) -> Result<Vec<Element>>;

    /// Blocked open/in-progress tasks, each paired with its first blocker
    /// and a readable reason.
    async fn blocked(&self, filter: &ElementFilter) -> Result<Vec<BlockedEntry>>;

    /// Tasks with status backlog.
    async fn backlog(&self) -> Result<Vec<Element>>;

    // ========== Incremental sync ==========

    /// Ids dirty since the last successful incremental export.
    async fn dirty_ids(&self) -> Result<Vec<ElementId>>;

    /// Clears the dirty flag for the given ids.
    async fn mark_clean(&self, ids: &[ElementId]) -> Result<()>;

    /// Store-level counters.
    async fn counts(&self) -> Result<StoreCounts>;

    // ========== Batch / exchange ==========

    /// Every live element, for export.
    async fn export_elements(&self) -> Result<Vec<Element>>;

    /// Every dependency edge, for export.
    async fn export_edges(&self) -> Result<Vec<DependencyEdge>>;

    /// Restores an element verbatim (import path): id, timestamps, and
    /// payload are preserved; an existing element with the same id is
    /// replaced.
    async fn restore_element(&self, element: Element) -> Result<()>;

    /// Restores an edge verbatim (import path). Cycle checking still
    /// applies.
    async fn restore_edge(&self, edge: DependencyEdge) -> Result<()>;

    // ========== Persistence ==========

    /// Persists to backing storage. A no-op for purely ephemeral stores.
    async fn save(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewActor, NewPayload};
    use crate::id::EntityId;
    use std::sync::Arc;

    #[tokio::test]
    async fn trait_is_object_safe() {
        // The engine and exchange both hold `Arc<dyn ElementStore>`;
        // this pins the trait's object safety.
        let store: Arc<dyn ElementStore> = memory::MemoryStore::in_memory();

        let created = store
            .create(NewElement::new(
                EntityId::from(ElementId::new_unchecked("el-sys")),
                NewPayload::Entity(NewActor {
                    name: "probe".to_string(),
                    actor_kind: crate::domain::ActorKind::System,
                }),
            ))
            .await
            .unwrap();

        let fetched = store.get(&created.id).await.unwrap();
        assert!(fetched.is_some());
        assert_eq!(store.counts().await.unwrap().elements, 1);
    }
}
