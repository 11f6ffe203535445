//! Blocked-status derivation and its cache.
//!
//! An open task is blocked iff any outgoing blocking edge points to a
//! blocker that is not yet satisfied: a task blocker satisfies once
//! closed, a workflow blocker once terminal, an `awaits` gate once open,
//! and a tombstoned or missing blocker is treated as satisfied so stale
//! edges cannot block forever.

use crate::domain::{DependencyType, Element, ElementPayload, TaskStatus};
use crate::graph::DepGraph;
use crate::id::ElementId;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Whether a single blocking edge's blocker is satisfied at `now`.
#[must_use]
pub fn blocker_is_satisfied(
    edge: &crate::domain::DependencyEdge,
    elements: &HashMap<ElementId, Element>,
    now: DateTime<Utc>,
) -> bool {
    if edge.dep_type == DependencyType::Awaits {
        return edge
            .metadata
            .gate
            .as_ref()
            .is_some_and(|gate| gate.is_satisfied(now));
    }

    match elements.get(&edge.blocker) {
        // A tombstoned or missing blocker cannot hold anything up.
        None => true,
        Some(blocker) if blocker.deleted => true,
        Some(blocker) => match &blocker.payload {
            ElementPayload::Task(task) => task.status == TaskStatus::Closed,
            ElementPayload::Workflow(workflow) => workflow.status.is_terminal(),
            // Other element kinds have no closing state; they block until
            // deleted.
            _ => false,
        },
    }
}

/// Computes blocked status for one element directly from the graph.
#[must_use]
pub fn is_blocked_now(
    graph: &DepGraph,
    elements: &HashMap<ElementId, Element>,
    id: &ElementId,
    now: DateTime<Utc>,
) -> bool {
    graph
        .blocking_edges_from(id)
        .into_iter()
        .any(|edge| !blocker_is_satisfied(edge, elements, now))
}

/// Computes the full blocked set across all non-closed tasks.
///
/// Used by readiness derivation, where computing the set once beats
/// probing the cache per element.
#[must_use]
pub fn find_blocked_set(
    graph: &DepGraph,
    elements: &HashMap<ElementId, Element>,
    now: DateTime<Utc>,
) -> HashSet<ElementId> {
    let mut blocked = HashSet::new();
    for (id, element) in elements {
        if element.deleted {
            continue;
        }
        let skip = match element.as_task() {
            Some(task) => task.status == TaskStatus::Closed,
            None => false,
        };
        if skip {
            continue;
        }
        if is_blocked_now(graph, elements, id, now) {
            blocked.insert(id.clone());
        }
    }
    blocked
}

#[derive(Debug, Default, Clone)]
struct CacheSlot {
    value: Option<bool>,
    version: u64,
}

/// Versioned per-element cache of blocked status.
///
/// Readers take a version snapshot, compute the value outside the cache
/// lock, and publish it back only if the version is unchanged; a stale
/// reader's result is discarded rather than cached. Invalidation bumps
/// the version and clears the value, so a read returning `ready` implies
/// no unsatisfied blocking edge existed at the moment of that read.
#[derive(Debug, Default)]
pub struct BlockedCache {
    slots: Mutex<HashMap<ElementId, CacheSlot>>,
}

impl BlockedCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value, if fresh.
    #[must_use]
    pub fn get(&self, id: &ElementId) -> Option<bool> {
        let slots = self.slots.lock().expect("blocked cache lock poisoned");
        slots.get(id).and_then(|slot| slot.value)
    }

    /// Begins a read: returns the current version for `id`.
    #[must_use]
    pub fn begin_read(&self, id: &ElementId) -> u64 {
        let slots = self.slots.lock().expect("blocked cache lock poisoned");
        slots.get(id).map_or(0, |slot| slot.version)
    }

    /// Publishes a computed value if no invalidation happened since
    /// `begin_read`. Returns whether the value was accepted.
    pub fn publish(&self, id: &ElementId, version: u64, value: bool) -> bool {
        let mut slots = self.slots.lock().expect("blocked cache lock poisoned");
        let slot = slots.entry(id.clone()).or_default();
        if slot.version == version {
            slot.value = Some(value);
            true
        } else {
            false
        }
    }

    /// Invalidates the cached value for `id`, bumping its version.
    pub fn invalidate(&self, id: &ElementId) {
        let mut slots = self.slots.lock().expect("blocked cache lock poisoned");
        let slot = slots.entry(id.clone()).or_default();
        slot.version += 1;
        slot.value = None;
    }

    /// Invalidates a batch of ids.
    pub fn invalidate_all<'a>(&self, ids: impl IntoIterator<Item = &'a ElementId>) {
        let mut slots = self.slots.lock().expect("blocked cache lock poisoned");
        for id in ids {
            let slot = slots.entry(id.clone()).or_default();
            slot.version += 1;
            slot.value = None;
        }
    }

    /// Drops an element's slot entirely (on delete).
    pub fn forget(&self, id: &ElementId) {
        let mut slots = self.slots.lock().expect("blocked cache lock poisoned");
        slots.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ElementId {
        ElementId::parse(s).unwrap()
    }

    #[test]
    fn publish_respects_version() {
        let cache = BlockedCache::new();
        let element = id("el-aaa");

        let version = cache.begin_read(&element);
        assert!(cache.publish(&element, version, true));
        assert_eq!(cache.get(&element), Some(true));
    }

    #[test]
    fn invalidation_defeats_stale_publish() {
        let cache = BlockedCache::new();
        let element = id("el-aaa");

        let version = cache.begin_read(&element);
        cache.invalidate(&element);
        // the computed value is now stale and must be discarded
        assert!(!cache.publish(&element, version, false));
        assert_eq!(cache.get(&element), None);
    }

    #[test]
    fn invalidate_clears_cached_value() {
        let cache = BlockedCache::new();
        let element = id("el-aaa");

        let version = cache.begin_read(&element);
        cache.publish(&element, version, false);
        assert_eq!(cache.get(&element), Some(false));

        cache.invalidate(&element);
        assert_eq!(cache.get(&element), None);
    }
}
