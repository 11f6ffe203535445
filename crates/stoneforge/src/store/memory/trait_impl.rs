//! `ElementStore` implementation for [`MemoryStore`].

use super::MemoryStore;
use super::readiness;
use crate::domain::{
    DependencyEdge, DependencyType, Element, ElementEvent, ElementFilter, ElementKind,
    ElementPatch, EventKind, GateEvent, NewDependency, NewElement, TreeDirection,
};
use crate::error::{Error, Result};
use crate::id::ElementId;
use crate::store::{BlockedEntry, DeleteOptions, ElementStore, StoreCounts, UpdateOptions};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;

#[async_trait]
impl ElementStore for MemoryStore {
    async fn create(&self, new: NewElement) -> Result<Element> {
        let mut inner = self.inner.write().await;
        let element = inner.create_element(new)?;
        debug!(id = %element.id, kind = ?element.kind(), "created element");
        Ok(element)
    }

    async fn get(&self, id: &ElementId) -> Result<Option<Element>> {
        let inner = self.inner.read().await;
        Ok(inner.elements.get(id).cloned())
    }

    async fn update(
        &self,
        id: &ElementId,
        patch: ElementPatch,
        opts: UpdateOptions,
    ) -> Result<Element> {
        let mut inner = self.inner.write().await;

        let element = inner
            .elements
            .get(id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        if element.deleted {
            return Err(Error::Constraint(format!("{id} is deleted")));
        }
        if element.kind() == ElementKind::Message {
            return Err(Error::Immutable(id.clone()));
        }
        if let Some(expected) = opts.expected_updated_at {
            if element.updated_at != expected {
                return Err(Error::Conflict {
                    element_id: id.clone(),
                    expected,
                    actual: element.updated_at,
                });
            }
        }
        let actor = opts.actor.unwrap_or_else(|| element.created_by.clone());

        // Snapshot for rollback: a patch that fails validation partway
        // through must leave the element untouched.
        let snapshot = element.clone();
        let events = match inner.apply_patch(id, patch) {
            Ok(events) => events,
            Err(err) => {
                inner.elements.insert(id.clone(), snapshot);
                return Err(err);
            }
        };
        let status_changed = events
            .iter()
            .any(|(kind, _)| *kind == EventKind::StatusChanged);

        for (kind, payload) in events {
            inner.append_event(ElementEvent::now(id.clone(), kind, actor.clone(), payload));
        }
        inner.dirty.insert(id.clone());

        if status_changed {
            // This element's closing state feeds the blocked status of
            // everything waiting on it.
            let dependents: Vec<ElementId> = inner
                .graph
                .incoming(id)
                .into_iter()
                .filter(|edge| edge.dep_type.is_blocking())
                .map(|edge| edge.blocked)
                .collect();
            self.cache.invalidate_all(dependents.iter());
            debug!(id = %id, dependents = dependents.len(), "status change invalidated blocked cache");
        }

        Ok(inner.elements[id].clone())
    }

    async fn delete(&self, id: &ElementId, opts: DeleteOptions) -> Result<()> {
        let mut inner = self.inner.write().await;

        let element = inner
            .elements
            .get(id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        if element.kind() == ElementKind::Message {
            return Err(Error::Immutable(id.clone()));
        }
        if element.deleted {
            // Deleting a tombstone is a no-op.
            return Ok(());
        }
        let actor = opts.actor.unwrap_or_else(|| element.created_by.clone());
        let channel_name = element.as_channel().map(|channel| channel.name.clone());

        let element = inner.elements.get_mut(id).expect("checked above");
        element.deleted = true;
        element.updated_at = super::inner::Inner::advance_clock(element.updated_at);

        if let Some(name) = channel_name {
            inner.channel_names.remove(&name);
        }
        inner.dirty.insert(id.clone());
        inner.append_event(ElementEvent::now(
            id.clone(),
            EventKind::Deleted,
            actor,
            json!({ "reason": opts.reason }),
        ));

        // A deleted blocker releases its dependents.
        let dependents: Vec<ElementId> = inner
            .graph
            .incoming(id)
            .into_iter()
            .filter(|edge| edge.dep_type.is_blocking())
            .map(|edge| edge.blocked)
            .collect();
        self.cache.invalidate_all(dependents.iter());
        self.cache.forget(id);

        Ok(())
    }

    async fn list(&self, filter: &ElementFilter) -> Result<Vec<Element>> {
        let inner = self.inner.read().await;
        let mut elements: Vec<Element> = inner
            .elements
            .values()
            .filter(|element| filter.matches(element))
            .cloned()
            .collect();
        // Most recent first, id as the deterministic tiebreak.
        elements.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            elements.truncate(limit);
        }
        Ok(elements)
    }

    async fn events(&self, id: &ElementId, limit: Option<usize>) -> Result<Vec<ElementEvent>> {
        let inner = self.inner.read().await;
        if !inner.elements.contains_key(id) {
            return Err(Error::NotFound(id.clone()));
        }
        let log = inner.events.get(id).map(Vec::as_slice).unwrap_or_default();
        let events = match limit {
            Some(limit) if limit < log.len() => log[log.len() - limit..].to_vec(),
            _ => log.to_vec(),
        };
        Ok(events)
    }

    async fn record_event(&self, event: ElementEvent) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.elements.contains_key(&event.element_id) {
            return Err(Error::NotFound(event.element_id.clone()));
        }
        inner.append_event(event);
        Ok(())
    }

    async fn add_dependency(&self, dep: NewDependency) -> Result<DependencyEdge> {
        let mut inner = self.inner.write().await;

        if dep.dep_type == DependencyType::Mentions {
            return Err(Error::Constraint(
                "mentions edges are derived from message content, not authored".to_string(),
            ));
        }
        for endpoint in [&dep.blocked, &dep.blocker] {
            if !inner.elements.contains_key(endpoint) {
                return Err(Error::NotFound(endpoint.clone()));
            }
        }

        let edge = inner.graph.add_edge(dep)?;
        inner.dirty.insert(edge.blocked.clone());
        inner.dirty.insert(edge.blocker.clone());
        if edge.dep_type.is_blocking() {
            self.cache.invalidate(&edge.blocked);
        }
        Ok(edge)
    }

    async fn remove_dependency(
        &self,
        blocked: &ElementId,
        blocker: &ElementId,
        dep_type: DependencyType,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let edge = inner.graph.remove_edge(blocked, blocker, dep_type)?;
        inner.dirty.insert(edge.blocked.clone());
        inner.dirty.insert(edge.blocker.clone());
        if edge.dep_type.is_blocking() {
            self.cache.invalidate(&edge.blocked);
        }
        Ok(())
    }

    async fn outgoing(&self, id: &ElementId) -> Result<Vec<DependencyEdge>> {
        let inner = self.inner.read().await;
        if !inner.elements.contains_key(id) {
            return Err(Error::NotFound(id.clone()));
        }
        Ok(inner.graph.outgoing(id))
    }

    async fn incoming(&self, id: &ElementId) -> Result<Vec<DependencyEdge>> {
        let inner = self.inner.read().await;
        if !inner.elements.contains_key(id) {
            return Err(Error::NotFound(id.clone()));
        }
        Ok(inner.graph.incoming(id))
    }

    async fn dependencies_of_type(
        &self,
        dep_type: DependencyType,
    ) -> Result<Vec<DependencyEdge>> {
        let inner = self.inner.read().await;
        Ok(inner.graph.of_type(dep_type))
    }

    async fn dependency_tree(
        &self,
        id: &ElementId,
        direction: TreeDirection,
        depth: Option<usize>,
    ) -> Result<Vec<(DependencyEdge, usize)>> {
        let inner = self.inner.read().await;
        inner.graph.tree(id, direction, depth, |node| {
            inner.elements.get(node).is_none_or(|element| element.deleted)
        })
    }

    async fn are_related(&self, a: &ElementId, b: &ElementId) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner.graph.are_related(a, b))
    }

    async fn record_gate_event(
        &self,
        blocked: &ElementId,
        blocker: &ElementId,
        event: GateEvent,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let changed = inner.graph.record_gate_event(blocked, blocker, &event)?;
        if changed {
            inner.dirty.insert(blocked.clone());
            self.cache.invalidate(blocked);
        }
        Ok(changed)
    }

    async fn is_blocked(&self, id: &ElementId) -> Result<bool> {
        // Fast path: a fresh cached value.
        if let Some(cached) = self.cache.get(id) {
            return Ok(cached);
        }

        let version = self.cache.begin_read(id);
        let inner = self.inner.read().await;
        if !inner.elements.contains_key(id) {
            return Err(Error::NotFound(id.clone()));
        }
        let value =
            crate::graph::is_blocked_now(&inner.graph, &inner.elements, id, Utc::now());
        drop(inner);

        // Publish only if no invalidation raced this computation.
        self.cache.publish(id, version, value);
        Ok(value)
    }

    async fn ready(&self, filter: &ElementFilter) -> Result<Vec<Element>> {
        let inner = self.inner.read().await;
        Ok(readiness::ready(&inner, filter, Utc::now()))
    }

    async fn blocked(&self, filter: &ElementFilter) -> Result<Vec<BlockedEntry>> {
        let inner = self.inner.read().await;
        Ok(readiness::blocked_entries(&inner, filter, Utc::now()))
    }

    async fn backlog(&self) -> Result<Vec<Element>> {
        let inner = self.inner.read().await;
        Ok(readiness::backlog(&inner))
    }

    async fn dirty_ids(&self) -> Result<Vec<ElementId>> {
        let inner = self.inner.read().await;
        let mut ids: Vec<ElementId> = inner.dirty.iter().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn mark_clean(&self, ids: &[ElementId]) -> Result<()> {
        let mut inner = self.inner.write().await;
        for id in ids {
            inner.dirty.remove(id);
        }
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let inner = self.inner.read().await;
        let tombstones = inner.elements.values().filter(|e| e.deleted).count();
        Ok(StoreCounts {
            elements: inner.elements.len() - tombstones,
            tombstones,
            edges: inner.graph.edge_count(),
            dirty: inner.dirty.len(),
        })
    }

    async fn export_elements(&self) -> Result<Vec<Element>> {
        let inner = self.inner.read().await;
        let mut elements: Vec<Element> = inner
            .elements
            .values()
            .filter(|element| !element.deleted)
            .cloned()
            .collect();
        elements.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(elements)
    }

    async fn export_edges(&self) -> Result<Vec<DependencyEdge>> {
        let inner = self.inner.read().await;
        Ok(inner.graph.all_edges())
    }

    async fn restore_element(&self, element: Element) -> Result<()> {
        element.validate()?;
        let mut inner = self.inner.write().await;

        let existed = inner.elements.contains_key(&element.id);
        inner.ids.register(&element.id);
        inner.graph.ensure_node(&element.id);
        if let Some(channel) = element.as_channel() {
            inner.channel_names.insert(channel.name.clone());
        }

        let id = element.id.clone();
        let actor = element.created_by.clone();
        inner.elements.insert(id.clone(), element);
        inner.dirty.insert(id.clone());
        inner.append_event(ElementEvent::now(
            id.clone(),
            if existed { EventKind::Updated } else { EventKind::Created },
            actor,
            json!({ "source": "import" }),
        ));
        self.cache.invalidate(&id);
        Ok(())
    }

    async fn restore_edge(&self, edge: DependencyEdge) -> Result<()> {
        let mut inner = self.inner.write().await;
        for endpoint in [&edge.blocked, &edge.blocker] {
            if !inner.elements.contains_key(endpoint) {
                return Err(Error::NotFound(endpoint.clone()));
            }
        }
        let blocked = edge.blocked.clone();
        let blocking = edge.dep_type.is_blocking();
        inner.graph.restore_edge(edge)?;
        if blocking {
            self.cache.invalidate(&blocked);
        }
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        self.persist().await
    }
}
