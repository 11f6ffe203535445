//! Dependency graph engine.
//!
//! Stores typed edges keyed by `(blocked, blocker, type)` over a petgraph
//! [`DiGraph`] for traversal and cycle detection, with a parallel record
//! map holding edge envelopes (creator, timestamps, gate/validation
//! metadata). The blocking subgraph is kept acyclic: inserting a
//! blocking-family edge that would close a cycle fails atomically with no
//! side effect.
//!
//! Mutations must run under the store's write lock; the engine itself is
//! a plain data structure and does no locking.

pub mod blocked;

pub use blocked::{BlockedCache, blocker_is_satisfied, find_blocked_set, is_blocked_now};

use crate::domain::{
    DependencyEdge, DependencyType, EdgeMeta, Gate, GateEvent, NewDependency, TreeDirection,
};
use crate::error::{Error, Result};
use crate::id::ElementId;
use chrono::Utc;
use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{EdgeFiltered, EdgeRef};
use std::collections::{HashMap, HashSet, VecDeque};

/// Maximum depth for tree walks and blocking propagation.
const MAX_WALK_DEPTH: usize = 50;

type EdgeKey = (ElementId, ElementId, DependencyType);

/// The dependency graph: typed edges between elements.
#[derive(Debug, Default)]
pub struct DepGraph {
    graph: DiGraph<ElementId, DependencyType>,
    node_map: HashMap<ElementId, NodeIndex>,
    records: HashMap<EdgeKey, DependencyEdge>,
}

impl DepGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a node exists for the element.
    pub fn ensure_node(&mut self, id: &ElementId) {
        if !self.node_map.contains_key(id) {
            let node = self.graph.add_node(id.clone());
            self.node_map.insert(id.clone(), node);
        }
    }

    /// Removes an element's node and every incident edge.
    pub fn remove_node(&mut self, id: &ElementId) {
        if let Some(node) = self.node_map.remove(id) {
            self.graph.remove_node(node);
            // NodeIndex values shift after removal; rebuild the map from
            // the graph's own node weights.
            self.node_map = self
                .graph
                .node_indices()
                .map(|idx| (self.graph[idx].clone(), idx))
                .collect();
        }
        self.records
            .retain(|(blocked, blocker, _), _| blocked != id && blocker != id);
    }

    /// Canonicalizes a `relates-to` pair so the lexicographically smaller
    /// id is stored as `blocked`.
    fn canonicalize(dep: &mut NewDependency) {
        if dep.dep_type == DependencyType::RelatesTo && dep.blocker < dep.blocked {
            std::mem::swap(&mut dep.blocked, &mut dep.blocker);
        }
    }

    /// Adds an edge, enforcing the DAG invariant for blocking types.
    ///
    /// Duplicate insertion of the same `(blocked, blocker, type)` triple
    /// is idempotent and returns the existing record.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if either endpoint has no node (the caller
    ///   validates element existence first; this is the backstop)
    /// - [`Error::CycleDetected`] if a blocking edge would close a cycle;
    ///   the graph is left unchanged
    /// - [`Error::Constraint`] for self-loops or invalid metadata
    pub fn add_edge(&mut self, mut dep: NewDependency) -> Result<DependencyEdge> {
        dep.validate()?;
        Self::canonicalize(&mut dep);

        let key: EdgeKey = (dep.blocked.clone(), dep.blocker.clone(), dep.dep_type);
        if let Some(existing) = self.records.get(&key) {
            return Ok(existing.clone());
        }

        let from = self.node_index(&dep.blocked)?;
        let to = self.node_index(&dep.blocker)?;

        if dep.dep_type.is_blocking() && self.would_close_cycle(from, to) {
            return Err(Error::CycleDetected {
                blocked: dep.blocked,
                blocker: dep.blocker,
            });
        }

        self.graph.add_edge(from, to, dep.dep_type);
        let edge = DependencyEdge {
            blocked: dep.blocked,
            blocker: dep.blocker,
            dep_type: dep.dep_type,
            created_at: Utc::now(),
            created_by: dep.created_by,
            metadata: EdgeMeta {
                gate: dep.gate,
                validation: dep.validation,
            },
        };
        self.records.insert(key, edge.clone());
        Ok(edge)
    }

    /// Whether inserting `from -> to` would close a cycle in the blocking
    /// subgraph: true iff `from` is already reachable from `to` along
    /// blocking edges.
    fn would_close_cycle(&self, from: NodeIndex, to: NodeIndex) -> bool {
        let blocking = EdgeFiltered::from_fn(&self.graph, |edge| edge.weight().is_blocking());
        has_path_connecting(&blocking, to, from, None)
    }

    /// Removes the edge with the given key.
    ///
    /// `relates-to` pairs are canonicalized before lookup, so removal
    /// succeeds regardless of argument order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the edge does not exist.
    pub fn remove_edge(
        &mut self,
        blocked: &ElementId,
        blocker: &ElementId,
        dep_type: DependencyType,
    ) -> Result<DependencyEdge> {
        let (blocked, blocker) =
            if dep_type == DependencyType::RelatesTo && blocker < blocked {
                (blocker.clone(), blocked.clone())
            } else {
                (blocked.clone(), blocker.clone())
            };

        let key: EdgeKey = (blocked.clone(), blocker.clone(), dep_type);
        let record = self
            .records
            .remove(&key)
            .ok_or_else(|| Error::NotFound(blocked.clone()))?;

        if let (Some(&from), Some(&to)) =
            (self.node_map.get(&blocked), self.node_map.get(&blocker))
        {
            let edge = self
                .graph
                .edges_connecting(from, to)
                .find(|e| *e.weight() == dep_type)
                .map(|e| e.id());
            if let Some(edge) = edge {
                self.graph.remove_edge(edge);
            }
        }
        Ok(record)
    }

    /// All edges where `id` is the blocked endpoint.
    #[must_use]
    pub fn outgoing(&self, id: &ElementId) -> Vec<DependencyEdge> {
        self.records
            .values()
            .filter(|edge| &edge.blocked == id)
            .cloned()
            .collect()
    }

    /// All edges where `id` is the blocker endpoint.
    #[must_use]
    pub fn incoming(&self, id: &ElementId) -> Vec<DependencyEdge> {
        self.records
            .values()
            .filter(|edge| &edge.blocker == id)
            .cloned()
            .collect()
    }

    /// All edges of the given type.
    #[must_use]
    pub fn of_type(&self, dep_type: DependencyType) -> Vec<DependencyEdge> {
        self.records
            .values()
            .filter(|edge| edge.dep_type == dep_type)
            .cloned()
            .collect()
    }

    /// Whether a `relates-to` edge joins `a` and `b`, probing both
    /// orderings.
    #[must_use]
    pub fn are_related(&self, a: &ElementId, b: &ElementId) -> bool {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        self.records
            .contains_key(&(low.clone(), high.clone(), DependencyType::RelatesTo))
    }

    /// Outgoing blocking edges of `id`, for blocked-status derivation.
    #[must_use]
    pub fn blocking_edges_from(&self, id: &ElementId) -> Vec<&DependencyEdge> {
        self.records
            .values()
            .filter(|edge| &edge.blocked == id && edge.dep_type.is_blocking())
            .collect()
    }

    /// Walks the dependency tree from `id` in the given direction.
    ///
    /// Visited nodes are deduplicated, the walk stops at `depth` levels
    /// (capped at 50), and tombstoned elements terminate their branch.
    /// Returns each reached edge paired with its depth (1-based).
    pub fn tree<F>(
        &self,
        id: &ElementId,
        direction: TreeDirection,
        depth: Option<usize>,
        is_tombstone: F,
    ) -> Result<Vec<(DependencyEdge, usize)>>
    where
        F: Fn(&ElementId) -> bool,
    {
        let start = self.node_index(id)?;
        let max_depth = depth.unwrap_or(MAX_WALK_DEPTH).min(MAX_WALK_DEPTH);
        let petgraph_dir = match direction {
            TreeDirection::Outgoing => Direction::Outgoing,
            TreeDirection::Incoming => Direction::Incoming,
        };

        let mut result = Vec::new();
        let mut visited: HashSet<NodeIndex> = [start].into();
        let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::from([(start, 0)]);

        while let Some((node, level)) = queue.pop_front() {
            if level >= max_depth {
                continue;
            }
            for edge in self.graph.edges_directed(node, petgraph_dir) {
                let next = match direction {
                    TreeDirection::Outgoing => edge.target(),
                    TreeDirection::Incoming => edge.source(),
                };
                let next_id = &self.graph[next];
                let key: EdgeKey = match direction {
                    TreeDirection::Outgoing => {
                        (self.graph[node].clone(), next_id.clone(), *edge.weight())
                    }
                    TreeDirection::Incoming => {
                        (next_id.clone(), self.graph[node].clone(), *edge.weight())
                    }
                };
                if let Some(record) = self.records.get(&key) {
                    if visited.insert(next) {
                        result.push((record.clone(), level + 1));
                        if !is_tombstone(next_id) {
                            queue.push_back((next, level + 1));
                        }
                    }
                }
            }
        }

        Ok(result)
    }

    /// Applies a gate event to the `awaits` edge `(blocked, blocker)`.
    ///
    /// Returns `true` when the event changed gate state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no awaits edge joins the pair, and
    /// [`Error::Constraint`] if the event does not match the gate kind
    /// (or the approver is not in the required set).
    pub fn record_gate_event(
        &mut self,
        blocked: &ElementId,
        blocker: &ElementId,
        event: &GateEvent,
    ) -> Result<bool> {
        let key: EdgeKey = (blocked.clone(), blocker.clone(), DependencyType::Awaits);
        let record = self
            .records
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(blocked.clone()))?;
        let gate = record
            .metadata
            .gate
            .as_mut()
            .ok_or_else(|| Error::Constraint("awaits edge has no gate".to_string()))?;

        match (gate, event) {
            (
                Gate::Approval {
                    required_approvers,
                    approved_by,
                    ..
                },
                GateEvent::Approval(approver),
            ) => {
                if !required_approvers.contains(approver) {
                    return Err(Error::Constraint(format!(
                        "{approver} is not a required approver"
                    )));
                }
                Ok(approved_by.insert(approver.clone()))
            }
            (Gate::External { system, satisfied }, GateEvent::ExternalSignal(from)) => {
                if system != from {
                    return Err(Error::Constraint(format!(
                        "sentinel from {from} does not match gate system {system}"
                    )));
                }
                let changed = !*satisfied;
                *satisfied = true;
                Ok(changed)
            }
            (Gate::Webhook { endpoint_id, satisfied }, GateEvent::WebhookFired(endpoint)) => {
                if endpoint_id != endpoint {
                    return Err(Error::Constraint(format!(
                        "webhook {endpoint} does not match gate endpoint {endpoint_id}"
                    )));
                }
                let changed = !*satisfied;
                *satisfied = true;
                Ok(changed)
            }
            _ => Err(Error::Constraint(
                "gate event does not match gate kind".to_string(),
            )),
        }
    }

    /// Every edge record, for export.
    #[must_use]
    pub fn all_edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<_> = self.records.values().cloned().collect();
        edges.sort_by(|a, b| a.key().cmp(&b.key()));
        edges
    }

    /// Restores an edge record during import, preserving its envelope.
    ///
    /// Cycle checking still applies; an edge that would break the DAG
    /// invariant is rejected rather than restored.
    ///
    /// # Errors
    ///
    /// As [`DepGraph::add_edge`].
    pub fn restore_edge(&mut self, edge: DependencyEdge) -> Result<()> {
        let key = edge.key();
        if self.records.contains_key(&key) {
            return Ok(());
        }
        let from = self.node_index(&edge.blocked)?;
        let to = self.node_index(&edge.blocker)?;
        if edge.dep_type.is_blocking() && self.would_close_cycle(from, to) {
            return Err(Error::CycleDetected {
                blocked: edge.blocked,
                blocker: edge.blocker,
            });
        }
        self.graph.add_edge(from, to, edge.dep_type);
        self.records.insert(key, edge);
        Ok(())
    }

    /// Number of stored edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.records.len()
    }

    fn node_index(&self, id: &ElementId) -> Result<NodeIndex> {
        self.node_map
            .get(id)
            .copied()
            .ok_or_else(|| Error::NotFound(id.clone()))
    }
}
