//! Readiness and blocked-set derivation over the inner state.
//!
//! `ready` and `blocked` partition the open/in-progress tasks whose
//! `scheduled_for` is absent or past; backlog, future-scheduled,
//! draft-plan, and ephemeral-terminal-workflow tasks are excluded from
//! both.

use super::inner::Inner;
use crate::domain::{
    DependencyEdge, DependencyType, Element, ElementFilter, Gate, TaskStatus,
};
use crate::graph::{blocker_is_satisfied, find_blocked_set};
use crate::id::ElementId;
use crate::store::BlockedEntry;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Task ids withheld from readiness regardless of blocking: members of
/// draft plans and tasks owned by ephemeral workflows in terminal states.
pub(super) fn withheld_task_ids(inner: &Inner) -> HashSet<ElementId> {
    let mut withheld = HashSet::new();
    for element in inner.elements.values() {
        if element.deleted {
            continue;
        }
        if let Some(plan) = element.as_plan() {
            if plan.status == crate::domain::PlanStatus::Draft {
                withheld.extend(plan.tasks.iter().map(|t| t.as_element_id().clone()));
            }
        }
        if let Some(workflow) = element.as_workflow() {
            if workflow.ephemeral && workflow.status.is_terminal() {
                withheld.extend(workflow.tasks.iter().map(|t| t.as_element_id().clone()));
            }
        }
    }
    withheld
}

fn is_workable(element: &Element, now: DateTime<Utc>) -> bool {
    if element.deleted {
        return false;
    }
    let Some(task) = element.as_task() else {
        return false;
    };
    if !matches!(task.status, TaskStatus::Open | TaskStatus::InProgress) {
        return false;
    }
    // A future scheduled_for keeps the task parked.
    task.scheduled_for.is_none_or(|at| at <= now)
}

/// Tasks ready to work, ordered by (priority asc, created_at asc, id asc).
pub(super) fn ready(inner: &Inner, filter: &ElementFilter, now: DateTime<Utc>) -> Vec<Element> {
    let blocked = find_blocked_set(&inner.graph, &inner.elements, now);
    let withheld = withheld_task_ids(inner);

    let mut result: Vec<Element> = inner
        .elements
        .values()
        .filter(|element| {
            is_workable(element, now)
                && !blocked.contains(&element.id)
                && !withheld.contains(&element.id)
                && filter.matches(element)
        })
        .cloned()
        .collect();

    result.sort_by(|a, b| {
        let pa = a.as_task().map_or(u8::MAX, |t| t.priority);
        let pb = b.as_task().map_or(u8::MAX, |t| t.priority);
        pa.cmp(&pb)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });

    if let Some(limit) = filter.limit {
        result.truncate(limit);
    }
    result
}

/// Blocked open/in-progress tasks with their first blocker and reason.
pub(super) fn blocked_entries(
    inner: &Inner,
    filter: &ElementFilter,
    now: DateTime<Utc>,
) -> Vec<BlockedEntry> {
    let mut entries = Vec::new();

    let mut candidates: Vec<&Element> = inner
        .elements
        .values()
        .filter(|element| is_workable(element, now) && filter.matches(element))
        .collect();
    candidates.sort_by(|a, b| a.id.cmp(&b.id));

    for element in candidates {
        let mut unsatisfied: Vec<&DependencyEdge> = inner
            .graph
            .blocking_edges_from(&element.id)
            .into_iter()
            .filter(|edge| !blocker_is_satisfied(edge, &inner.elements, now))
            .collect();
        if unsatisfied.is_empty() {
            continue;
        }
        // First blocker: the oldest unsatisfied edge, ties broken by id.
        unsatisfied.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.blocker.cmp(&b.blocker))
        });
        let first = unsatisfied[0];
        let blocker = inner.elements.get(&first.blocker).cloned();

        entries.push(BlockedEntry {
            element: element.clone(),
            reason: describe_blockage(first, blocker.as_ref()),
            blocker,
        });
    }

    if let Some(limit) = filter.limit {
        entries.truncate(limit);
    }
    entries
}

/// Tasks with status backlog, ordered by (priority asc, created_at asc).
pub(super) fn backlog(inner: &Inner) -> Vec<Element> {
    let mut result: Vec<Element> = inner
        .elements
        .values()
        .filter(|element| {
            !element.deleted
                && element
                    .as_task()
                    .is_some_and(|task| task.status == TaskStatus::Backlog)
        })
        .cloned()
        .collect();
    result.sort_by(|a, b| {
        let pa = a.as_task().map_or(u8::MAX, |t| t.priority);
        let pb = b.as_task().map_or(u8::MAX, |t| t.priority);
        pa.cmp(&pb)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
    result
}

fn describe_blockage(edge: &DependencyEdge, blocker: Option<&Element>) -> String {
    match edge.dep_type {
        DependencyType::Blocks => format!(
            "waiting on {} ({})",
            edge.blocker,
            blocker_state(blocker)
        ),
        DependencyType::ParentChild => format!(
            "parent {} is {}",
            edge.blocker,
            blocker_state(blocker)
        ),
        DependencyType::Awaits => match &edge.metadata.gate {
            Some(Gate::Timer { wait_until }) => {
                format!("waiting until {}", wait_until.to_rfc3339())
            }
            Some(Gate::Approval {
                approval_count,
                approved_by,
                ..
            }) => format!(
                "awaiting approvals ({}/{approval_count})",
                approved_by.len()
            ),
            Some(Gate::External { system, .. }) => {
                format!("awaiting signal from {system}")
            }
            Some(Gate::Webhook { endpoint_id, .. }) => {
                format!("awaiting webhook {endpoint_id}")
            }
            None => format!("awaiting {} (no gate recorded)", edge.blocker),
        },
        // Non-blocking types never reach here.
        other => format!("{other:?} edge to {}", edge.blocker),
    }
}

fn blocker_state(blocker: Option<&Element>) -> String {
    match blocker {
        None => "missing".to_string(),
        Some(element) if element.deleted => "deleted".to_string(),
        Some(element) => match element.as_task() {
            Some(task) => task.status.as_str().to_string(),
            None => element.as_workflow().map_or_else(
                || format!("{:?}", element.kind()).to_lowercase(),
                |workflow| workflow.status.as_str().to_string(),
            ),
        },
    }
}
