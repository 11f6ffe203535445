//! Query filter for element listings.

use crate::domain::element::ElementKind;
use crate::domain::task::{TaskStatus, TaskType};
use crate::id::EntityId;

/// Filter for querying elements.
///
/// All criteria are conjunctive. Task-specific criteria (status,
/// priority, task type, assignee) only match task elements.
#[derive(Debug, Clone, Default)]
pub struct ElementFilter {
    /// Filter by element kind.
    pub kind: Option<ElementKind>,

    /// Filter by task status.
    pub status: Option<TaskStatus>,

    /// Filter by task priority.
    pub priority: Option<u8>,

    /// Filter by task type.
    pub task_type: Option<TaskType>,

    /// Filter by assignee.
    pub assignee: Option<EntityId>,

    /// Filter by tag membership.
    pub tag: Option<String>,

    /// Include tombstoned elements (excluded by default).
    pub include_deleted: bool,

    /// Limit number of results.
    pub limit: Option<usize>,
}

impl ElementFilter {
    /// A filter matching only elements of the given kind.
    #[must_use]
    pub fn of_kind(kind: ElementKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Whether the element satisfies every criterion except the limit.
    #[must_use]
    pub fn matches(&self, element: &crate::domain::Element) -> bool {
        if !self.include_deleted && element.deleted {
            return false;
        }
        if let Some(kind) = self.kind {
            if element.kind() != kind {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !element.has_tag(tag) {
                return false;
            }
        }

        if self.status.is_some() || self.priority.is_some() || self.task_type.is_some()
            || self.assignee.is_some()
        {
            let Some(task) = element.as_task() else {
                return false;
            };
            if let Some(status) = self.status {
                if task.status != status {
                    return false;
                }
            }
            if let Some(priority) = self.priority {
                if task.priority != priority {
                    return false;
                }
            }
            if let Some(task_type) = self.task_type {
                if task.task_type != task_type {
                    return false;
                }
            }
            if let Some(assignee) = &self.assignee {
                if task.assignee.as_ref() != Some(assignee) {
                    return false;
                }
            }
        }

        true
    }
}
