//! Task payload: the primary work element.

use crate::error::{Error, Result};
use crate::id::{DocumentId, EntityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length for task titles, in characters after trimming.
pub const MAX_TITLE_LENGTH: usize = 500;

/// Status of a task.
///
/// Valid transitions form a DAG: backlog -> open, open <-> in_progress,
/// open <-> deferred, {open, in_progress, deferred} -> closed, and
/// closed -> open (reopen).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet scheduled for work.
    Backlog,
    /// Ready to be picked up (subject to blocking).
    Open,
    /// Currently being worked on.
    InProgress,
    /// Completed or abandoned; terminal until reopened.
    Closed,
    /// Intentionally postponed.
    Deferred,
}

impl TaskStatus {
    /// Whether the transition `self -> to` is permitted.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        use TaskStatus::{Backlog, Closed, Deferred, InProgress, Open};
        matches!(
            (self, to),
            (Backlog, Open)
                | (Open, InProgress | Deferred | Closed)
                | (InProgress, Open | Closed)
                | (Deferred, Open | Closed)
                | (Closed, Open)
        )
    }

    /// Stable lowercase name, matching the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
            Self::Deferred => "deferred",
        }
    }
}

/// Type of task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Defect fix.
    Bug,
    /// New functionality.
    Feature,
    /// General work item.
    Task,
    /// Maintenance work.
    Chore,
}

/// The task payload of an element.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task title (non-empty, trimmed, at most [`MAX_TITLE_LENGTH`] chars).
    pub title: String,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// Priority level (1 = highest, 5 = lowest).
    pub priority: u8,

    /// Complexity estimate (1..=5).
    pub complexity: u8,

    /// Type of task.
    pub task_type: TaskType,

    /// Assigned entity, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<EntityId>,

    /// Document holding the long-form description, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_ref: Option<DocumentId>,

    /// Earliest time the task should surface as workable. Effective only
    /// once in the past; a future value keeps the task out of `ready`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,

    /// Why the task was closed, when closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,

    /// Incremented each time the task is reopened.
    #[serde(default)]
    pub reconcile_count: u32,
}

impl Task {
    /// Validate task payload invariants.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the title is empty or too long, or
    /// priority/complexity fall outside 1..=5.
    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        validate_scale("priority", self.priority)?;
        validate_scale("complexity", self.complexity)?;
        Ok(())
    }
}

/// Data for creating a new task.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Task title.
    pub title: String,
    /// Initial status (defaults to backlog).
    pub status: TaskStatus,
    /// Priority level (1..=5).
    pub priority: u8,
    /// Complexity estimate (1..=5).
    pub complexity: u8,
    /// Type of task.
    pub task_type: TaskType,
    /// Assignee, if known at creation.
    pub assignee: Option<EntityId>,
    /// Long-form description document.
    pub description_ref: Option<DocumentId>,
    /// Scheduling hint.
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl Default for NewTask {
    fn default() -> Self {
        Self {
            title: "Untitled Task".to_string(),
            status: TaskStatus::Backlog,
            priority: 3,
            complexity: 3,
            task_type: TaskType::Task,
            assignee: None,
            description_ref: None,
            scheduled_for: None,
        }
    }
}

impl NewTask {
    /// Build the stored payload, validating on the way.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad title, priority, or complexity.
    pub fn into_task(self) -> Result<Task> {
        let task = Task {
            title: self.title.trim().to_string(),
            status: self.status,
            priority: self.priority,
            complexity: self.complexity,
            task_type: self.task_type,
            assignee: self.assignee,
            description_ref: self.description_ref,
            scheduled_for: self.scheduled_for,
            close_reason: None,
            reconcile_count: 0,
        };
        task.validate()?;
        Ok(task)
    }
}

/// Partial update for a task payload.
///
/// `assignee`, `scheduled_for`, and `close_reason` use the double-Option
/// pattern: `None` leaves the field unchanged, `Some(None)` clears it,
/// `Some(Some(v))` sets it.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// New title, if changing.
    pub title: Option<String>,
    /// New status, if changing. Transition is validated.
    pub status: Option<TaskStatus>,
    /// New priority, if changing.
    pub priority: Option<u8>,
    /// New complexity, if changing.
    pub complexity: Option<u8>,
    /// New task type, if changing.
    pub task_type: Option<TaskType>,
    /// Assignee change (double-Option).
    pub assignee: Option<Option<EntityId>>,
    /// Description document change (double-Option).
    pub description_ref: Option<Option<DocumentId>>,
    /// Scheduling change (double-Option).
    pub scheduled_for: Option<Option<DateTime<Utc>>>,
    /// Close reason change (double-Option).
    pub close_reason: Option<Option<String>>,
}

impl TaskPatch {
    /// Whether the patch touches nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.complexity.is_none()
            && self.task_type.is_none()
            && self.assignee.is_none()
            && self.description_ref.is_none()
            && self.scheduled_for.is_none()
            && self.close_reason.is_none()
    }
}

pub(crate) fn validate_title(title: &str) -> Result<()> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(Error::MissingRequiredField("title"));
    }
    let len = trimmed.chars().count();
    if len > MAX_TITLE_LENGTH {
        return Err(Error::TitleTooLong {
            len,
            max: MAX_TITLE_LENGTH,
        });
    }
    Ok(())
}

fn validate_scale(field: &'static str, value: u8) -> Result<()> {
    if (1..=5).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidInput {
            field,
            reason: format!("must be in range 1-5 (got {value})"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskStatus::Backlog, TaskStatus::Open, true)]
    #[case(TaskStatus::Open, TaskStatus::InProgress, true)]
    #[case(TaskStatus::InProgress, TaskStatus::Open, true)]
    #[case(TaskStatus::Open, TaskStatus::Deferred, true)]
    #[case(TaskStatus::Deferred, TaskStatus::Open, true)]
    #[case(TaskStatus::Open, TaskStatus::Closed, true)]
    #[case(TaskStatus::InProgress, TaskStatus::Closed, true)]
    #[case(TaskStatus::Deferred, TaskStatus::Closed, true)]
    #[case(TaskStatus::Closed, TaskStatus::Open, true)]
    #[case(TaskStatus::Backlog, TaskStatus::InProgress, false)]
    #[case(TaskStatus::Backlog, TaskStatus::Closed, false)]
    #[case(TaskStatus::Closed, TaskStatus::InProgress, false)]
    #[case(TaskStatus::Closed, TaskStatus::Deferred, false)]
    #[case(TaskStatus::Deferred, TaskStatus::InProgress, false)]
    #[case(TaskStatus::InProgress, TaskStatus::Deferred, false)]
    fn transition_table(#[case] from: TaskStatus, #[case] to: TaskStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn new_task_trims_title() {
        let task = NewTask {
            title: "  Fix the login flow  ".to_string(),
            ..Default::default()
        }
        .into_task()
        .unwrap();
        assert_eq!(task.title, "Fix the login flow");
    }

    #[test]
    fn empty_title_is_missing_field() {
        let err = NewTask {
            title: "   ".to_string(),
            ..Default::default()
        }
        .into_task()
        .unwrap_err();
        assert_eq!(err.kind(), "MISSING_REQUIRED_FIELD");
    }

    #[test]
    fn overlong_title_rejected() {
        let err = NewTask {
            title: "x".repeat(MAX_TITLE_LENGTH + 1),
            ..Default::default()
        }
        .into_task()
        .unwrap_err();
        assert_eq!(err.kind(), "TITLE_TOO_LONG");
    }

    #[test]
    fn title_at_limit_accepted() {
        let task = NewTask {
            title: "x".repeat(MAX_TITLE_LENGTH),
            ..Default::default()
        }
        .into_task();
        assert!(task.is_ok());
    }

    #[rstest]
    #[case(0)]
    #[case(6)]
    fn priority_out_of_range_rejected(#[case] priority: u8) {
        let err = NewTask {
            priority,
            ..Default::default()
        }
        .into_task()
        .unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }

    #[test]
    fn empty_patch_reports_empty() {
        assert!(TaskPatch::default().is_empty());
        let patch = TaskPatch {
            priority: Some(1),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
