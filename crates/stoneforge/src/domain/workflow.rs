//! Workflow, playbook, plan, and actor payloads.

use crate::error::{Error, Result};
use crate::id::{PlaybookId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Status of a workflow. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created but not started.
    Pending,
    /// Executing.
    Running,
    /// Finished successfully. Terminal.
    Completed,
    /// Finished unsuccessfully. Terminal.
    Failed,
    /// Aborted before completion. Terminal.
    Cancelled,
}

impl WorkflowStatus {
    /// Whether this is an absorbing terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the transition `self -> to` is permitted.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        use WorkflowStatus::{Cancelled, Completed, Failed, Pending, Running};
        matches!(
            (self, to),
            (Pending, Running | Cancelled) | (Running, Completed | Failed | Cancelled)
        )
    }

    /// Stable snake_case name, matching the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// The workflow payload of an element.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Workflow name.
    pub name: String,

    /// Lifecycle status.
    pub status: WorkflowStatus,

    /// Ephemeral workflows in a terminal state exclude their tasks from
    /// readiness.
    #[serde(default)]
    pub ephemeral: bool,

    /// Playbook this workflow was instantiated from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playbook_ref: Option<PlaybookId>,

    /// Tasks owned by this workflow.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tasks: BTreeSet<TaskId>,
}

/// Data for creating a new workflow.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    /// Workflow name.
    pub name: String,
    /// Whether the workflow is ephemeral.
    pub ephemeral: bool,
    /// Source playbook.
    pub playbook_ref: Option<PlaybookId>,
    /// Owned tasks.
    pub tasks: BTreeSet<TaskId>,
}

/// Partial update for a workflow payload.
#[derive(Debug, Clone, Default)]
pub struct WorkflowPatch {
    /// New status; the transition is validated against the state machine.
    pub status: Option<WorkflowStatus>,
    /// Replacement owned-task set.
    pub tasks: Option<BTreeSet<TaskId>>,
}

/// The playbook payload: a named, reusable workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    /// Playbook name.
    pub name: String,
    /// What the playbook does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Data for creating a new playbook.
#[derive(Debug, Clone)]
pub struct NewPlaybook {
    /// Playbook name.
    pub name: String,
    /// What the playbook does.
    pub description: Option<String>,
}

/// Partial update for a playbook payload.
#[derive(Debug, Clone, Default)]
pub struct PlaybookPatch {
    /// New name.
    pub name: Option<String>,
    /// Description change (double-Option).
    pub description: Option<Option<String>>,
}

/// Status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// Under construction; member tasks are withheld from readiness.
    Draft,
    /// In effect.
    Active,
    /// Done.
    Completed,
}

/// The plan payload: a curated set of tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan name.
    pub name: String,
    /// Lifecycle status.
    pub status: PlanStatus,
    /// Tasks the plan covers.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tasks: BTreeSet<TaskId>,
}

/// Data for creating a new plan.
#[derive(Debug, Clone)]
pub struct NewPlan {
    /// Plan name.
    pub name: String,
    /// Initial status.
    pub status: PlanStatus,
    /// Member tasks.
    pub tasks: BTreeSet<TaskId>,
}

/// Partial update for a plan payload.
#[derive(Debug, Clone, Default)]
pub struct PlanPatch {
    /// New status.
    pub status: Option<PlanStatus>,
    /// Replacement member-task set.
    pub tasks: Option<BTreeSet<TaskId>>,
}

/// Kind of actor behind an entity element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    /// A person.
    Human,
    /// An automated agent.
    Agent,
    /// The system itself (migrations, sync, timers).
    System,
}

/// The entity payload: an actor that creates and is assigned elements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    /// Display name.
    pub name: String,
    /// Kind of actor.
    pub actor_kind: ActorKind,
}

/// Data for creating a new entity element.
#[derive(Debug, Clone)]
pub struct NewActor {
    /// Display name.
    pub name: String,
    /// Kind of actor.
    pub actor_kind: ActorKind,
}

/// Partial update for an entity payload.
#[derive(Debug, Clone, Default)]
pub struct ActorPatch {
    /// New display name.
    pub name: Option<String>,
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        Err(Error::MissingRequiredField("name"))
    } else {
        Ok(())
    }
}
