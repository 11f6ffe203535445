//! The element envelope shared by every persisted entity.

use crate::domain::channel::{Channel, ChannelPatch, Message, NewChannel, NewMessage};
use crate::domain::document::{Document, DocumentPatch, NewDocument};
use crate::domain::task::{NewTask, Task, TaskPatch};
use crate::domain::workflow::{
    Actor, ActorPatch, NewActor, NewPlan, NewPlaybook, NewWorkflow, Plan, PlanPatch, Playbook,
    PlaybookPatch, Workflow, WorkflowPatch, validate_name,
};
use crate::error::Result;
use crate::id::{ElementId, EntityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// String-keyed metadata map with JSON-serializable values.
///
/// Keys beginning with `_` are reserved for the core (sync state,
/// orchestration bookkeeping). Unknown keys are preserved verbatim.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Closed set of element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// A work item.
    Task,
    /// Versioned content.
    Document,
    /// A conversation container.
    Channel,
    /// An immutable chat message.
    Message,
    /// A workflow execution record.
    Workflow,
    /// A reusable workflow definition.
    Playbook,
    /// A curated set of tasks.
    Plan,
    /// An actor (human, agent, or system).
    Entity,
}

/// The typed payload of an element, tagged by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementPayload {
    /// Task payload.
    Task(Task),
    /// Document payload.
    Document(Document),
    /// Channel payload.
    Channel(Channel),
    /// Message payload.
    Message(Message),
    /// Workflow payload.
    Workflow(Workflow),
    /// Playbook payload.
    Playbook(Playbook),
    /// Plan payload.
    Plan(Plan),
    /// Entity (actor) payload.
    Entity(Actor),
}

impl ElementPayload {
    /// The kind tag of this payload.
    #[must_use]
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Task(_) => ElementKind::Task,
            Self::Document(_) => ElementKind::Document,
            Self::Channel(_) => ElementKind::Channel,
            Self::Message(_) => ElementKind::Message,
            Self::Workflow(_) => ElementKind::Workflow,
            Self::Playbook(_) => ElementKind::Playbook,
            Self::Plan(_) => ElementKind::Plan,
            Self::Entity(_) => ElementKind::Entity,
        }
    }

    /// Validate payload-specific invariants.
    ///
    /// # Errors
    ///
    /// Propagates the payload's validation error.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Task(task) => task.validate(),
            Self::Document(document) => document.validate(),
            Self::Channel(channel) => channel.validate(),
            Self::Message(message) => message.validate(),
            Self::Workflow(workflow) => validate_name(&workflow.name),
            Self::Playbook(playbook) => validate_name(&playbook.name),
            Self::Plan(plan) => validate_name(&plan.name),
            Self::Entity(actor) => validate_name(&actor.name),
        }
    }
}

/// A persisted entity: common envelope plus typed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    /// Globally unique, content-derived id.
    pub id: ElementId,

    /// Creation timestamp (wall-clock UTC).
    pub created_at: DateTime<Utc>,

    /// Last-update timestamp; monotonically non-decreasing per id.
    pub updated_at: DateTime<Utc>,

    /// Entity that created the element.
    pub created_by: EntityId,

    /// Case-sensitive tag set.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// String-keyed metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,

    /// Tombstone flag; soft-deleted elements remain resolvable by id.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,

    /// The typed payload, flattened so `type` appears at the top level.
    #[serde(flatten)]
    pub payload: ElementPayload,
}

impl Element {
    /// The element's kind.
    #[must_use]
    pub fn kind(&self) -> ElementKind {
        self.payload.kind()
    }

    /// The task payload, if this is a task.
    #[must_use]
    pub fn as_task(&self) -> Option<&Task> {
        match &self.payload {
            ElementPayload::Task(task) => Some(task),
            _ => None,
        }
    }

    /// The document payload, if this is a document.
    #[must_use]
    pub fn as_document(&self) -> Option<&Document> {
        match &self.payload {
            ElementPayload::Document(document) => Some(document),
            _ => None,
        }
    }

    /// The channel payload, if this is a channel.
    #[must_use]
    pub fn as_channel(&self) -> Option<&Channel> {
        match &self.payload {
            ElementPayload::Channel(channel) => Some(channel),
            _ => None,
        }
    }

    /// The message payload, if this is a message.
    #[must_use]
    pub fn as_message(&self) -> Option<&Message> {
        match &self.payload {
            ElementPayload::Message(message) => Some(message),
            _ => None,
        }
    }

    /// The workflow payload, if this is a workflow.
    #[must_use]
    pub fn as_workflow(&self) -> Option<&Workflow> {
        match &self.payload {
            ElementPayload::Workflow(workflow) => Some(workflow),
            _ => None,
        }
    }

    /// The plan payload, if this is a plan.
    #[must_use]
    pub fn as_plan(&self) -> Option<&Plan> {
        match &self.payload {
            ElementPayload::Plan(plan) => Some(plan),
            _ => None,
        }
    }

    /// Whether the element carries the given tag.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Validate envelope and payload invariants.
    ///
    /// # Errors
    ///
    /// Returns a constraint error when `updated_at` precedes
    /// `created_at`, or the payload's own validation error.
    pub fn validate(&self) -> Result<()> {
        if self.updated_at < self.created_at {
            return Err(crate::Error::Constraint(
                "updated_at must not precede created_at".to_string(),
            ));
        }
        self.payload.validate()
    }
}

/// Payload data for creating a new element.
#[derive(Debug, Clone)]
pub enum NewPayload {
    /// A new task.
    Task(NewTask),
    /// A new document.
    Document(NewDocument),
    /// A new channel.
    Channel(NewChannel),
    /// A new message.
    Message(NewMessage),
    /// A new workflow.
    Workflow(NewWorkflow),
    /// A new playbook.
    Playbook(NewPlaybook),
    /// A new plan.
    Plan(NewPlan),
    /// A new entity (actor).
    Entity(NewActor),
}

impl NewPayload {
    /// The kind the payload will create.
    #[must_use]
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Task(_) => ElementKind::Task,
            Self::Document(_) => ElementKind::Document,
            Self::Channel(_) => ElementKind::Channel,
            Self::Message(_) => ElementKind::Message,
            Self::Workflow(_) => ElementKind::Workflow,
            Self::Playbook(_) => ElementKind::Playbook,
            Self::Plan(_) => ElementKind::Plan,
            Self::Entity(_) => ElementKind::Entity,
        }
    }

    /// Seed string for content-derived id generation.
    #[must_use]
    pub fn id_seed(&self) -> String {
        match self {
            Self::Task(new) => format!("task|{}", new.title),
            Self::Document(new) => format!("document|{}", new.content.len()),
            Self::Channel(new) => format!(
                "channel|{}",
                new.name.clone().unwrap_or_default()
            ),
            Self::Message(new) => format!("message|{}", new.channel_id),
            Self::Workflow(new) => format!("workflow|{}", new.name),
            Self::Playbook(new) => format!("playbook|{}", new.name),
            Self::Plan(new) => format!("plan|{}", new.name),
            Self::Entity(new) => format!("entity|{}", new.name),
        }
    }
}

/// Data for creating a new element.
#[derive(Debug, Clone)]
pub struct NewElement {
    /// Creating entity.
    pub created_by: EntityId,
    /// Initial tags.
    pub tags: BTreeSet<String>,
    /// Initial metadata.
    pub metadata: Metadata,
    /// The typed payload.
    pub payload: NewPayload,
}

impl NewElement {
    /// Convenience constructor with empty tags and metadata.
    #[must_use]
    pub fn new(created_by: EntityId, payload: NewPayload) -> Self {
        Self {
            created_by,
            tags: BTreeSet::new(),
            metadata: Metadata::new(),
            payload,
        }
    }
}

/// Kind-specific part of an element patch.
#[derive(Debug, Clone)]
pub enum PayloadPatch {
    /// Task field updates.
    Task(TaskPatch),
    /// Document field updates.
    Document(DocumentPatch),
    /// Group-channel membership/permission updates.
    Channel(ChannelPatch),
    /// Workflow field updates.
    Workflow(WorkflowPatch),
    /// Playbook field updates.
    Playbook(PlaybookPatch),
    /// Plan field updates.
    Plan(PlanPatch),
    /// Entity field updates.
    Entity(ActorPatch),
}

impl PayloadPatch {
    /// The kind this patch applies to.
    #[must_use]
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Task(_) => ElementKind::Task,
            Self::Document(_) => ElementKind::Document,
            Self::Channel(_) => ElementKind::Channel,
            Self::Workflow(_) => ElementKind::Workflow,
            Self::Playbook(_) => ElementKind::Playbook,
            Self::Plan(_) => ElementKind::Plan,
            Self::Entity(_) => ElementKind::Entity,
        }
    }
}

/// Partial update for an element.
///
/// Metadata patching merges key-by-key: a JSON `null` value removes the
/// key, anything else replaces it. Tags are replaced wholesale when
/// present.
#[derive(Debug, Clone, Default)]
pub struct ElementPatch {
    /// Replacement tag set.
    pub tags: Option<BTreeSet<String>>,
    /// Metadata keys to merge (null removes).
    pub metadata: Option<Metadata>,
    /// Kind-specific field updates.
    pub payload: Option<PayloadPatch>,
}

impl ElementPatch {
    /// Whether the patch touches nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_none() && self.metadata.is_none() && self.payload.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskStatus;

    fn sample_task_element() -> Element {
        let now = Utc::now();
        Element {
            id: ElementId::parse("el-a3f8").unwrap(),
            created_at: now,
            updated_at: now,
            created_by: EntityId::from(ElementId::parse("el-sys").unwrap()),
            tags: ["backend".to_string()].into(),
            metadata: Metadata::new(),
            deleted: false,
            payload: ElementPayload::Task(
                NewTask {
                    title: "Wire up the importer".to_string(),
                    status: TaskStatus::Open,
                    ..Default::default()
                }
                .into_task()
                .unwrap(),
            ),
        }
    }

    #[test]
    fn serializes_with_type_tag_at_top_level() {
        let element = sample_task_element();
        let json = serde_json::to_value(&element).unwrap();
        assert_eq!(json["type"], "task");
        assert_eq!(json["id"], "el-a3f8");
        assert!(json["createdAt"].is_string());
        assert_eq!(json["title"], "Wire up the importer");
        // tombstone flag elided while false
        assert!(json.get("deleted").is_none());
    }

    #[test]
    fn round_trips_through_json() {
        let element = sample_task_element();
        let json = serde_json::to_string(&element).unwrap();
        let back: Element = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, element.id);
        assert_eq!(back.kind(), ElementKind::Task);
        assert_eq!(back.as_task().unwrap().title, "Wire up the importer");
    }

    #[test]
    fn updated_before_created_is_invalid() {
        let mut element = sample_task_element();
        element.updated_at = element.created_at - chrono::Duration::seconds(1);
        assert_eq!(element.validate().unwrap_err().kind(), "CONSTRAINT");
    }

    #[test]
    fn kind_accessors_match_payload() {
        let element = sample_task_element();
        assert_eq!(element.kind(), ElementKind::Task);
        assert!(element.as_task().is_some());
        assert!(element.as_document().is_none());
    }
}
