//! Inner state of the in-memory store (not thread-safe).
//!
//! Wrapped in `RwLock` by [`super::MemoryStore`]. Every mutation helper
//! here assumes the caller holds the write lock; invariant checks run
//! under that same lock so they cover both read-of-inputs and
//! write-of-result.

use crate::domain::{
    ArchivedVersion, Channel, ChannelPatch, ChannelType, Document, DocumentPatch, Element,
    ElementEvent, ElementKind, ElementPatch, ElementPayload, EventKind, Message, Metadata,
    NewElement, NewPayload, ORCHESTRATION_PREFIX, PayloadPatch, Plan, PlanPatch, Playbook,
    PlaybookPatch, Task, TaskPatch, TaskStatus, Workflow, WorkflowPatch,
};
use crate::error::{Error, Result};
use crate::graph::DepGraph;
use crate::id::{DocumentId, ElementId, EntityId};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};

/// Inner storage structure.
pub(super) struct Inner {
    /// Elements indexed by id, tombstones included.
    pub elements: HashMap<ElementId, Element>,

    /// Archived document versions, keyed by version id.
    pub versions: HashMap<DocumentId, ArchivedVersion>,

    /// Per-element append-only event logs.
    pub events: HashMap<ElementId, Vec<ElementEvent>>,

    /// The dependency graph.
    pub graph: DepGraph,

    /// Elements mutated since the last successful incremental export.
    pub dirty: HashSet<ElementId>,

    /// Channel names in use, for uniqueness.
    pub channel_names: HashSet<String>,

    /// Id generator.
    pub ids: crate::id::IdGenerator,
}

impl Inner {
    pub(super) fn new() -> Self {
        Self {
            elements: HashMap::new(),
            versions: HashMap::new(),
            events: HashMap::new(),
            graph: DepGraph::new(),
            dirty: HashSet::new(),
            channel_names: HashSet::new(),
            ids: crate::id::IdGenerator::new(0),
        }
    }

    /// Monotonic clock: never hands out a timestamp at or before `prev`.
    pub(super) fn advance_clock(prev: DateTime<Utc>) -> DateTime<Utc> {
        let now = Utc::now();
        if now > prev {
            now
        } else {
            prev + chrono::Duration::microseconds(1)
        }
    }

    pub(super) fn append_event(&mut self, event: ElementEvent) {
        self.events.entry(event.element_id.clone()).or_default().push(event);
    }

    /// Resolves an id that must exist (tombstones count as existing).
    fn require_exists(&self, id: &ElementId, kind: Option<ElementKind>) -> Result<()> {
        match self.elements.get(id) {
            None => Err(Error::NotFound(id.clone())),
            Some(element) => match kind {
                Some(expected) if element.kind() != expected => Err(Error::Constraint(format!(
                    "{id} is a {:?}, expected {expected:?}",
                    element.kind()
                ))),
                _ => Ok(()),
            },
        }
    }

    /// Referential integrity for a new payload. `created_by` is exempt:
    /// it identifies a principal that may predate the store.
    fn validate_references(&self, new: &NewElement) -> Result<()> {
        match &new.payload {
            NewPayload::Task(task) => {
                if let Some(assignee) = &task.assignee {
                    self.require_exists(assignee, Some(ElementKind::Entity))?;
                }
                if let Some(doc) = &task.description_ref {
                    self.require_exists(doc, Some(ElementKind::Document))?;
                }
            }
            NewPayload::Document(_) => {}
            NewPayload::Channel(_) => {}
            NewPayload::Message(message) => {
                self.require_exists(&message.channel_id, Some(ElementKind::Channel))?;
                self.require_exists(&message.content_ref, Some(ElementKind::Document))?;
                if let Some(thread) = &message.thread_id {
                    self.require_exists(thread, Some(ElementKind::Message))?;
                    let root = &self.elements[thread.as_element_id()];
                    if let Some(root_message) = root.as_message() {
                        if root_message.channel_id != message.channel_id {
                            return Err(Error::Constraint(
                                "thread root belongs to a different channel".to_string(),
                            ));
                        }
                    }
                }
                for attachment in &message.attachments {
                    self.require_exists(attachment, Some(ElementKind::Document))?;
                }
            }
            NewPayload::Workflow(workflow) => {
                if let Some(playbook) = &workflow.playbook_ref {
                    self.require_exists(playbook, Some(ElementKind::Playbook))?;
                }
                for task in &workflow.tasks {
                    self.require_exists(task, Some(ElementKind::Task))?;
                }
            }
            NewPayload::Playbook(_) | NewPayload::Entity(_) => {}
            NewPayload::Plan(plan) => {
                for task in &plan.tasks {
                    self.require_exists(task, Some(ElementKind::Task))?;
                }
            }
        }
        Ok(())
    }

    /// Creates an element, assuming the write lock is held.
    pub(super) fn create_element(&mut self, new: NewElement) -> Result<Element> {
        self.validate_references(&new)?;

        let seed = new.payload.id_seed();
        let payload = match new.payload {
            NewPayload::Task(task) => ElementPayload::Task(task.into_task()?),
            NewPayload::Document(document) => {
                ElementPayload::Document(document.into_document()?)
            }
            NewPayload::Channel(channel) => {
                let channel = channel.into_channel()?;
                if self.channel_names.contains(&channel.name) {
                    return Err(Error::AlreadyExists(channel.name));
                }
                ElementPayload::Channel(channel)
            }
            NewPayload::Message(message) => {
                let channel = self
                    .elements
                    .get(message.channel_id.as_element_id())
                    .and_then(Element::as_channel)
                    .ok_or_else(|| Error::NotFound(message.channel_id.0.clone()))?;
                if !channel.members.contains(&new.created_by) {
                    return Err(Error::MemberRequired {
                        channel: message.channel_id.0.clone(),
                        entity: new.created_by.0.clone(),
                    });
                }
                let message = Message {
                    channel_id: message.channel_id,
                    sender: new.created_by.clone(),
                    content_ref: message.content_ref,
                    thread_id: message.thread_id,
                    attachments: message.attachments,
                };
                message.validate()?;
                ElementPayload::Message(message)
            }
            NewPayload::Workflow(workflow) => ElementPayload::Workflow(Workflow {
                name: workflow.name,
                status: crate::domain::WorkflowStatus::Pending,
                ephemeral: workflow.ephemeral,
                playbook_ref: workflow.playbook_ref,
                tasks: workflow.tasks,
            }),
            NewPayload::Playbook(playbook) => ElementPayload::Playbook(Playbook {
                name: playbook.name,
                description: playbook.description,
            }),
            NewPayload::Plan(plan) => ElementPayload::Plan(Plan {
                name: plan.name,
                status: plan.status,
                tasks: plan.tasks,
            }),
            NewPayload::Entity(actor) => ElementPayload::Entity(crate::domain::Actor {
                name: actor.name,
                actor_kind: actor.actor_kind,
            }),
        };
        payload.validate()?;

        let id = self.ids.generate(&seed)?;
        let now = Utc::now();
        let element = Element {
            id: id.clone(),
            created_at: now,
            updated_at: now,
            created_by: new.created_by.clone(),
            tags: new.tags,
            metadata: new.metadata,
            deleted: false,
            payload,
        };

        if let Some(channel) = element.as_channel() {
            self.channel_names.insert(channel.name.clone());
        }

        self.graph.ensure_node(&id);
        self.elements.insert(id.clone(), element.clone());
        self.dirty.insert(id.clone());
        self.append_event(ElementEvent::now(
            id.clone(),
            EventKind::Created,
            new.created_by,
            json!({ "type": element.kind() }),
        ));

        if let ElementPayload::Message(message) = &element.payload {
            self.reconstruct_mentions(&id, &message.content_ref.clone(), &element.created_by);
        }

        Ok(element)
    }

    /// Rebuilds `mentions` edges for a message from its content document.
    ///
    /// Mentions are derived, never authored: any `el-` id found in the
    /// body that resolves to a live element becomes a mentions edge.
    fn reconstruct_mentions(
        &mut self,
        message_id: &ElementId,
        content_ref: &DocumentId,
        actor: &EntityId,
    ) {
        let Some(content) = self
            .elements
            .get(content_ref.as_element_id())
            .and_then(Element::as_document)
            .map(|doc| doc.content.clone())
        else {
            return;
        };

        for mentioned in scan_element_ids(&content) {
            if mentioned == *message_id || !self.elements.contains_key(&mentioned) {
                continue;
            }
            // Derived edge; insertion is idempotent and never cycles
            // (mentions is associative).
            let _ = self.graph.add_edge(crate::domain::NewDependency {
                blocked: message_id.clone(),
                blocker: mentioned,
                dep_type: crate::domain::DependencyType::Mentions,
                created_by: actor.clone(),
                gate: None,
                validation: None,
            });
        }
    }

    /// Applies a patch to an element in place. Returns the event payloads
    /// to append (update diff, plus a status-change record when a
    /// lifecycle status moved).
    pub(super) fn apply_patch(
        &mut self,
        id: &ElementId,
        patch: ElementPatch,
    ) -> Result<Vec<(EventKind, serde_json::Value)>> {
        let mut events = Vec::new();
        let mut changed: Vec<&'static str> = Vec::new();

        // Generate any ids needed before borrowing the element mutably.
        let version_id = match (&patch.payload, self.elements.get(id)) {
            (Some(PayloadPatch::Document(doc_patch)), Some(element))
                if doc_patch.content.is_some() =>
            {
                let seed = format!("version|{id}|{}", element.updated_at.timestamp_micros());
                Some(DocumentId::from(self.ids.generate(&seed)?))
            }
            _ => None,
        };

        let element = self
            .elements
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;

        if let Some(payload_patch) = patch.payload {
            if payload_patch.kind() != element.kind() {
                return Err(Error::InvalidInput {
                    field: "patch",
                    reason: format!(
                        "patch targets {:?}, element is {:?}",
                        payload_patch.kind(),
                        element.kind()
                    ),
                });
            }

            match (&mut element.payload, payload_patch) {
                (ElementPayload::Task(task), PayloadPatch::Task(task_patch)) => {
                    let mut status_event = None;
                    apply_task_patch(task, task_patch, &mut element.metadata, &mut changed, &mut status_event)?;
                    if let Some(payload) = status_event {
                        events.push((EventKind::StatusChanged, payload));
                    }
                }
                (ElementPayload::Document(document), PayloadPatch::Document(doc_patch)) => {
                    apply_document_patch(
                        id,
                        document,
                        doc_patch,
                        version_id,
                        &mut self.versions,
                        &mut changed,
                    )?;
                }
                (ElementPayload::Channel(channel), PayloadPatch::Channel(channel_patch)) => {
                    apply_channel_patch(id, channel, channel_patch, &mut changed)?;
                }
                (ElementPayload::Workflow(workflow), PayloadPatch::Workflow(wf_patch)) => {
                    if let Some(payload) = apply_workflow_patch(workflow, wf_patch, &mut changed)? {
                        events.push((EventKind::StatusChanged, payload));
                    }
                }
                (ElementPayload::Plan(plan), PayloadPatch::Plan(plan_patch)) => {
                    apply_plan_patch(plan, plan_patch, &mut changed);
                }
                (ElementPayload::Playbook(playbook), PayloadPatch::Playbook(pb_patch)) => {
                    apply_playbook_patch(playbook, pb_patch, &mut changed);
                }
                (ElementPayload::Entity(actor), PayloadPatch::Entity(actor_patch)) => {
                    if let Some(name) = actor_patch.name {
                        actor.name = name;
                        changed.push("name");
                    }
                }
                _ => unreachable!("kind equality checked above"),
            }
        }

        if let Some(tags) = patch.tags {
            element.tags = tags;
            changed.push("tags");
        }
        if let Some(metadata) = patch.metadata {
            merge_metadata(&mut element.metadata, metadata);
            changed.push("metadata");
        }

        element.payload.validate()?;
        element.updated_at = Self::advance_clock(element.updated_at);

        events.insert(0, (EventKind::Updated, json!({ "changed": changed })));
        Ok(events)
    }
}

/// Merges a metadata patch: JSON `null` removes the key, anything else
/// replaces it.
pub(super) fn merge_metadata(target: &mut Metadata, patch: Metadata) {
    for (key, value) in patch {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}

/// Finds every well-formed element id embedded in free text.
pub(super) fn scan_element_ids(text: &str) -> Vec<ElementId> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while let Some(offset) = text[i..].find("el-") {
        let start = i + offset;
        let hash_start = start + 3;
        let hash_len = bytes[hash_start..]
            .iter()
            .take(8)
            .take_while(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            .count();
        if (3..=8).contains(&hash_len) {
            // A longer run than 8 means this is not an id, just text.
            let next = bytes.get(hash_start + hash_len);
            let terminated = next.is_none_or(|b| !(b.is_ascii_lowercase() || b.is_ascii_digit()));
            if terminated {
                if let Ok(id) = ElementId::parse(&text[start..hash_start + hash_len]) {
                    found.push(id);
                }
            }
        }
        i = hash_start;
    }
    found.sort();
    found.dedup();
    found
}

fn apply_task_patch(
    task: &mut Task,
    patch: TaskPatch,
    metadata: &mut Metadata,
    changed: &mut Vec<&'static str>,
    status_event: &mut Option<serde_json::Value>,
) -> Result<()> {
    if let Some(status) = patch.status {
        if status != task.status {
            if !task.status.can_transition_to(status) {
                return Err(Error::InvalidStatus {
                    from: task.status.as_str().to_string(),
                    to: status.as_str().to_string(),
                });
            }
            let from = task.status;
            task.status = status;
            changed.push("status");
            *status_event = Some(json!({
                "from": from.as_str(),
                "to": status.as_str(),
            }));

            if from == TaskStatus::Closed && status == TaskStatus::Open {
                // Reopen: clear assignment state and orchestration
                // bookkeeping, bump the reconciliation counter.
                task.assignee = None;
                task.close_reason = None;
                task.reconcile_count += 1;
                metadata.retain(|key, _| !key.starts_with(ORCHESTRATION_PREFIX));
            }
        }
    }
    if let Some(title) = patch.title {
        task.title = title.trim().to_string();
        changed.push("title");
    }
    if let Some(priority) = patch.priority {
        task.priority = priority;
        changed.push("priority");
    }
    if let Some(complexity) = patch.complexity {
        task.complexity = complexity;
        changed.push("complexity");
    }
    if let Some(task_type) = patch.task_type {
        task.task_type = task_type;
        changed.push("taskType");
    }
    if let Some(assignee) = patch.assignee {
        task.assignee = assignee;
        changed.push("assignee");
    }
    if let Some(description_ref) = patch.description_ref {
        task.description_ref = description_ref;
        changed.push("descriptionRef");
    }
    if let Some(scheduled_for) = patch.scheduled_for {
        task.scheduled_for = scheduled_for;
        changed.push("scheduledFor");
    }
    if let Some(close_reason) = patch.close_reason {
        task.close_reason = close_reason;
        changed.push("closeReason");
    }
    Ok(())
}

fn apply_document_patch(
    id: &ElementId,
    document: &mut Document,
    patch: DocumentPatch,
    version_id: Option<DocumentId>,
    versions: &mut HashMap<DocumentId, ArchivedVersion>,
    changed: &mut Vec<&'static str>,
) -> Result<()> {
    if let Some(immutable) = patch.immutable {
        if document.immutable && !immutable {
            return Err(Error::Immutable(id.clone()));
        }
    }

    if let Some(content) = patch.content {
        if document.immutable {
            return Err(Error::Immutable(id.clone()));
        }
        crate::domain::validate_document_content(&content)?;
        let version_id = version_id.expect("caller generates a version id for content updates");

        // Preserve the superseded tuple before replacing in place.
        versions.insert(
            version_id.clone(),
            ArchivedVersion {
                id: version_id.clone(),
                of: id.clone(),
                version: document.version,
                content_type: document.content_type,
                content: std::mem::take(&mut document.content),
                previous_version_id: document.previous_version_id.take(),
                archived_at: Utc::now(),
            },
        );

        document.content = content;
        if let Some(content_type) = patch.content_type {
            document.content_type = content_type;
            changed.push("contentType");
        }
        document.version += 1;
        document.previous_version_id = Some(version_id);
        changed.push("content");
    } else if patch.content_type.is_some() {
        return Err(Error::InvalidInput {
            field: "contentType",
            reason: "content type changes require a content update".to_string(),
        });
    }

    if let Some(category) = patch.category {
        document.category = category;
        changed.push("category");
    }
    if let Some(status) = patch.status {
        document.status = status;
        changed.push("status");
    }
    if let Some(immutable) = patch.immutable {
        document.immutable = immutable;
        changed.push("immutable");
    }
    Ok(())
}

fn apply_channel_patch(
    id: &ElementId,
    channel: &mut Channel,
    patch: ChannelPatch,
    changed: &mut Vec<&'static str>,
) -> Result<()> {
    if channel.channel_type == ChannelType::Direct {
        return Err(Error::Immutable(id.clone()));
    }
    if let Some(members) = patch.members {
        channel.members = members;
        changed.push("members");
    }
    if let Some(permissions) = patch.permissions {
        channel.permissions = permissions;
        changed.push("permissions");
    }
    Ok(())
}

fn apply_workflow_patch(
    workflow: &mut Workflow,
    patch: WorkflowPatch,
    changed: &mut Vec<&'static str>,
) -> Result<Option<serde_json::Value>> {
    let mut status_event = None;
    if let Some(status) = patch.status {
        if status != workflow.status {
            if !workflow.status.can_transition_to(status) {
                return Err(Error::InvalidStatus {
                    from: workflow.status.as_str().to_string(),
                    to: status.as_str().to_string(),
                });
            }
            let from = workflow.status;
            workflow.status = status;
            changed.push("status");
            status_event = Some(json!({
                "from": from.as_str(),
                "to": status.as_str(),
            }));
        }
    }
    if let Some(tasks) = patch.tasks {
        workflow.tasks = tasks;
        changed.push("tasks");
    }
    Ok(status_event)
}

fn apply_plan_patch(plan: &mut Plan, patch: PlanPatch, changed: &mut Vec<&'static str>) {
    if let Some(status) = patch.status {
        plan.status = status;
        changed.push("status");
    }
    if let Some(tasks) = patch.tasks {
        plan.tasks = tasks;
        changed.push("tasks");
    }
}

fn apply_playbook_patch(
    playbook: &mut Playbook,
    patch: PlaybookPatch,
    changed: &mut Vec<&'static str>,
) {
    if let Some(name) = patch.name {
        playbook.name = name;
        changed.push("name");
    }
    if let Some(description) = patch.description {
        playbook.description = description;
        changed.push("description");
    }
}
