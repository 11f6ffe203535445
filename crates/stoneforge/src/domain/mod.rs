//! Domain types for the stoneforge core.
//!
//! Every persisted entity is an [`Element`]: a common envelope (id, kind,
//! timestamps, creator, tags, metadata, tombstone flag) wrapping a typed
//! payload. Dependencies between elements are first-class edges
//! ([`DependencyEdge`]) managed by the graph engine rather than stored on
//! the elements themselves; this keeps a single source of truth for the
//! blocking subgraph.

mod channel;
mod dependency;
mod document;
mod element;
mod event;
mod filter;
mod task;
mod workflow;

pub use channel::{
    Channel, ChannelPatch, ChannelPermissions, ChannelType, JoinPolicy, Message, NewChannel,
    NewMessage, Visibility, direct_channel_name,
};
pub use dependency::{
    DependencyEdge, DependencyFamily, DependencyType, EdgeMeta, Gate, GateEvent, NewDependency,
    TestResult, TreeDirection, ValidationRecord,
};
pub use document::{
    ArchivedVersion, ContentType, Document, DocumentPatch, DocumentStatus, MAX_CONTENT_BYTES,
    NewDocument,
};
pub(crate) use document::validate_content as validate_document_content;
pub use element::{
    Element, ElementKind, ElementPatch, ElementPayload, Metadata, NewElement, NewPayload,
    PayloadPatch,
};
pub use event::{ElementEvent, EventKind};
pub use filter::ElementFilter;
pub use task::{MAX_TITLE_LENGTH, NewTask, Task, TaskPatch, TaskStatus, TaskType};
pub use workflow::{
    Actor, ActorKind, ActorPatch, NewActor, NewPlan, NewPlaybook, NewWorkflow, Plan, PlanPatch,
    PlanStatus, Playbook, PlaybookPatch, Workflow, WorkflowPatch, WorkflowStatus,
};

/// Reserved metadata key holding an element's external sync state.
pub const EXTERNAL_SYNC_KEY: &str = "_externalSync";

/// Metadata key prefix for orchestration bookkeeping, cleared on reopen.
pub const ORCHESTRATION_PREFIX: &str = "_orchestration";

/// Tag applied to an element left in manual-conflict state by the sync
/// engine. While present, sync passes skip the element.
pub const SYNC_CONFLICT_TAG: &str = "sync-conflict";
