//! External synchronization: provider plane, sync state, and the engine.
//!
//! A [`provider::ProviderHandle`] is a connection façade to one external
//! service exposing per-kind adapters over normalized shapes
//! ([`external::ExternalTask`] and friends). Elements link to remote
//! resources through an [`state::ExternalSyncState`] stored under the
//! reserved `_externalSync` metadata key; hash-based change detection
//! decides what moves. The [`engine::SyncEngine`] orchestrates push, pull,
//! and bidirectional sync with per-provider concurrency limits, retries,
//! timeouts, and cancellation.

pub mod engine;
pub mod external;
pub mod memory;
pub mod provider;
pub mod state;

pub use engine::{LinkReport, SyncEngine};
pub use external::{
    ExternalDocument, ExternalDocumentInput, ExternalMessage, ExternalMessageInput,
    ExternalState, ExternalTask, ExternalTaskInput, ExternalTaskUpdate, FieldTransform,
    TaskFieldMapConfig,
};
pub use memory::{MemoryProvider, MemoryProviderFactory};
pub use provider::{
    DocumentAdapter, MessageAdapter, ProviderError, ProviderErrorKind, ProviderFactory,
    ProviderHandle, ProviderRegistry, ProviderResult, TaskAdapter,
};
pub use state::{
    ExternalSyncState, TaskProjection, link_patch, local_changed, remote_changed, sync_state_of,
    unlink_patch,
};

use crate::error::SyncError;
use crate::id::ElementId;
use serde::{Deserialize, Serialize};

/// Direction of synchronization for a linked element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Local changes flow out only.
    Push,
    /// Remote changes flow in only.
    Pull,
    /// Changes flow both ways; conflicts resolved by strategy.
    Bidirectional,
}

/// Which adapter a linked element synchronizes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// Issue-tracker style task sync.
    Task,
    /// Knowledge-base style document sync.
    Document,
    /// Chat style message sync.
    Message,
}

/// How to resolve an element that changed both locally and remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// The later `updated_at` wins; the loser's changes are discarded.
    LastWriteWins,
    /// Local unconditionally wins.
    LocalWins,
    /// Remote unconditionally wins.
    RemoteWins,
    /// Neither side is overwritten; the element is tagged
    /// `sync-conflict` and skipped until the tag is cleared.
    Manual,
}

/// Which side a conflict resolution favored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictWinner {
    /// Local changes were kept and pushed.
    Local,
    /// Remote changes were applied locally.
    Remote,
    /// Resolution deferred to the caller (manual strategy).
    Deferred,
}

/// Record of one resolved or deferred conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// The local element involved.
    pub element_id: ElementId,
    /// The remote resource involved.
    pub external_id: String,
    /// Provider the conflict arose against.
    pub provider: String,
    /// Strategy that was applied.
    pub strategy: ConflictStrategy,
    /// Outcome.
    pub winner: ConflictWinner,
}

/// Options accepted by push, pull, sync, and the link operations.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Explicit target elements. Unlinked targets are created remotely
    /// and linked.
    pub element_ids: Option<Vec<ElementId>>,

    /// Target every linked element (of the selected kind) instead.
    pub all: bool,

    /// Restrict to one provider.
    pub provider: Option<String>,

    /// Restrict to one adapter kind. Defaults to task.
    pub adapter_kind: Option<AdapterKind>,

    /// Compute and report decisions without writing anywhere.
    pub dry_run: bool,

    /// For `link_all`: re-link elements already bound to the provider.
    pub force: bool,

    /// Conflict strategy override for this invocation.
    pub conflict_strategy: Option<ConflictStrategy>,
}

/// Outcome of one push/pull/sync pass against one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSyncResult {
    /// False only for unrecoverable orchestrator failure; per-element
    /// failures leave this true and land in `errors`.
    pub success: bool,
    /// Provider synced against.
    pub provider: String,
    /// Remote project (namespace).
    pub project: String,
    /// Adapter kind used.
    #[serde(rename = "adapterType")]
    pub adapter_kind: AdapterKind,
    /// Elements pushed out.
    pub pushed: usize,
    /// Remote items pulled in.
    pub pulled: usize,
    /// Elements skipped (unchanged, conflict-tagged, or dry-run).
    pub skipped: usize,
    /// Conflicts encountered.
    pub conflicts: Vec<ConflictRecord>,
    /// Per-element failures.
    pub errors: Vec<SyncError>,
}

impl ExternalSyncResult {
    /// An empty successful result for a provider/project pair.
    #[must_use]
    pub fn empty(provider: &str, project: &str, adapter_kind: AdapterKind) -> Self {
        Self {
            success: true,
            provider: provider.to_string(),
            project: project.to_string(),
            adapter_kind,
            pushed: 0,
            pulled: 0,
            skipped: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
        }
    }
}
