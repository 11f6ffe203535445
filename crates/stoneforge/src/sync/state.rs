//! Per-element sync state and hash-based change detection.
//!
//! A linked element carries an [`ExternalSyncState`] under the reserved
//! `_externalSync` metadata key. Two hashes pin what each side last saw:
//! `last_pushed_hash` is the local projection at last push,
//! `last_pulled_hash` the remote projection at last pull. The hash is
//! SHA-256 over a canonical byte layout, so any conforming implementation
//! produces identical hashes for identical logical content.

use crate::domain::{EXTERNAL_SYNC_KEY, Element, ElementPatch, Metadata, TaskStatus};
use crate::error::{Error, Result};
use crate::sync::external::{ExternalState, ExternalTask, TaskFieldMapConfig};
use crate::sync::{AdapterKind, SyncDirection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// The per-element record pinning a link to an external resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSyncState {
    /// Provider machine name.
    pub provider: String,
    /// Remote project (namespace).
    pub project: String,
    /// Provider-scoped resource id.
    pub external_id: String,
    /// Browser URL of the remote resource.
    pub url: String,
    /// When local state was last pushed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pushed_at: Option<DateTime<Utc>>,
    /// When remote state was last pulled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pulled_at: Option<DateTime<Utc>>,
    /// Local projection hash at last push.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pushed_hash: Option<String>,
    /// Remote projection hash at last pull.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pulled_hash: Option<String>,
    /// Which way changes flow for this element.
    pub direction: SyncDirection,
    /// Adapter kind the element syncs through.
    #[serde(rename = "adapterType")]
    pub adapter_kind: AdapterKind,
}

/// Reads the sync state embedded in an element's metadata.
///
/// # Errors
///
/// Returns [`Error::Json`] when the `_externalSync` value does not
/// deserialize as a sync state.
pub fn sync_state_of(element: &Element) -> Result<Option<ExternalSyncState>> {
    match element.metadata.get(EXTERNAL_SYNC_KEY) {
        None => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
    }
}

/// A metadata patch writing the given sync state.
#[must_use]
pub fn link_patch(state: &ExternalSyncState) -> ElementPatch {
    let mut metadata = Metadata::new();
    metadata.insert(
        EXTERNAL_SYNC_KEY.to_string(),
        serde_json::to_value(state).expect("sync state serializes"),
    );
    ElementPatch {
        metadata: Some(metadata),
        ..Default::default()
    }
}

/// A metadata patch removing the sync state (null deletes the key).
#[must_use]
pub fn unlink_patch() -> ElementPatch {
    let mut metadata = Metadata::new();
    metadata.insert(EXTERNAL_SYNC_KEY.to_string(), serde_json::Value::Null);
    ElementPatch {
        metadata: Some(metadata),
        ..Default::default()
    }
}

/// The normalized projection of a task as an adapter would serialize it.
///
/// Hashing runs over this shape on both sides of the link, which is what
/// makes local and remote hashes comparable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProjection {
    /// Title.
    pub title: String,
    /// Body text (canonical UTF-8), when present.
    pub body: Option<String>,
    /// Normalized open/closed state.
    pub state: ExternalState,
    /// Labels as a sorted set.
    pub labels: BTreeSet<String>,
    /// Assignees as a sorted set.
    pub assignees: BTreeSet<String>,
    /// Priority 1..=5, when known.
    pub priority: Option<u8>,
}

impl TaskProjection {
    /// Projects a local task element. `body` is the content of its
    /// description document, fetched by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Constraint`] when the element is not a task.
    pub fn of_local(element: &Element, body: Option<String>) -> Result<Self> {
        let task = element
            .as_task()
            .ok_or_else(|| Error::Constraint(format!("{} is not a task", element.id)))?;
        Ok(Self {
            title: task.title.clone(),
            body,
            state: if task.status == TaskStatus::Closed {
                ExternalState::Closed
            } else {
                ExternalState::Open
            },
            labels: element.tags.iter().cloned().collect(),
            assignees: task
                .assignee
                .iter()
                .map(|id| id.as_str().to_string())
                .collect(),
            priority: Some(task.priority),
        })
    }

    /// Projects a remote task, reading priority through the provider's
    /// field map.
    #[must_use]
    pub fn of_remote(task: &ExternalTask, field_map: &TaskFieldMapConfig) -> Self {
        Self {
            title: task.title.clone(),
            body: task.body.clone(),
            state: task.state,
            labels: task.labels.iter().cloned().collect(),
            assignees: task.assignees.iter().cloned().collect(),
            priority: field_map.read_priority(task),
        }
    }

    /// SHA-256 over the canonical byte layout, lowercase hex.
    ///
    /// Layout: fields joined with `\n` in order: title, body (empty
    /// string when absent), state, labels sorted and joined with `,`,
    /// assignees sorted and joined with `,`, priority as decimal or
    /// empty.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let labels: Vec<&str> = self.labels.iter().map(String::as_str).collect();
        let assignees: Vec<&str> = self.assignees.iter().map(String::as_str).collect();
        let canonical = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.title,
            self.body.as_deref().unwrap_or(""),
            self.state.as_str(),
            labels.join(","),
            assignees.join(","),
            self.priority.map(|p| p.to_string()).unwrap_or_default(),
        );

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// SHA-256 of an arbitrary canonical string, lowercase hex. Used for
/// document and message projections where the shape is a single body.
#[must_use]
pub fn content_hash_str(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// Whether local content has diverged from what was last pushed.
#[must_use]
pub fn local_changed(current_hash: &str, state: &ExternalSyncState) -> bool {
    state.last_pushed_hash.as_deref() != Some(current_hash)
}

/// Whether the remote has diverged from what was last pulled: updated
/// after the last pull and with different content.
#[must_use]
pub fn remote_changed(
    remote_updated_at: DateTime<Utc>,
    remote_hash: &str,
    state: &ExternalSyncState,
) -> bool {
    let last_pulled = state
        .last_pulled_at
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    remote_updated_at > last_pulled && state.last_pulled_hash.as_deref() != Some(remote_hash)
}
