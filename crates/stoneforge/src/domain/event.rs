//! Append-only element events.
//!
//! The event log is the ground truth for audit; `updated_at` on an
//! element is advisory. Consumers must treat the log as append-only and
//! ordered per element.

use crate::id::{ElementId, EntityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of element event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// Element was created.
    Created,
    /// Element fields were updated.
    Updated,
    /// Element was soft-deleted.
    Deleted,
    /// A lifecycle status changed.
    StatusChanged,
    /// Local state was pushed to an external provider.
    SyncPushed,
    /// Remote state was pulled from an external provider.
    SyncPulled,
    /// A sync conflict was detected and resolved or deferred.
    SyncConflict,
}

/// One entry in an element's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementEvent {
    /// Element the event belongs to.
    pub element_id: ElementId,

    /// What happened.
    pub kind: EventKind,

    /// Entity responsible for the mutation.
    pub actor: EntityId,

    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,

    /// Event-specific payload: a field diff for updates, a conflict
    /// record for sync conflicts, a reason for deletes.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl ElementEvent {
    /// Creates an event stamped now.
    #[must_use]
    pub fn now(
        element_id: ElementId,
        kind: EventKind,
        actor: EntityId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            element_id,
            kind,
            actor,
            timestamp: Utc::now(),
            payload,
        }
    }
}
