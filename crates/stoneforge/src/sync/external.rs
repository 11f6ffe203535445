//! Normalized shapes exchanged with provider adapters.
//!
//! Providers translate their wire formats into these records; the engine
//! never sees provider-specific payloads except through the opaque `raw`
//! field, which is retained verbatim for round-tripping. Unknown keys on
//! the provider side live inside `raw` and must be preserved.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a remote resource, normalized to two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalState {
    /// The remote resource is open.
    Open,
    /// The remote resource is closed.
    Closed,
}

impl ExternalState {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// A normalized remote task (issue).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTask {
    /// Provider-scoped resource id.
    pub external_id: String,
    /// Browser URL of the resource.
    pub url: String,
    /// Provider machine name.
    pub provider: String,
    /// Remote project (namespace).
    pub project: String,
    /// Title.
    pub title: String,
    /// Body text, when the provider has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Normalized state.
    pub state: ExternalState,
    /// Labels, order not significant.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Assignee handles, order not significant.
    #[serde(default)]
    pub assignees: Vec<String>,
    /// Priority normalized to 1..=5; absent when the provider has no
    /// native concept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    /// Remote creation time.
    pub created_at: DateTime<Utc>,
    /// Remote last-update time.
    pub updated_at: DateTime<Utc>,
    /// Remote close time, when closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Opaque provider payload, retained for round-tripping.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw: serde_json::Value,
}

/// Full input for creating a remote task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTaskInput {
    /// Title.
    pub title: String,
    /// Body text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Initial state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ExternalState>,
    /// Labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Assignee handles.
    #[serde(default)]
    pub assignees: Vec<String>,
    /// Priority 1..=5, when the provider supports it natively.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

/// Partial input for updating a remote task; absent fields are left
/// untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTaskUpdate {
    /// New title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// New state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ExternalState>,
    /// Replacement labels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    /// Replacement assignees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignees: Option<Vec<String>>,
    /// New priority.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

/// A normalized remote document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalDocument {
    /// Provider-scoped resource id.
    pub external_id: String,
    /// Browser URL.
    pub url: String,
    /// Provider machine name.
    pub provider: String,
    /// Remote project (namespace).
    pub project: String,
    /// Title.
    pub title: String,
    /// Content body.
    pub content: String,
    /// Remote creation time.
    pub created_at: DateTime<Utc>,
    /// Remote last-update time.
    pub updated_at: DateTime<Utc>,
    /// Opaque provider payload.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw: serde_json::Value,
}

/// Input for creating or replacing a remote document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalDocumentInput {
    /// Title.
    pub title: String,
    /// Content body.
    pub content: String,
}

/// A normalized remote message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMessage {
    /// Provider-scoped resource id.
    pub external_id: String,
    /// Browser URL.
    pub url: String,
    /// Provider machine name.
    pub provider: String,
    /// Remote project (channel namespace).
    pub project: String,
    /// Message body.
    pub body: String,
    /// Remote author handle.
    pub author: String,
    /// Remote thread id, for replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_external_id: Option<String>,
    /// Remote creation time.
    pub created_at: DateTime<Utc>,
    /// Remote last-update time.
    pub updated_at: DateTime<Utc>,
    /// Opaque provider payload.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw: serde_json::Value,
}

/// Input for posting a remote message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMessageInput {
    /// Message body.
    pub body: String,
    /// Remote thread to reply into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_external_id: Option<String>,
}

/// The closed set of permitted field transforms.
///
/// The field-map layer names transforms; unknown names are rejected at
/// parse time rather than resolved dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldTransform {
    /// Pass the value through unchanged.
    Identity,
    /// Treat labels as an unordered set (sorted on hash/compare).
    LabelsAsSet,
    /// Map priority 1..=5 onto a label convention (`priority:N`) for
    /// providers without native priority.
    PriorityRemap,
}

impl FieldTransform {
    /// Parses a transform name, rejecting anything outside the closed set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unknown names.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "identity" => Ok(Self::Identity),
            "labels-as-set" => Ok(Self::LabelsAsSet),
            "priority-remap" => Ok(Self::PriorityRemap),
            other => Err(Error::InvalidInput {
                field: "transform",
                reason: format!("unknown field transform '{other}'"),
            }),
        }
    }
}

/// How a provider's task adapter maps local fields to remote ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFieldMapConfig {
    /// How priority is represented remotely: [`FieldTransform::Identity`]
    /// for native priority, [`FieldTransform::PriorityRemap`] for the
    /// label convention.
    pub priority: FieldTransform,
    /// How labels are represented; always set semantics today.
    pub labels: FieldTransform,
    /// Label prefix used when `priority` is `PriorityRemap`.
    pub priority_label_prefix: String,
}

impl Default for TaskFieldMapConfig {
    fn default() -> Self {
        Self {
            priority: FieldTransform::Identity,
            labels: FieldTransform::LabelsAsSet,
            priority_label_prefix: "priority:".to_string(),
        }
    }
}

impl TaskFieldMapConfig {
    /// Applies the priority convention to an outgoing input: either sets
    /// the native field or appends the convention label.
    pub fn apply_priority(&self, input: &mut ExternalTaskInput, priority: u8) {
        match self.priority {
            FieldTransform::PriorityRemap => {
                let label = format!("{}{priority}", self.priority_label_prefix);
                if !input.labels.contains(&label) {
                    input.labels.push(label);
                }
                input.priority = None;
            }
            _ => input.priority = Some(priority),
        }
    }

    /// Reads priority from a remote record, falling back to the label
    /// convention when the native field is absent.
    #[must_use]
    pub fn read_priority(&self, task: &ExternalTask) -> Option<u8> {
        task.priority.or_else(|| {
            task.labels.iter().find_map(|label| {
                label
                    .strip_prefix(&self.priority_label_prefix)
                    .and_then(|rest| rest.parse::<u8>().ok())
                    .filter(|p| (1..=5).contains(p))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_transform_rejected() {
        assert!(FieldTransform::parse("labels-as-set").is_ok());
        let err = FieldTransform::parse("to-external").unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }

    #[test]
    fn priority_remap_uses_labels() {
        let config = TaskFieldMapConfig {
            priority: FieldTransform::PriorityRemap,
            ..Default::default()
        };
        let mut input = ExternalTaskInput {
            title: "t".to_string(),
            ..Default::default()
        };
        config.apply_priority(&mut input, 2);
        assert!(input.priority.is_none());
        assert!(input.labels.contains(&"priority:2".to_string()));
    }

    #[test]
    fn read_priority_falls_back_to_label() {
        let config = TaskFieldMapConfig::default();
        let task = ExternalTask {
            external_id: "1".to_string(),
            url: String::new(),
            provider: "p".to_string(),
            project: "q".to_string(),
            title: "t".to_string(),
            body: None,
            state: ExternalState::Open,
            labels: vec!["priority:4".to_string()],
            assignees: vec![],
            priority: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
            raw: serde_json::Value::Null,
        };
        assert_eq!(config.read_priority(&task), Some(4));
    }
}
