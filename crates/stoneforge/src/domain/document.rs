//! Document payload: versioned content.

use crate::error::{Error, Result};
use crate::id::{DocumentId, ElementId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum document content size in bytes (10 MiB).
pub const MAX_CONTENT_BYTES: usize = 10 * 1024 * 1024;

/// Content type of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Plain UTF-8 text.
    Text,
    /// Markdown source.
    Markdown,
    /// A JSON value stored as text.
    Json,
}

impl ContentType {
    /// Parses the lowercase wire name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContentType`] for unknown names.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "markdown" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidContentType(other.to_string())),
        }
    }
}

/// Lifecycle status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// In active use.
    Active,
    /// Retained but no longer current.
    Archived,
}

/// The document payload of an element.
///
/// Updating content materializes a new version: the visible record keeps
/// its logical id but its `version` increments and `previous_version_id`
/// points at the archived tuple of the superseded content. The chain is
/// acyclic and terminates at a version-1 root (whose
/// `previous_version_id` is `None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Content type of `content`.
    pub content_type: ContentType,

    /// UTF-8 content, at most [`MAX_CONTENT_BYTES`] bytes.
    pub content: String,

    /// Version number, starting at 1 and strictly increasing on update.
    pub version: u32,

    /// Archived tuple holding the previous version's content.
    /// `None` iff `version == 1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version_id: Option<DocumentId>,

    /// Free-form grouping label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Lifecycle status.
    pub status: DocumentStatus,

    /// Once true, content updates fail with `IMMUTABLE`.
    #[serde(default)]
    pub immutable: bool,
}

impl Document {
    /// Validate document payload invariants.
    ///
    /// # Errors
    ///
    /// Returns a constraint error for oversized content, a zero version,
    /// or a version chain that claims a predecessor at version 1.
    pub fn validate(&self) -> Result<()> {
        validate_content(&self.content)?;
        if self.version == 0 {
            return Err(Error::Constraint("document version must be >= 1".to_string()));
        }
        if (self.version == 1) != self.previous_version_id.is_none() {
            return Err(Error::Constraint(
                "previous_version_id must be absent exactly at version 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// An archived document version, preserved when content is superseded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedVersion {
    /// Id of this archived tuple (a fresh document-kind id).
    pub id: DocumentId,
    /// Logical document this tuple belongs to.
    pub of: ElementId,
    /// Version number the tuple held while visible.
    pub version: u32,
    /// Content type at that version.
    pub content_type: ContentType,
    /// Content at that version.
    pub content: String,
    /// Link further down the chain; `None` at the version-1 root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version_id: Option<DocumentId>,
    /// When the tuple was superseded.
    pub archived_at: DateTime<Utc>,
}

/// Data for creating a new document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Content type.
    pub content_type: ContentType,
    /// Initial content.
    pub content: String,
    /// Grouping label.
    pub category: Option<String>,
    /// Whether the document rejects all future content updates.
    pub immutable: bool,
}

impl Default for NewDocument {
    fn default() -> Self {
        Self {
            content_type: ContentType::Markdown,
            content: String::new(),
            category: None,
            immutable: false,
        }
    }
}

impl NewDocument {
    /// Build the stored payload, validating on the way.
    ///
    /// # Errors
    ///
    /// Returns a constraint error for oversized content.
    pub fn into_document(self) -> Result<Document> {
        let document = Document {
            content_type: self.content_type,
            content: self.content,
            version: 1,
            previous_version_id: None,
            category: self.category,
            status: DocumentStatus::Active,
            immutable: self.immutable,
        };
        document.validate()?;
        Ok(document)
    }
}

/// Partial update for a document payload.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    /// Replacement content; materializes a new version.
    pub content: Option<String>,
    /// Replacement content type (applies with a content update).
    pub content_type: Option<ContentType>,
    /// Category change (double-Option).
    pub category: Option<Option<String>>,
    /// Status change.
    pub status: Option<DocumentStatus>,
    /// One-way switch; setting `immutable = true` freezes the document.
    pub immutable: Option<bool>,
}

pub(crate) fn validate_content(content: &str) -> Result<()> {
    if content.len() > MAX_CONTENT_BYTES {
        return Err(Error::InvalidInput {
            field: "content",
            reason: format!(
                "content exceeds {MAX_CONTENT_BYTES} bytes (got {})",
                content.len()
            ),
        });
    }
    Ok(())
}
