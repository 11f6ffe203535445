//! Error types for stoneforge core operations.
//!
//! Every variant carries a stable machine-readable kind (see
//! [`Error::kind`]) so adapter surfaces (CLI, HTTP) can translate errors
//! without string matching on display output. Provider-side sync failures
//! are not raised through this enum; they are collected as
//! [`SyncError`] records inside sync results so a sync pass can complete
//! in the presence of partial failure.

use crate::id::ElementId;
use std::io;
use thiserror::Error;

/// The error type for stoneforge core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Input failed validation.
    #[error("Invalid {field}: {reason}")]
    InvalidInput {
        /// The field that failed validation.
        field: &'static str,
        /// Why the value was invalid.
        reason: String,
    },

    /// A required field was absent.
    #[error("Missing required field: {0}")]
    MissingRequiredField(&'static str),

    /// Identifier does not match the `el-[0-9a-z]{3,8}` grammar.
    #[error("Invalid element id: {0}")]
    InvalidId(String),

    /// A status transition outside the lifecycle state machine.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatus {
        /// Status before the attempted transition.
        from: String,
        /// Requested target status.
        to: String,
    },

    /// Unknown document content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Title exceeds the maximum length.
    #[error("Title cannot exceed {max} characters (got {len})")]
    TitleTooLong {
        /// Length of the rejected title after trimming.
        len: usize,
        /// The maximum permitted length.
        max: usize,
    },

    /// Referenced element is absent.
    #[error("Element not found: {0}")]
    NotFound(ElementId),

    /// Uniqueness violation (duplicate channel name, re-created id, etc.).
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency mismatch; safe to retry after re-reading.
    #[error("Conflict on {element_id}: expected updated_at {expected}, found {actual}")]
    Conflict {
        /// The element whose update was rejected.
        element_id: ElementId,
        /// The `updated_at` the caller expected.
        expected: chrono::DateTime<chrono::Utc>,
        /// The `updated_at` actually stored.
        actual: chrono::DateTime<chrono::Utc>,
    },

    /// Mutation attempted on an immutable element (message, frozen document,
    /// direct-channel invariants).
    #[error("Element is immutable: {0}")]
    Immutable(ElementId),

    /// A blocking-family edge would close a cycle. The graph is unchanged.
    #[error("Cycle detected: edge {blocked} -> {blocker} would close a cycle")]
    CycleDetected {
        /// The element that would wait.
        blocked: ElementId,
        /// The element it would wait on.
        blocker: ElementId,
    },

    /// Channel authorization failure.
    #[error("Entity {entity} is not a member of channel {channel}")]
    MemberRequired {
        /// The channel that rejected the operation.
        channel: ElementId,
        /// The non-member entity.
        entity: ElementId,
    },

    /// A structural invariant was violated (self-loop, dangling reference,
    /// direct-channel shape, gate payload constraint).
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// Provider plane misconfiguration (unknown provider, missing adapter,
    /// no providers configured). Orchestrator-level: sync returns
    /// `success=false` when this bubbles.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Configuration file could not be loaded or was invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization or parsing failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::MissingRequiredField(_) => "MISSING_REQUIRED_FIELD",
            Self::InvalidId(_) => "INVALID_ID",
            Self::InvalidStatus { .. } => "INVALID_STATUS",
            Self::InvalidContentType(_) => "INVALID_CONTENT_TYPE",
            Self::TitleTooLong { .. } => "TITLE_TOO_LONG",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::Conflict { .. } => "CONFLICT",
            Self::Immutable(_) => "IMMUTABLE",
            Self::CycleDetected { .. } => "CYCLE_DETECTED",
            Self::MemberRequired { .. } => "MEMBER_REQUIRED",
            Self::Constraint(_) => "CONSTRAINT",
            Self::Provider(_) => "PROVIDER",
            Self::Config(_) => "CONFIG",
            Self::Io(_) => "IO",
            Self::Json(_) => "JSON",
        }
    }
}

impl From<stoneforge_jsonl::Error> for Error {
    fn from(err: stoneforge_jsonl::Error) -> Self {
        match err {
            stoneforge_jsonl::Error::Io(io_err) => Self::Io(io_err),
            stoneforge_jsonl::Error::Json(json_err) => Self::Json(json_err),
            stoneforge_jsonl::Error::InvalidFormat(msg) => Self::Constraint(msg),
        }
    }
}

/// A provider-side sync failure, collected into sync results rather than
/// raised. `retryable` distinguishes transient failures (rate limits, 5xx,
/// timeouts) from permanent ones (other 4xx).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SyncError {
    /// Provider the failure came from.
    pub provider: String,
    /// Project (remote namespace) the call targeted.
    pub project: String,
    /// Local element involved, when known.
    pub element_id: Option<ElementId>,
    /// Remote resource involved, when known.
    pub external_id: Option<String>,
    /// Human-readable failure description.
    pub message: String,
    /// Provider-specific status code, when one exists.
    pub code: Option<String>,
    /// Whether a later retry may succeed.
    pub retryable: bool,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {}{}",
            self.provider,
            self.project,
            self.message,
            if self.retryable { " (retryable)" } else { "" }
        )
    }
}

/// A specialized Result type for stoneforge core operations.
pub type Result<T> = std::result::Result<T, Error>;
