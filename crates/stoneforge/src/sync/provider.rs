//! Provider plane: adapter traits, handles, and the registry.
//!
//! A provider declares which adapter kinds it supports as an explicit
//! capability set and hands out one adapter object per kind; callers
//! check capabilities instead of probing optional methods.

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::sync::AdapterKind;
use crate::sync::external::{
    ExternalDocument, ExternalDocumentInput, ExternalMessage, ExternalMessageInput, ExternalTask,
    ExternalTaskInput, ExternalTaskUpdate, TaskFieldMapConfig,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Classification of a provider-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Rate limited (HTTP 429 or equivalent). Retryable.
    RateLimited,
    /// Server-side failure (5xx or equivalent). Retryable.
    Unavailable,
    /// The call timed out. Retryable.
    Timeout,
    /// The remote resource does not exist. Permanent.
    NotFound,
    /// The request was rejected (other 4xx). Permanent.
    InvalidRequest,
}

/// A failure returned by a provider adapter.
#[derive(Debug, Clone)]
pub struct ProviderError {
    /// What went wrong.
    pub message: String,
    /// Provider-specific status code, when one exists.
    pub code: Option<String>,
    /// Failure classification.
    pub kind: ProviderErrorKind,
}

impl ProviderError {
    /// Constructs an error of the given kind.
    #[must_use]
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            kind,
        }
    }

    /// Whether a later retry may succeed.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimited
                | ProviderErrorKind::Unavailable
                | ProviderErrorKind::Timeout
        )
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

/// A specialized Result type for adapter calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Task (issue) operations a provider exposes.
#[async_trait]
pub trait TaskAdapter: Send + Sync {
    /// Fetches one remote task, `None` if absent.
    async fn get_issue(
        &self,
        project: &str,
        external_id: &str,
    ) -> ProviderResult<Option<ExternalTask>>;

    /// Lists remote tasks updated at or after `since`. Must be monotone
    /// in `since`: results include every update with `updated_at >= since`.
    async fn list_issues_since(
        &self,
        project: &str,
        since: DateTime<Utc>,
    ) -> ProviderResult<Vec<ExternalTask>>;

    /// Creates a remote task.
    async fn create_issue(
        &self,
        project: &str,
        input: &ExternalTaskInput,
    ) -> ProviderResult<ExternalTask>;

    /// Partially updates a remote task.
    async fn update_issue(
        &self,
        project: &str,
        external_id: &str,
        input: &ExternalTaskUpdate,
    ) -> ProviderResult<ExternalTask>;

    /// The provider's field-map declaration.
    fn field_map_config(&self) -> TaskFieldMapConfig;
}

/// Document operations a provider exposes.
#[async_trait]
pub trait DocumentAdapter: Send + Sync {
    /// Fetches one remote document, `None` if absent.
    async fn get_document(
        &self,
        project: &str,
        external_id: &str,
    ) -> ProviderResult<Option<ExternalDocument>>;

    /// Lists remote documents updated at or after `since`.
    async fn list_documents_since(
        &self,
        project: &str,
        since: DateTime<Utc>,
    ) -> ProviderResult<Vec<ExternalDocument>>;

    /// Creates a remote document.
    async fn create_document(
        &self,
        project: &str,
        input: &ExternalDocumentInput,
    ) -> ProviderResult<ExternalDocument>;

    /// Replaces a remote document's content.
    async fn update_document(
        &self,
        project: &str,
        external_id: &str,
        input: &ExternalDocumentInput,
    ) -> ProviderResult<ExternalDocument>;
}

/// Message operations a provider exposes.
///
/// Messages are immutable locally, so there is no update call; sync for
/// messages is create-and-fetch only.
#[async_trait]
pub trait MessageAdapter: Send + Sync {
    /// Fetches one remote message, `None` if absent.
    async fn get_message(
        &self,
        project: &str,
        external_id: &str,
    ) -> ProviderResult<Option<ExternalMessage>>;

    /// Lists remote messages created at or after `since`.
    async fn list_messages_since(
        &self,
        project: &str,
        since: DateTime<Utc>,
    ) -> ProviderResult<Vec<ExternalMessage>>;

    /// Posts a remote message.
    async fn create_message(
        &self,
        project: &str,
        input: &ExternalMessageInput,
    ) -> ProviderResult<ExternalMessage>;
}

/// A connection façade to one external service.
///
/// Capabilities are explicit: `supported()` is derived from which
/// adapters the handle actually carries.
pub struct ProviderHandle {
    name: String,
    default_project: Option<String>,
    task: Option<Arc<dyn TaskAdapter>>,
    document: Option<Arc<dyn DocumentAdapter>>,
    message: Option<Arc<dyn MessageAdapter>>,
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("name", &self.name)
            .field("supported", &self.supported())
            .finish_non_exhaustive()
    }
}

impl ProviderHandle {
    /// Builds a handle; pass `None` for unsupported adapter kinds.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        default_project: Option<String>,
        task: Option<Arc<dyn TaskAdapter>>,
        document: Option<Arc<dyn DocumentAdapter>>,
        message: Option<Arc<dyn MessageAdapter>>,
    ) -> Self {
        Self {
            name: name.into(),
            default_project,
            task,
            document,
            message,
        }
    }

    /// Stable machine name (e.g. `github`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Project used when an element's sync state does not pin one.
    #[must_use]
    pub fn default_project(&self) -> &str {
        self.default_project.as_deref().unwrap_or("default")
    }

    /// The set of adapter kinds this provider supports.
    #[must_use]
    pub fn supported(&self) -> BTreeSet<AdapterKind> {
        let mut kinds = BTreeSet::new();
        if self.task.is_some() {
            kinds.insert(AdapterKind::Task);
        }
        if self.document.is_some() {
            kinds.insert(AdapterKind::Document);
        }
        if self.message.is_some() {
            kinds.insert(AdapterKind::Message);
        }
        kinds
    }

    /// Whether the provider supports the given kind.
    #[must_use]
    pub fn supports(&self, kind: AdapterKind) -> bool {
        self.supported().contains(&kind)
    }

    /// The task adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] if tasks are unsupported.
    pub fn task_adapter(&self) -> Result<Arc<dyn TaskAdapter>> {
        self.task.clone().ok_or_else(|| {
            Error::Provider(format!("provider '{}' does not support tasks", self.name))
        })
    }

    /// The document adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] if documents are unsupported.
    pub fn document_adapter(&self) -> Result<Arc<dyn DocumentAdapter>> {
        self.document.clone().ok_or_else(|| {
            Error::Provider(format!(
                "provider '{}' does not support documents",
                self.name
            ))
        })
    }

    /// The message adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] if messages are unsupported.
    pub fn message_adapter(&self) -> Result<Arc<dyn MessageAdapter>> {
        self.message.clone().ok_or_else(|| {
            Error::Provider(format!(
                "provider '{}' does not support messages",
                self.name
            ))
        })
    }
}

/// Builds provider handles from configuration records.
///
/// The registry substitutes configured providers for placeholders at
/// request time by invoking the factory with the matching
/// [`ProviderConfig`].
pub trait ProviderFactory: Send + Sync {
    /// Builds a handle for one configured provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] when the configuration cannot be
    /// honored (unknown provider name, missing credentials).
    fn build(&self, config: &ProviderConfig) -> Result<Arc<ProviderHandle>>;
}

/// Maps provider names to handles.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<ProviderHandle>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from configuration, letting the factory
    /// substitute a concrete handle per configured provider.
    ///
    /// # Errors
    ///
    /// Propagates factory failures.
    pub fn from_configs<'a>(
        configs: impl IntoIterator<Item = &'a ProviderConfig>,
        factory: &dyn ProviderFactory,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(factory.build(config)?);
        }
        Ok(registry)
    }

    /// Registers a handle under its own name. A handle registered twice
    /// replaces the earlier one.
    pub fn register(&mut self, handle: Arc<ProviderHandle>) {
        self.providers.insert(handle.name().to_string(), handle);
    }

    /// Resolves a provider by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] for unknown names.
    pub fn get(&self, name: &str) -> Result<Arc<ProviderHandle>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Provider(format!("unknown provider '{name}'")))
    }

    /// Registered provider names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Whether no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
