//! In-memory placeholder provider.
//!
//! Stands in for a configured provider wherever a real connection is not
//! available: registry placeholders, examples, and the engine's test
//! suite. Supports all three adapter kinds, simulates remote-side edits,
//! and can inject transient or permanent failures to exercise the
//! engine's retry and error paths.

use crate::config::ProviderConfig;
use crate::error::Result;
use crate::sync::external::{
    ExternalDocument, ExternalDocumentInput, ExternalMessage, ExternalMessageInput, ExternalState,
    ExternalTask, ExternalTaskInput, ExternalTaskUpdate, TaskFieldMapConfig,
};
use crate::sync::provider::{
    DocumentAdapter, MessageAdapter, ProviderError, ProviderErrorKind, ProviderFactory,
    ProviderHandle, ProviderResult, TaskAdapter,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct State {
    tasks: HashMap<(String, String), ExternalTask>,
    documents: HashMap<(String, String), ExternalDocument>,
    messages: HashMap<(String, String), ExternalMessage>,
    next_id: u64,
    /// Failures to inject before succeeding again: (kind, remaining).
    failures: Option<(ProviderErrorKind, u32)>,
    calls: u64,
}

impl State {
    fn take_failure(&mut self) -> Option<ProviderError> {
        self.calls += 1;
        if let Some((kind, remaining)) = self.failures {
            if remaining > 0 {
                self.failures = Some((kind, remaining - 1));
                return Some(ProviderError::new(kind, "injected failure"));
            }
            self.failures = None;
        }
        None
    }

    fn fresh_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

/// An in-memory provider holding its remote state in process.
pub struct MemoryProvider {
    name: String,
    field_map: TaskFieldMapConfig,
    state: Mutex<State>,
}

impl MemoryProvider {
    /// Creates a provider with native priority support.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            field_map: TaskFieldMapConfig::default(),
            state: Mutex::new(State::default()),
        })
    }

    /// Creates a provider that expresses priority via the label
    /// convention instead of a native field.
    #[must_use]
    pub fn with_field_map(name: impl Into<String>, field_map: TaskFieldMapConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            field_map,
            state: Mutex::new(State::default()),
        })
    }

    /// Wraps this provider in a handle supporting all three kinds.
    #[must_use]
    pub fn handle(self: &Arc<Self>) -> Arc<ProviderHandle> {
        Arc::new(ProviderHandle::new(
            self.name.clone(),
            None,
            Some(self.clone() as Arc<dyn TaskAdapter>),
            Some(self.clone() as Arc<dyn DocumentAdapter>),
            Some(self.clone() as Arc<dyn MessageAdapter>),
        ))
    }

    /// Injects `count` consecutive failures of the given kind; subsequent
    /// calls succeed again.
    pub fn inject_failures(&self, kind: ProviderErrorKind, count: u32) {
        self.lock().failures = Some((kind, count));
    }

    /// Total adapter calls observed (including failed ones).
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.lock().calls
    }

    /// Simulates a remote-side edit: applies the update and stamps
    /// `updated_at` with `at`.
    ///
    /// # Panics
    ///
    /// Panics if the task does not exist (test misuse).
    pub fn edit_task_remotely(
        &self,
        project: &str,
        external_id: &str,
        update: &ExternalTaskUpdate,
        at: DateTime<Utc>,
    ) {
        let mut state = self.lock();
        let task = state
            .tasks
            .get_mut(&(project.to_string(), external_id.to_string()))
            .expect("remote task exists");
        apply_task_update(task, update);
        task.updated_at = at;
    }

    /// Snapshot of one remote task.
    #[must_use]
    pub fn remote_task(&self, project: &str, external_id: &str) -> Option<ExternalTask> {
        self.lock()
            .tasks
            .get(&(project.to_string(), external_id.to_string()))
            .cloned()
    }

    /// Number of remote tasks in one project.
    #[must_use]
    pub fn task_count(&self, project: &str) -> usize {
        self.lock()
            .tasks
            .keys()
            .filter(|(p, _)| p == project)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory provider lock poisoned")
    }
}

fn apply_task_update(task: &mut ExternalTask, update: &ExternalTaskUpdate) {
    if let Some(title) = &update.title {
        task.title = title.clone();
    }
    if let Some(body) = &update.body {
        task.body = Some(body.clone());
    }
    if let Some(state) = update.state {
        task.state = state;
        task.closed_at = match state {
            ExternalState::Closed => Some(Utc::now()),
            ExternalState::Open => None,
        };
    }
    if let Some(labels) = &update.labels {
        task.labels = labels.clone();
    }
    if let Some(assignees) = &update.assignees {
        task.assignees = assignees.clone();
    }
    if let Some(priority) = update.priority {
        task.priority = Some(priority);
    }
}

#[async_trait]
impl TaskAdapter for MemoryProvider {
    async fn get_issue(
        &self,
        project: &str,
        external_id: &str,
    ) -> ProviderResult<Option<ExternalTask>> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure() {
            return Err(err);
        }
        Ok(state
            .tasks
            .get(&(project.to_string(), external_id.to_string()))
            .cloned())
    }

    async fn list_issues_since(
        &self,
        project: &str,
        since: DateTime<Utc>,
    ) -> ProviderResult<Vec<ExternalTask>> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure() {
            return Err(err);
        }
        let mut tasks: Vec<ExternalTask> = state
            .tasks
            .iter()
            .filter(|((p, _), task)| p == project && task.updated_at >= since)
            .map(|(_, task)| task.clone())
            .collect();
        tasks.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(tasks)
    }

    async fn create_issue(
        &self,
        project: &str,
        input: &ExternalTaskInput,
    ) -> ProviderResult<ExternalTask> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure() {
            return Err(err);
        }
        let external_id = state.fresh_id();
        let now = Utc::now();
        let task = ExternalTask {
            external_id: external_id.clone(),
            url: format!("memory://{}/{project}/issues/{external_id}", self.name),
            provider: self.name.clone(),
            project: project.to_string(),
            title: input.title.clone(),
            body: input.body.clone(),
            state: input.state.unwrap_or(ExternalState::Open),
            labels: input.labels.clone(),
            assignees: input.assignees.clone(),
            priority: input.priority,
            created_at: now,
            updated_at: now,
            closed_at: None,
            raw: json!({ "origin": "memory" }),
        };
        state
            .tasks
            .insert((project.to_string(), external_id), task.clone());
        Ok(task)
    }

    async fn update_issue(
        &self,
        project: &str,
        external_id: &str,
        input: &ExternalTaskUpdate,
    ) -> ProviderResult<ExternalTask> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure() {
            return Err(err);
        }
        let task = state
            .tasks
            .get_mut(&(project.to_string(), external_id.to_string()))
            .ok_or_else(|| {
                ProviderError::new(ProviderErrorKind::NotFound, format!("no issue {external_id}"))
            })?;
        apply_task_update(task, input);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    fn field_map_config(&self) -> TaskFieldMapConfig {
        self.field_map.clone()
    }
}

#[async_trait]
impl DocumentAdapter for MemoryProvider {
    async fn get_document(
        &self,
        project: &str,
        external_id: &str,
    ) -> ProviderResult<Option<ExternalDocument>> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure() {
            return Err(err);
        }
        Ok(state
            .documents
            .get(&(project.to_string(), external_id.to_string()))
            .cloned())
    }

    async fn list_documents_since(
        &self,
        project: &str,
        since: DateTime<Utc>,
    ) -> ProviderResult<Vec<ExternalDocument>> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure() {
            return Err(err);
        }
        let mut documents: Vec<ExternalDocument> = state
            .documents
            .iter()
            .filter(|((p, _), doc)| p == project && doc.updated_at >= since)
            .map(|(_, doc)| doc.clone())
            .collect();
        documents.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(documents)
    }

    async fn create_document(
        &self,
        project: &str,
        input: &ExternalDocumentInput,
    ) -> ProviderResult<ExternalDocument> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure() {
            return Err(err);
        }
        let external_id = state.fresh_id();
        let now = Utc::now();
        let document = ExternalDocument {
            external_id: external_id.clone(),
            url: format!("memory://{}/{project}/docs/{external_id}", self.name),
            provider: self.name.clone(),
            project: project.to_string(),
            title: input.title.clone(),
            content: input.content.clone(),
            created_at: now,
            updated_at: now,
            raw: serde_json::Value::Null,
        };
        state
            .documents
            .insert((project.to_string(), external_id), document.clone());
        Ok(document)
    }

    async fn update_document(
        &self,
        project: &str,
        external_id: &str,
        input: &ExternalDocumentInput,
    ) -> ProviderResult<ExternalDocument> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure() {
            return Err(err);
        }
        let document = state
            .documents
            .get_mut(&(project.to_string(), external_id.to_string()))
            .ok_or_else(|| {
                ProviderError::new(ProviderErrorKind::NotFound, format!("no doc {external_id}"))
            })?;
        document.title = input.title.clone();
        document.content = input.content.clone();
        document.updated_at = Utc::now();
        Ok(document.clone())
    }
}

#[async_trait]
impl MessageAdapter for MemoryProvider {
    async fn get_message(
        &self,
        project: &str,
        external_id: &str,
    ) -> ProviderResult<Option<ExternalMessage>> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure() {
            return Err(err);
        }
        Ok(state
            .messages
            .get(&(project.to_string(), external_id.to_string()))
            .cloned())
    }

    async fn list_messages_since(
        &self,
        project: &str,
        since: DateTime<Utc>,
    ) -> ProviderResult<Vec<ExternalMessage>> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure() {
            return Err(err);
        }
        let mut messages: Vec<ExternalMessage> = state
            .messages
            .iter()
            .filter(|((p, _), msg)| p == project && msg.updated_at >= since)
            .map(|(_, msg)| msg.clone())
            .collect();
        messages.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(messages)
    }

    async fn create_message(
        &self,
        project: &str,
        input: &ExternalMessageInput,
    ) -> ProviderResult<ExternalMessage> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure() {
            return Err(err);
        }
        let external_id = state.fresh_id();
        let now = Utc::now();
        let message = ExternalMessage {
            external_id: external_id.clone(),
            url: format!("memory://{}/{project}/messages/{external_id}", self.name),
            provider: self.name.clone(),
            project: project.to_string(),
            body: input.body.clone(),
            author: "stoneforge".to_string(),
            thread_external_id: input.thread_external_id.clone(),
            created_at: now,
            updated_at: now,
            raw: serde_json::Value::Null,
        };
        state
            .messages
            .insert((project.to_string(), external_id), message.clone());
        Ok(message)
    }
}

/// Factory substituting an in-memory placeholder for every configured
/// provider. Real deployments supply a factory that builds actual
/// connections; everything else in the plane is identical.
#[derive(Debug, Default)]
pub struct MemoryProviderFactory;

impl ProviderFactory for MemoryProviderFactory {
    fn build(&self, config: &ProviderConfig) -> Result<Arc<ProviderHandle>> {
        let provider = MemoryProvider::new(config.provider.clone());
        Ok(Arc::new(ProviderHandle::new(
            config.provider.clone(),
            config.default_project.clone(),
            Some(provider.clone() as Arc<dyn TaskAdapter>),
            Some(provider.clone() as Arc<dyn DocumentAdapter>),
            Some(provider as Arc<dyn MessageAdapter>),
        )))
    }
}
