//! The sync engine: push, pull, bidirectional merge, and link management.
//!
//! One engine instance serves one store and one provider registry. Every
//! operation takes a [`SyncOptions`] and a [`CancellationToken`]; a
//! cancelled operation stops between elements, interrupts in-flight
//! provider calls, and never writes partial sync state.
//!
//! Per-provider concurrency is bounded by a semaphore sized from
//! settings; each element appears at most once per batch, which gives
//! per-element mutual exclusion within a sync cycle. Transient provider
//! failures (rate limits, 5xx, timeouts) retry with exponential backoff;
//! permanent failures surface as `retryable=false` errors in the result.

use crate::config::SyncSettings;
use crate::domain::{
    ContentType, DocumentPatch, Element, ElementEvent, ElementFilter, ElementKind, ElementPatch,
    EventKind, Metadata, NewDocument, NewElement, NewPayload, NewTask, PayloadPatch,
    SYNC_CONFLICT_TAG, TaskPatch, TaskStatus,
};
use crate::error::{Error, Result, SyncError};
use crate::id::{DocumentId, ElementId, EntityId};
use crate::store::{ElementStore, UpdateOptions};
use crate::sync::external::{
    ExternalDocumentInput, ExternalMessageInput, ExternalState, ExternalTask, ExternalTaskInput,
    ExternalTaskUpdate, TaskFieldMapConfig,
};
use crate::sync::provider::{ProviderError, ProviderHandle, ProviderRegistry};
use crate::sync::state::{
    ExternalSyncState, TaskProjection, content_hash_str, link_patch, local_changed,
    remote_changed, sync_state_of, unlink_patch,
};
use crate::sync::{
    AdapterKind, ConflictRecord, ConflictStrategy, ConflictWinner, ExternalSyncResult,
    SyncOptions,
};
use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of link_all / unlink_all walks.
#[derive(Debug, Clone, Default)]
pub struct LinkReport {
    /// Elements newly linked (or re-linked under `force`).
    pub linked: Vec<ElementId>,
    /// Elements unlinked.
    pub unlinked: Vec<ElementId>,
    /// Elements left untouched.
    pub skipped: usize,
    /// Per-element failures.
    pub errors: Vec<SyncError>,
}

enum Outcome {
    Pushed,
    Pulled,
    Skipped,
    Conflict(ConflictRecord, bool),
    Failed(SyncError),
}

struct CallCtx<'a> {
    provider: &'a str,
    project: &'a str,
    element_id: Option<&'a ElementId>,
    external_id: Option<&'a str>,
}

impl CallCtx<'_> {
    fn error(&self, message: impl Into<String>, code: Option<String>, retryable: bool) -> SyncError {
        SyncError {
            provider: self.provider.to_string(),
            project: self.project.to_string(),
            element_id: self.element_id.cloned(),
            external_id: self.external_id.map(str::to_string),
            message: message.into(),
            code,
            retryable,
        }
    }
}

/// Orchestrates synchronization between the store and external providers.
pub struct SyncEngine {
    store: Arc<dyn ElementStore>,
    registry: ProviderRegistry,
    settings: SyncSettings,
}

impl SyncEngine {
    /// Creates an engine over a store and registry.
    #[must_use]
    pub fn new(
        store: Arc<dyn ElementStore>,
        registry: ProviderRegistry,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            registry,
            settings,
        }
    }

    /// The entity sync mutations are attributed to.
    #[must_use]
    pub fn sync_actor() -> EntityId {
        EntityId::from(ElementId::new_unchecked("el-sync"))
    }

    /// Pushes local changes out to providers.
    ///
    /// # Errors
    ///
    /// Fails only on orchestrator-level problems (unknown provider, none
    /// configured). Per-element failures land in each result's `errors`.
    pub async fn push(
        &self,
        opts: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExternalSyncResult>> {
        self.run(opts, cancel, Mode::Push).await
    }

    /// Pulls remote changes in from providers.
    ///
    /// # Errors
    ///
    /// As [`SyncEngine::push`].
    pub async fn pull(
        &self,
        opts: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExternalSyncResult>> {
        self.run(opts, cancel, Mode::Pull).await
    }

    /// Bidirectional sync: pull, push, and merge conflicts per strategy.
    ///
    /// # Errors
    ///
    /// As [`SyncEngine::push`].
    pub async fn sync(
        &self,
        opts: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExternalSyncResult>> {
        self.run(opts, cancel, Mode::Bidirectional).await
    }

    async fn run(
        &self,
        opts: &SyncOptions,
        cancel: &CancellationToken,
        mode: Mode,
    ) -> Result<Vec<ExternalSyncResult>> {
        let providers = self.target_providers(opts)?;
        let kind = opts.adapter_kind.unwrap_or(AdapterKind::Task);

        let mut results = Vec::new();
        for handle in providers {
            if !handle.supports(kind) {
                results.push(ExternalSyncResult {
                    success: true,
                    skipped: 1,
                    ..ExternalSyncResult::empty(handle.name(), handle.default_project(), kind)
                });
                continue;
            }
            let result = match kind {
                AdapterKind::Task => self.run_tasks(&handle, opts, cancel, mode).await,
                AdapterKind::Document => self.run_documents(&handle, opts, cancel, mode).await,
                AdapterKind::Message => self.run_messages(&handle, opts, cancel, mode).await,
            };
            info!(
                provider = handle.name(),
                pushed = result.pushed,
                pulled = result.pulled,
                skipped = result.skipped,
                conflicts = result.conflicts.len(),
                errors = result.errors.len(),
                "sync pass finished"
            );
            results.push(result);
        }
        Ok(results)
    }

    fn target_providers(&self, opts: &SyncOptions) -> Result<Vec<Arc<ProviderHandle>>> {
        if let Some(name) = &opts.provider {
            return Ok(vec![self.registry.get(name)?]);
        }
        if self.registry.is_empty() {
            return Err(Error::Provider("no providers configured".to_string()));
        }
        self.registry
            .names()
            .iter()
            .map(|name| self.registry.get(name))
            .collect()
    }

    /// Elements targeted for a pass: the explicit list, or every element
    /// of the kind linked to this provider.
    async fn collect_targets(
        &self,
        provider: &str,
        opts: &SyncOptions,
        kind: AdapterKind,
    ) -> Result<Vec<Element>> {
        if let Some(ids) = &opts.element_ids {
            let mut unique: BTreeSet<ElementId> = BTreeSet::new();
            let mut elements = Vec::new();
            for id in ids {
                if !unique.insert(id.clone()) {
                    continue;
                }
                match self.store.get(id).await? {
                    Some(element) if !element.deleted => elements.push(element),
                    _ => return Err(Error::NotFound(id.clone())),
                }
            }
            return Ok(elements);
        }

        let element_kind = match kind {
            AdapterKind::Task => ElementKind::Task,
            AdapterKind::Document => ElementKind::Document,
            AdapterKind::Message => ElementKind::Message,
        };
        let all = self
            .store
            .list(&ElementFilter::of_kind(element_kind))
            .await?;
        let mut targets = Vec::new();
        for element in all {
            if let Ok(Some(state)) = sync_state_of(&element) {
                if state.provider == provider && state.adapter_kind == kind {
                    targets.push(element);
                }
            }
        }
        Ok(targets)
    }

    // ===== Task sync =====

    async fn run_tasks(
        &self,
        handle: &Arc<ProviderHandle>,
        opts: &SyncOptions,
        cancel: &CancellationToken,
        mode: Mode,
    ) -> ExternalSyncResult {
        let project = handle.default_project().to_string();
        let kind = AdapterKind::Task;
        let mut result = ExternalSyncResult::empty(handle.name(), &project, kind);

        let adapter = match handle.task_adapter() {
            Ok(adapter) => adapter,
            Err(err) => {
                result.success = false;
                result.errors.push(SyncError {
                    provider: handle.name().to_string(),
                    project: project.clone(),
                    element_id: None,
                    external_id: None,
                    message: err.to_string(),
                    code: None,
                    retryable: false,
                });
                return result;
            }
        };
        let field_map = adapter.field_map_config();

        let targets = match self.collect_targets(handle.name(), opts, kind).await {
            Ok(targets) => targets,
            Err(err) => {
                result.success = false;
                result.errors.push(SyncError {
                    provider: handle.name().to_string(),
                    project: project.clone(),
                    element_id: None,
                    external_id: None,
                    message: err.to_string(),
                    code: None,
                    retryable: false,
                });
                return result;
            }
        };

        // Pull side: fetch everything updated since the high-water mark
        // and index it by external id.
        let mut remote_index: std::collections::HashMap<String, ExternalTask> =
            std::collections::HashMap::new();
        if mode.pulls() {
            let since = Self::pull_watermark(&targets);
            let ctx = CallCtx {
                provider: handle.name(),
                project: &project,
                element_id: None,
                external_id: None,
            };
            match self
                .call(cancel, &ctx, || adapter.list_issues_since(&project, since))
                .await
            {
                Ok(items) => {
                    for item in items {
                        remote_index.insert(item.external_id.clone(), item);
                    }
                }
                Err(err) => {
                    result.errors.push(err);
                    // Without the remote listing a pull pass cannot make
                    // progress; push-only work can still continue below.
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency_per_provider.max(1)));
        let seen_external: BTreeSet<String> = targets
            .iter()
            .filter_map(|element| sync_state_of(element).ok().flatten())
            .map(|state| state.external_id)
            .collect();

        let outcomes = join_all(targets.iter().map(|element| {
            let semaphore = semaphore.clone();
            let adapter = adapter.clone();
            let field_map = field_map.clone();
            let remote = sync_state_of(element)
                .ok()
                .flatten()
                .and_then(|state| remote_index.get(&state.external_id).cloned());
            let project = project.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore open");
                if cancel.is_cancelled() {
                    return Outcome::Failed(SyncError {
                        provider: handle.name().to_string(),
                        project,
                        element_id: Some(element.id.clone()),
                        external_id: None,
                        message: "operation cancelled".to_string(),
                        code: None,
                        retryable: true,
                    });
                }
                self.sync_task_element(
                    handle, &adapter, &field_map, element, remote, opts, cancel, mode,
                )
                .await
            }
        }))
        .await;

        for outcome in outcomes {
            Self::tally(&mut result, outcome);
        }

        // Remote items with no local counterpart become local elements.
        // Skipped when explicit targets were given: the listing may then
        // cover remotes linked to non-targeted elements.
        if mode.pulls() && self.settings.create_on_pull && !opts.dry_run
            && opts.element_ids.is_none()
        {
            for (external_id, remote) in &remote_index {
                if cancel.is_cancelled() {
                    break;
                }
                if seen_external.contains(external_id) {
                    continue;
                }
                match self
                    .create_local_task(handle.name(), &project, remote, &field_map)
                    .await
                {
                    Ok(()) => result.pulled += 1,
                    Err(err) => result.errors.push(SyncError {
                        provider: handle.name().to_string(),
                        project: project.clone(),
                        element_id: None,
                        external_id: Some(external_id.clone()),
                        message: err.to_string(),
                        code: None,
                        retryable: false,
                    }),
                }
            }
        }

        result
    }

    /// Decides and applies what one task element needs in this pass.
    #[expect(clippy::too_many_arguments, reason = "batch context is wide")]
    async fn sync_task_element(
        &self,
        handle: &Arc<ProviderHandle>,
        adapter: &Arc<dyn crate::sync::provider::TaskAdapter>,
        field_map: &TaskFieldMapConfig,
        element: &Element,
        remote: Option<ExternalTask>,
        opts: &SyncOptions,
        cancel: &CancellationToken,
        mode: Mode,
    ) -> Outcome {
        if element.has_tag(SYNC_CONFLICT_TAG) {
            debug!(id = %element.id, "skipping conflict-tagged element");
            return Outcome::Skipped;
        }

        let state = match sync_state_of(element) {
            Ok(state) => state,
            Err(err) => {
                return Outcome::Failed(SyncError {
                    provider: handle.name().to_string(),
                    project: handle.default_project().to_string(),
                    element_id: Some(element.id.clone()),
                    external_id: None,
                    message: format!("corrupt sync state: {err}"),
                    code: None,
                    retryable: false,
                });
            }
        };

        let body = self.task_body(element).await;
        let local = match TaskProjection::of_local(element, body) {
            Ok(projection) => projection,
            Err(err) => {
                return Outcome::Failed(SyncError {
                    provider: handle.name().to_string(),
                    project: handle.default_project().to_string(),
                    element_id: Some(element.id.clone()),
                    external_id: None,
                    message: err.to_string(),
                    code: None,
                    retryable: false,
                });
            }
        };
        let local_hash = local.content_hash();

        let Some(state) = state else {
            // Unlinked target: only an explicit push/sync creates the
            // remote resource.
            if mode.pushes() {
                return self
                    .push_create(handle, adapter, field_map, element, &local, &local_hash, opts, cancel)
                    .await;
            }
            return Outcome::Skipped;
        };

        let project = state.project.clone();
        let is_local_changed = mode.pushes() && local_changed(&local_hash, &state);
        let (is_remote_changed, remote) = match &remote {
            Some(remote) if mode.pulls() => {
                let remote_hash = TaskProjection::of_remote(remote, field_map).content_hash();
                (
                    remote_changed(remote.updated_at, &remote_hash, &state),
                    Some(remote),
                )
            }
            _ => (false, None),
        };

        match (is_local_changed, is_remote_changed) {
            (false, false) => {
                debug!(id = %element.id, "no changes on either side");
                Outcome::Skipped
            }
            (true, false) => {
                self.push_update(
                    handle, adapter, field_map, element, &state, &local, &local_hash, opts, cancel,
                )
                .await
            }
            (false, true) => {
                let remote = remote.expect("remote_changed implies remote present");
                self.apply_remote_task(
                    handle.name(),
                    &project,
                    element,
                    &state,
                    remote,
                    field_map,
                    opts.dry_run,
                )
                .await
            }
            (true, true) => {
                let remote = remote.expect("remote_changed implies remote present");
                self.merge_task(
                    handle, adapter, field_map, element, &state, &local, &local_hash, remote,
                    opts, cancel,
                )
                .await
            }
        }
    }

    /// Both sides changed: resolve per strategy.
    #[expect(clippy::too_many_arguments, reason = "merge needs both sides")]
    async fn merge_task(
        &self,
        handle: &Arc<ProviderHandle>,
        adapter: &Arc<dyn crate::sync::provider::TaskAdapter>,
        field_map: &TaskFieldMapConfig,
        element: &Element,
        state: &ExternalSyncState,
        local: &TaskProjection,
        local_hash: &str,
        remote: &ExternalTask,
        opts: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Outcome {
        let strategy = opts
            .conflict_strategy
            .unwrap_or(ConflictStrategy::LastWriteWins);
        let winner = match strategy {
            ConflictStrategy::LocalWins => ConflictWinner::Local,
            ConflictStrategy::RemoteWins => ConflictWinner::Remote,
            ConflictStrategy::LastWriteWins => {
                if element.updated_at >= remote.updated_at {
                    ConflictWinner::Local
                } else {
                    ConflictWinner::Remote
                }
            }
            ConflictStrategy::Manual => ConflictWinner::Deferred,
        };
        let record = ConflictRecord {
            element_id: element.id.clone(),
            external_id: state.external_id.clone(),
            provider: handle.name().to_string(),
            strategy,
            winner,
        };
        warn!(id = %element.id, ?strategy, ?winner, "sync conflict");

        if opts.dry_run {
            return Outcome::Conflict(record, false);
        }

        let conflict_event = ElementEvent::now(
            element.id.clone(),
            EventKind::SyncConflict,
            Self::sync_actor(),
            json!({
                "provider": handle.name(),
                "externalId": state.external_id,
                "strategy": strategy,
                "winner": winner,
            }),
        );

        match winner {
            ConflictWinner::Local => {
                let outcome = self
                    .push_update(
                        handle, adapter, field_map, element, state, local, local_hash, opts,
                        cancel,
                    )
                    .await;
                match outcome {
                    Outcome::Pushed => {
                        let _ = self.store.record_event(conflict_event).await;
                        Outcome::Conflict(record, true)
                    }
                    other => other,
                }
            }
            ConflictWinner::Remote => {
                let outcome = self
                    .apply_remote_task(
                        handle.name(),
                        &state.project,
                        element,
                        state,
                        remote,
                        field_map,
                        false,
                    )
                    .await;
                match outcome {
                    Outcome::Pulled => {
                        let _ = self.store.record_event(conflict_event).await;
                        Outcome::Conflict(record, true)
                    }
                    other => other,
                }
            }
            ConflictWinner::Deferred => {
                // Tag the element; later passes skip it until cleared.
                let mut tags = element.tags.clone();
                tags.insert(SYNC_CONFLICT_TAG.to_string());
                let patch = ElementPatch {
                    tags: Some(tags),
                    ..Default::default()
                };
                let update = self
                    .store
                    .update(
                        &element.id,
                        patch,
                        UpdateOptions {
                            actor: Some(Self::sync_actor()),
                            ..Default::default()
                        },
                    )
                    .await;
                match update {
                    Ok(_) => {
                        let _ = self.store.record_event(conflict_event).await;
                        Outcome::Conflict(record, false)
                    }
                    Err(err) => Outcome::Failed(SyncError {
                        provider: handle.name().to_string(),
                        project: state.project.clone(),
                        element_id: Some(element.id.clone()),
                        external_id: Some(state.external_id.clone()),
                        message: err.to_string(),
                        code: None,
                        retryable: false,
                    }),
                }
            }
        }
    }

    /// First push of an unlinked element: create remote, write sync state.
    #[expect(clippy::too_many_arguments, reason = "batch context is wide")]
    async fn push_create(
        &self,
        handle: &Arc<ProviderHandle>,
        adapter: &Arc<dyn crate::sync::provider::TaskAdapter>,
        field_map: &TaskFieldMapConfig,
        element: &Element,
        local: &TaskProjection,
        local_hash: &str,
        opts: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Outcome {
        let project = handle.default_project().to_string();
        if opts.dry_run {
            return Outcome::Pushed;
        }

        let mut input = ExternalTaskInput {
            title: local.title.clone(),
            body: local.body.clone(),
            state: Some(local.state),
            labels: local.labels.iter().cloned().collect(),
            assignees: local.assignees.iter().cloned().collect(),
            priority: None,
        };
        if let Some(priority) = local.priority {
            field_map.apply_priority(&mut input, priority);
        }

        let ctx = CallCtx {
            provider: handle.name(),
            project: &project,
            element_id: Some(&element.id),
            external_id: None,
        };
        let created = match self
            .call(cancel, &ctx, || adapter.create_issue(&project, &input))
            .await
        {
            Ok(created) => created,
            Err(err) => return Outcome::Failed(err),
        };

        let now = Utc::now();
        let state = ExternalSyncState {
            provider: handle.name().to_string(),
            project: project.clone(),
            external_id: created.external_id.clone(),
            url: created.url.clone(),
            last_pushed_at: Some(now),
            last_pulled_at: Some(now),
            last_pushed_hash: Some(local_hash.to_string()),
            last_pulled_hash: Some(
                TaskProjection::of_remote(&created, field_map).content_hash(),
            ),
            direction: self.settings.default_direction,
            adapter_kind: AdapterKind::Task,
        };
        if let Err(err) = self.write_state(&element.id, &state, EventKind::SyncPushed).await {
            return Outcome::Failed(ctx.error(err.to_string(), None, false));
        }
        Outcome::Pushed
    }

    /// Push of a linked, locally-changed element.
    #[expect(clippy::too_many_arguments, reason = "batch context is wide")]
    async fn push_update(
        &self,
        handle: &Arc<ProviderHandle>,
        adapter: &Arc<dyn crate::sync::provider::TaskAdapter>,
        field_map: &TaskFieldMapConfig,
        element: &Element,
        state: &ExternalSyncState,
        local: &TaskProjection,
        local_hash: &str,
        opts: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Outcome {
        if opts.dry_run {
            return Outcome::Pushed;
        }

        let mut labels: Vec<String> = local.labels.iter().cloned().collect();
        let mut priority = None;
        if let Some(p) = local.priority {
            match field_map.priority {
                crate::sync::external::FieldTransform::PriorityRemap => {
                    let label = format!("{}{p}", field_map.priority_label_prefix);
                    if !labels.contains(&label) {
                        labels.push(label);
                    }
                }
                _ => priority = Some(p),
            }
        }
        let input = ExternalTaskUpdate {
            title: Some(local.title.clone()),
            body: local.body.clone(),
            state: Some(local.state),
            labels: Some(labels),
            assignees: Some(local.assignees.iter().cloned().collect()),
            priority,
        };

        let ctx = CallCtx {
            provider: handle.name(),
            project: &state.project,
            element_id: Some(&element.id),
            external_id: Some(&state.external_id),
        };
        let updated = match self
            .call(cancel, &ctx, || {
                adapter.update_issue(&state.project, &state.external_id, &input)
            })
            .await
        {
            Ok(updated) => updated,
            Err(err) => return Outcome::Failed(err),
        };

        let now = Utc::now();
        let mut next = state.clone();
        next.last_pushed_at = Some(now);
        next.last_pushed_hash = Some(local_hash.to_string());
        next.last_pulled_at = Some(now);
        next.last_pulled_hash =
            Some(TaskProjection::of_remote(&updated, field_map).content_hash());
        if let Err(err) = self.write_state(&element.id, &next, EventKind::SyncPushed).await {
            return Outcome::Failed(ctx.error(err.to_string(), None, false));
        }
        Outcome::Pushed
    }

    /// Applies a remote task's fields to the local element.
    #[expect(clippy::too_many_arguments, reason = "merge needs both sides")]
    async fn apply_remote_task(
        &self,
        provider: &str,
        project: &str,
        element: &Element,
        state: &ExternalSyncState,
        remote: &ExternalTask,
        field_map: &TaskFieldMapConfig,
        dry_run: bool,
    ) -> Outcome {
        if dry_run {
            return Outcome::Pulled;
        }
        let fail = |message: String| {
            Outcome::Failed(SyncError {
                provider: provider.to_string(),
                project: project.to_string(),
                element_id: Some(element.id.clone()),
                external_id: Some(remote.external_id.clone()),
                message,
                code: None,
                retryable: false,
            })
        };

        let task = match element.as_task() {
            Some(task) => task,
            None => return fail(format!("{} is not a task", element.id)),
        };

        // Map the remote state onto the local lifecycle.
        let status = match (remote.state, task.status) {
            (ExternalState::Closed, status) if status != TaskStatus::Closed => {
                Some(TaskStatus::Closed)
            }
            (ExternalState::Open, TaskStatus::Closed) => Some(TaskStatus::Open),
            _ => None,
        };

        let task_patch = TaskPatch {
            title: Some(remote.title.clone()),
            status,
            priority: field_map.read_priority(remote),
            ..Default::default()
        };
        // Priority labels are a remote encoding; keep them out of tags.
        let tags: BTreeSet<String> = remote
            .labels
            .iter()
            .filter(|label| !label.starts_with(&field_map.priority_label_prefix))
            .cloned()
            .collect();
        let patch = ElementPatch {
            tags: Some(tags),
            metadata: None,
            payload: Some(PayloadPatch::Task(task_patch)),
        };

        if let Err(err) = self
            .store
            .update(
                &element.id,
                patch,
                UpdateOptions {
                    actor: Some(Self::sync_actor()),
                    ..Default::default()
                },
            )
            .await
        {
            return fail(err.to_string());
        }

        // Body lands in the description document.
        if let Some(body) = &remote.body {
            if let Err(err) = self.apply_remote_body(element, body).await {
                return fail(err.to_string());
            }
        }

        // Recompute the local hash post-apply so the next push does not
        // mirror this pull back out.
        let refreshed = match self.store.get(&element.id).await {
            Ok(Some(refreshed)) => refreshed,
            Ok(None) => return fail("element vanished during pull".to_string()),
            Err(err) => return fail(err.to_string()),
        };
        let body = self.task_body(&refreshed).await;
        let local_hash = match TaskProjection::of_local(&refreshed, body) {
            Ok(projection) => projection.content_hash(),
            Err(err) => return fail(err.to_string()),
        };

        let mut next = state.clone();
        next.last_pulled_at = Some(Utc::now());
        next.last_pulled_hash =
            Some(TaskProjection::of_remote(remote, field_map).content_hash());
        next.last_pushed_hash = Some(local_hash);
        if let Err(err) = self.write_state(&element.id, &next, EventKind::SyncPulled).await {
            return fail(err.to_string());
        }
        Outcome::Pulled
    }

    /// Creates a local task for a remote item with no local counterpart.
    async fn create_local_task(
        &self,
        provider: &str,
        project: &str,
        remote: &ExternalTask,
        field_map: &TaskFieldMapConfig,
    ) -> Result<()> {
        let description_ref = match &remote.body {
            Some(body) if !body.is_empty() => {
                let doc = self
                    .store
                    .create(NewElement::new(
                        Self::sync_actor(),
                        NewPayload::Document(NewDocument {
                            content_type: ContentType::Markdown,
                            content: body.clone(),
                            category: Some("description".to_string()),
                            immutable: false,
                        }),
                    ))
                    .await?;
                Some(DocumentId::from(doc.id))
            }
            _ => None,
        };

        let tags: BTreeSet<String> = remote
            .labels
            .iter()
            .filter(|label| !label.starts_with(&field_map.priority_label_prefix))
            .cloned()
            .collect();
        let new_task = NewTask {
            title: remote.title.clone(),
            status: match remote.state {
                ExternalState::Open => TaskStatus::Open,
                ExternalState::Closed => TaskStatus::Closed,
            },
            priority: field_map.read_priority(remote).unwrap_or(3),
            description_ref,
            ..Default::default()
        };
        let element = self
            .store
            .create(NewElement {
                created_by: Self::sync_actor(),
                tags,
                metadata: Metadata::new(),
                payload: NewPayload::Task(new_task),
            })
            .await?;

        let remote_hash = TaskProjection::of_remote(remote, field_map).content_hash();
        let body = self.task_body(&element).await;
        let local_hash = TaskProjection::of_local(&element, body)?.content_hash();
        let state = ExternalSyncState {
            provider: provider.to_string(),
            project: project.to_string(),
            external_id: remote.external_id.clone(),
            url: remote.url.clone(),
            last_pushed_at: None,
            last_pulled_at: Some(Utc::now()),
            last_pushed_hash: Some(local_hash),
            last_pulled_hash: Some(remote_hash),
            direction: self.settings.default_direction,
            adapter_kind: AdapterKind::Task,
        };
        self.write_state(&element.id, &state, EventKind::SyncPulled).await?;
        debug!(id = %element.id, external_id = %remote.external_id, "created local task from remote");
        Ok(())
    }

    /// Replaces the description document content (creating one if the
    /// task has none).
    async fn apply_remote_body(&self, element: &Element, body: &str) -> Result<()> {
        let task = element
            .as_task()
            .ok_or_else(|| Error::Constraint(format!("{} is not a task", element.id)))?;
        match &task.description_ref {
            Some(doc_id) => {
                let current = self
                    .store
                    .get(doc_id)
                    .await?
                    .and_then(|doc| doc.as_document().map(|d| d.content.clone()));
                if current.as_deref() != Some(body) {
                    self.store
                        .update(
                            doc_id,
                            ElementPatch {
                                payload: Some(PayloadPatch::Document(DocumentPatch {
                                    content: Some(body.to_string()),
                                    ..Default::default()
                                })),
                                ..Default::default()
                            },
                            UpdateOptions {
                                actor: Some(Self::sync_actor()),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
            }
            None => {
                let doc = self
                    .store
                    .create(NewElement::new(
                        Self::sync_actor(),
                        NewPayload::Document(NewDocument {
                            content_type: ContentType::Markdown,
                            content: body.to_string(),
                            category: Some("description".to_string()),
                            immutable: false,
                        }),
                    ))
                    .await?;
                self.store
                    .update(
                        &element.id,
                        ElementPatch {
                            payload: Some(PayloadPatch::Task(TaskPatch {
                                description_ref: Some(Some(DocumentId::from(doc.id))),
                                ..Default::default()
                            })),
                            ..Default::default()
                        },
                        UpdateOptions {
                            actor: Some(Self::sync_actor()),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }

    // ===== Document sync =====

    async fn run_documents(
        &self,
        handle: &Arc<ProviderHandle>,
        opts: &SyncOptions,
        cancel: &CancellationToken,
        mode: Mode,
    ) -> ExternalSyncResult {
        let project = handle.default_project().to_string();
        let mut result =
            ExternalSyncResult::empty(handle.name(), &project, AdapterKind::Document);

        let adapter = match handle.document_adapter() {
            Ok(adapter) => adapter,
            Err(err) => {
                result.success = false;
                result.errors.push(SyncError {
                    provider: handle.name().to_string(),
                    project,
                    element_id: None,
                    external_id: None,
                    message: err.to_string(),
                    code: None,
                    retryable: false,
                });
                return result;
            }
        };

        let targets = match self
            .collect_targets(handle.name(), opts, AdapterKind::Document)
            .await
        {
            Ok(targets) => targets,
            Err(err) => {
                result.success = false;
                result.errors.push(SyncError {
                    provider: handle.name().to_string(),
                    project: project.clone(),
                    element_id: None,
                    external_id: None,
                    message: err.to_string(),
                    code: None,
                    retryable: false,
                });
                return result;
            }
        };

        for element in targets {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = self
                .sync_document_element(handle, &adapter, &element, opts, cancel, mode)
                .await;
            Self::tally(&mut result, outcome);
        }
        result
    }

    async fn sync_document_element(
        &self,
        handle: &Arc<ProviderHandle>,
        adapter: &Arc<dyn crate::sync::provider::DocumentAdapter>,
        element: &Element,
        opts: &SyncOptions,
        cancel: &CancellationToken,
        mode: Mode,
    ) -> Outcome {
        let project = handle.default_project().to_string();
        let fail = |message: String, retryable: bool| {
            Outcome::Failed(SyncError {
                provider: handle.name().to_string(),
                project: project.clone(),
                element_id: Some(element.id.clone()),
                external_id: None,
                message,
                code: None,
                retryable,
            })
        };
        if element.has_tag(SYNC_CONFLICT_TAG) {
            return Outcome::Skipped;
        }
        let Some(document) = element.as_document() else {
            return fail(format!("{} is not a document", element.id), false);
        };
        let state = match sync_state_of(element) {
            Ok(state) => state,
            Err(err) => return fail(format!("corrupt sync state: {err}"), false),
        };

        let title = document_title(element);
        let local_hash = content_hash_str(&format!("{title}\n{}", document.content));

        let Some(state) = state else {
            if !mode.pushes() {
                return Outcome::Skipped;
            }
            if opts.dry_run {
                return Outcome::Pushed;
            }
            let input = ExternalDocumentInput {
                title,
                content: document.content.clone(),
            };
            let ctx = CallCtx {
                provider: handle.name(),
                project: &project,
                element_id: Some(&element.id),
                external_id: None,
            };
            let created = match self
                .call(cancel, &ctx, || adapter.create_document(&project, &input))
                .await
            {
                Ok(created) => created,
                Err(err) => return Outcome::Failed(err),
            };
            let now = Utc::now();
            let state = ExternalSyncState {
                provider: handle.name().to_string(),
                project: project.clone(),
                external_id: created.external_id.clone(),
                url: created.url.clone(),
                last_pushed_at: Some(now),
                last_pulled_at: Some(now),
                last_pushed_hash: Some(local_hash.clone()),
                last_pulled_hash: Some(content_hash_str(&format!(
                    "{}\n{}",
                    created.title, created.content
                ))),
                direction: self.settings.default_direction,
                adapter_kind: AdapterKind::Document,
            };
            return match self.write_state(&element.id, &state, EventKind::SyncPushed).await {
                Ok(()) => Outcome::Pushed,
                Err(err) => fail(err.to_string(), false),
            };
        };

        let is_local_changed = mode.pushes() && local_changed(&local_hash, &state);

        // Documents fetch point-wise; the remote listing watermark is a
        // task-side optimization.
        let remote = if mode.pulls() {
            let ctx = CallCtx {
                provider: handle.name(),
                project: &state.project,
                element_id: Some(&element.id),
                external_id: Some(&state.external_id),
            };
            match self
                .call(cancel, &ctx, || {
                    adapter.get_document(&state.project, &state.external_id)
                })
                .await
            {
                Ok(remote) => remote,
                Err(err) => return Outcome::Failed(err),
            }
        } else {
            None
        };
        let (is_remote_changed, remote_hash) = match &remote {
            Some(remote) => {
                let hash = content_hash_str(&format!("{}\n{}", remote.title, remote.content));
                (remote_changed(remote.updated_at, &hash, &state), Some(hash))
            }
            None => (false, None),
        };

        match (is_local_changed, is_remote_changed) {
            (false, false) => Outcome::Skipped,
            (true, false) => {
                self.push_document_update(
                    handle, adapter, element, &state, &local_hash, opts, cancel, None,
                )
                .await
            }
            (false, true) => {
                let remote = remote.as_ref().expect("remote present");
                self.apply_remote_document(
                    handle.name(),
                    element,
                    &state,
                    &remote.content,
                    remote_hash.expect("hash computed"),
                    opts.dry_run,
                    None,
                )
                .await
            }
            (true, true) => {
                let strategy = opts
                    .conflict_strategy
                    .unwrap_or(ConflictStrategy::LastWriteWins);
                let remote_record = remote.as_ref().expect("remote present");
                let winner = match strategy {
                    ConflictStrategy::LocalWins => ConflictWinner::Local,
                    ConflictStrategy::RemoteWins => ConflictWinner::Remote,
                    ConflictStrategy::LastWriteWins => {
                        if element.updated_at >= remote_record.updated_at {
                            ConflictWinner::Local
                        } else {
                            ConflictWinner::Remote
                        }
                    }
                    ConflictStrategy::Manual => ConflictWinner::Deferred,
                };
                match winner {
                    ConflictWinner::Local => {
                        self.push_document_update(
                            handle,
                            adapter,
                            element,
                            &state,
                            &local_hash,
                            opts,
                            cancel,
                            Some((strategy, winner)),
                        )
                        .await
                    }
                    ConflictWinner::Remote => {
                        self.apply_remote_document(
                            handle.name(),
                            element,
                            &state,
                            &remote_record.content,
                            remote_hash.expect("hash computed"),
                            opts.dry_run,
                            Some((strategy, winner)),
                        )
                        .await
                    }
                    ConflictWinner::Deferred => {
                        if opts.dry_run {
                            return Outcome::Conflict(
                                ConflictRecord {
                                    element_id: element.id.clone(),
                                    external_id: state.external_id.clone(),
                                    provider: handle.name().to_string(),
                                    strategy,
                                    winner,
                                },
                                false,
                            );
                        }
                        let mut tags = element.tags.clone();
                        tags.insert(SYNC_CONFLICT_TAG.to_string());
                        match self
                            .store
                            .update(
                                &element.id,
                                ElementPatch {
                                    tags: Some(tags),
                                    ..Default::default()
                                },
                                UpdateOptions {
                                    actor: Some(Self::sync_actor()),
                                    ..Default::default()
                                },
                            )
                            .await
                        {
                            Ok(_) => Outcome::Conflict(
                                ConflictRecord {
                                    element_id: element.id.clone(),
                                    external_id: state.external_id.clone(),
                                    provider: handle.name().to_string(),
                                    strategy,
                                    winner,
                                },
                                false,
                            ),
                            Err(err) => fail(err.to_string(), false),
                        }
                    }
                }
            }
        }
    }

    /// Push of a linked, locally-changed document.
    #[expect(clippy::too_many_arguments, reason = "batch context is wide")]
    async fn push_document_update(
        &self,
        handle: &Arc<ProviderHandle>,
        adapter: &Arc<dyn crate::sync::provider::DocumentAdapter>,
        element: &Element,
        state: &ExternalSyncState,
        local_hash: &str,
        opts: &SyncOptions,
        cancel: &CancellationToken,
        strategy_conflict: Option<(ConflictStrategy, ConflictWinner)>,
    ) -> Outcome {
        if opts.dry_run {
            return Outcome::Pushed;
        }
        let input = ExternalDocumentInput {
            title: document_title(element),
            content: element
                .as_document()
                .map(|d| d.content.clone())
                .unwrap_or_default(),
        };
        let ctx = CallCtx {
            provider: handle.name(),
            project: &state.project,
            element_id: Some(&element.id),
            external_id: Some(&state.external_id),
        };
        let updated = match self
            .call(cancel, &ctx, || {
                adapter.update_document(&state.project, &state.external_id, &input)
            })
            .await
        {
            Ok(updated) => updated,
            Err(err) => return Outcome::Failed(err),
        };
        let now = Utc::now();
        let mut next = state.clone();
        next.last_pushed_at = Some(now);
        next.last_pushed_hash = Some(local_hash.to_string());
        next.last_pulled_at = Some(now);
        next.last_pulled_hash = Some(content_hash_str(&format!(
            "{}\n{}",
            updated.title, updated.content
        )));
        match self.write_state(&element.id, &next, EventKind::SyncPushed).await {
            Ok(()) => match strategy_conflict {
                Some((strategy, winner)) => Outcome::Conflict(
                    ConflictRecord {
                        element_id: element.id.clone(),
                        external_id: state.external_id.clone(),
                        provider: handle.name().to_string(),
                        strategy,
                        winner,
                    },
                    true,
                ),
                None => Outcome::Pushed,
            },
            Err(err) => Outcome::Failed(ctx.error(err.to_string(), None, false)),
        }
    }

    #[expect(clippy::too_many_arguments, reason = "merge needs both sides")]
    async fn apply_remote_document(
        &self,
        provider: &str,
        element: &Element,
        state: &ExternalSyncState,
        remote_content: &str,
        remote_hash: String,
        dry_run: bool,
        conflict: Option<(ConflictStrategy, ConflictWinner)>,
    ) -> Outcome {
        if dry_run {
            return Outcome::Pulled;
        }
        let fail = |message: String| {
            Outcome::Failed(SyncError {
                provider: provider.to_string(),
                project: state.project.clone(),
                element_id: Some(element.id.clone()),
                external_id: Some(state.external_id.clone()),
                message,
                code: None,
                retryable: false,
            })
        };

        let unchanged = element
            .as_document()
            .is_some_and(|d| d.content == remote_content);
        if !unchanged {
            let update = self
                .store
                .update(
                    &element.id,
                    ElementPatch {
                        payload: Some(PayloadPatch::Document(DocumentPatch {
                            content: Some(remote_content.to_string()),
                            ..Default::default()
                        })),
                        ..Default::default()
                    },
                    UpdateOptions {
                        actor: Some(Self::sync_actor()),
                        ..Default::default()
                    },
                )
                .await;
            if let Err(err) = update {
                return fail(err.to_string());
            }
        }

        let local_hash = match self.store.get(&element.id).await {
            Ok(Some(refreshed)) => refreshed.as_document().map(|d| {
                content_hash_str(&format!("{}\n{}", document_title(&refreshed), d.content))
            }),
            _ => None,
        };
        let mut next = state.clone();
        next.last_pulled_at = Some(Utc::now());
        next.last_pulled_hash = Some(remote_hash);
        next.last_pushed_hash = local_hash;
        match self.write_state(&element.id, &next, EventKind::SyncPulled).await {
            Ok(()) => match conflict {
                Some((strategy, winner)) => Outcome::Conflict(
                    ConflictRecord {
                        element_id: element.id.clone(),
                        external_id: state.external_id.clone(),
                        provider: provider.to_string(),
                        strategy,
                        winner,
                    },
                    true,
                ),
                None => Outcome::Pulled,
            },
            Err(err) => fail(err.to_string()),
        }
    }

    // ===== Message sync =====

    /// Messages are immutable locally, so sync reduces to pushing
    /// unlinked messages out once. Remote messages are not pulled into
    /// local channels (no channel mapping policy exists).
    async fn run_messages(
        &self,
        handle: &Arc<ProviderHandle>,
        opts: &SyncOptions,
        cancel: &CancellationToken,
        mode: Mode,
    ) -> ExternalSyncResult {
        let project = handle.default_project().to_string();
        let mut result = ExternalSyncResult::empty(handle.name(), &project, AdapterKind::Message);

        if !mode.pushes() {
            return result;
        }
        let adapter = match handle.message_adapter() {
            Ok(adapter) => adapter,
            Err(err) => {
                result.success = false;
                result.errors.push(SyncError {
                    provider: handle.name().to_string(),
                    project,
                    element_id: None,
                    external_id: None,
                    message: err.to_string(),
                    code: None,
                    retryable: false,
                });
                return result;
            }
        };

        let targets = match self
            .collect_targets(handle.name(), opts, AdapterKind::Message)
            .await
        {
            Ok(targets) => targets,
            Err(err) => {
                result.success = false;
                result.errors.push(SyncError {
                    provider: handle.name().to_string(),
                    project: project.clone(),
                    element_id: None,
                    external_id: None,
                    message: err.to_string(),
                    code: None,
                    retryable: false,
                });
                return result;
            }
        };

        for element in targets {
            if cancel.is_cancelled() {
                break;
            }
            if sync_state_of(&element).ok().flatten().is_some() {
                // Already mirrored; immutable content cannot change.
                result.skipped += 1;
                continue;
            }
            if opts.dry_run {
                result.pushed += 1;
                continue;
            }

            let Some(message) = element.as_message() else {
                result.skipped += 1;
                continue;
            };
            let body = match self.store.get(&message.content_ref).await {
                Ok(Some(doc)) => doc
                    .as_document()
                    .map(|d| d.content.clone())
                    .unwrap_or_default(),
                _ => String::new(),
            };
            let input = ExternalMessageInput {
                body: body.clone(),
                thread_external_id: None,
            };
            let ctx = CallCtx {
                provider: handle.name(),
                project: &project,
                element_id: Some(&element.id),
                external_id: None,
            };
            match self
                .call(cancel, &ctx, || adapter.create_message(&project, &input))
                .await
            {
                Ok(created) => {
                    let state = ExternalSyncState {
                        provider: handle.name().to_string(),
                        project: project.clone(),
                        external_id: created.external_id.clone(),
                        url: created.url.clone(),
                        last_pushed_at: Some(Utc::now()),
                        last_pulled_at: None,
                        last_pushed_hash: Some(content_hash_str(&body)),
                        last_pulled_hash: None,
                        direction: crate::sync::SyncDirection::Push,
                        adapter_kind: AdapterKind::Message,
                    };
                    // Messages reject update(); the sync state rides on a
                    // raw event instead of element metadata.
                    let event = ElementEvent::now(
                        element.id.clone(),
                        EventKind::SyncPushed,
                        Self::sync_actor(),
                        json!({ "state": state }),
                    );
                    if let Err(err) = self.store.record_event(event).await {
                        result.errors.push(ctx.error(err.to_string(), None, false));
                    } else {
                        result.pushed += 1;
                    }
                }
                Err(err) => result.errors.push(err),
            }
        }
        result
    }

    // ===== Link management =====

    /// Links one element to a provider: attaches to `external_ref` when
    /// given (fetch + hash), otherwise creates the remote resource.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` for a missing element, `PROVIDER` for an unknown
    /// provider or a missing remote, `CONSTRAINT` for unsupported kinds.
    pub async fn link(
        &self,
        id: &ElementId,
        provider_name: &str,
        external_ref: Option<&str>,
    ) -> Result<Element> {
        let handle = self.registry.get(provider_name)?;
        let element = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        let kind = match element.kind() {
            ElementKind::Task => AdapterKind::Task,
            ElementKind::Document => AdapterKind::Document,
            ElementKind::Message => AdapterKind::Message,
            other => {
                return Err(Error::Constraint(format!(
                    "{other:?} elements cannot be linked externally"
                )));
            }
        };
        if !handle.supports(kind) {
            return Err(Error::Provider(format!(
                "provider '{provider_name}' does not support {kind:?} sync"
            )));
        }

        let cancel = CancellationToken::new();
        match kind {
            AdapterKind::Task => {
                let adapter = handle.task_adapter()?;
                let field_map = adapter.field_map_config();
                let project = handle.default_project().to_string();
                let body = self.task_body(&element).await;
                let local = TaskProjection::of_local(&element, body)?;
                let local_hash = local.content_hash();

                let state = match external_ref {
                    Some(external_id) => {
                        let ctx = CallCtx {
                            provider: handle.name(),
                            project: &project,
                            element_id: Some(id),
                            external_id: Some(external_id),
                        };
                        let remote = self
                            .call(&cancel, &ctx, || adapter.get_issue(&project, external_id))
                            .await
                            .map_err(|err| Error::Provider(err.to_string()))?
                            .ok_or_else(|| {
                                Error::Provider(format!(
                                    "remote {external_id} not found on '{provider_name}'"
                                ))
                            })?;
                        ExternalSyncState {
                            provider: provider_name.to_string(),
                            project: project.clone(),
                            external_id: remote.external_id.clone(),
                            url: remote.url.clone(),
                            last_pushed_at: None,
                            last_pulled_at: Some(Utc::now()),
                            last_pushed_hash: Some(local_hash),
                            last_pulled_hash: Some(
                                TaskProjection::of_remote(&remote, &field_map).content_hash(),
                            ),
                            direction: self.settings.default_direction,
                            adapter_kind: AdapterKind::Task,
                        }
                    }
                    None => {
                        let opts = SyncOptions::default();
                        match self
                            .push_create(
                                &handle, &adapter, &field_map, &element, &local, &local_hash,
                                &opts, &cancel,
                            )
                            .await
                        {
                            Outcome::Pushed => {
                                return self
                                    .store
                                    .get(id)
                                    .await?
                                    .ok_or_else(|| Error::NotFound(id.clone()));
                            }
                            Outcome::Failed(err) => return Err(Error::Provider(err.to_string())),
                            _ => return Err(Error::Provider("link did not complete".to_string())),
                        }
                    }
                };
                self.write_state(id, &state, EventKind::SyncPulled).await?;
            }
            AdapterKind::Document | AdapterKind::Message => {
                return Err(Error::Constraint(
                    "explicit linking currently targets tasks; documents and messages link \
                     during push"
                        .to_string(),
                ));
            }
        }

        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    /// Removes the `_externalSync` state. No-op for unlinked elements.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` for a missing element.
    pub async fn unlink(&self, id: &ElementId) -> Result<Element> {
        let element = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        if sync_state_of(&element)?.is_none() {
            return Ok(element);
        }
        self.store
            .update(
                id,
                unlink_patch(),
                UpdateOptions {
                    actor: Some(Self::sync_actor()),
                    ..Default::default()
                },
            )
            .await
    }

    /// Links every candidate element of the selected kind to a provider.
    /// Elements already bound to the same provider are skipped unless
    /// `force` re-links them (re-creating the remote).
    ///
    /// # Errors
    ///
    /// Orchestrator failures only (unknown provider); per-element
    /// failures land in the report.
    pub async fn link_all(&self, opts: &SyncOptions) -> Result<LinkReport> {
        let provider_name = opts
            .provider
            .as_deref()
            .ok_or_else(|| Error::Provider("link_all requires a provider".to_string()))?;
        let handle = self.registry.get(provider_name)?;
        let kind = opts.adapter_kind.unwrap_or(AdapterKind::Task);
        let element_kind = match kind {
            AdapterKind::Task => ElementKind::Task,
            AdapterKind::Document => ElementKind::Document,
            AdapterKind::Message => ElementKind::Message,
        };

        let mut report = LinkReport::default();
        let candidates = self
            .store
            .list(&ElementFilter::of_kind(element_kind))
            .await?;
        for element in candidates {
            let already = sync_state_of(&element)
                .ok()
                .flatten()
                .is_some_and(|state| state.provider == provider_name);
            if already && !opts.force {
                report.skipped += 1;
                continue;
            }
            match self.link(&element.id, provider_name, None).await {
                Ok(_) => report.linked.push(element.id.clone()),
                Err(err) => report.errors.push(SyncError {
                    provider: provider_name.to_string(),
                    project: handle.default_project().to_string(),
                    element_id: Some(element.id.clone()),
                    external_id: None,
                    message: err.to_string(),
                    code: None,
                    retryable: false,
                }),
            }
        }
        Ok(report)
    }

    /// Unlinks every element bound to the selected provider (or to any
    /// provider when none is given).
    ///
    /// # Errors
    ///
    /// Store failures while listing.
    pub async fn unlink_all(&self, opts: &SyncOptions) -> Result<LinkReport> {
        let mut report = LinkReport::default();
        let all = self.store.list(&ElementFilter::default()).await?;
        for element in all {
            let Some(state) = sync_state_of(&element).ok().flatten() else {
                continue;
            };
            if let Some(provider) = &opts.provider {
                if &state.provider != provider {
                    report.skipped += 1;
                    continue;
                }
            }
            match self.unlink(&element.id).await {
                Ok(_) => report.unlinked.push(element.id.clone()),
                Err(err) => report.errors.push(SyncError {
                    provider: state.provider.clone(),
                    project: state.project.clone(),
                    element_id: Some(element.id.clone()),
                    external_id: Some(state.external_id.clone()),
                    message: err.to_string(),
                    code: None,
                    retryable: false,
                }),
            }
        }
        Ok(report)
    }

    // ===== Shared plumbing =====

    /// The high-water mark for a pull: the latest `last_pulled_at` across
    /// the provider's linked elements, or epoch when none exists.
    fn pull_watermark(targets: &[Element]) -> chrono::DateTime<Utc> {
        targets
            .iter()
            .filter_map(|element| sync_state_of(element).ok().flatten())
            .filter_map(|state| state.last_pulled_at)
            .max()
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
    }

    async fn task_body(&self, element: &Element) -> Option<String> {
        let doc_id = element.as_task()?.description_ref.clone()?;
        let doc = self.store.get(&doc_id).await.ok().flatten()?;
        doc.as_document().map(|d| d.content.clone())
    }

    async fn write_state(
        &self,
        id: &ElementId,
        state: &ExternalSyncState,
        kind: EventKind,
    ) -> Result<()> {
        self.store
            .update(
                id,
                link_patch(state),
                UpdateOptions {
                    actor: Some(Self::sync_actor()),
                    ..Default::default()
                },
            )
            .await?;
        self.store
            .record_event(ElementEvent::now(
                id.clone(),
                kind,
                Self::sync_actor(),
                json!({
                    "provider": state.provider,
                    "externalId": state.external_id,
                }),
            ))
            .await
    }

    /// Runs one provider call under the timeout, retry, and cancellation
    /// policy.
    async fn call<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        ctx: &CallCtx<'_>,
        make_call: F,
    ) -> std::result::Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let timeout = Duration::from_millis(self.settings.call_timeout_ms.max(1));
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                () = cancel.cancelled() => {
                    return Err(ctx.error("operation cancelled", None, true));
                }
                result = tokio::time::timeout(timeout, make_call()) => match result {
                    Err(_elapsed) => Err(ProviderError::new(
                        crate::sync::provider::ProviderErrorKind::Timeout,
                        format!("call exceeded {}ms", timeout.as_millis()),
                    )),
                    Ok(result) => result,
                },
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.retryable() && attempt <= self.settings.max_retries => {
                    let delay = Duration::from_millis(
                        self.settings
                            .retry_base_ms
                            .saturating_mul(1_u64 << (attempt - 1).min(16)),
                    );
                    debug!(
                        provider = ctx.provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(ctx.error(err.message.clone(), err.code.clone(), err.retryable()));
                }
            }
        }
    }

    fn tally(result: &mut ExternalSyncResult, outcome: Outcome) {
        match outcome {
            Outcome::Pushed => result.pushed += 1,
            Outcome::Pulled => result.pulled += 1,
            Outcome::Skipped => result.skipped += 1,
            Outcome::Conflict(record, applied) => {
                match record.winner {
                    ConflictWinner::Local if applied => result.pushed += 1,
                    ConflictWinner::Remote if applied => result.pulled += 1,
                    _ => result.skipped += 1,
                }
                result.conflicts.push(record);
            }
            Outcome::Failed(err) => result.errors.push(err),
        }
    }
}

/// Which directions a pass moves data in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Push,
    Pull,
    Bidirectional,
}

impl Mode {
    fn pushes(self) -> bool {
        matches!(self, Self::Push | Self::Bidirectional)
    }

    fn pulls(self) -> bool {
        matches!(self, Self::Pull | Self::Bidirectional)
    }
}

fn document_title(element: &Element) -> String {
    element
        .metadata
        .get("title")
        .and_then(|value| value.as_str())
        .map_or_else(|| element.id.to_string(), str::to_string)
}
