//! Integration tests for the sync engine against the in-memory
//! placeholder provider: push/pull, conflict strategies, retries,
//! cancellation, and link management.

mod common;

use chrono::{Duration, Utc};
use common::{create_task, fixture};
use std::sync::Arc;
use stoneforge::config::SyncSettings;
use stoneforge::domain::{EventKind, SYNC_CONFLICT_TAG};
use stoneforge::store::ElementStore;
use stoneforge::sync::{
    ConflictStrategy, ConflictWinner, ExternalTaskUpdate, MemoryProvider, ProviderErrorKind,
    ProviderRegistry, SyncEngine, SyncOptions, sync_state_of,
};
use tokio_util::sync::CancellationToken;

struct Harness {
    fx: common::Fixture,
    provider: Arc<MemoryProvider>,
    engine: SyncEngine,
}

async fn harness() -> Harness {
    harness_with(SyncSettings {
        retry_base_ms: 1,
        call_timeout_ms: 2_000,
        ..Default::default()
    })
    .await
}

async fn harness_with(settings: SyncSettings) -> Harness {
    let fx = fixture().await;
    let provider = MemoryProvider::new("github");
    let mut registry = ProviderRegistry::new();
    registry.register(provider.handle());
    let engine = SyncEngine::new(
        fx.store.clone() as Arc<dyn ElementStore>,
        registry,
        settings,
    );
    Harness {
        fx,
        provider,
        engine,
    }
}

fn targeting(ids: &[&stoneforge::id::ElementId]) -> SyncOptions {
    SyncOptions {
        element_ids: Some(ids.iter().map(|id| (*id).clone()).collect()),
        ..Default::default()
    }
}

#[tokio::test]
async fn push_creates_remote_and_writes_sync_state() {
    let h = harness().await;
    let task = create_task(h.fx.store.as_ref(), &h.fx.actor, "Ship the widget").await;

    let results = h
        .engine
        .push(&targeting(&[&task.id]), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].pushed, 1);
    assert!(results[0].errors.is_empty());

    let linked = h.fx.store.get(&task.id).await.unwrap().unwrap();
    let state = sync_state_of(&linked).unwrap().unwrap();
    assert_eq!(state.provider, "github");
    assert!(state.last_pushed_hash.is_some());
    assert!(state.last_pushed_at.is_some());

    let remote = h
        .provider
        .remote_task(&state.project, &state.external_id)
        .unwrap();
    assert_eq!(remote.title, "Ship the widget");

    // Event log carries the push.
    let events = h.fx.store.events(&task.id, None).await.unwrap();
    assert!(events.iter().any(|e| e.kind == EventKind::SyncPushed));
}

#[tokio::test]
async fn push_skips_unchanged_elements() {
    let h = harness().await;
    let task = create_task(h.fx.store.as_ref(), &h.fx.actor, "Stable").await;
    let opts = targeting(&[&task.id]);
    let cancel = CancellationToken::new();

    h.engine.push(&opts, &cancel).await.unwrap();
    let second = h.engine.push(&opts, &cancel).await.unwrap();

    assert_eq!(second[0].pushed, 0);
    assert_eq!(second[0].skipped, 1);
    // Only the create call mutated the remote.
    assert_eq!(h.provider.task_count("default"), 1);
}

#[tokio::test]
async fn push_after_local_edit_updates_remote() {
    let h = harness().await;
    let task = create_task(h.fx.store.as_ref(), &h.fx.actor, "Draft title").await;
    let opts = targeting(&[&task.id]);
    let cancel = CancellationToken::new();

    h.engine.push(&opts, &cancel).await.unwrap();
    h.fx
        .store
        .update(
            &task.id,
            common::title_patch("Final title"),
            stoneforge::store::UpdateOptions::default(),
        )
        .await
        .unwrap();

    let results = h.engine.push(&opts, &cancel).await.unwrap();
    assert_eq!(results[0].pushed, 1);

    let linked = h.fx.store.get(&task.id).await.unwrap().unwrap();
    let state = sync_state_of(&linked).unwrap().unwrap();
    let remote = h
        .provider
        .remote_task(&state.project, &state.external_id)
        .unwrap();
    assert_eq!(remote.title, "Final title");
}

#[tokio::test]
async fn pull_applies_remote_edits() {
    let h = harness().await;
    let task = create_task(h.fx.store.as_ref(), &h.fx.actor, "Original").await;
    let cancel = CancellationToken::new();

    h.engine.push(&targeting(&[&task.id]), &cancel).await.unwrap();
    let state = sync_state_of(&h.fx.store.get(&task.id).await.unwrap().unwrap())
        .unwrap()
        .unwrap();

    h.provider.edit_task_remotely(
        &state.project,
        &state.external_id,
        &ExternalTaskUpdate {
            title: Some("Renamed upstream".to_string()),
            ..Default::default()
        },
        Utc::now() + Duration::seconds(1),
    );

    let results = h
        .engine
        .pull(&SyncOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(results[0].pulled, 1);

    let local = h.fx.store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(local.as_task().unwrap().title, "Renamed upstream");
    let events = h.fx.store.events(&task.id, None).await.unwrap();
    assert!(events.iter().any(|e| e.kind == EventKind::SyncPulled));
}

#[tokio::test]
async fn pull_creates_local_for_unseen_remote() {
    let h = harness().await;
    let cancel = CancellationToken::new();

    // Seed a remote-only issue.
    use stoneforge::sync::TaskAdapter;
    h.provider
        .create_issue(
            "default",
            &stoneforge::sync::ExternalTaskInput {
                title: "Born upstream".to_string(),
                labels: vec!["imported".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let results = h
        .engine
        .pull(&SyncOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(results[0].pulled, 1);

    let tasks = h
        .fx
        .store
        .list(&stoneforge::domain::ElementFilter::of_kind(
            stoneforge::domain::ElementKind::Task,
        ))
        .await
        .unwrap();
    let imported = tasks
        .iter()
        .find(|t| t.as_task().unwrap().title == "Born upstream")
        .expect("local task created from remote");
    assert!(imported.has_tag("imported"));
    let state = sync_state_of(imported).unwrap().unwrap();
    assert_eq!(state.provider, "github");
}

#[tokio::test]
async fn bidirectional_last_write_wins_remote_newer() {
    let h = harness().await;
    let task = create_task(h.fx.store.as_ref(), &h.fx.actor, "T0 title").await;
    let cancel = CancellationToken::new();

    h.engine.push(&targeting(&[&task.id]), &cancel).await.unwrap();
    let state = sync_state_of(&h.fx.store.get(&task.id).await.unwrap().unwrap())
        .unwrap()
        .unwrap();

    // Local edit at T1.
    h.fx
        .store
        .update(
            &task.id,
            common::title_patch("Local T1"),
            stoneforge::store::UpdateOptions::default(),
        )
        .await
        .unwrap();
    // Remote edit at T2 > T1.
    h.provider.edit_task_remotely(
        &state.project,
        &state.external_id,
        &ExternalTaskUpdate {
            title: Some("Remote T2".to_string()),
            ..Default::default()
        },
        Utc::now() + Duration::seconds(5),
    );

    let results = h
        .engine
        .sync(
            &SyncOptions {
                conflict_strategy: Some(ConflictStrategy::LastWriteWins),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();

    let result = &results[0];
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].winner, ConflictWinner::Remote);

    // The later writer's title landed locally.
    let local = h.fx.store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(local.as_task().unwrap().title, "Remote T2");

    // The log records the conflict with the winner.
    let events = h.fx.store.events(&task.id, None).await.unwrap();
    let conflict = events
        .iter()
        .find(|e| e.kind == EventKind::SyncConflict)
        .expect("conflict event recorded");
    assert_eq!(conflict.payload["winner"], "remote");
}

#[tokio::test]
async fn manual_strategy_tags_and_skips() {
    let h = harness().await;
    let task = create_task(h.fx.store.as_ref(), &h.fx.actor, "Contested").await;
    let cancel = CancellationToken::new();

    h.engine.push(&targeting(&[&task.id]), &cancel).await.unwrap();
    let state = sync_state_of(&h.fx.store.get(&task.id).await.unwrap().unwrap())
        .unwrap()
        .unwrap();

    h.fx
        .store
        .update(
            &task.id,
            common::title_patch("Local side"),
            stoneforge::store::UpdateOptions::default(),
        )
        .await
        .unwrap();
    h.provider.edit_task_remotely(
        &state.project,
        &state.external_id,
        &ExternalTaskUpdate {
            title: Some("Remote side".to_string()),
            ..Default::default()
        },
        Utc::now() + Duration::seconds(5),
    );

    let manual = SyncOptions {
        conflict_strategy: Some(ConflictStrategy::Manual),
        ..Default::default()
    };
    let results = h.engine.sync(&manual, &cancel).await.unwrap();
    assert_eq!(results[0].conflicts.len(), 1);
    assert_eq!(results[0].conflicts[0].winner, ConflictWinner::Deferred);

    // Both sides preserved.
    let local = h.fx.store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(local.as_task().unwrap().title, "Local side");
    assert!(local.has_tag(SYNC_CONFLICT_TAG));
    let remote = h
        .provider
        .remote_task(&state.project, &state.external_id)
        .unwrap();
    assert_eq!(remote.title, "Remote side");

    // Subsequent passes skip while the tag remains.
    let again = h.engine.sync(&manual, &cancel).await.unwrap();
    assert_eq!(again[0].conflicts.len(), 0);
    assert_eq!(again[0].pushed, 0);
    assert!(again[0].skipped >= 1);
}

#[tokio::test]
async fn transient_failures_retry_and_succeed() {
    let h = harness().await;
    let task = create_task(h.fx.store.as_ref(), &h.fx.actor, "Flaky push").await;

    h.provider.inject_failures(ProviderErrorKind::RateLimited, 2);
    let results = h
        .engine
        .push(&targeting(&[&task.id]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(results[0].pushed, 1);
    assert!(results[0].errors.is_empty());
    // Two failures plus the success.
    assert_eq!(h.provider.call_count(), 3);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let h = harness().await;
    let task = create_task(h.fx.store.as_ref(), &h.fx.actor, "Rejected").await;

    h.provider.inject_failures(ProviderErrorKind::InvalidRequest, 1);
    let results = h
        .engine
        .push(&targeting(&[&task.id]), &CancellationToken::new())
        .await
        .unwrap();

    let result = &results[0];
    assert!(result.success, "partial failure keeps success=true");
    assert_eq!(result.pushed, 0);
    assert_eq!(result.errors.len(), 1);
    assert!(!result.errors[0].retryable);
    assert_eq!(h.provider.call_count(), 1);

    // No partial sync state was written.
    let element = h.fx.store.get(&task.id).await.unwrap().unwrap();
    assert!(sync_state_of(&element).unwrap().is_none());
}

#[tokio::test]
async fn cancellation_stops_work_without_partial_state() {
    let h = harness().await;
    let task = create_task(h.fx.store.as_ref(), &h.fx.actor, "Cancelled").await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let results = h.engine.push(&targeting(&[&task.id]), &cancel).await.unwrap();

    let result = &results[0];
    assert_eq!(result.pushed, 0);
    assert!(result.errors.iter().all(|e| e.retryable));

    let element = h.fx.store.get(&task.id).await.unwrap().unwrap();
    assert!(sync_state_of(&element).unwrap().is_none());
}

#[tokio::test]
async fn dry_run_reports_without_writing() {
    let h = harness().await;
    let task = create_task(h.fx.store.as_ref(), &h.fx.actor, "Preview").await;

    let results = h
        .engine
        .push(
            &SyncOptions {
                dry_run: true,
                ..targeting(&[&task.id])
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(results[0].pushed, 1);
    assert_eq!(h.provider.task_count("default"), 0);
    let element = h.fx.store.get(&task.id).await.unwrap().unwrap();
    assert!(sync_state_of(&element).unwrap().is_none());
}

#[tokio::test]
async fn link_all_then_unlink_all_scoped_by_provider() {
    let fx = fixture().await;
    let github = MemoryProvider::new("github");
    let gitlab = MemoryProvider::new("gitlab");
    let mut registry = ProviderRegistry::new();
    registry.register(github.handle());
    registry.register(gitlab.handle());
    let engine = SyncEngine::new(
        fx.store.clone() as Arc<dyn ElementStore>,
        registry,
        SyncSettings::default(),
    );

    let a = create_task(fx.store.as_ref(), &fx.actor, "a").await;
    let b = create_task(fx.store.as_ref(), &fx.actor, "b").await;

    let report = engine
        .link_all(&SyncOptions {
            provider: Some("github".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(report.linked.len(), 2);
    assert!(report.errors.is_empty());

    for id in [&a.id, &b.id] {
        let state = sync_state_of(&fx.store.get(id).await.unwrap().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(state.provider, "github");
    }

    // Already-linked elements are skipped without force.
    let again = engine
        .link_all(&SyncOptions {
            provider: Some("github".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(again.linked.is_empty());
    assert_eq!(again.skipped, 2);

    // A later task bound to another provider must survive a scoped
    // unlink_all.
    let c = create_task(fx.store.as_ref(), &fx.actor, "c").await;
    engine.link(&c.id, "gitlab", None).await.unwrap();

    engine
        .unlink_all(&SyncOptions {
            provider: Some("github".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    for id in [&a.id, &b.id] {
        let element = fx.store.get(id).await.unwrap().unwrap();
        assert!(sync_state_of(&element).unwrap().is_none());
    }
    let c_state = sync_state_of(&fx.store.get(&c.id).await.unwrap().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(c_state.provider, "gitlab");
}

#[tokio::test]
async fn link_attaches_to_existing_remote() {
    let h = harness().await;
    let task = create_task(h.fx.store.as_ref(), &h.fx.actor, "Adopted").await;

    use stoneforge::sync::TaskAdapter;
    let remote = h
        .provider
        .create_issue(
            "default",
            &stoneforge::sync::ExternalTaskInput {
                title: "Pre-existing".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let linked = h
        .engine
        .link(&task.id, "github", Some(&remote.external_id))
        .await
        .unwrap();
    let state = sync_state_of(&linked).unwrap().unwrap();
    assert_eq!(state.external_id, remote.external_id);
    assert!(state.last_pulled_hash.is_some());
    assert!(state.last_pushed_at.is_none());

    // Unlinking twice is a no-op the second time.
    h.engine.unlink(&task.id).await.unwrap();
    let again = h.engine.unlink(&task.id).await.unwrap();
    assert!(sync_state_of(&again).unwrap().is_none());
}

#[tokio::test]
async fn unknown_provider_is_orchestrator_failure() {
    let h = harness().await;
    let err = h
        .engine
        .push(
            &SyncOptions {
                provider: Some("bitbucket".to_string()),
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "PROVIDER");
}
