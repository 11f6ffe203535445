//! Integration tests for the incremental exchange: full and incremental
//! export, import reconciliation, and resilience to damaged files.

mod common;

use common::{create_task, fixture, status_patch, title_patch};
use stoneforge::domain::{DependencyType, NewDependency, TaskStatus};
use stoneforge::exchange::{
    DEPENDENCIES_FILE, ELEMENTS_FILE, Exchange, ExportOptions, ImportOptions,
};
use stoneforge::store::memory::MemoryStore;
use stoneforge::store::{ElementStore, UpdateOptions};
use tempfile::tempdir;

#[tokio::test]
async fn full_export_import_is_bisimilar() {
    let fx = fixture().await;
    let a = create_task(fx.store.as_ref(), &fx.actor, "alpha").await;
    let b = create_task(fx.store.as_ref(), &fx.actor, "beta").await;
    fx.store
        .update(&b.id, status_patch(TaskStatus::InProgress), UpdateOptions::default())
        .await
        .unwrap();
    fx.store
        .add_dependency(NewDependency {
            blocked: a.id.clone(),
            blocker: b.id.clone(),
            dep_type: DependencyType::Blocks,
            created_by: fx.actor.clone(),
            gate: None,
            validation: None,
        })
        .await
        .unwrap();

    let dir = tempdir().unwrap();
    let exchange = Exchange::new(fx.store.clone());
    let report = exchange
        .export(dir.path(), ExportOptions { full: true })
        .await
        .unwrap();
    assert_eq!(report.elements_exported, 3); // actor + two tasks
    assert_eq!(report.dependencies_exported, 1);

    // Import into a fresh store.
    let target = MemoryStore::in_memory();
    let importer = Exchange::new(target.clone());
    let import = importer
        .import(dir.path(), ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(import.created, 3);
    assert_eq!(import.updated, 0);
    assert!(import.errors.is_empty());

    // Every element present with identical fields.
    for source in fx.store.export_elements().await.unwrap() {
        let copied = target.get(&source.id).await.unwrap().expect("element copied");
        assert_eq!(copied.created_at, source.created_at);
        assert_eq!(copied.updated_at, source.updated_at);
        assert_eq!(copied.tags, source.tags);
        assert_eq!(copied.kind(), source.kind());
        if let (Some(src), Some(dst)) = (source.as_task(), copied.as_task()) {
            assert_eq!(dst.title, src.title);
            assert_eq!(dst.status, src.status);
            assert_eq!(dst.priority, src.priority);
        }
    }
    // Edge with identical envelope.
    let edges = target.export_edges().await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].blocked, a.id);
    assert_eq!(edges[0].blocker, b.id);
    assert_eq!(edges[0].dep_type, DependencyType::Blocks);
}

#[tokio::test]
async fn incremental_export_is_idempotent() {
    let fx = fixture().await;
    create_task(fx.store.as_ref(), &fx.actor, "only change").await;

    let dir = tempdir().unwrap();
    let exchange = Exchange::new(fx.store.clone());

    let first = exchange
        .export(dir.path(), ExportOptions::default())
        .await
        .unwrap();
    assert!(first.elements_exported > 0);

    // No intervening mutation: the second run writes nothing.
    let second = exchange
        .export(dir.path(), ExportOptions::default())
        .await
        .unwrap();
    assert_eq!(second.elements_exported, 0);
    assert_eq!(second.dependencies_exported, 0);

    let status = exchange.status().await.unwrap();
    assert_eq!(status.dirty, 0);
    assert!(!status.pending);
}

#[tokio::test]
async fn incremental_export_covers_only_dirty_elements() {
    let fx = fixture().await;
    let touched = create_task(fx.store.as_ref(), &fx.actor, "touched").await;
    let untouched = create_task(fx.store.as_ref(), &fx.actor, "untouched").await;

    let dir_a = tempdir().unwrap();
    let exchange = Exchange::new(fx.store.clone());
    exchange
        .export(dir_a.path(), ExportOptions::default())
        .await
        .unwrap();

    // Mutate one element; only it exports next time.
    fx.store
        .update(&touched.id, title_patch("touched again"), UpdateOptions::default())
        .await
        .unwrap();
    let dir_b = tempdir().unwrap();
    let report = exchange
        .export(dir_b.path(), ExportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.elements_exported, 1);

    let text = std::fs::read_to_string(dir_b.path().join(ELEMENTS_FILE)).unwrap();
    assert!(text.contains(touched.id.as_str()));
    assert!(!text.contains(untouched.id.as_str()));
}

#[tokio::test]
async fn deletions_propagate_through_incremental_export() {
    let fx = fixture().await;
    let task = create_task(fx.store.as_ref(), &fx.actor, "short-lived").await;

    let dir_a = tempdir().unwrap();
    let exchange = Exchange::new(fx.store.clone());
    exchange
        .export(dir_a.path(), ExportOptions { full: true })
        .await
        .unwrap();

    // Import the full snapshot elsewhere, then delete locally and ship
    // the increment.
    let target = MemoryStore::in_memory();
    let importer = Exchange::new(target.clone());
    importer
        .import(dir_a.path(), ImportOptions::default())
        .await
        .unwrap();
    assert!(!target.get(&task.id).await.unwrap().unwrap().deleted);

    fx.store
        .delete(&task.id, stoneforge::store::DeleteOptions::default())
        .await
        .unwrap();
    let dir_b = tempdir().unwrap();
    exchange
        .export(dir_b.path(), ExportOptions::default())
        .await
        .unwrap();
    importer
        .import(dir_b.path(), ImportOptions::default())
        .await
        .unwrap();

    assert!(target.get(&task.id).await.unwrap().unwrap().deleted);
}

#[tokio::test]
async fn import_reconciles_by_updated_at() {
    let fx = fixture().await;
    let task = create_task(fx.store.as_ref(), &fx.actor, "v1").await;

    // Snapshot now, then move local ahead.
    let dir = tempdir().unwrap();
    let exchange = Exchange::new(fx.store.clone());
    exchange
        .export(dir.path(), ExportOptions { full: true })
        .await
        .unwrap();
    fx.store
        .update(&task.id, title_patch("v2"), UpdateOptions::default())
        .await
        .unwrap();

    // Importing the older snapshot into the same store changes nothing.
    let report = exchange
        .import(dir.path(), ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.updated, 0);
    assert!(report.skipped > 0);
    let local = fx.store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(local.as_task().unwrap().title, "v2");

    // A fresh store takes the snapshot wholesale, and a newer snapshot
    // then overwrites it.
    let target = MemoryStore::in_memory();
    let importer = Exchange::new(target.clone());
    importer
        .import(dir.path(), ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(
        target
            .get(&task.id)
            .await
            .unwrap()
            .unwrap()
            .as_task()
            .unwrap()
            .title,
        "v1"
    );

    let dir2 = tempdir().unwrap();
    exchange
        .export(dir2.path(), ExportOptions { full: true })
        .await
        .unwrap();
    let second = importer
        .import(dir2.path(), ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(second.updated, 1);
    assert_eq!(
        target
            .get(&task.id)
            .await
            .unwrap()
            .unwrap()
            .as_task()
            .unwrap()
            .title,
        "v2"
    );
}

#[tokio::test]
async fn malformed_lines_are_reported_not_fatal() {
    let fx = fixture().await;
    create_task(fx.store.as_ref(), &fx.actor, "good record").await;

    let dir = tempdir().unwrap();
    let exchange = Exchange::new(fx.store.clone());
    exchange
        .export(dir.path(), ExportOptions { full: true })
        .await
        .unwrap();

    // Corrupt the middle of the elements file.
    let path = dir.path().join(ELEMENTS_FILE);
    let mut lines: Vec<String> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    lines.insert(1, "{not valid json".to_string());
    std::fs::write(&path, lines.join("\n")).unwrap();

    let target = MemoryStore::in_memory();
    let report = Exchange::new(target.clone())
        .import(dir.path(), ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains(ELEMENTS_FILE));
    // The undamaged records all made it.
    assert_eq!(report.created, 2);
}

#[tokio::test]
async fn dry_run_import_counts_without_writing() {
    let fx = fixture().await;
    create_task(fx.store.as_ref(), &fx.actor, "preview").await;

    let dir = tempdir().unwrap();
    Exchange::new(fx.store.clone())
        .export(dir.path(), ExportOptions { full: true })
        .await
        .unwrap();

    let target = MemoryStore::in_memory();
    let report = Exchange::new(target.clone())
        .import(dir.path(), ImportOptions { dry_run: true })
        .await
        .unwrap();
    assert_eq!(report.created, 2);

    let counts = target.counts().await.unwrap();
    assert_eq!(counts.elements, 0);
}

#[tokio::test]
async fn orphaned_edges_surface_as_import_errors() {
    let fx = fixture().await;
    let a = create_task(fx.store.as_ref(), &fx.actor, "kept").await;
    let b = create_task(fx.store.as_ref(), &fx.actor, "dropped").await;
    fx.store
        .add_dependency(NewDependency {
            blocked: a.id.clone(),
            blocker: b.id.clone(),
            dep_type: DependencyType::Blocks,
            created_by: fx.actor.clone(),
            gate: None,
            validation: None,
        })
        .await
        .unwrap();

    let dir = tempdir().unwrap();
    Exchange::new(fx.store.clone())
        .export(dir.path(), ExportOptions { full: true })
        .await
        .unwrap();

    // Remove one endpoint from the elements file, stranding the edge.
    let path = dir.path().join(ELEMENTS_FILE);
    let lines: Vec<String> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .filter(|line| !line.contains(b.id.as_str()))
        .map(str::to_string)
        .collect();
    std::fs::write(&path, lines.join("\n")).unwrap();
    assert!(dir.path().join(DEPENDENCIES_FILE).exists());

    let target = MemoryStore::in_memory();
    let report = Exchange::new(target.clone())
        .import(dir.path(), ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(report.dependencies_applied, 0);
    assert!(!report.errors.is_empty());
    // The surviving endpoint still imported.
    assert!(target.get(&a.id).await.unwrap().is_some());
}
