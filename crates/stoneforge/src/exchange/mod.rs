//! Incremental exchange: the JSONL export/import protocol.
//!
//! `export` writes `elements.jsonl` and `dependencies.jsonl` (one record
//! per line, UTF-8, LF). A full export emits every non-tombstoned
//! element and every edge; an incremental export emits only elements
//! dirty since the last export (tombstones included, so deletions
//! propagate) plus the edges incident to them, then clears the dirty set
//! once the write has landed. `import` reconciles identity by id and
//! `updated_at`; malformed lines are reported, never fatal.

use crate::domain::{DependencyEdge, Element};
use crate::error::Result;
use crate::id::ElementId;
use crate::store::ElementStore;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Elements file name inside an exchange directory.
pub const ELEMENTS_FILE: &str = "elements.jsonl";
/// Dependencies file name inside an exchange directory.
pub const DEPENDENCIES_FILE: &str = "dependencies.jsonl";

/// Options for [`Exchange::export`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    /// Export everything instead of only dirty elements.
    pub full: bool,
}

/// Options for [`Exchange::import`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Report what would change without writing.
    pub dry_run: bool,
}

/// Outcome of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportReport {
    /// Element records written.
    pub elements_exported: usize,
    /// Dependency records written.
    pub dependencies_exported: usize,
    /// Whether this was a full export.
    pub full: bool,
}

/// Outcome of an import.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Elements created locally.
    pub created: usize,
    /// Elements updated (incoming `updated_at` was newer).
    pub updated: usize,
    /// Records skipped (equal or older than local).
    pub skipped: usize,
    /// Dependency edges applied.
    pub dependencies_applied: usize,
    /// Per-record failures (malformed lines, orphaned edges); the stream
    /// continues past each.
    pub errors: Vec<String>,
}

/// Dirty-state summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeStatus {
    /// Elements dirty since the last successful export.
    pub dirty: usize,
    /// Live elements in the store.
    pub total: usize,
    /// Whether pending changes exist.
    pub pending: bool,
}

/// The incremental exchange over one store.
pub struct Exchange {
    store: Arc<dyn ElementStore>,
}

impl Exchange {
    /// Creates an exchange over a store.
    #[must_use]
    pub fn new(store: Arc<dyn ElementStore>) -> Self {
        Self { store }
    }

    /// Exports to `dir`, creating it if needed.
    ///
    /// The dirty set is cleared only after both files are fully written,
    /// so a failed export leaves dirty state (and the previous files)
    /// intact.
    ///
    /// # Errors
    ///
    /// IO and serialization failures.
    pub async fn export(&self, dir: impl AsRef<Path>, opts: ExportOptions) -> Result<ExportReport> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        let (elements, edges, to_clean): (Vec<Element>, Vec<DependencyEdge>, Vec<ElementId>) =
            if opts.full {
                let elements = self.store.export_elements().await?;
                let edges = self.store.export_edges().await?;
                let clean = self.store.dirty_ids().await?;
                (elements, edges, clean)
            } else {
                let dirty: Vec<ElementId> = self.store.dirty_ids().await?;
                let dirty_set: BTreeSet<&ElementId> = dirty.iter().collect();
                let mut elements = Vec::new();
                for id in &dirty {
                    // Tombstones export too; deletions must reach the
                    // importer.
                    if let Some(element) = self.store.get(id).await? {
                        elements.push(element);
                    }
                }
                elements.sort_by(|a, b| a.id.cmp(&b.id));
                let edges: Vec<DependencyEdge> = self
                    .store
                    .export_edges()
                    .await?
                    .into_iter()
                    .filter(|edge| {
                        dirty_set.contains(&edge.blocked) || dirty_set.contains(&edge.blocker)
                    })
                    .collect();
                (elements, edges, dirty)
            };

        stoneforge_jsonl::write_atomic(dir.join(ELEMENTS_FILE), elements.iter()).await?;
        stoneforge_jsonl::write_atomic(dir.join(DEPENDENCIES_FILE), edges.iter()).await?;

        // Both files landed; now the dirty set can clear.
        self.store.mark_clean(&to_clean).await?;

        let report = ExportReport {
            elements_exported: elements.len(),
            dependencies_exported: edges.len(),
            full: opts.full,
        };
        info!(
            elements = report.elements_exported,
            dependencies = report.dependencies_exported,
            full = report.full,
            "export finished"
        );
        Ok(report)
    }

    /// Imports from `dir`, reconciling by id.
    ///
    /// For each element record: absent locally creates it; a newer
    /// incoming `updated_at` replaces the local element; anything else is
    /// skipped. Edges apply when both endpoints resolve. Malformed lines
    /// are collected as errors without aborting the stream.
    ///
    /// # Errors
    ///
    /// IO failures reading the files. Per-record problems land in the
    /// report instead.
    pub async fn import(&self, dir: impl AsRef<Path>, opts: ImportOptions) -> Result<ImportReport> {
        let dir = dir.as_ref();
        let mut report = ImportReport::default();

        let (elements, element_warnings) =
            stoneforge_jsonl::read_resilient::<Element, _>(dir.join(ELEMENTS_FILE)).await?;
        for warning in element_warnings {
            warn!(%warning, "skipping element record");
            report.errors.push(format!("{ELEMENTS_FILE}: {warning}"));
        }

        for incoming in elements {
            match self.store.get(&incoming.id).await? {
                None => {
                    if !opts.dry_run {
                        if let Err(err) = self.store.restore_element(incoming).await {
                            report.errors.push(err.to_string());
                            continue;
                        }
                    }
                    report.created += 1;
                }
                Some(local) if incoming.updated_at > local.updated_at => {
                    if !opts.dry_run {
                        if let Err(err) = self.store.restore_element(incoming).await {
                            report.errors.push(err.to_string());
                            continue;
                        }
                    }
                    report.updated += 1;
                }
                Some(_) => report.skipped += 1,
            }
        }

        let dependencies_path = dir.join(DEPENDENCIES_FILE);
        if dependencies_path.exists() {
            let (edges, edge_warnings) =
                stoneforge_jsonl::read_resilient::<DependencyEdge, _>(&dependencies_path).await?;
            for warning in edge_warnings {
                warn!(%warning, "skipping dependency record");
                report.errors.push(format!("{DEPENDENCIES_FILE}: {warning}"));
            }
            for edge in edges {
                if opts.dry_run {
                    report.dependencies_applied += 1;
                    continue;
                }
                match self.store.restore_edge(edge).await {
                    Ok(()) => report.dependencies_applied += 1,
                    Err(err) => report.errors.push(err.to_string()),
                }
            }
        }

        info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            errors = report.errors.len(),
            dry_run = opts.dry_run,
            "import finished"
        );
        Ok(report)
    }

    /// Reports dirty count, total count, and whether pending changes
    /// exist.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn status(&self) -> Result<ExchangeStatus> {
        let counts = self.store.counts().await?;
        Ok(ExchangeStatus {
            dirty: counts.dirty,
            total: counts.elements,
            pending: counts.dirty > 0,
        })
    }
}
