//! In-memory element store with JSONL directory persistence.
//!
//! All data lives in RAM behind a `tokio::sync::RwLock`; [`MemoryStore::save`]
//! writes the state to a directory of JSONL files (elements, dependencies,
//! events, archived document versions) plus a `dirty.json` snapshot so
//! dirty tracking survives restart. Loading is resilient: damaged lines,
//! orphaned edges, and cycle-closing edges are skipped with warnings
//! instead of failing the whole load.
//!
//! # Concurrency
//!
//! The `RwLock` serializes writers per store, which subsumes the
//! single-writer-per-element contract; readers proceed concurrently. The
//! blocked cache sits outside the lock with its own version-counter
//! protocol (see [`crate::graph::BlockedCache`]).

mod inner;
mod readiness;
mod trait_impl;

use crate::domain::{ArchivedVersion, DependencyEdge, Element, ElementEvent};
use crate::error::Result;
use crate::graph::BlockedCache;
use crate::id::ElementId;
use inner::Inner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const ELEMENTS_FILE: &str = "elements.jsonl";
const DEPENDENCIES_FILE: &str = "dependencies.jsonl";
const EVENTS_FILE: &str = "events.jsonl";
const VERSIONS_FILE: &str = "versions.jsonl";
const DIRTY_FILE: &str = "dirty.json";

/// Non-fatal problems encountered while loading a store directory.
#[derive(Debug, Clone)]
pub enum LoadWarning {
    /// A line could not be parsed; it was skipped.
    MalformedLine {
        /// File the line came from.
        file: &'static str,
        /// 1-based line number.
        line: usize,
        /// Parse failure description.
        error: String,
    },

    /// An element failed validation and was skipped.
    InvalidElement {
        /// The rejected element's id.
        id: ElementId,
        /// Validation failure description.
        error: String,
    },

    /// An edge referenced an element absent from the file; the edge was
    /// skipped.
    OrphanedEdge {
        /// The waiting endpoint.
        blocked: ElementId,
        /// The missing (or present, if the other is missing) endpoint.
        blocker: ElementId,
    },

    /// An edge would have closed a cycle in the blocking subgraph; it was
    /// skipped to preserve the DAG invariant.
    CycleEdge {
        /// The waiting endpoint.
        blocked: ElementId,
        /// The blocking endpoint.
        blocker: ElementId,
    },
}

/// Thread-safe in-memory element store.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    cache: BlockedCache,
    dir: Option<PathBuf>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Creates an empty, ephemeral store. `save` is a no-op.
    #[must_use]
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner::new()),
            cache: BlockedCache::new(),
            dir: None,
        })
    }

    /// Opens a store directory, creating it if absent.
    ///
    /// Missing files are treated as empty. Damaged data is skipped and
    /// reported in the returned warnings.
    ///
    /// # Errors
    ///
    /// Returns an error only when the directory itself cannot be created
    /// or a file cannot be read at the IO level.
    pub async fn open(dir: impl AsRef<Path>) -> Result<(Arc<Self>, Vec<LoadWarning>)> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut inner = Inner::new();
        let mut warnings = Vec::new();

        // Elements first: edges and events need the nodes in place.
        let elements_path = dir.join(ELEMENTS_FILE);
        if elements_path.exists() {
            let (elements, jsonl_warnings) =
                stoneforge_jsonl::read_resilient::<Element, _>(&elements_path).await?;
            collect_line_warnings(ELEMENTS_FILE, jsonl_warnings, &mut warnings);

            for element in elements {
                if let Err(err) = element.validate() {
                    warnings.push(LoadWarning::InvalidElement {
                        id: element.id.clone(),
                        error: err.to_string(),
                    });
                    continue;
                }
                inner.ids.register(&element.id);
                inner.graph.ensure_node(&element.id);
                if let Some(channel) = element.as_channel() {
                    inner.channel_names.insert(channel.name.clone());
                }
                inner.elements.insert(element.id.clone(), element);
            }
        }

        let dependencies_path = dir.join(DEPENDENCIES_FILE);
        if dependencies_path.exists() {
            let (edges, jsonl_warnings) =
                stoneforge_jsonl::read_resilient::<DependencyEdge, _>(&dependencies_path).await?;
            collect_line_warnings(DEPENDENCIES_FILE, jsonl_warnings, &mut warnings);

            for edge in edges {
                if !inner.elements.contains_key(&edge.blocked)
                    || !inner.elements.contains_key(&edge.blocker)
                {
                    warnings.push(LoadWarning::OrphanedEdge {
                        blocked: edge.blocked,
                        blocker: edge.blocker,
                    });
                    continue;
                }
                let (blocked, blocker) = (edge.blocked.clone(), edge.blocker.clone());
                if inner.graph.restore_edge(edge).is_err() {
                    warnings.push(LoadWarning::CycleEdge { blocked, blocker });
                }
            }
        }

        let versions_path = dir.join(VERSIONS_FILE);
        if versions_path.exists() {
            let (versions, jsonl_warnings) =
                stoneforge_jsonl::read_resilient::<ArchivedVersion, _>(&versions_path).await?;
            collect_line_warnings(VERSIONS_FILE, jsonl_warnings, &mut warnings);
            for version in versions {
                inner.ids.register(&version.id);
                inner.versions.insert(version.id.clone(), version);
            }
        }

        let events_path = dir.join(EVENTS_FILE);
        if events_path.exists() {
            let (events, jsonl_warnings) =
                stoneforge_jsonl::read_resilient::<ElementEvent, _>(&events_path).await?;
            collect_line_warnings(EVENTS_FILE, jsonl_warnings, &mut warnings);
            for event in events {
                inner.events.entry(event.element_id.clone()).or_default().push(event);
            }
        }

        let dirty_path = dir.join(DIRTY_FILE);
        if dirty_path.exists() {
            let raw = tokio::fs::read_to_string(&dirty_path).await?;
            match serde_json::from_str::<Vec<ElementId>>(&raw) {
                Ok(ids) => inner.dirty = ids.into_iter().collect(),
                Err(err) => {
                    warn!(%err, "dirty snapshot unreadable; treating all elements as dirty");
                    inner.dirty = inner.elements.keys().cloned().collect();
                }
            }
        }

        info!(
            elements = inner.elements.len(),
            edges = inner.graph.edge_count(),
            warnings = warnings.len(),
            "loaded store directory"
        );

        Ok((
            Arc::new(Self {
                inner: RwLock::new(inner),
                cache: BlockedCache::new(),
                dir: Some(dir),
            }),
            warnings,
        ))
    }

    /// Writes the full state to the store directory with atomic renames.
    ///
    /// # Errors
    ///
    /// Returns IO/serialization errors from the underlying writes.
    pub async fn persist(&self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };

        let inner = self.inner.read().await;

        let mut elements: Vec<&Element> = inner.elements.values().collect();
        elements.sort_by(|a, b| a.id.cmp(&b.id));
        stoneforge_jsonl::write_atomic(dir.join(ELEMENTS_FILE), elements).await?;

        stoneforge_jsonl::write_atomic(dir.join(DEPENDENCIES_FILE), inner.graph.all_edges().iter())
            .await?;

        let mut versions: Vec<&ArchivedVersion> = inner.versions.values().collect();
        versions.sort_by(|a, b| a.id.cmp(&b.id));
        stoneforge_jsonl::write_atomic(dir.join(VERSIONS_FILE), versions).await?;

        let mut event_ids: Vec<&ElementId> = inner.events.keys().collect();
        event_ids.sort();
        let events: Vec<&ElementEvent> = event_ids
            .into_iter()
            .flat_map(|id| inner.events[id].iter())
            .collect();
        stoneforge_jsonl::write_atomic(dir.join(EVENTS_FILE), events.into_iter()).await?;

        let mut dirty: Vec<&ElementId> = inner.dirty.iter().collect();
        dirty.sort();
        let json = serde_json::to_string(&dirty)?;
        let tmp = dir.join(format!("{DIRTY_FILE}.tmp"));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, dir.join(DIRTY_FILE)).await?;

        Ok(())
    }
}

fn collect_line_warnings(
    file: &'static str,
    jsonl_warnings: Vec<stoneforge_jsonl::Warning>,
    warnings: &mut Vec<LoadWarning>,
) {
    for warning in jsonl_warnings {
        match warning {
            stoneforge_jsonl::Warning::MalformedLine { line, error }
            | stoneforge_jsonl::Warning::RejectedLine { line, reason: error } => {
                warnings.push(LoadWarning::MalformedLine { file, line, error });
            }
        }
    }
}
