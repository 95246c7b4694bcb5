//! Incremental sync: apply a change batch to a workspace mirror, re-extract the
//! touched files, upsert their graph nodes and rebuild call edges.

mod locks;
mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use kgraph_llm::LlmProvider;

use crate::error::{IndexError, Result};
use crate::extractor::{FileRecord, FunctionRecord, extract};
use crate::mirror::{Mirror, normalize_path, validate_workspace_id};
use crate::patch::apply_patch;
use crate::store::{Embedding, GraphStore};

pub use locks::WorkspaceLocks;
pub use types::{Change, ChangeMode, ChangeStatus, SyncCounts, SyncReport};

/// Result of applying one change to the mirror.
enum Applied {
    Written(ChangeStatus),
    Deleted,
    Unchanged,
}

/// Applies change batches for any number of workspaces.
pub struct SyncEngine<P> {
    store: GraphStore,
    mirror: Mirror,
    embedder: Arc<P>,
    locks: WorkspaceLocks,
    batch_size: usize,
}

impl<P: LlmProvider> SyncEngine<P> {
    #[must_use]
    pub fn new(store: GraphStore, mirror: Mirror, embedder: Arc<P>) -> Self {
        Self {
            store,
            mirror,
            embedder,
            locks: WorkspaceLocks::new(),
            batch_size: 32,
        }
    }

    /// Maximum number of texts per embedding request.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    #[must_use]
    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    /// Apply `changes` to `workspace`.
    ///
    /// Items are applied to the mirror in order; failures of individual items
    /// are recorded in the report and do not stop the batch. With `replace`,
    /// the workspace's graph and mirror are cleared first.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidWorkspace`] for an unusable workspace id and
    /// [`IndexError::Unavailable`] as soon as the graph store cannot be reached.
    pub async fn apply(
        &self,
        workspace: &str,
        changes: &[Change],
        replace: bool,
    ) -> Result<SyncReport> {
        validate_workspace_id(workspace)?;
        let started = Instant::now();
        let _guard = self.locks.acquire(workspace).await;
        let scope = Some(workspace);

        if replace {
            self.store.clear_workspace(scope).await?;
            self.mirror.clear(workspace).await?;
        }

        let mut report = SyncReport::default();
        let mut touched: Vec<String> = Vec::new();

        for change in changes {
            let Some(path) = normalize_path(&change.path) else {
                tracing::debug!(workspace, path = %change.path, "skipping unsafe path");
                report.skipped.push(change.path.clone());
                continue;
            };

            match self.apply_change(workspace, &path, change).await {
                Ok(Applied::Written(status)) => {
                    match status {
                        ChangeStatus::Added => report.counts.added += 1,
                        _ => report.counts.modified += 1,
                    }
                    if !touched.contains(&path) {
                        touched.push(path);
                    }
                }
                Ok(Applied::Deleted) => {
                    report.counts.deleted += 1;
                    touched.retain(|p| p != &path);
                }
                Ok(Applied::Unchanged) => {}
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    tracing::warn!(workspace, %path, "change failed: {e}");
                    report.errors.push((path, e.to_string()));
                }
            }
        }

        let records = self.extract_all(workspace, &touched).await;
        for (path, record) in touched.iter().zip(records) {
            let outcome = match record {
                Ok(record) => self.upsert_record(scope, &record).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => report.counts.upserts += 1,
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    tracing::warn!(workspace, %path, "graph upsert failed: {e}");
                    report.errors.push((path.clone(), e.to_string()));
                }
            }
        }

        if !touched.is_empty() || report.counts.deleted > 0 {
            match self.store.link_calls(scope).await {
                Ok(linked) => report.linked_calls = linked,
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    tracing::warn!(workspace, "call linking failed: {e}");
                    report.errors.push((String::new(), e.to_string()));
                }
            }
        }

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            workspace,
            added = report.counts.added,
            modified = report.counts.modified,
            deleted = report.counts.deleted,
            upserts = report.counts.upserts,
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            linked_calls = report.linked_calls,
            duration_ms = report.duration_ms,
            "sync finished"
        );
        Ok(report)
    }

    /// Clear every workspace's graph nodes and mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or the mirror root cannot be cleared.
    pub async fn reset_all(&self) -> Result<()> {
        self.store.clear_all().await?;
        self.mirror.clear_all().await?;
        Ok(())
    }

    async fn apply_change(&self, workspace: &str, path: &str, change: &Change) -> Result<Applied> {
        if change.status == ChangeStatus::Deleted {
            self.mirror.remove(workspace, path).await?;
            self.store.clear_file(Some(workspace), path).await?;
            return Ok(Applied::Deleted);
        }

        let content = match change.mode {
            ChangeMode::Full => Some(change.content.clone().unwrap_or_default()),
            ChangeMode::Patch => self.patched_content(workspace, path, change).await?,
        };

        match content {
            Some(content) => {
                self.mirror.write(workspace, path, &content).await?;
                Ok(Applied::Written(change.status))
            }
            None => Ok(Applied::Unchanged),
        }
    }

    /// New content for a patch-mode change, or `None` to leave the file as is.
    async fn patched_content(
        &self,
        workspace: &str,
        path: &str,
        change: &Change,
    ) -> Result<Option<String>> {
        if let Some(patch) = change.patch.as_deref() {
            let base = self.mirror.read(workspace, path).await?.unwrap_or_default();
            match apply_patch(&base, patch) {
                Ok(patched) => return Ok(Some(patched)),
                Err(e) => tracing::warn!(
                    workspace,
                    path,
                    fallback = change.content.is_some(),
                    "patch failed: {e}"
                ),
            }
        }
        Ok(change.content.clone())
    }

    /// Extract every touched file concurrently on the blocking pool, in input order.
    async fn extract_all(&self, workspace: &str, paths: &[String]) -> Vec<Result<FileRecord>> {
        let jobs = paths.iter().map(|path| async move {
            let content = self.mirror.read(workspace, path).await?.unwrap_or_default();
            let path = path.clone();
            let record = tokio::task::spawn_blocking(move || extract(&path, &content)).await?;
            Ok::<_, IndexError>(record)
        });
        futures::future::join_all(jobs).await
    }

    async fn upsert_record(&self, scope: Option<&str>, record: &FileRecord) -> Result<()> {
        let mut functions: Vec<FunctionRecord> = record.all_functions().cloned().collect();
        functions.extend(record.class_shims());

        let keep_classes: Vec<&str> = record.classes.iter().map(|c| c.qualname.as_str()).collect();
        let keep_functions: Vec<&str> = functions.iter().map(|f| f.qualname.as_str()).collect();

        self.store.upsert_file(scope, record).await?;
        self.store
            .prune_file(scope, &record.path, &keep_classes, &keep_functions)
            .await?;

        let stored = self.store.embedding_hashes(scope, &record.path).await?;
        let class_embeddings = self
            .embeddings(
                record
                    .classes
                    .iter()
                    .map(|c| (c.qualname.as_str(), c.embedding_text())),
                &stored,
            )
            .await;
        let function_embeddings = self
            .embeddings(
                functions
                    .iter()
                    .map(|f| (f.qualname.as_str(), f.embedding_text())),
                &stored,
            )
            .await;

        for (class, embedding) in record.classes.iter().zip(&class_embeddings) {
            self.store
                .upsert_class(scope, &record.path, class, embedding)
                .await?;
        }
        for (function, embedding) in functions.iter().zip(&function_embeddings) {
            self.store
                .upsert_function(scope, &record.path, function, embedding)
                .await?;
        }
        Ok(())
    }

    /// Embeddings for `(qualname, text)` items, in order.
    ///
    /// Items whose text hash matches the stored one reuse their vector. Any
    /// embedding failure degrades the affected batch to zero vectors.
    async fn embeddings<'a>(
        &self,
        items: impl Iterator<Item = (&'a str, String)>,
        stored: &HashMap<String, String>,
    ) -> Vec<Embedding> {
        let dim = self.store.dimensions();
        let mut out = Vec::new();
        let mut pending: Vec<(usize, String, String)> = Vec::new();

        for (qualname, text) in items {
            let hash = blake3::hash(text.as_bytes()).to_hex().to_string();
            if stored.get(qualname) == Some(&hash) {
                out.push(Embedding::Reuse);
            } else {
                pending.push((out.len(), text, hash));
                out.push(Embedding::Fallback(vec![0.0; dim]));
            }
        }

        if pending.is_empty() {
            return out;
        }
        if !self.embedder.supports_embeddings() {
            tracing::warn!(
                provider = self.embedder.name(),
                count = pending.len(),
                "embedding backend unsupported, storing zero vectors"
            );
            return out;
        }

        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, text, _)| text.clone()).collect();
            match self.embedder.embed(&texts).await {
                Ok(vectors)
                    if vectors.len() == batch.len() && vectors.iter().all(|v| v.len() == dim) =>
                {
                    for ((slot, _, hash), vector) in batch.iter().zip(vectors) {
                        out[*slot] = Embedding::Computed {
                            vector,
                            text_hash: hash.clone(),
                        };
                    }
                }
                Ok(vectors) => tracing::warn!(
                    expected = batch.len(),
                    returned = vectors.len(),
                    dim,
                    "embedding batch has wrong shape, storing zero vectors"
                ),
                Err(e) => tracing::warn!(
                    count = batch.len(),
                    "embedding failed, storing zero vectors: {e}"
                ),
            }
        }
        out
    }
}

impl<P> std::fmt::Debug for SyncEngine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("mirror", &self.mirror)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
