//! `GraphService`: the request/response surface over sync, retrieval and the mirror.

mod types;

use std::sync::Arc;

use kgraph_index::IndexError;
use kgraph_index::mirror::{Mirror, validate_workspace_id};
use kgraph_index::retriever::{Answer, Retriever};
use kgraph_index::store::GraphStore;
use kgraph_index::sync::SyncEngine;
use kgraph_llm::LlmProvider;
use kgraph_llm::any::AnyProvider;

use crate::bootstrap::{create_embedding_provider, create_generation_provider, health_check};
use crate::config::Config;
use crate::error::{Result, ServiceError};
use crate::queue::TaskQueue;

pub use types::{
    FileContentResponse, ManifestResponse, RagRequest, RagResponse, StatusResponse, SyncRequest,
    SyncResponse,
};

const NO_EMBEDDINGS_ANSWER: &str = "No functions with embeddings found.";

type AskJob = (String, Option<String>);

pub struct GraphService {
    engine: Arc<SyncEngine<AnyProvider>>,
    queue: TaskQueue<AskJob, kgraph_index::Result<Answer>>,
}

impl GraphService {
    /// Open the store and mirror and build the backends named in `config`.
    ///
    /// Unreachable backends are logged, not fatal: sync then stores zero
    /// vectors and retrieval degrades.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid, a backend cannot be built or
    /// the store cannot be opened.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;
        let embedder = create_embedding_provider(config)?;
        let generator = create_generation_provider(config);
        health_check(&embedder).await;
        if let Some(generator) = &generator {
            health_check(generator).await;
        }
        Ok(Self::with_providers(config, embedder, generator).await?)
    }

    /// Like [`GraphService::open`] with explicit backends.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Invalid`] if the embedder's dimension differs from
    /// the configured one, or the store error if it cannot be opened.
    pub async fn with_providers(
        config: &Config,
        embedder: AnyProvider,
        generator: Option<AnyProvider>,
    ) -> Result<Self> {
        let dims = config.embedding.dimensions;
        if embedder.embedding_dim() != dims {
            return Err(ServiceError::Invalid(format!(
                "embedding backend {} produces {} dimensions, configured {dims}",
                embedder.name(),
                embedder.embedding_dim()
            )));
        }

        let store = GraphStore::open(&config.storage.database_path, dims).await?;
        let mirror = Mirror::new(&config.storage.mirror_root);
        let embedder = Arc::new(embedder);

        let retriever = Arc::new(Retriever::new(
            store.clone(),
            Arc::clone(&embedder),
            generator.map(Arc::new),
            config.retrieval_config(),
        ));
        let queue = TaskQueue::new(
            config.queue.workers,
            config.queue.capacity,
            move |(question, workspace): AskJob| {
                let retriever = Arc::clone(&retriever);
                async move { retriever.answer(&question, workspace.as_deref()).await }
            },
        );

        let engine = SyncEngine::new(store, mirror, embedder)
            .with_batch_size(config.embedding.batch_size);
        tracing::info!(
            database = %config.storage.database_path,
            mirror = %config.storage.mirror_root,
            workers = config.queue.workers,
            "graph service ready"
        );
        Ok(Self {
            engine: Arc::new(engine),
            queue,
        })
    }

    /// Apply a change batch.
    ///
    /// Per-item failures are logged and left out of the counts; the call only
    /// fails as a whole for an invalid workspace or an unreachable store.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Invalid`] or [`ServiceError::Unavailable`].
    pub async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse> {
        let report = self
            .engine
            .apply(&request.workspace_id, &request.changes, request.replace)
            .await?;
        for (path, error) in &report.errors {
            tracing::warn!(workspace = %request.workspace_id, %path, "item not applied: {error}");
        }
        Ok(SyncResponse {
            success: true,
            counts: report.counts,
        })
    }

    /// Answer a question through the retrieval queue.
    ///
    /// An empty scope or a failure to embed the question yields
    /// `success: false`; a missing generation backend yields a ranked list.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Unavailable`] if the store cannot be reached and
    /// [`ServiceError::Queue`] if the queue is shut down.
    pub async fn ask(&self, request: &RagRequest) -> Result<RagResponse> {
        if let Some(ws) = request.workspace_id.as_deref() {
            validate_workspace_id(ws)?;
        }
        let job = (request.question.clone(), request.workspace_id.clone());
        match self.queue.submit(job).await? {
            Ok(answer) => {
                tracing::info!(
                    workspace = request.workspace_id.as_deref(),
                    mode = ?answer.mode,
                    hits = answer.hits.len(),
                    "question answered"
                );
                Ok(RagResponse {
                    success: true,
                    answer: answer.text,
                })
            }
            Err(IndexError::NoEmbeddings { .. }) => Ok(RagResponse {
                success: false,
                answer: NO_EMBEDDINGS_ANSWER.into(),
            }),
            Err(e) if e.is_unavailable() => Err(e.into()),
            Err(e) => {
                tracing::warn!("retrieval failed: {e}");
                Ok(RagResponse {
                    success: false,
                    answer: format!("Retrieval failed: {e}"),
                })
            }
        }
    }

    /// Content hashes of every mirrored file of `workspace`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Invalid`] for an unusable workspace id.
    pub async fn manifest(&self, workspace: &str) -> Result<ManifestResponse> {
        let manifest = self.engine.mirror().manifest(workspace).await?;
        Ok(ManifestResponse {
            workspace_id: workspace.to_string(),
            manifest,
        })
    }

    /// Current mirror content of one file, empty if absent or unreadable.
    pub async fn file_content(&self, workspace: &str, path: &str) -> FileContentResponse {
        FileContentResponse {
            workspace_id: workspace.to_string(),
            path: path.to_string(),
            content: self.engine.mirror().file_content(workspace, path).await,
        }
    }

    /// Node and edge counts for one workspace, or the whole store.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Unavailable`] if the store cannot be reached.
    pub async fn status(&self, workspace: Option<&str>) -> Result<StatusResponse> {
        let stats = self.engine.store().stats(workspace).await?;
        Ok(StatusResponse {
            workspace_id: workspace.map(str::to_string),
            stats,
        })
    }

    /// Clear one workspace's graph and mirror.
    ///
    /// # Errors
    ///
    /// As [`GraphService::sync`].
    pub async fn reset_workspace(&self, workspace: &str) -> Result<SyncResponse> {
        self.sync(&SyncRequest {
            workspace_id: workspace.to_string(),
            changes: Vec::new(),
            replace: true,
        })
        .await
    }

    /// Clear every workspace's graph and mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or mirror root cannot be cleared.
    pub async fn reset_all(&self) -> Result<()> {
        self.engine.reset_all().await?;
        tracing::info!("all workspaces reset");
        Ok(())
    }

    /// Drain the retrieval queue and close the store.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        self.engine.store().close().await;
    }
}

impl std::fmt::Debug for GraphService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphService")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
