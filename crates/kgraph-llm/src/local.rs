//! In-process sentence embedder (all-MiniLM-L6-v2) backed by `fastembed`.
//!
//! The model is downloaded and loaded on the first `embed` call, once per
//! provider (clones share it), and inference runs on the blocking pool.

use std::sync::{Arc, Mutex};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::OnceCell;

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message, check_batch, l2_normalize};

pub const MINILM_DIM: usize = 384;

#[derive(Clone)]
pub struct LocalEmbedder {
    model: Arc<OnceCell<Arc<Mutex<TextEmbedding>>>>,
    batch_size: usize,
}

impl std::fmt::Debug for LocalEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEmbedder")
            .field("loaded", &self.model.initialized())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl LocalEmbedder {
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            model: Arc::new(OnceCell::new()),
            batch_size: batch_size.max(1),
        }
    }

    async fn model(&self) -> Result<Arc<Mutex<TextEmbedding>>, LlmError> {
        let model = self
            .model
            .get_or_try_init(|| async {
                tracing::info!("loading local embedding model all-MiniLM-L6-v2");
                let loaded = tokio::task::spawn_blocking(|| {
                    TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
                })
                .await
                .map_err(|e| LlmError::ModelLoad(e.to_string()))?
                .map_err(|e| LlmError::ModelLoad(e.to_string()))?;
                Ok::<_, LlmError>(Arc::new(Mutex::new(loaded)))
            })
            .await?;
        Ok(Arc::clone(model))
    }
}

impl LlmProvider for LocalEmbedder {
    async fn chat(&self, _messages: &[Message]) -> Result<String, LlmError> {
        Err(LlmError::ChatUnsupported { provider: "local" })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model().await?;
        let owned = texts.to_vec();
        let batch_size = self.batch_size;

        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| LlmError::Other("local embedder lock poisoned".into()))?;
            guard
                .embed(owned, Some(batch_size))
                .map_err(|e| LlmError::Other(format!("local embedding failed: {e}")))
        })
        .await
        .map_err(|e| LlmError::Other(e.to_string()))??;

        let mut vectors = vectors;
        for v in &mut vectors {
            l2_normalize(v);
        }
        check_batch(&vectors, texts.len(), MINILM_DIM)?;
        Ok(vectors)
    }

    fn embedding_dim(&self) -> usize {
        MINILM_DIM
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    fn supports_chat(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declares_minilm_dimension() {
        let e = LocalEmbedder::new(16);
        assert_eq!(e.embedding_dim(), 384);
        assert!(!e.supports_chat());
    }

    #[test]
    fn model_is_not_loaded_eagerly() {
        let e = LocalEmbedder::new(0);
        assert_eq!(e.batch_size, 1);
        assert!(format!("{e:?}").contains("loaded: false"));
    }

    #[tokio::test]
    async fn chat_is_unsupported() {
        let e = LocalEmbedder::new(8);
        assert!(matches!(
            e.chat(&[Message::user("hi")]).await,
            Err(LlmError::ChatUnsupported { .. })
        ));
    }
}
