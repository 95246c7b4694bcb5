//! Backend construction from configuration.

use std::path::PathBuf;

use anyhow::{Context, bail};
use kgraph_llm::LlmProvider;
use kgraph_llm::any::AnyProvider;
use kgraph_llm::ollama::OllamaProvider;
use kgraph_llm::openai::OpenAiProvider;

use crate::config::{Config, EmbeddingProviderKind, LlmProviderKind};

/// Priority: `--config` argument > `KGRAPH_CONFIG` env > `config/kgraph.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli {
        return path;
    }
    if let Ok(path) = std::env::var("KGRAPH_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/kgraph.toml")
}

/// Build the embedding backend selected by `embedding.provider`.
///
/// # Errors
///
/// Returns an error if the backend needs a secret that is missing or was not
/// compiled in.
pub fn create_embedding_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    let emb = &config.embedding;
    let provider = match emb.provider {
        EmbeddingProviderKind::Ollama => AnyProvider::Ollama(OllamaProvider::new(
            &emb.base_url,
            emb.model.clone(),
            emb.model.clone(),
            emb.dimensions,
        )),
        EmbeddingProviderKind::OpenAi => {
            let api_key = config
                .secrets
                .openai_api_key
                .as_ref()
                .context("KGRAPH_OPENAI_API_KEY or OPENAI_API_KEY required for openai embeddings")?;
            AnyProvider::OpenAi(
                OpenAiProvider::new(
                    api_key.expose().to_string(),
                    emb.base_url.clone(),
                    config.llm.model.clone(),
                    config.llm.max_tokens,
                )
                .with_embedding_model(emb.model.clone(), emb.dimensions),
            )
        }
        #[cfg(feature = "local")]
        EmbeddingProviderKind::Local => {
            AnyProvider::Local(kgraph_llm::local::LocalEmbedder::new(emb.batch_size))
        }
        #[cfg(not(feature = "local"))]
        EmbeddingProviderKind::Local => {
            bail!("embedding provider local not available (feature not enabled)")
        }
    };

    if provider.embedding_dim() != emb.dimensions {
        bail!(
            "embedding provider {} produces {} dimensions, configured {}",
            emb.provider,
            provider.embedding_dim(),
            emb.dimensions
        );
    }
    tracing::info!(
        provider = emb.provider.as_str(),
        model = %emb.model,
        dimensions = emb.dimensions,
        "embedding backend configured"
    );
    Ok(provider)
}

/// Build the generation backend, or `None` when answers should always be degraded.
#[must_use]
pub fn create_generation_provider(config: &Config) -> Option<AnyProvider> {
    let llm = &config.llm;
    if !llm.enabled {
        tracing::info!("generation disabled, answers will be ranked lists");
        return None;
    }
    match llm.provider {
        LlmProviderKind::OpenAi => {
            let Some(api_key) = config.secrets.openai_api_key.as_ref() else {
                tracing::warn!("no OpenAI API key configured, answers will be ranked lists");
                return None;
            };
            Some(AnyProvider::OpenAi(OpenAiProvider::new(
                api_key.expose().to_string(),
                llm.base_url.clone(),
                llm.model.clone(),
                llm.max_tokens,
            )))
        }
        LlmProviderKind::Ollama => Some(AnyProvider::Ollama(OllamaProvider::new(
            &llm.base_url,
            llm.model.clone(),
            config.embedding.model.clone(),
            config.embedding.dimensions,
        ))),
    }
}

/// Log whether an Ollama backend answers; other backends are not checked.
pub async fn health_check(provider: &AnyProvider) {
    if let AnyProvider::Ollama(ollama) = provider {
        match ollama.health_check().await {
            Ok(()) => tracing::info!("ollama health check passed"),
            Err(e) => tracing::warn!("ollama health check failed: {e:#}"),
        }
    }
}
