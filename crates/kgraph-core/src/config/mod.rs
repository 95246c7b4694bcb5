mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use kgraph_index::retriever::RetrievalConfig;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.resolve_secrets();
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.embedding.dimensions == 0 {
            bail!("embedding.dimensions must be greater than 0");
        }
        if self.embedding.provider == EmbeddingProviderKind::Local
            && self.embedding.dimensions != 384
        {
            bail!(
                "embedding.dimensions must be 384 for the local provider, got {}",
                self.embedding.dimensions
            );
        }
        if self.queue.workers == 0 {
            bail!("queue.workers must be greater than 0");
        }
        if self.queue.capacity == 0 {
            bail!("queue.capacity must be greater than 0");
        }
        if self.retrieval.fallback_top_k == 0 {
            bail!("retrieval.fallback_top_k must be greater than 0");
        }
        Ok(())
    }

    #[must_use]
    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            top_k: self.retrieval.top_k,
            fallback_top_k: self.retrieval.fallback_top_k,
            request_timeout: Duration::from_secs(self.retrieval.request_timeout_secs),
            max_context_tokens: self.retrieval.max_context_tokens,
            prelude_enabled: self.retrieval.prelude_enabled,
        }
    }
}
