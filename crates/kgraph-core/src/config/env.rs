use super::{Config, Secret};

fn parse_kind<T: serde::de::DeserializeOwned>(value: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase())).ok()
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_storage();
        self.apply_env_overrides_providers();
        self.apply_env_overrides_retrieval();
    }

    fn apply_env_overrides_storage(&mut self) {
        if let Ok(v) = std::env::var("KGRAPH_DATABASE_PATH") {
            self.storage.database_path = v;
        }
        if let Ok(v) = std::env::var("KGRAPH_MIRROR_ROOT") {
            self.storage.mirror_root = v;
        }
    }

    fn apply_env_overrides_providers(&mut self) {
        if let Ok(v) = std::env::var("KGRAPH_EMBEDDING_PROVIDER") {
            if let Some(kind) = parse_kind(&v) {
                self.embedding.provider = kind;
            } else {
                tracing::warn!("ignoring invalid KGRAPH_EMBEDDING_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("KGRAPH_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("KGRAPH_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("KGRAPH_EMBEDDING_DIMENSIONS") {
            if let Ok(dims) = v.parse::<usize>() {
                self.embedding.dimensions = dims;
            } else {
                tracing::warn!("ignoring invalid KGRAPH_EMBEDDING_DIMENSIONS value: {v}");
            }
        }
        if let Ok(v) = std::env::var("KGRAPH_EMBEDDING_BATCH_SIZE") {
            if let Ok(size) = v.parse::<usize>() {
                self.embedding.batch_size = size;
            } else {
                tracing::warn!("ignoring invalid KGRAPH_EMBEDDING_BATCH_SIZE value: {v}");
            }
        }
        if let Ok(v) = std::env::var("KGRAPH_LLM_ENABLED") {
            if let Ok(enabled) = v.parse::<bool>() {
                self.llm.enabled = enabled;
            } else {
                tracing::warn!("ignoring invalid KGRAPH_LLM_ENABLED value: {v}");
            }
        }
        if let Ok(v) = std::env::var("KGRAPH_LLM_PROVIDER") {
            if let Some(kind) = parse_kind(&v) {
                self.llm.provider = kind;
            } else {
                tracing::warn!("ignoring invalid KGRAPH_LLM_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("KGRAPH_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("KGRAPH_LLM_MODEL") {
            self.llm.model = v;
        }
    }

    fn apply_env_overrides_retrieval(&mut self) {
        if let Ok(v) = std::env::var("KGRAPH_RETRIEVAL_TOP_K") {
            if let Ok(k) = v.parse::<usize>() {
                self.retrieval.top_k = k;
            } else {
                tracing::warn!("ignoring invalid KGRAPH_RETRIEVAL_TOP_K value: {v}");
            }
        }
        if let Ok(v) = std::env::var("KGRAPH_RETRIEVAL_FALLBACK_TOP_K") {
            if let Ok(k) = v.parse::<usize>() {
                self.retrieval.fallback_top_k = k;
            } else {
                tracing::warn!("ignoring invalid KGRAPH_RETRIEVAL_FALLBACK_TOP_K value: {v}");
            }
        }
        if let Ok(v) = std::env::var("KGRAPH_RETRIEVAL_TIMEOUT") {
            if let Ok(secs) = v.parse::<u64>() {
                self.retrieval.request_timeout_secs = secs;
            } else {
                tracing::warn!("ignoring invalid KGRAPH_RETRIEVAL_TIMEOUT value: {v}");
            }
        }
        if let Ok(v) = std::env::var("KGRAPH_QUEUE_WORKERS") {
            if let Ok(n) = v.parse::<usize>() {
                self.queue.workers = n;
            } else {
                tracing::warn!("ignoring invalid KGRAPH_QUEUE_WORKERS value: {v}");
            }
        }
    }

    /// Pick up API keys from the environment.
    pub fn resolve_secrets(&mut self) {
        let key = std::env::var("KGRAPH_OPENAI_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.is_empty());
        if let Some(key) = key {
            self.secrets.openai_api_key = Some(Secret::new(key));
        }
    }
}
