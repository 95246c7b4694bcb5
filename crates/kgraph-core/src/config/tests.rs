use std::io::Write;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 17] = [
    "KGRAPH_DATABASE_PATH",
    "KGRAPH_MIRROR_ROOT",
    "KGRAPH_EMBEDDING_PROVIDER",
    "KGRAPH_EMBEDDING_BASE_URL",
    "KGRAPH_EMBEDDING_MODEL",
    "KGRAPH_EMBEDDING_DIMENSIONS",
    "KGRAPH_EMBEDDING_BATCH_SIZE",
    "KGRAPH_LLM_ENABLED",
    "KGRAPH_LLM_PROVIDER",
    "KGRAPH_LLM_BASE_URL",
    "KGRAPH_LLM_MODEL",
    "KGRAPH_RETRIEVAL_TOP_K",
    "KGRAPH_RETRIEVAL_FALLBACK_TOP_K",
    "KGRAPH_RETRIEVAL_TIMEOUT",
    "KGRAPH_QUEUE_WORKERS",
    "KGRAPH_OPENAI_API_KEY",
    "OPENAI_API_KEY",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
fn defaults() {
    let config = Config::default();
    assert_eq!(config.storage.database_path, "data/kgraph.db");
    assert_eq!(config.storage.mirror_root, "data/workspaces");
    assert_eq!(config.embedding.provider, EmbeddingProviderKind::Ollama);
    assert_eq!(config.embedding.base_url, "http://localhost:11434");
    assert_eq!(config.embedding.model, "all-minilm");
    assert_eq!(config.embedding.dimensions, 384);
    assert_eq!(config.embedding.batch_size, 32);
    assert!(config.llm.enabled);
    assert_eq!(config.llm.provider, LlmProviderKind::OpenAi);
    assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
    assert_eq!(config.llm.model, "gpt-4o-mini");
    assert_eq!(config.llm.max_tokens, 1024);
    assert_eq!(config.retrieval.top_k, 8);
    assert_eq!(config.retrieval.fallback_top_k, 5);
    assert_eq!(config.retrieval.request_timeout_secs, 60);
    assert_eq!(config.retrieval.max_context_tokens, 8192);
    assert!(config.retrieval.prelude_enabled);
    assert_eq!(config.queue.workers, 4);
    assert_eq!(config.queue.capacity, 64);
    assert!(config.secrets.openai_api_key.is_none());
    config.validate().unwrap();
}

#[test]
#[serial]
fn missing_file_uses_defaults() {
    clear_env();
    let config = Config::load(Path::new("/nonexistent/kgraph.toml")).unwrap();
    assert_eq!(config.storage.database_path, "data/kgraph.db");
    assert_eq!(config.queue.workers, 4);
}

#[test]
#[serial]
fn partial_file_fills_defaults() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[storage]
database_path = ":memory:"

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dimensions = 1536

[llm]
enabled = false
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.storage.database_path, ":memory:");
    assert_eq!(config.storage.mirror_root, "data/workspaces");
    assert_eq!(config.embedding.provider, EmbeddingProviderKind::OpenAi);
    assert_eq!(config.embedding.dimensions, 1536);
    assert_eq!(config.embedding.batch_size, 32);
    assert!(!config.llm.enabled);
    assert_eq!(config.llm.model, "gpt-4o-mini");
    assert_eq!(config.retrieval.top_k, 8);
}

#[test]
#[serial]
fn malformed_file_is_an_error() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[embedding]\ndimensions = \"many\"\n").unwrap();
    assert!(Config::load(file.path()).is_err());
}

#[test]
#[serial]
fn env_overrides() {
    clear_env();
    unsafe {
        std::env::set_var("KGRAPH_DATABASE_PATH", "/tmp/graph.db");
        std::env::set_var("KGRAPH_MIRROR_ROOT", "/tmp/mirror");
        std::env::set_var("KGRAPH_EMBEDDING_PROVIDER", "OpenAI");
        std::env::set_var("KGRAPH_EMBEDDING_DIMENSIONS", "1536");
        std::env::set_var("KGRAPH_EMBEDDING_BATCH_SIZE", "8");
        std::env::set_var("KGRAPH_LLM_ENABLED", "false");
        std::env::set_var("KGRAPH_LLM_PROVIDER", "ollama");
        std::env::set_var("KGRAPH_LLM_MODEL", "llama3");
        std::env::set_var("KGRAPH_RETRIEVAL_TOP_K", "3");
        std::env::set_var("KGRAPH_RETRIEVAL_FALLBACK_TOP_K", "2");
        std::env::set_var("KGRAPH_RETRIEVAL_TIMEOUT", "5");
        std::env::set_var("KGRAPH_QUEUE_WORKERS", "2");
    }

    let config = Config::load(Path::new("/nonexistent/kgraph.toml")).unwrap();
    clear_env();

    assert_eq!(config.storage.database_path, "/tmp/graph.db");
    assert_eq!(config.storage.mirror_root, "/tmp/mirror");
    assert_eq!(config.embedding.provider, EmbeddingProviderKind::OpenAi);
    assert_eq!(config.embedding.dimensions, 1536);
    assert_eq!(config.embedding.batch_size, 8);
    assert!(!config.llm.enabled);
    assert_eq!(config.llm.provider, LlmProviderKind::Ollama);
    assert_eq!(config.llm.model, "llama3");
    assert_eq!(config.retrieval.top_k, 3);
    assert_eq!(config.retrieval.fallback_top_k, 2);
    assert_eq!(config.retrieval.request_timeout_secs, 5);
    assert_eq!(config.queue.workers, 2);
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("KGRAPH_EMBEDDING_PROVIDER", "word2vec");
        std::env::set_var("KGRAPH_EMBEDDING_DIMENSIONS", "lots");
        std::env::set_var("KGRAPH_LLM_ENABLED", "maybe");
        std::env::set_var("KGRAPH_QUEUE_WORKERS", "-1");
    }

    let config = Config::load(Path::new("/nonexistent/kgraph.toml")).unwrap();
    clear_env();

    assert_eq!(config.embedding.provider, EmbeddingProviderKind::Ollama);
    assert_eq!(config.embedding.dimensions, 384);
    assert!(config.llm.enabled);
    assert_eq!(config.queue.workers, 4);
}

#[test]
#[serial]
fn api_key_resolution_order() {
    clear_env();
    unsafe { std::env::set_var("OPENAI_API_KEY", "sk-fallback") };
    let config = Config::load(Path::new("/nonexistent/kgraph.toml")).unwrap();
    assert_eq!(
        config.secrets.openai_api_key.as_ref().map(Secret::expose),
        Some("sk-fallback")
    );

    unsafe { std::env::set_var("KGRAPH_OPENAI_API_KEY", "sk-primary") };
    let config = Config::load(Path::new("/nonexistent/kgraph.toml")).unwrap();
    clear_env();
    assert_eq!(
        config.secrets.openai_api_key.as_ref().map(Secret::expose),
        Some("sk-primary")
    );
}

#[test]
fn secret_is_redacted() {
    let secret = Secret::new("sk-live-123");
    assert_eq!(format!("{secret:?}"), "[REDACTED]");
    assert_eq!(format!("{secret}"), "[REDACTED]");
    assert_eq!(secret.expose(), "sk-live-123");
}

#[test]
fn validate_rejects_bad_values() {
    let mut config = Config::default();
    config.embedding.dimensions = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.queue.workers = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.queue.capacity = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.retrieval.fallback_top_k = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.embedding.provider = EmbeddingProviderKind::Local;
    config.embedding.dimensions = 768;
    assert!(config.validate().is_err());
}

#[test]
fn retrieval_config_conversion() {
    let mut config = Config::default();
    config.retrieval.request_timeout_secs = 7;
    config.retrieval.prelude_enabled = false;
    let rc = config.retrieval_config();
    assert_eq!(rc.top_k, 8);
    assert_eq!(rc.request_timeout, Duration::from_secs(7));
    assert!(!rc.prelude_enabled);
}
