#[cfg(feature = "local")]
use crate::local::LocalEmbedder;
#[cfg(feature = "mock")]
use crate::mock::MockProvider;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;
use crate::provider::{LlmProvider, Message};

/// Generates a match over all `AnyProvider` variants, binding the inner provider
/// and evaluating the given expression for each arm.
macro_rules! delegate_provider {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyProvider::Ollama($p) => $expr,
            AnyProvider::OpenAi($p) => $expr,
            #[cfg(feature = "local")]
            AnyProvider::Local($p) => $expr,
            #[cfg(feature = "mock")]
            AnyProvider::Mock($p) => $expr,
        }
    };
}

#[derive(Debug, Clone)]
pub enum AnyProvider {
    Ollama(OllamaProvider),
    OpenAi(OpenAiProvider),
    #[cfg(feature = "local")]
    Local(LocalEmbedder),
    #[cfg(feature = "mock")]
    Mock(MockProvider),
}

impl LlmProvider for AnyProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, crate::LlmError> {
        delegate_provider!(self, |p| p.chat(messages).await)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, crate::LlmError> {
        delegate_provider!(self, |p| p.embed(texts).await)
    }

    fn embedding_dim(&self) -> usize {
        delegate_provider!(self, |p| p.embedding_dim())
    }

    fn supports_embeddings(&self) -> bool {
        delegate_provider!(self, |p| p.supports_embeddings())
    }

    fn supports_chat(&self) -> bool {
        delegate_provider!(self, |p| p.supports_chat())
    }

    fn name(&self) -> &'static str {
        delegate_provider!(self, |p| p.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delegates_to_ollama() {
        let p = AnyProvider::Ollama(OllamaProvider::new(
            "http://localhost:11434",
            "llama3".into(),
            "all-minilm".into(),
            384,
        ));
        assert_eq!(p.name(), "ollama");
        assert_eq!(p.embedding_dim(), 384);
        assert!(p.supports_chat());
    }

    #[test]
    fn delegates_to_openai() {
        let p = AnyProvider::OpenAi(OpenAiProvider::new(
            "k".into(),
            "https://api.openai.com/v1".into(),
            "gpt-4o-mini".into(),
            512,
        ));
        assert_eq!(p.name(), "openai");
        assert!(!p.supports_embeddings());
    }

    #[cfg(feature = "mock")]
    #[tokio::test]
    async fn delegates_embed_to_mock() {
        let p = AnyProvider::Mock(MockProvider::default().with_dim(8));
        let v = p.embed(&["hello world".into()]).await.unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].len(), 8);
    }
}
