//! Test-only mock provider with deterministic embeddings.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message, l2_normalize};

#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    pub default_response: String,
    pub dim: usize,
    pub fail_chat: bool,
    pub fail_embed: bool,
    pub supports_chat: bool,
    /// Milliseconds to sleep before answering a chat request.
    pub delay_ms: u64,
    embedded_texts: Arc<AtomicUsize>,
    last_messages: Arc<Mutex<Vec<Message>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            dim: 64,
            fail_chat: false,
            fail_embed: false,
            supports_chat: true,
            delay_ms: 0,
            embedded_texts: Arc::new(AtomicUsize::new(0)),
            last_messages: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_chat: true,
            fail_embed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = dim;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn without_chat(mut self) -> Self {
        self.supports_chat = false;
        self
    }

    /// Total number of texts embedded so far, across clones.
    #[must_use]
    pub fn embedded_count(&self) -> usize {
        self.embedded_texts.load(Ordering::SeqCst)
    }

    /// Messages received by the most recent chat call.
    #[must_use]
    pub fn last_messages(&self) -> Vec<Message> {
        self.last_messages.lock().unwrap().clone()
    }

    /// Hashed bag-of-words vector: texts sharing tokens land close together.
    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dim];
        if self.dim == 0 {
            return v;
        }
        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (hasher.finish() % self.dim as u64) as usize;
            v[bucket] += 1.0;
        }
        l2_normalize(&mut v);
        v
    }
}

impl LlmProvider for MockProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        *self.last_messages.lock().unwrap() = messages.to_vec();
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if !self.supports_chat {
            return Err(LlmError::ChatUnsupported { provider: "mock" });
        }
        if self.fail_chat {
            return Err(LlmError::Other("mock LLM error".into()));
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if self.fail_embed {
            return Err(LlmError::Unavailable);
        }
        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn embedding_dim(&self) -> usize {
        self.dim
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    fn supports_chat(&self) -> bool {
        self.supports_chat
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_are_deterministic_and_normalized() {
        let p = MockProvider::default();
        let a = p.vector_for("parse the config file");
        let b = p.vector_for("parse the config file");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn embed_counts_texts() {
        let p = MockProvider::default();
        let clone = p.clone();
        clone.embed(&["a".into(), "b".into()]).await.unwrap();
        assert_eq!(p.embedded_count(), 2);
    }

    #[tokio::test]
    async fn responses_are_consumed_in_order() {
        let p = MockProvider::with_responses(vec!["one".into(), "two".into()]);
        assert_eq!(p.chat(&[]).await.unwrap(), "one");
        assert_eq!(p.chat(&[]).await.unwrap(), "two");
        assert_eq!(p.chat(&[]).await.unwrap(), "mock response");
    }

    #[tokio::test]
    async fn failing_provider_errors() {
        let p = MockProvider::failing();
        assert!(p.chat(&[]).await.is_err());
        assert!(p.embed(&["x".into()]).await.is_err());
    }
}
