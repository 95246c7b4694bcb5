//! Question answering over the function index: semantic search, context
//! packing and generation, degrading to a ranked list when generation fails.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use kgraph_llm::LlmProvider;
use kgraph_llm::provider::Message;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::store::{FunctionHit, GraphStore};

const SYSTEM_PROMPT: &str = "You answer questions about a codebase. Base your answer on the \
functions in <code_context>; say so when they are not enough to answer.";

/// Retrieval configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Hits passed to the generation backend.
    pub top_k: usize,
    /// Hits listed by the degraded answer.
    pub fallback_top_k: usize,
    /// Upper bound on one generation call.
    pub request_timeout: Duration,
    /// Token budget for the packed `<code_context>` block.
    pub max_context_tokens: usize,
    /// Add the workspace instruction to the system prompt.
    pub prelude_enabled: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            fallback_top_k: 5,
            request_timeout: Duration::from_secs(60),
            max_context_tokens: 8192,
            prelude_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    Generated,
    Degraded,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub mode: AnswerMode,
    pub hits: Vec<FunctionHit>,
}

/// Answers questions from one embedding backend and an optional generation backend.
pub struct Retriever<E, G> {
    store: GraphStore,
    embedder: Arc<E>,
    generator: Option<Arc<G>>,
    config: RetrievalConfig,
}

impl<E: LlmProvider, G: LlmProvider> Retriever<E, G> {
    #[must_use]
    pub fn new(
        store: GraphStore,
        embedder: Arc<E>,
        generator: Option<Arc<G>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Answer `question` from the functions of `workspace`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NoEmbeddings`] if the scope has no embedded
    /// function, an LLM error if the question cannot be embedded, and
    /// [`IndexError::Unavailable`] if the store cannot be reached.
    pub async fn answer(&self, question: &str, workspace: Option<&str>) -> Result<Answer> {
        if self.store.count_embedded_functions(workspace).await? == 0 {
            return Err(IndexError::NoEmbeddings {
                scope: workspace.map(str::to_string),
            });
        }

        let query = self
            .embedder
            .embed(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Other("embedding backend returned no vector".into()))?;

        let limit = self.config.top_k.max(self.config.fallback_top_k);
        let mut hits = self
            .store
            .search_functions(workspace, &query, limit)
            .await?;
        tracing::debug!(workspace, hits = hits.len(), "functions retrieved");

        if let Some(text) = self.generate(question, workspace, &hits).await {
            hits.truncate(self.config.top_k);
            return Ok(Answer {
                text,
                mode: AnswerMode::Generated,
                hits,
            });
        }

        hits.truncate(self.config.fallback_top_k);
        Ok(Answer {
            text: format_ranked(&hits),
            mode: AnswerMode::Degraded,
            hits,
        })
    }

    /// Generated answer text, or `None` when the degraded path should be taken.
    async fn generate(
        &self,
        question: &str,
        workspace: Option<&str>,
        hits: &[FunctionHit],
    ) -> Option<String> {
        let generator = self.generator.as_ref().filter(|g| g.supports_chat())?;

        let top = &hits[..hits.len().min(self.config.top_k)];
        let packed = pack_hits(top, self.config.max_context_tokens);
        let mut system = String::from(SYSTEM_PROMPT);
        if self.config.prelude_enabled
            && let Some(ws) = workspace
        {
            let _ = write!(system, "\nOnly use functions where workspaceId={ws}.");
        }
        let messages = [
            Message::system(system),
            Message::user(format!("{}\n\n{question}", format_as_context(packed))),
        ];

        match tokio::time::timeout(self.config.request_timeout, generator.chat(&messages)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Some(text),
            Ok(Ok(_)) => {
                tracing::warn!(provider = generator.name(), "empty generation, degrading");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(provider = generator.name(), "generation failed, degrading: {e}");
                None
            }
            Err(_) => {
                tracing::warn!(
                    provider = generator.name(),
                    timeout_secs = self.config.request_timeout.as_secs(),
                    "generation timed out, degrading"
                );
                None
            }
        }
    }
}

impl<E, G> std::fmt::Debug for Retriever<E, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("generator", &self.generator.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Longest prefix of `hits` whose sources fit in `budget` tokens.
fn pack_hits(hits: &[FunctionHit], budget: usize) -> &[FunctionHit] {
    let mut used = 0;
    for (i, hit) in hits.iter().enumerate() {
        let cost = estimate_tokens(&hit.source) + 20;
        if used + cost > budget {
            return &hits[..i];
        }
        used += cost;
    }
    hits
}

/// Format retrieved functions as XML for the generation prompt.
#[must_use]
pub fn format_as_context(hits: &[FunctionHit]) -> String {
    let mut out = String::from("<code_context>\n");
    for hit in hits {
        let _ = writeln!(
            out,
            "  <function qualname=\"{}\" file=\"{}\" score=\"{:.2}\">",
            hit.qualname, hit.path, hit.score,
        );
        if !hit.docstring.is_empty() {
            let _ = writeln!(out, "    <doc>{}</doc>", hit.docstring);
        }
        out.push_str(&hit.source);
        out.push_str("\n  </function>\n");
    }
    out.push_str("</code_context>");
    out
}

/// Plain ranked list used when no generated answer is available.
#[must_use]
pub fn format_ranked(hits: &[FunctionHit]) -> String {
    let mut out = String::from("Top functions:");
    for hit in hits {
        let _ = write!(out, "\n{} (score={:.4})", hit.qualname, hit.score);
    }
    out
}

#[cfg(test)]
mod tests {
    use kgraph_llm::mock::MockProvider;
    use kgraph_llm::provider::Role;

    use super::*;
    use crate::extractor::extract;
    use crate::store::Embedding;

    const DIM: usize = 32;

    fn hit(qualname: &str, source: &str, score: f32) -> FunctionHit {
        FunctionHit {
            qualname: qualname.into(),
            name: qualname.rsplit('.').next().unwrap().into(),
            path: "a.py".into(),
            class_name: None,
            docstring: String::new(),
            source: source.into(),
            score,
        }
    }

    async fn seeded_store(embedder: &MockProvider, workspace: &str) -> GraphStore {
        let store = GraphStore::open(":memory:", DIM).await.unwrap();
        let source = "def parse_config(path):\n    return load(path)\n\n\
                      def render_html(page):\n    return page\n\n\
                      def send_email(to):\n    return to\n";
        let record = extract("a.py", source);
        store.upsert_file(Some(workspace), &record).await.unwrap();
        for function in &record.functions {
            let text = function.embedding_text();
            let embedding = Embedding::Computed {
                vector: embedder.vector_for(&text),
                text_hash: blake3::hash(text.as_bytes()).to_hex().to_string(),
            };
            store
                .upsert_function(Some(workspace), "a.py", function, &embedding)
                .await
                .unwrap();
        }
        store
    }

    fn retriever(
        store: GraphStore,
        embedder: MockProvider,
        generator: Option<MockProvider>,
        config: RetrievalConfig,
    ) -> Retriever<MockProvider, MockProvider> {
        Retriever::new(store, Arc::new(embedder), generator.map(Arc::new), config)
    }

    #[tokio::test]
    async fn generated_answer_with_prelude() {
        let embedder = MockProvider::default().with_dim(DIM);
        let store = seeded_store(&embedder, "ws1").await;
        let generator = MockProvider::with_responses(vec!["It parses config.".into()]);
        let r = retriever(store, embedder, Some(generator.clone()), RetrievalConfig::default());

        let answer = r.answer("parse_config", Some("ws1")).await.unwrap();
        assert_eq!(answer.mode, AnswerMode::Generated);
        assert_eq!(answer.text, "It parses config.");
        assert_eq!(answer.hits[0].qualname, "a.parse_config");

        let messages = generator.last_messages();
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("Only use functions where workspaceId=ws1."));
        assert!(messages[1].content.contains("<code_context>"));
        assert!(messages[1].content.ends_with("\n\nparse_config"));
    }

    #[tokio::test]
    async fn prelude_can_be_disabled() {
        let embedder = MockProvider::default().with_dim(DIM);
        let store = seeded_store(&embedder, "ws1").await;
        let generator = MockProvider::default();
        let config = RetrievalConfig {
            prelude_enabled: false,
            ..RetrievalConfig::default()
        };
        let r = retriever(store, embedder, Some(generator.clone()), config);

        r.answer("config", Some("ws1")).await.unwrap();
        assert!(!generator.last_messages()[0].content.contains("workspaceId"));
    }

    #[tokio::test]
    async fn degrades_without_generator() {
        let embedder = MockProvider::default().with_dim(DIM);
        let store = seeded_store(&embedder, "ws1").await;
        let config = RetrievalConfig {
            fallback_top_k: 2,
            ..RetrievalConfig::default()
        };
        let r = retriever(store, embedder, None, config);

        let answer = r.answer("send_email", Some("ws1")).await.unwrap();
        assert_eq!(answer.mode, AnswerMode::Degraded);
        assert_eq!(answer.hits.len(), 2);
        let mut lines = answer.text.lines();
        assert_eq!(lines.next(), Some("Top functions:"));
        assert!(lines.next().unwrap().starts_with("a.send_email (score="));
    }

    #[tokio::test]
    async fn degrades_on_generation_failure() {
        let embedder = MockProvider::default().with_dim(DIM);
        let store = seeded_store(&embedder, "ws1").await;
        let mut generator = MockProvider::default();
        generator.fail_chat = true;
        let r = retriever(store, embedder, Some(generator), RetrievalConfig::default());

        let answer = r.answer("render", Some("ws1")).await.unwrap();
        assert_eq!(answer.mode, AnswerMode::Degraded);
    }

    #[tokio::test]
    async fn degrades_when_chat_unsupported() {
        let embedder = MockProvider::default().with_dim(DIM);
        let store = seeded_store(&embedder, "ws1").await;
        let generator = MockProvider::default().without_chat();
        let r = retriever(store, embedder, Some(generator.clone()), RetrievalConfig::default());

        let answer = r.answer("render", Some("ws1")).await.unwrap();
        assert_eq!(answer.mode, AnswerMode::Degraded);
        assert!(generator.last_messages().is_empty());
    }

    #[tokio::test]
    async fn degrades_on_timeout() {
        let embedder = MockProvider::default().with_dim(DIM);
        let store = seeded_store(&embedder, "ws1").await;
        let generator = MockProvider::default().with_delay(500);
        let config = RetrievalConfig {
            request_timeout: Duration::from_millis(20),
            ..RetrievalConfig::default()
        };
        let r = retriever(store, embedder, Some(generator), config);

        let answer = r.answer("render", Some("ws1")).await.unwrap();
        assert_eq!(answer.mode, AnswerMode::Degraded);
    }

    #[tokio::test]
    async fn empty_scope_is_an_error() {
        let embedder = MockProvider::default().with_dim(DIM);
        let store = seeded_store(&embedder, "ws1").await;
        let r = retriever(store, embedder, None, RetrievalConfig::default());

        let err = r.answer("anything", Some("ws2")).await.unwrap_err();
        assert!(matches!(err, IndexError::NoEmbeddings { scope: Some(ref s) } if s == "ws2"));
        let err = r.answer("anything", None).await.unwrap_err();
        assert!(matches!(err, IndexError::NoEmbeddings { scope: None }));
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable() {
        let embedder = MockProvider::default().with_dim(DIM);
        let store = seeded_store(&embedder, "ws1").await;
        store.close().await;
        let r = retriever(store, embedder, None, RetrievalConfig::default());

        let err = r.answer("anything", Some("ws1")).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn packing_respects_budget() {
        let hits = vec![
            hit("a.one", &"x".repeat(400), 0.9),
            hit("a.two", &"x".repeat(400), 0.8),
            hit("a.three", &"x".repeat(400), 0.7),
        ];
        assert_eq!(pack_hits(&hits, 250).len(), 2);
        assert_eq!(pack_hits(&hits, 50).len(), 0);
        assert_eq!(pack_hits(&hits, 10_000).len(), 3);
    }

    #[test]
    fn context_format() {
        let mut h = hit("a.foo", "def foo(): pass", 0.5);
        h.docstring = "Does foo.".into();
        let ctx = format_as_context(&[h]);
        assert!(ctx.starts_with("<code_context>\n"));
        assert!(ctx.contains("<function qualname=\"a.foo\" file=\"a.py\" score=\"0.50\">"));
        assert!(ctx.contains("<doc>Does foo.</doc>"));
        assert!(ctx.ends_with("</code_context>"));
    }

    #[test]
    fn ranked_format() {
        let text = format_ranked(&[hit("a.foo", "", 0.912_34), hit("a.bar", "", 0.5)]);
        assert_eq!(
            text,
            "Top functions:\na.foo (score=0.9123)\na.bar (score=0.5000)"
        );
    }

    #[test]
    fn token_estimate() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }
}
