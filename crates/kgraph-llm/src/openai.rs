use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::http::default_client;
use crate::provider::{LlmProvider, Message, Role, check_batch};
use crate::retry::{RetryPolicy, send_with_retry};

/// OpenAI-compatible chat completions and embeddings over HTTP.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    embedding_model: Option<String>,
    embedding_dim: usize,
    retry: RetryPolicy,
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(api_key: String, base_url: String, model: String, max_tokens: u32) -> Self {
        Self {
            client: default_client(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            max_tokens,
            embedding_model: None,
            embedding_dim: 0,
            retry: RetryPolicy::default(),
        }
    }

    /// Enable the embeddings endpoint with the given model and declared dimension.
    #[must_use]
    pub fn with_embedding_model(mut self, model: String, dim: usize) -> Self {
        self.embedding_model = Some(model);
        self.embedding_dim = dim;
        self
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<String, LlmError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = send_with_retry("openai", self.retry, || {
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
        })
        .await?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::Http)?;

        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(LlmError::Unavailable);
        }
        if !status.is_success() {
            tracing::error!(%status, endpoint, "OpenAI API error: {text}");
            return Err(LlmError::Other(format!(
                "OpenAI {endpoint} request failed (status {status})"
            )));
        }
        Ok(text)
    }
}

impl LlmProvider for OpenAiProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let api_messages = convert_messages(messages);
        let body = ChatRequest {
            model: &self.model,
            messages: &api_messages,
            max_tokens: self.max_tokens,
        };

        let text = self.post_json("chat/completions", &body).await?;
        let resp: ChatResponse = serde_json::from_str(&text)?;

        resp.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse { provider: "openai" })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let model = self
            .embedding_model
            .as_deref()
            .ok_or(LlmError::EmbedUnsupported { provider: "openai" })?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            input: texts,
            model,
            dimensions: (self.embedding_dim > 0).then_some(self.embedding_dim),
        };
        let text = self.post_json("embeddings", &body).await?;
        let mut resp: EmbeddingResponse = serde_json::from_str(&text)?;

        resp.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = resp.data.into_iter().map(|d| d.embedding).collect();
        check_batch(&vectors, texts.len(), self.embedding_dim)?;
        Ok(vectors)
    }

    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn supports_embeddings(&self) -> bool {
        self.embedding_model.is_some()
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

fn convert_messages(messages: &[Message]) -> Vec<ApiMessage<'_>> {
    messages
        .iter()
        .map(|msg| ApiMessage {
            role: match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &msg.content,
        })
        .collect()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage<'a>],
    max_tokens: u32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

/// `dimensions` asks `text-embedding-3-*` models to shorten their output to
/// the configured index size.
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(
            "key".into(),
            "http://127.0.0.1:1/v1/".into(),
            "gpt-4o-mini".into(),
            256,
        )
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        assert_eq!(provider().base_url, "http://127.0.0.1:1/v1");
    }

    #[test]
    fn embeddings_disabled_by_default() {
        let p = provider();
        assert!(!p.supports_embeddings());
        assert_eq!(p.embedding_dim(), 0);
    }

    #[test]
    fn with_embedding_model_declares_dimension() {
        let p = provider().with_embedding_model("text-embedding-3-small".into(), 1536);
        assert!(p.supports_embeddings());
        assert_eq!(p.embedding_dim(), 1536);
    }

    #[test]
    fn convert_messages_maps_roles() {
        let msgs = vec![Message::system("s"), Message::user("u")];
        let api = convert_messages(&msgs);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[1].role, "user");
        assert_eq!(api[1].content, "u");
    }

    #[test]
    fn embedding_request_carries_dimensions() {
        let input = vec!["def foo(): pass".to_string()];
        let body = EmbeddingRequest {
            input: &input,
            model: "text-embedding-3-small",
            dimensions: Some(384),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "input": ["def foo(): pass"],
                "model": "text-embedding-3-small",
                "dimensions": 384
            })
        );

        let body = EmbeddingRequest {
            input: &input,
            model: "m",
            dimensions: None,
        };
        assert!(serde_json::to_value(&body).unwrap().get("dimensions").is_none());
    }

    #[test]
    fn embedding_response_is_reordered_by_index() {
        let json = r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#;
        let mut resp: EmbeddingResponse = serde_json::from_str(json).unwrap();
        resp.data.sort_by_key(|d| d.index);
        assert_eq!(resp.data[0].embedding, vec![1.0]);
    }

    #[tokio::test]
    async fn embed_without_model_is_unsupported() {
        let err = provider().embed(&["x".into()]).await.unwrap_err();
        assert!(matches!(err, LlmError::EmbedUnsupported { .. }));
    }

    #[tokio::test]
    async fn embed_empty_batch_skips_request() {
        let p = provider().with_embedding_model("m".into(), 4);
        assert!(p.embed(&[]).await.unwrap().is_empty());
    }

    /// Serve each accepted connection the next canned response, after
    /// draining the request head and body.
    async fn serve(responses: Vec<String>) -> String {
        use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for response in responses {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let mut stream = BufReader::new(stream);
                let mut length = 0usize;
                let mut line = String::new();
                loop {
                    line.clear();
                    if stream.read_line(&mut line).await.unwrap_or(0) == 0 || line.trim().is_empty() {
                        break;
                    }
                    let lower = line.to_ascii_lowercase();
                    if let Some(v) = lower.strip_prefix("content-length:") {
                        length = v.trim().parse().unwrap_or(0);
                    }
                }
                let mut body = vec![0; length];
                stream.read_exact(&mut body).await.ok();
                stream.get_mut().write_all(response.as_bytes()).await.ok();
                stream.get_mut().shutdown().await.ok();
            }
        });
        format!("http://{addr}/v1")
    }

    fn http(status: &str, extra: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n{extra}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn limited() -> String {
        http("429 Too Many Requests", "Retry-After: 0\r\n", "")
    }

    fn embedder(base_url: String, max_retries: u32) -> OpenAiProvider {
        let mut p = OpenAiProvider::new("key".into(), base_url, "gpt-4o-mini".into(), 256)
            .with_embedding_model("text-embedding-3-small".into(), 2);
        p.retry = RetryPolicy {
            max_retries,
            ..RetryPolicy::default()
        };
        p
    }

    #[tokio::test]
    async fn embed_retries_after_rate_limit() {
        let ok = http(
            "200 OK",
            "",
            r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#,
        );
        let url = serve(vec![limited(), ok]).await;

        let vectors = embedder(url, 2)
            .embed(&["a".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn embed_gives_up_when_still_rate_limited() {
        let url = serve(vec![limited(), limited()]).await;
        let err = embedder(url, 1).embed(&["a".into()]).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited), "got {err:?}");
    }

    #[tokio::test]
    async fn embed_rejects_wrong_dimension() {
        let ok = http("200 OK", "", r#"{"data":[{"index":0,"embedding":[1.0,0.0,0.0]}]}"#);
        let url = serve(vec![ok]).await;
        let err = embedder(url, 0).embed(&["a".into()]).await.unwrap_err();
        assert!(matches!(
            err,
            LlmError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn chat_unreachable_endpoint_errors() {
        let result = provider().chat(&[Message::user("hi")]).await;
        assert!(matches!(result, Err(LlmError::Http(_))));
    }
}
