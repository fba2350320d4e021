//! Upstream provider boundary.
//!
//! The pipeline treats the upstream as a function returning either a full
//! response or a stream of IR chunks. [`OpenAiCompatProvider`] talks to any
//! OpenAI-compatible HTTP endpoint; providers speaking other formats convert
//! to IR here, outside the executor.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, Stream, StreamExt, TryStreamExt};
use serde_json::Value;

use crate::error::{GatewayError, Result, UpstreamError, UpstreamErrorKind};
use crate::llm::chunk::ChatChunk;
use crate::llm::request::Request;
use crate::llm::response::FullResponse;

/// Stream of IR chunks from the upstream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send>>;

/// The upstream LLM transport.
#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    /// Non-streaming completion.
    async fn complete(&self, request: &Request) -> Result<FullResponse>;

    /// Streaming completion; chunks arrive already converted to IR.
    async fn stream(&self, request: &Request) -> Result<ChunkStream>;
}

/// External credential manager notified when the upstream rejects our
/// credential, so a stale cache entry is not reused.
pub trait CredentialCache: Send + Sync {
    /// Drop the cached credential for `key`.
    fn invalidate(&self, key: &str);
}

/// Credential cache that caches nothing.
pub struct NoopCredentialCache;

impl CredentialCache for NoopCredentialCache {
    fn invalidate(&self, _key: &str) {}
}

// ---------------------------------------------------------------------------
// OpenAI-compatible provider
// ---------------------------------------------------------------------------

/// Provider for OpenAI-compatible chat-completion endpoints.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    credential_cache: Arc<dyn CredentialCache>,
}

impl OpenAiCompatProvider {
    /// Provider against `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            credential_cache: Arc::new(NoopCredentialCache),
        }
    }

    /// Attach a credential cache to invalidate on authentication failures.
    pub fn with_credential_cache(mut self, cache: Arc<dyn CredentialCache>) -> Self {
        self.credential_cache = cache;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(request: &Request, stream: bool) -> Result<Value> {
        let mut body = serde_json::to_value(request)?;
        body["stream"] = Value::Bool(stream);
        Ok(body)
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let mut builder = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(UpstreamError::connection(e.to_string())))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let error = UpstreamError::from_status(status.as_u16(), extract_error_message(&text));
        if error.kind == UpstreamErrorKind::Authentication {
            self.credential_cache.invalidate(&self.endpoint());
        }
        Err(GatewayError::Upstream(error))
    }
}

#[async_trait]
impl UpstreamProvider for OpenAiCompatProvider {
    async fn complete(&self, request: &Request) -> Result<FullResponse> {
        let body = Self::request_body(request, false)?;
        let response = self.send(&body).await?;
        let full: FullResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(UpstreamError::connection(e.to_string())))?;
        Ok(full)
    }

    async fn stream(&self, request: &Request) -> Result<ChunkStream> {
        let body = Self::request_body(request, true)?;
        let response = self.send(&body).await?;

        let chunks = response
            .bytes_stream()
            .map_err(|e| GatewayError::Upstream(UpstreamError::connection(e.to_string())))
            .scan(String::new(), |buffer, result| {
                let out: Vec<Result<ChatChunk>> = match result {
                    Err(e) => vec![Err(e)],
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        drain_complete_lines(buffer)
                            .iter()
                            .filter_map(|line| parse_data_line(line))
                            .collect()
                    }
                };
                futures::future::ready(Some(out))
            })
            .flat_map(stream::iter);

        Ok(chunks.boxed())
    }
}

/// Split off every complete line from the buffer, leaving any partial tail.
fn drain_complete_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        lines.push(line.trim_end_matches(['\n', '\r']).to_string());
    }
    lines
}

/// Parse one SSE line. Lines other than `data: <json>` (comments, event
/// names, blanks) and the `[DONE]` terminator yield nothing; the end of the
/// stream is signalled by stream exhaustion.
fn parse_data_line(line: &str) -> Option<Result<ChatChunk>> {
    let data = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?;
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<ChatChunk>(data) {
        Ok(chunk) => Some(Ok(chunk)),
        Err(e) => Some(Err(GatewayError::MalformedChunk(format!(
            "unparseable upstream chunk: {e}"
        )))),
    }
}

/// Pull a human-readable message out of a provider error body, falling back
/// to the raw text.
fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value["error"]["message"].as_str() {
            return message.to_string();
        }
        if let Some(message) = value["message"].as_str() {
            return message.to_string();
        }
    }
    if body.is_empty() {
        "upstream provider error".to_string()
    } else {
        body.chars().take(300).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_line_chunk() {
        let line = r#"data: {"id":"c1","object":"chat.completion.chunk","created":1,"model":"m","choices":[{"index":0,"delta":{"content":"hi"}}]}"#;
        let chunk = parse_data_line(line).unwrap().unwrap();
        assert_eq!(chunk.first_delta().unwrap().content.as_deref(), Some("hi"));
    }

    #[test]
    fn test_parse_data_line_skips_done_and_noise() {
        assert!(parse_data_line("data: [DONE]").is_none());
        assert!(parse_data_line(": keep-alive comment").is_none());
        assert!(parse_data_line("event: ping").is_none());
        assert!(parse_data_line("").is_none());
    }

    #[test]
    fn test_parse_data_line_malformed_json() {
        let result = parse_data_line("data: {not json").unwrap();
        assert!(matches!(result, Err(GatewayError::MalformedChunk(_))));
    }

    #[test]
    fn test_drain_complete_lines_keeps_partial_tail() {
        let mut buffer = "data: a\ndata: b\ndata: par".to_string();
        let lines = drain_complete_lines(&mut buffer);
        assert_eq!(lines, vec!["data: a", "data: b"]);
        assert_eq!(buffer, "data: par");

        buffer.push_str("tial\n");
        let lines = drain_complete_lines(&mut buffer);
        assert_eq!(lines, vec!["data: partial"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_extract_error_message_openai_shape() {
        let body = r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#;
        assert_eq!(extract_error_message(body), "Incorrect API key provided");
    }

    #[test]
    fn test_extract_error_message_fallback() {
        assert_eq!(extract_error_message("plain failure"), "plain failure");
        assert_eq!(extract_error_message(""), "upstream provider error");
    }

    #[test]
    fn test_request_body_sets_stream_flag() {
        let request: Request = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        }))
        .unwrap();
        let body = OpenAiCompatProvider::request_body(&request, true).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], "gpt-4o");
    }
}
