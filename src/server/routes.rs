//! Axum route handlers for the gateway.
//!
//! # Routes
//!
//! - `GET  /health`              — Returns `{"status": "ok", ...}`
//! - `POST /v1/chat/completions` — OpenAI-compatible chat completions
//! - `POST /v1/messages`         — Anthropic-compatible messages
//!
//! Both chat endpoints accept a bearer credential in `Authorization: Bearer`
//! or `x-api-key`, enforce the configured body-size cap (HTTP 413), and run
//! the request through the policy orchestrator. Streaming responses are
//! `text/event-stream` bodies fed by the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::llm::anthropic::{anthropic_request_to_ir, response_to_anthropic, AnthropicRequest};
use crate::llm::provider::UpstreamProvider;
use crate::llm::request::Request;
use crate::observability::emitter::EventEmitter;
use crate::observability::recorder::TransactionRecorder;
use crate::orchestration::PolicyOrchestrator;
use crate::policy::{Policy, PolicyContext, RawHttpRequest};
use crate::streaming::formatter::ClientFormat;

/// Length of the API-key hash preview in auth logs.
const API_KEY_HASH_LENGTH: usize = 16;

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Process configuration.
    pub config: Arc<GatewayConfig>,
    /// The configured policy.
    pub policy: Arc<dyn Policy>,
    /// Upstream LLM transport.
    pub provider: Arc<dyn UpstreamProvider>,
    /// Process-wide event emitter.
    pub emitter: EventEmitter,
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    let body_limit = state.config.max_request_size;
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/v1/messages", post(messages_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health — liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "luthien-gateway",
        "version": crate::VERSION,
    }))
}

/// POST /v1/chat/completions — OpenAI-compatible.
async fn chat_completions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let format = ClientFormat::OpenAi;
    if let Err(response) = authorize(&state, &headers, format) {
        return response;
    }
    let request: Request = match serde_json::from_value(body.clone()) {
        Ok(request) => request,
        Err(e) => return invalid_request(format, &format!("invalid request body: {e}")),
    };
    run_transaction(state, headers, body, request, format, "/v1/chat/completions").await
}

/// POST /v1/messages — Anthropic-compatible.
async fn messages_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let format = ClientFormat::Anthropic;
    if let Err(response) = authorize(&state, &headers, format) {
        return response;
    }
    let request: AnthropicRequest = match serde_json::from_value(body.clone()) {
        Ok(request) => request,
        Err(e) => return invalid_request(format, &format!("invalid request body: {e}")),
    };
    let request = anthropic_request_to_ir(request);
    run_transaction(state, headers, body, request, format, "/v1/messages").await
}

/// Shared transaction path for both chat endpoints.
async fn run_transaction(
    state: AppState,
    headers: HeaderMap,
    raw_body: Value,
    request: Request,
    format: ClientFormat,
    path: &str,
) -> Response {
    let transaction_id = Uuid::new_v4().to_string();
    let streaming = request.stream;

    let mut ctx = PolicyContext::new(transaction_id.clone(), state.emitter.clone()).with_raw_http_request(
        RawHttpRequest {
            body: raw_body,
            headers: header_map_to_plain(&headers),
            method: "POST".to_string(),
            path: path.to_string(),
        },
    );
    if let Some(session) = headers.get("x-session-id").and_then(|v| v.to_str().ok()) {
        ctx = ctx.with_session_id(session);
    }
    let ctx = Arc::new(ctx);

    let recorder = Arc::new(TransactionRecorder::new(
        transaction_id.clone(),
        state.emitter.clone(),
    ));
    let orchestrator =
        PolicyOrchestrator::new(state.policy.clone(), format, recorder, state.emitter.clone())
            .with_policy_timeout(state.config.policy_timeout);

    let final_request = match orchestrator.process_request(request, &ctx).await {
        Ok(request) => request,
        Err(error) => return error_response(error, format),
    };

    if streaming {
        let upstream = match state.provider.stream(&final_request).await {
            Ok(stream) => stream,
            Err(error) => return error_response(error, format),
        };
        let sse = orchestrator.process_streaming_response(upstream, ctx);
        return (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            Body::from_stream(sse),
        )
            .into_response();
    }

    let response = match state.provider.complete(&final_request).await {
        Ok(response) => response,
        Err(error) => return error_response(error, format),
    };
    let final_response = match orchestrator.process_full_response(response, &ctx).await {
        Ok(response) => response,
        Err(error) => return error_response(error, format),
    };

    match format {
        ClientFormat::OpenAi => Json(final_response).into_response(),
        ClientFormat::Anthropic => {
            Json(response_to_anthropic(&final_response, &transaction_id)).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

fn presented_credential(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token);
        }
    }
    headers.get("x-api-key").and_then(|v| v.to_str().ok())
}

fn key_hash_preview(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)[..API_KEY_HASH_LENGTH].to_string()
}

fn authorize(state: &AppState, headers: &HeaderMap, format: ClientFormat) -> Result<(), Response> {
    let Some(expected) = state.config.proxy_api_key.as_deref() else {
        return Ok(());
    };
    match presented_credential(headers) {
        Some(presented) if presented == expected => Ok(()),
        Some(presented) => {
            tracing::warn!(key_hash = %key_hash_preview(presented), "rejected credential");
            Err(auth_error(format))
        }
        None => {
            tracing::warn!("missing credential");
            Err(auth_error(format))
        }
    }
}

// ---------------------------------------------------------------------------
// Error rendering
// ---------------------------------------------------------------------------

fn format_error_body(format: ClientFormat, error_type: &str, message: &str) -> Value {
    match format {
        ClientFormat::OpenAi => json!({
            "error": {"message": message, "type": error_type, "param": null, "code": null}
        }),
        ClientFormat::Anthropic => json!({
            "type": "error",
            "error": {"type": error_type, "message": message}
        }),
    }
}

fn auth_error(format: ClientFormat) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(format_error_body(format, "authentication_error", "invalid or missing API key")),
    )
        .into_response()
}

fn invalid_request(format: ClientFormat, message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(format_error_body(format, "invalid_request_error", message)),
    )
        .into_response()
}

/// Map a pipeline error to an HTTP response in the client's format.
fn error_response(error: GatewayError, format: ClientFormat) -> Response {
    match error {
        GatewayError::PolicyReject(message) => (
            StatusCode::FORBIDDEN,
            Json(format_error_body(format, "policy_rejected", &message)),
        )
            .into_response(),
        GatewayError::Upstream(upstream) => {
            let status = StatusCode::from_u16(upstream.client_status())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let body = match format {
                ClientFormat::OpenAi => upstream.openai_body(),
                ClientFormat::Anthropic => upstream.anthropic_body(),
            };
            (status, Json(body)).into_response()
        }
        GatewayError::PolicyTimeout(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(format_error_body(format, "policy_timeout", &error.to_string())),
        )
            .into_response(),
        GatewayError::MalformedChunk(_) => (
            StatusCode::BAD_GATEWAY,
            Json(format_error_body(format, "upstream_error", &error.to_string())),
        )
            .into_response(),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(format_error_body(format, "api_error", &other.to_string())),
        )
            .into_response(),
    }
}

fn header_map_to_plain(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::{stream, StreamExt};
    use tower::util::ServiceExt;

    use crate::config::DEFAULT_MAX_REQUEST_SIZE;
    use crate::error::Result;
    use crate::llm::chunk::FinishReason;
    use crate::llm::chunk_builders::{text_chunk, text_response};
    use crate::llm::provider::ChunkStream;
    use crate::llm::response::FullResponse;
    use crate::policy::noop::NoOpPolicy;

    struct MockProvider;

    #[async_trait]
    impl UpstreamProvider for MockProvider {
        async fn complete(&self, request: &Request) -> Result<FullResponse> {
            let mut response = text_response("mock reply", Some(&request.model));
            response.model = request.model.clone();
            Ok(response)
        }

        async fn stream(&self, _request: &Request) -> Result<ChunkStream> {
            Ok(stream::iter(
                vec![
                    Ok(text_chunk("Hello", None)),
                    Ok(text_chunk(" world", None)),
                    Ok(text_chunk("", Some(FinishReason::Stop))),
                ]
                .into_iter(),
            )
            .boxed())
        }
    }

    fn test_state(proxy_api_key: Option<&str>, max_request_size: usize) -> AppState {
        AppState {
            config: Arc::new(GatewayConfig {
                redis_url: None,
                database_url: None,
                proxy_api_key: proxy_api_key.map(String::from),
                admin_api_key: None,
                otel_endpoint: None,
                policy_config: None,
                max_request_size,
                upstream_base_url: "http://unused".into(),
                upstream_api_key: None,
                policy_timeout: None,
                port: 0,
            }),
            policy: Arc::new(NoOpPolicy),
            provider: Arc::new(MockProvider),
            emitter: EventEmitter::null(),
        }
    }

    fn openai_body(stream: bool) -> Value {
        json!({
            "model": "gpt-4o",
            "stream": stream,
            "messages": [{"role": "user", "content": "hi"}]
        })
    }

    async fn post(
        state: AppState,
        path: &str,
        body: Value,
        api_key: Option<&str>,
    ) -> axum::http::Response<Body> {
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = api_key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        app_router(state).oneshot(request).await.unwrap()
    }

    async fn body_string(response: axum::http::Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app_router(test_state(None, DEFAULT_MAX_REQUEST_SIZE))
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("\"status\":\"ok\""));
    }

    #[tokio::test]
    async fn test_auth_required() {
        let state = test_state(Some("secret-key"), DEFAULT_MAX_REQUEST_SIZE);
        let response = post(state.clone(), "/v1/chat/completions", openai_body(false), None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response =
            post(state.clone(), "/v1/chat/completions", openai_body(false), Some("wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response =
            post(state, "/v1/chat/completions", openai_body(false), Some("secret-key")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_x_api_key_accepted() {
        let state = test_state(Some("secret-key"), DEFAULT_MAX_REQUEST_SIZE);
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", "secret-key")
            .body(Body::from(openai_body(false).to_string()))
            .unwrap();
        let response = app_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_non_streaming_openai() {
        let state = test_state(None, DEFAULT_MAX_REQUEST_SIZE);
        let response = post(state, "/v1/chat/completions", openai_body(false), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("mock reply"));
        assert!(body.contains("\"finish_reason\":\"stop\""));
    }

    #[tokio::test]
    async fn test_streaming_openai_sse() {
        let state = test_state(None, DEFAULT_MAX_REQUEST_SIZE);
        let response = post(state, "/v1/chat/completions", openai_body(true), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        let body = body_string(response).await;
        assert!(body.contains("Hello"));
        assert!(body.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn test_anthropic_endpoint_non_streaming() {
        let state = test_state(None, DEFAULT_MAX_REQUEST_SIZE);
        let body = json!({
            "model": "claude-3-opus",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "hi"}]
        });
        let response = post(state, "/v1/messages", body, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("\"type\":\"message\""));
        assert!(body.contains("\"stop_reason\":\"end_turn\""));
    }

    #[tokio::test]
    async fn test_anthropic_streaming_sse() {
        let state = test_state(None, DEFAULT_MAX_REQUEST_SIZE);
        let body = json!({
            "model": "claude-3-opus",
            "max_tokens": 100,
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        });
        let response = post(state, "/v1/messages", body, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.starts_with("event: message_start\n"));
        assert!(body.contains("event: content_block_delta\n"));
        assert!(body.trim_end().ends_with("data: {\"type\":\"message_stop\"}"));
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let state = test_state(None, 256);
        let oversized = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "x".repeat(4096)}]
        });
        let response = post(state, "/v1/chat/completions", oversized, None).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_invalid_body_rejected() {
        let state = test_state(None, DEFAULT_MAX_REQUEST_SIZE);
        let response = post(
            state,
            "/v1/chat/completions",
            json!({"messages": "not-a-list"}),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(body.contains("invalid_request_error"));
    }
}
