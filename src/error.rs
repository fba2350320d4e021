//! Error taxonomy for the gateway.
//!
//! Every failure mode that can terminate a request pipeline has its own
//! variant; sink failures and recorder truncation are deliberately absent
//! because they are recovered locally and never fail a request.

use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

/// Result type alias used throughout the gateway.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Top-level error type for the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A policy refused the request or response in `on_request`/`on_response`.
    #[error("policy rejected: {0}")]
    PolicyReject(String),

    /// The policy executor saw no `keepalive()` within the configured window.
    #[error("policy execution timed out after {0:?} without keepalive")]
    PolicyTimeout(Duration),

    /// The block assembler could not interpret an IR delta.
    #[error("malformed stream chunk: {0}")]
    MalformedChunk(String),

    /// The client formatter's SSE put exceeded its timeout; the client is
    /// stalled or gone.
    #[error("client stalled: SSE write exceeded {0:?}")]
    ClientStalled(Duration),

    /// The upstream provider failed.
    #[error("upstream error: {0}")]
    Upstream(UpstreamError),

    /// A pipeline channel closed before its sentinel; the peer stage is gone.
    #[error("streaming pipeline closed unexpectedly")]
    PipelineClosed,

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP transport failure talking to the upstream.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encode/decode failure on a wire payload.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A pipeline task panicked or was aborted out from under us.
    #[error("internal pipeline failure: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Short machine-readable tag for error events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::PolicyReject(_) => "policy_reject",
            GatewayError::PolicyTimeout(_) => "policy_timeout",
            GatewayError::MalformedChunk(_) => "malformed_chunk",
            GatewayError::ClientStalled(_) => "client_stalled",
            GatewayError::Upstream(_) => "upstream_error",
            GatewayError::PipelineClosed => "pipeline_closed",
            GatewayError::Config(_) => "config_error",
            GatewayError::Http(_) => "http_error",
            GatewayError::Json(_) => "json_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }
}

// ---------------------------------------------------------------------------
// Upstream errors
// ---------------------------------------------------------------------------

/// Classified failure from the upstream LLM provider.
#[derive(Debug, Clone)]
pub struct UpstreamError {
    /// HTTP status the provider returned (0 for connection-level failures).
    pub status: u16,
    /// Classified kind.
    pub kind: UpstreamErrorKind,
    /// Provider-supplied message.
    pub message: String,
    /// Provider name, when known.
    pub provider: Option<String>,
}

impl UpstreamError {
    /// Build an upstream error from an HTTP status code and message.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            kind: UpstreamErrorKind::from_status(status),
            message: message.into(),
            provider: None,
        }
    }

    /// Build a connection-level upstream error (no HTTP status).
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            kind: UpstreamErrorKind::Connection,
            message: message.into(),
            provider: None,
        }
    }

    /// HTTP status to surface to the client.
    pub fn client_status(&self) -> u16 {
        match self.kind {
            UpstreamErrorKind::Connection => 502,
            _ if self.status == 0 => 502,
            _ => self.status,
        }
    }

    /// Error body in the OpenAI wire format.
    pub fn openai_body(&self) -> Value {
        json!({
            "error": {
                "message": self.message,
                "type": self.kind.openai_type(),
                "param": null,
                "code": null,
            }
        })
    }

    /// Error body in the Anthropic wire format.
    pub fn anthropic_body(&self) -> Value {
        json!({
            "type": "error",
            "error": {
                "type": self.kind.anthropic_type(),
                "message": self.message,
            }
        })
    }
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.kind.openai_type(), self.status, self.message)
    }
}

/// Classification of upstream provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// 401: bad or expired upstream credential.
    Authentication,
    /// 429: provider rate limit hit.
    RateLimit,
    /// 400/404/422: the forwarded request was invalid.
    InvalidRequest,
    /// 503/529: provider overloaded.
    Overloaded,
    /// Any other provider-side failure.
    Api,
    /// Transport-level failure; no HTTP response at all.
    Connection,
}

impl UpstreamErrorKind {
    /// Classify from an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => UpstreamErrorKind::Authentication,
            429 => UpstreamErrorKind::RateLimit,
            400 | 404 | 422 => UpstreamErrorKind::InvalidRequest,
            503 | 529 => UpstreamErrorKind::Overloaded,
            _ => UpstreamErrorKind::Api,
        }
    }

    /// `error.type` value in the OpenAI wire format.
    pub fn openai_type(&self) -> &'static str {
        match self {
            UpstreamErrorKind::Authentication => "authentication_error",
            UpstreamErrorKind::RateLimit => "rate_limit_error",
            UpstreamErrorKind::InvalidRequest => "invalid_request_error",
            UpstreamErrorKind::Overloaded => "overloaded_error",
            UpstreamErrorKind::Api => "api_error",
            UpstreamErrorKind::Connection => "api_connection_error",
        }
    }

    /// `error.type` value in the Anthropic wire format.
    pub fn anthropic_type(&self) -> &'static str {
        match self {
            UpstreamErrorKind::Authentication => "authentication_error",
            UpstreamErrorKind::RateLimit => "rate_limit_error",
            UpstreamErrorKind::InvalidRequest => "invalid_request_error",
            UpstreamErrorKind::Overloaded => "overloaded_error",
            UpstreamErrorKind::Api => "api_error",
            UpstreamErrorKind::Connection => "api_error",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
