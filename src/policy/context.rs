//! Request-scoped policy context.
//!
//! Created once per transaction at request entry and dropped when the
//! response body has been fully emitted. Two concurrent requests never share
//! a context; the scratchpad in particular is per-transaction policy state.

use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use serde_json::Value;

use crate::llm::request::Request;
use crate::observability::emitter::EventEmitter;

/// Captured raw HTTP request, available to policies that need to inspect the
/// wire-level body or headers.
#[derive(Debug, Clone)]
pub struct RawHttpRequest {
    /// Parsed JSON body as received.
    pub body: Value,
    /// Request headers (lowercased names).
    pub headers: HashMap<String, String>,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
}

/// Per-transaction context handed to every policy hook.
pub struct PolicyContext {
    /// Unique id for this transaction.
    pub transaction_id: String,
    /// Client session id, when one was supplied.
    pub session_id: Option<String>,
    /// The raw HTTP request, when captured at the gateway edge.
    pub raw_http_request: Option<RawHttpRequest>,
    request: Mutex<Option<Request>>,
    scratchpad: Mutex<HashMap<String, Value>>,
    emitter: EventEmitter,
}

impl PolicyContext {
    /// Context for a new transaction.
    pub fn new(transaction_id: impl Into<String>, emitter: EventEmitter) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            session_id: None,
            raw_http_request: None,
            request: Mutex::new(None),
            scratchpad: Mutex::new(HashMap::new()),
            emitter,
        }
    }

    /// Attach a session id.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach the captured raw HTTP request.
    pub fn with_raw_http_request(mut self, raw: RawHttpRequest) -> Self {
        self.raw_http_request = Some(raw);
        self
    }

    /// Context with a fixed transaction id and a null emitter, for tests.
    pub fn for_testing() -> Self {
        Self::new("test-txn", EventEmitter::null())
    }

    /// Record the request the policy will see; set before the first hook runs.
    pub fn set_request(&self, request: Request) {
        *self.request.lock() = Some(request);
    }

    /// The current request, if set.
    pub fn request(&self) -> Option<Request> {
        self.request.lock().clone()
    }

    /// Policy-private mutable state for this transaction.
    pub fn scratchpad(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.scratchpad.lock()
    }

    /// The process-wide event emitter.
    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Deliver a structured event tagged with this transaction's id.
    /// Fire-and-forget; never blocks the hook.
    pub fn record_event<T: Serialize>(&self, record_type: &str, data: &T) {
        self.emitter.record(&self.transaction_id, record_type, data);
    }

    /// Open a child trace span. Names are prefixed `policy.` unless already
    /// prefixed; the transaction id is attached automatically.
    pub fn span(&self, name: &str) -> tracing::Span {
        let name = if name.starts_with("policy.") {
            name.to_string()
        } else {
            format!("policy.{name}")
        };
        tracing::info_span!(
            "policy",
            otel.name = %name,
            luthien.transaction_id = %self.transaction_id,
        )
    }
}

impl std::fmt::Debug for PolicyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyContext")
            .field("transaction_id", &self.transaction_id)
            .field("session_id", &self.session_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initialization() {
        let ctx = PolicyContext::for_testing();
        assert_eq!(ctx.transaction_id, "test-txn");
        assert!(ctx.session_id.is_none());
        assert!(ctx.raw_http_request.is_none());
        assert!(ctx.request().is_none());
        assert!(ctx.scratchpad().is_empty());
    }

    #[test]
    fn test_scratchpad_is_mutable() {
        let ctx = PolicyContext::for_testing();
        ctx.scratchpad().insert("key1".into(), json!("value1"));
        ctx.scratchpad().insert("counter".into(), json!(0));

        let counter_is_number = matches!(ctx.scratchpad().get("counter"), Some(Value::Number(_)));
        if counter_is_number {
            ctx.scratchpad().insert("counter".into(), json!(1));
        }

        assert_eq!(ctx.scratchpad().get("key1"), Some(&json!("value1")));
        assert_eq!(ctx.scratchpad().get("counter"), Some(&json!(1)));

        ctx.scratchpad().remove("key1");
        assert!(!ctx.scratchpad().contains_key("key1"));
    }

    #[test]
    fn test_scratchpads_are_isolated() {
        let ctx1 = PolicyContext::new("ctx-1", EventEmitter::null());
        let ctx2 = PolicyContext::new("ctx-2", EventEmitter::null());

        ctx1.scratchpad().insert("value".into(), json!("from ctx1"));
        ctx2.scratchpad().insert("value".into(), json!("from ctx2"));

        assert_eq!(ctx1.scratchpad().get("value"), Some(&json!("from ctx1")));
        assert_eq!(ctx2.scratchpad().get("value"), Some(&json!("from ctx2")));
    }

    #[test]
    fn test_session_and_raw_request() {
        let raw = RawHttpRequest {
            body: json!({"model": "gpt-4o"}),
            headers: HashMap::new(),
            method: "POST".into(),
            path: "/v1/chat/completions".into(),
        };
        let ctx = PolicyContext::new("tx", EventEmitter::null())
            .with_session_id("sess-123")
            .with_raw_http_request(raw);

        assert_eq!(ctx.session_id.as_deref(), Some("sess-123"));
        assert_eq!(ctx.raw_http_request.as_ref().unwrap().path, "/v1/chat/completions");
    }

    #[test]
    fn test_set_request() {
        let ctx = PolicyContext::for_testing();
        let req: Request = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        ctx.set_request(req.clone());
        assert_eq!(ctx.request().unwrap().model, "gpt-4o");
    }

    #[test]
    fn test_span_prefixing() {
        let ctx = PolicyContext::for_testing();
        // Both forms construct a span without panicking; prefix handling is
        // exercised by the name computation path.
        let _a = ctx.span("check_safety");
        let _b = ctx.span("policy.already_prefixed");
    }
}
