//! Policy protocol: the hook surface user policies implement.
//!
//! Every operation has a pass-through default, so a policy overrides only
//! what it needs. Hooks receive the request-scoped context; streaming hooks
//! additionally get stream state and the egress helpers.
//!
//! Hook order per chunk is fixed: `on_chunk_received`, then the applicable
//! `*_delta` hook, then the applicable `*_complete` hook, then
//! `on_finish_reason` when the chunk carried one. `on_stream_complete` runs
//! once after ingress is exhausted.

pub mod all_caps;
pub mod context;
pub mod noop;
pub mod sql_protection;
pub mod streaming_context;

use async_trait::async_trait;

use crate::error::Result;
use crate::llm::request::Request;
use crate::llm::response::FullResponse;

pub use context::{PolicyContext, RawHttpRequest};
pub use streaming_context::StreamingPolicyContext;

/// A policy: request/response hooks plus streaming block-lifecycle hooks.
///
/// A policy must not emit overlapping output from both `on_chunk_received`
/// and a specialized hook for the same chunk: either it forwards raw chunks
/// (at most one `push_chunk` per ingress chunk) or it substitutes fully
/// synthesized chunks via `send_text` / `send_tool_call`.
#[async_trait]
pub trait Policy: Send + Sync {
    /// Short policy name for spans and events.
    fn name(&self) -> &str {
        "policy"
    }

    /// Transform or reject the incoming request before it is dispatched
    /// upstream. Return `GatewayError::PolicyReject` to block the call.
    async fn on_request(&self, request: Request, _ctx: &PolicyContext) -> Result<Request> {
        Ok(request)
    }

    /// Transform the complete non-streaming response.
    async fn on_response(&self, response: FullResponse, _ctx: &PolicyContext) -> Result<FullResponse> {
        Ok(response)
    }

    /// Called for every ingress chunk. Default: forward the raw chunk to the
    /// egress queue.
    async fn on_chunk_received(&self, ctx: &mut StreamingPolicyContext) -> Result<()> {
        ctx.passthrough_last_chunk().await
    }

    /// Called when the current block is a content block after this chunk.
    async fn on_content_delta(&self, _ctx: &mut StreamingPolicyContext) -> Result<()> {
        Ok(())
    }

    /// Called when a content block just completed.
    async fn on_content_complete(&self, _ctx: &mut StreamingPolicyContext) -> Result<()> {
        Ok(())
    }

    /// Called when the current block is a tool-call block after this chunk.
    async fn on_tool_call_delta(&self, _ctx: &mut StreamingPolicyContext) -> Result<()> {
        Ok(())
    }

    /// Called when a tool-call block just completed.
    async fn on_tool_call_complete(&self, _ctx: &mut StreamingPolicyContext) -> Result<()> {
        Ok(())
    }

    /// Called when this chunk carried a `finish_reason`.
    async fn on_finish_reason(&self, _ctx: &mut StreamingPolicyContext) -> Result<()> {
        Ok(())
    }

    /// Called once after the ingress stream is exhausted.
    async fn on_stream_complete(&self, _ctx: &mut StreamingPolicyContext) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy").field("name", &self.name()).finish()
    }
}
