//! Reference content-transform policy: uppercases assistant text.
//!
//! Buffers incoming chunks and substitutes each completed content block with
//! a single fabricated chunk carrying the uppercased text. Tool calls pass
//! through re-assembled. Mostly useful as a demo and as a test fixture for
//! block-level substitution.

use async_trait::async_trait;
use serde_json::json;

use crate::error::Result;
use crate::llm::chunk::FinishReason;
use crate::llm::chunk_builders::text_chunk;
use crate::llm::response::FullResponse;
use crate::policy::{Policy, PolicyContext, StreamingPolicyContext};

const TERMINAL_SENT_KEY: &str = "all_caps.terminal_sent";

/// Uppercases every completed content block.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllCapsPolicy;

impl AllCapsPolicy {
    fn terminal_sent(ctx: &StreamingPolicyContext) -> bool {
        ctx.policy_ctx
            .scratchpad()
            .get(TERMINAL_SENT_KEY)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    fn mark_terminal_sent(ctx: &StreamingPolicyContext) {
        ctx.policy_ctx
            .scratchpad()
            .insert(TERMINAL_SENT_KEY.to_string(), json!(true));
    }
}

#[async_trait]
impl Policy for AllCapsPolicy {
    fn name(&self) -> &str {
        "AllCapsPolicy"
    }

    async fn on_response(&self, mut response: FullResponse, _ctx: &PolicyContext) -> Result<FullResponse> {
        for choice in &mut response.choices {
            if let Some(content) = &mut choice.message.content {
                *content = content.to_uppercase();
            }
        }
        Ok(response)
    }

    // Buffer; emission happens at block completion.
    async fn on_chunk_received(&self, _ctx: &mut StreamingPolicyContext) -> Result<()> {
        Ok(())
    }

    async fn on_content_complete(&self, ctx: &mut StreamingPolicyContext) -> Result<()> {
        let text = match ctx.state().just_completed.as_ref().and_then(|b| b.as_content()) {
            Some(block) => block.text.to_uppercase(),
            None => return Ok(()),
        };
        ctx.send_text(&text).await?;
        ctx.discard_accumulated_chunks();
        Ok(())
    }

    async fn on_tool_call_complete(&self, ctx: &mut StreamingPolicyContext) -> Result<()> {
        let call = match ctx.state().just_completed.as_ref().and_then(|b| b.as_tool_call()) {
            Some(block) => block.tool_call(),
            None => return Ok(()),
        };
        ctx.send_tool_call(call).await?;
        ctx.discard_accumulated_chunks();
        Self::mark_terminal_sent(ctx);
        Ok(())
    }

    async fn on_finish_reason(&self, ctx: &mut StreamingPolicyContext) -> Result<()> {
        if Self::terminal_sent(ctx) {
            return Ok(());
        }
        let reason = ctx
            .state()
            .last_chunk()
            .and_then(|c| c.finish_reason())
            .unwrap_or(FinishReason::Stop);
        ctx.push_chunk(text_chunk("", Some(reason))).await?;
        ctx.discard_accumulated_chunks();
        Self::mark_terminal_sent(ctx);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
