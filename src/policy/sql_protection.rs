//! Tool-call judge policy blocking destructive SQL.
//!
//! Buffers the stream and evaluates every completed tool call. Calls whose
//! arguments match a destructive pattern (`DROP TABLE`, `TRUNCATE TABLE`,
//! `DELETE FROM`) are not forwarded; the client instead receives a
//! `BLOCKED:` text message and a terminal `finish_reason = stop`.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde_json::json;

use crate::error::Result;
use crate::llm::chunk::FinishReason;
use crate::llm::chunk_builders::{text_chunk, text_response};
use crate::llm::request::ToolCall;
use crate::llm::response::FullResponse;
use crate::policy::{Policy, PolicyContext, StreamingPolicyContext};

const TERMINAL_SENT_KEY: &str = "sql_protection.terminal_sent";

static DESTRUCTIVE_SQL: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\bDROP\s+TABLE\b",
        r"(?i)\bTRUNCATE\s+TABLE\b",
        r"(?i)\bDELETE\s+FROM\b",
    ])
    .expect("static pattern set")
});

/// Blocks tool calls carrying destructive SQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlProtectionPolicy;

impl SqlProtectionPolicy {
    /// Whether the assembled call should be blocked.
    pub fn is_destructive(call: &ToolCall) -> bool {
        DESTRUCTIVE_SQL.is_match(&call.function.arguments)
    }

    fn blocked_message(call: &ToolCall) -> String {
        format!(
            "BLOCKED: tool call '{}' rejected, arguments contain destructive SQL",
            call.function.name
        )
    }

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
impl Policy for SqlProtectionPolicy {
    fn name(&self) -> &str {
        "SqlProtectionPolicy"
    }

    async fn on_response(&self, response: FullResponse, ctx: &PolicyContext) -> Result<FullResponse> {
        let Some(blocked) = response
            .tool_calls()
            .and_then(|calls| calls.iter().find(|c| Self::is_destructive(c)))
        else {
            return Ok(response);
        };
        ctx.record_event(
            "policy.sql_protection.blocked",
            &json!({
                "tool_name": blocked.function.name,
                "streaming": false,
            }),
        );
        Ok(text_response(Self::blocked_message(blocked), Some(&response.model)))
    }

    // Buffer; judgement happens when a tool call completes.
    async fn on_chunk_received(&self, _ctx: &mut StreamingPolicyContext) -> Result<()> {
        Ok(())
    }

    async fn on_content_complete(&self, ctx: &mut StreamingPolicyContext) -> Result<()> {
        let text = match ctx.state().just_completed.as_ref().and_then(|b| b.as_content()) {
            Some(block) => block.text.clone(),
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
        if Self::is_destructive(&call) {
            ctx.policy_ctx.record_event(
                "policy.sql_protection.blocked",
                &json!({
                    "tool_name": call.function.name,
                    "streaming": true,
                }),
            );
            ctx.send_text(&Self::blocked_message(&call)).await?;
            ctx.push_chunk(text_chunk("", Some(FinishReason::Stop))).await?;
        } else {
            ctx.send_tool_call(call).await?;
        }
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
