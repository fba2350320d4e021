//! Policy executor: drives block assembly, dispatches hooks, and enforces the
//! keepalive-based inactivity timeout.
//!
//! Hook dispatch order per chunk: `keepalive()`, `on_chunk_received`, the
//! applicable `*_complete` hook, the applicable `*_delta` hook, then
//! `on_finish_reason` when the chunk carried one. A block's completion is
//! always observed before the first delta of its successor block, so a
//! content block that ends because a tool call begins reports
//! `on_content_complete` ahead of `on_tool_call_delta`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{GatewayError, Result};
use crate::llm::chunk::ChatChunk;
use crate::llm::provider::ChunkStream;
use crate::observability::recorder::TransactionRecorder;
use crate::policy::{Policy, PolicyContext, StreamingPolicyContext};
use crate::streaming::blocks::StreamBlock;

// ---------------------------------------------------------------------------
// KeepaliveHandle
// ---------------------------------------------------------------------------

/// Shared inactivity deadline. `touch()` resets the deadline; the monitor
/// sleeps until the deadline and fires `PolicyTimeout` only if it was not
/// extended in the meantime. Exactly one sleep per extension, no polling.
#[derive(Clone)]
pub struct KeepaliveHandle {
    timeout: Option<Duration>,
    deadline: Arc<Mutex<Instant>>,
}

impl KeepaliveHandle {
    /// Handle with the given timeout; `None` disables monitoring.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            deadline: Arc::new(Mutex::new(Instant::now() + timeout.unwrap_or(Duration::ZERO))),
        }
    }

    /// Handle that never times out.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Reset the deadline to `now + timeout`. No-op when disabled.
    pub fn touch(&self) {
        if let Some(timeout) = self.timeout {
            *self.deadline.lock() = Instant::now() + timeout;
        }
    }

    /// Remaining time until the deadline; `None` when disabled.
    pub fn time_until_deadline(&self) -> Option<Duration> {
        self.timeout
            .map(|_| self.deadline.lock().saturating_duration_since(Instant::now()))
    }

    /// Sleep until the deadline passes without extension, then fail with
    /// `PolicyTimeout`. Pends forever when disabled.
    pub async fn monitor(&self) -> Result<()> {
        let Some(timeout) = self.timeout else {
            return std::future::pending().await;
        };
        loop {
            let deadline = *self.deadline.lock();
            tokio::time::sleep_until(deadline.into()).await;
            // Extended while we slept: sleep again toward the new deadline.
            if *self.deadline.lock() <= Instant::now() {
                return Err(GatewayError::PolicyTimeout(timeout));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// StreamingPolicyExecutor
// ---------------------------------------------------------------------------

/// Executes policy hooks over a streaming response.
pub struct StreamingPolicyExecutor {
    timeout: Option<Duration>,
}

impl StreamingPolicyExecutor {
    /// Executor with the given inactivity timeout (`None` disables it).
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Consume the ingress stream, drive the assembler and policy hooks, and
    /// write policy-emitted chunks to `egress`.
    ///
    /// Exactly one `None` sentinel is sent on `egress` before returning,
    /// whether processing succeeded, a hook failed, the assembler rejected a
    /// chunk, or the monitor fired.
    pub async fn process(
        &self,
        ingress: ChunkStream,
        egress: mpsc::Sender<Option<ChatChunk>>,
        policy: Arc<dyn Policy>,
        policy_ctx: Arc<PolicyContext>,
        recorder: Arc<TransactionRecorder>,
    ) -> Result<()> {
        let keepalive = KeepaliveHandle::new(self.timeout);
        let mut ctx = StreamingPolicyContext::new(
            policy_ctx,
            egress.clone(),
            keepalive.clone(),
            recorder.clone(),
        );

        let result = tokio::select! {
            result = Self::drive(ingress, &mut ctx, policy.as_ref(), recorder.as_ref()) => result,
            result = keepalive.monitor() => result,
        };

        // Sentinel even on failure, so a correctly-written drainer exits.
        let _ = egress.send(None).await;
        result
    }

    async fn drive(
        mut ingress: ChunkStream,
        ctx: &mut StreamingPolicyContext,
        policy: &dyn Policy,
        recorder: &TransactionRecorder,
    ) -> Result<()> {
        while let Some(item) = ingress.next().await {
            let chunk = item?;
            ctx.keepalive();
            recorder.add_ingress_chunk(&chunk);
            ctx.assembler_mut().feed(&chunk)?;

            policy.on_chunk_received(ctx).await?;

            let completed_content =
                matches!(ctx.state().just_completed, Some(StreamBlock::Content(_)));
            let completed_tool =
                matches!(ctx.state().just_completed, Some(StreamBlock::ToolCall(_)));
            let current_content =
                matches!(ctx.state().current_block, Some(StreamBlock::Content(_)));
            let current_tool =
                matches!(ctx.state().current_block, Some(StreamBlock::ToolCall(_)));

            if completed_content {
                policy.on_content_complete(ctx).await?;
            } else if completed_tool {
                policy.on_tool_call_complete(ctx).await?;
            }

            if current_content {
                policy.on_content_delta(ctx).await?;
            } else if current_tool {
                policy.on_tool_call_delta(ctx).await?;
            }

            if chunk.finish_reason().is_some() {
                policy.on_finish_reason(ctx).await?;
            }
        }

        policy.on_stream_complete(ctx).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
