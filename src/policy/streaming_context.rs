//! Streaming policy context: what hooks see while a response streams.
//!
//! Wraps the per-transaction [`PolicyContext`] and owns the ingress stream
//! state, the egress channel, and the keepalive handle. The emission helpers
//! here are the only way policies put chunks on the wire.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{GatewayError, Result};
use crate::llm::chunk::ChatChunk;
use crate::llm::chunk_builders::{text_chunk, tool_call_chunk};
use crate::llm::request::ToolCall;
use crate::observability::recorder::TransactionRecorder;
use crate::policy::context::PolicyContext;
use crate::streaming::assembler::StreamAssembler;
use crate::streaming::executor::KeepaliveHandle;
use crate::streaming::state::StreamState;

/// Context handed to every streaming hook of a [`crate::policy::Policy`].
pub struct StreamingPolicyContext {
    /// The per-transaction context (scratchpad, emitter, request).
    pub policy_ctx: Arc<PolicyContext>,
    assembler: StreamAssembler,
    egress: mpsc::Sender<Option<ChatChunk>>,
    keepalive: KeepaliveHandle,
    recorder: Arc<TransactionRecorder>,
}

impl StreamingPolicyContext {
    /// Context for one streaming response.
    pub fn new(
        policy_ctx: Arc<PolicyContext>,
        egress: mpsc::Sender<Option<ChatChunk>>,
        keepalive: KeepaliveHandle,
        recorder: Arc<TransactionRecorder>,
    ) -> Self {
        Self {
            policy_ctx,
            assembler: StreamAssembler::new(),
            egress,
            keepalive,
            recorder,
        }
    }

    /// The ingress stream state: current block, just-completed block, raw
    /// chunk buffer, finish reason.
    pub fn state(&self) -> &StreamState {
        self.assembler.state()
    }

    /// Mutable assembler access for the executor's drive loop.
    pub(crate) fn assembler_mut(&mut self) -> &mut StreamAssembler {
        &mut self.assembler
    }

    /// Reset the executor's inactivity deadline. Long-running hooks call this
    /// to signal they are still working.
    pub fn keepalive(&self) {
        self.keepalive.touch();
    }

    /// Enqueue one chunk onto the egress queue, recording it for
    /// observability.
    pub async fn push_chunk(&mut self, chunk: ChatChunk) -> Result<()> {
        self.recorder.add_egress_chunk(&chunk);
        self.egress
            .send(Some(chunk))
            .await
            .map_err(|_| GatewayError::PipelineClosed)
    }

    /// Fabricate and enqueue a well-formed chunk carrying a text delta.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.push_chunk(text_chunk(text, None)).await
    }

    /// Fabricate and enqueue a chunk carrying one complete tool call plus a
    /// terminal `finish_reason = tool_calls`.
    pub async fn send_tool_call(&mut self, call: ToolCall) -> Result<()> {
        self.push_chunk(tool_call_chunk(call)).await
    }

    /// Replay raw ingress chunks from the last-emission watermark to the end
    /// of the raw buffer.
    pub async fn passthrough_accumulated_chunks(&mut self) -> Result<()> {
        let pending: Vec<ChatChunk> = self.assembler.state().unemitted_chunks().to_vec();
        self.assembler.state_mut().mark_emitted();
        for chunk in pending {
            self.push_chunk(chunk).await?;
        }
        Ok(())
    }

    /// Replay only the most recent ingress chunk, advancing the watermark
    /// past everything buffered so far.
    pub async fn passthrough_last_chunk(&mut self) -> Result<()> {
        let last = self.assembler.state().last_chunk().cloned();
        self.assembler.state_mut().mark_emitted();
        if let Some(chunk) = last {
            self.push_chunk(chunk).await?;
        }
        Ok(())
    }

    /// Drop the buffered-but-unemitted raw chunks without sending them.
    /// Substituting policies call this after `send_text` / `send_tool_call`
    /// so a later passthrough cannot replay the replaced region.
    pub fn discard_accumulated_chunks(&mut self) {
        self.assembler.state_mut().mark_emitted();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chunk::FinishReason;
    use crate::observability::emitter::EventEmitter;

    fn test_context(
        capacity: usize,
    ) -> (StreamingPolicyContext, mpsc::Receiver<Option<ChatChunk>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let ctx = StreamingPolicyContext::new(
            Arc::new(PolicyContext::for_testing()),
            tx,
            KeepaliveHandle::disabled(),
            Arc::new(TransactionRecorder::new("tx", EventEmitter::null())),
        );
        (ctx, rx)
    }

    #[tokio::test]
    async fn test_send_text_enqueues_fabricated_chunk() {
        let (mut ctx, mut rx) = test_context(4);
        ctx.send_text("hello").await.unwrap();

        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk.first_delta().unwrap().content.as_deref(), Some("hello"));
        assert_eq!(chunk.finish_reason(), None);
    }

    #[tokio::test]
    async fn test_send_tool_call_is_terminal() {
        let (mut ctx, mut rx) = test_context(4);
        ctx.send_tool_call(ToolCall::function("c1", "f", "{}")).await.unwrap();

        let chunk = rx.recv().await.unwrap().unwrap();
        assert!(chunk.complete_tool_call);
        assert_eq!(chunk.finish_reason(), Some(FinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn test_passthrough_accumulated_replays_from_watermark() {
        let (mut ctx, mut rx) = test_context(8);
        for text in ["a", "b", "c"] {
            ctx.assembler_mut().feed(&text_chunk(text, None)).unwrap();
        }
        ctx.passthrough_accumulated_chunks().await.unwrap();

        for expected in ["a", "b", "c"] {
            let chunk = rx.recv().await.unwrap().unwrap();
            assert_eq!(chunk.first_delta().unwrap().content.as_deref(), Some(expected));
        }

        // Watermark advanced: nothing further to replay.
        ctx.passthrough_accumulated_chunks().await.unwrap();
        ctx.assembler_mut().feed(&text_chunk("d", None)).unwrap();
        ctx.passthrough_accumulated_chunks().await.unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk.first_delta().unwrap().content.as_deref(), Some("d"));
    }

    #[tokio::test]
    async fn test_passthrough_last_chunk_only() {
        let (mut ctx, mut rx) = test_context(8);
        ctx.assembler_mut().feed(&text_chunk("skipped", None)).unwrap();
        ctx.assembler_mut().feed(&text_chunk("latest", None)).unwrap();
        ctx.passthrough_last_chunk().await.unwrap();

        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk.first_delta().unwrap().content.as_deref(), Some("latest"));

        // Everything before the watermark is considered emitted now.
        ctx.passthrough_accumulated_chunks().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_discard_accumulated() {
        let (mut ctx, mut rx) = test_context(8);
        ctx.assembler_mut().feed(&text_chunk("secret", None)).unwrap();
        ctx.discard_accumulated_chunks();
        ctx.passthrough_accumulated_chunks().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_push_chunk_after_receiver_drop_is_pipeline_closed() {
        let (mut ctx, rx) = test_context(1);
        drop(rx);
        let err = ctx.send_text("x").await.unwrap_err();
        assert!(matches!(err, GatewayError::PipelineClosed));
    }
}
