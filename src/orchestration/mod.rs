//! Policy orchestration: request hooks, the streaming pipeline, and full
//! responses.
//!
//! The streaming pipeline runs the executor and the client formatter as
//! sibling tasks connected by bounded channels; a supervisor drains the SSE
//! queue toward the HTTP layer. When any stage fails, the supervisor aborts
//! the siblings, emits a final error event, and surfaces the failure to the
//! drainer, so an in-flight SSE stream ends without its normal terminator.

use std::time::Duration;

use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::error::{GatewayError, Result};
use crate::llm::provider::ChunkStream;
use crate::llm::request::Request;
use crate::llm::response::FullResponse;
use crate::observability::emitter::EventEmitter;
use crate::observability::recorder::TransactionRecorder;
use crate::policy::{Policy, PolicyContext};
use crate::streaming::executor::StreamingPolicyExecutor;
use crate::streaming::formatter::{
    AnthropicFormatter, ClientFormat, ClientFormatter, OpenAiFormatter, SSE_PUT_TIMEOUT,
};

/// Default bound for the pipeline queues. Pure circuit breaker: a full queue
/// blocks the producer until the consumer catches up.
pub const DEFAULT_QUEUE_SIZE: usize = 10_000;

/// Per-transaction pipeline wiring.
pub struct PolicyOrchestrator {
    policy: Arc<dyn Policy>,
    client_format: ClientFormat,
    recorder: Arc<TransactionRecorder>,
    emitter: EventEmitter,
    policy_timeout: Option<Duration>,
    sse_put_timeout: Duration,
    queue_size: usize,
}

impl PolicyOrchestrator {
    /// Orchestrator for one transaction.
    pub fn new(
        policy: Arc<dyn Policy>,
        client_format: ClientFormat,
        recorder: Arc<TransactionRecorder>,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            policy,
            client_format,
            recorder,
            emitter,
            policy_timeout: None,
            sse_put_timeout: SSE_PUT_TIMEOUT,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }

    /// Enable the policy inactivity timeout.
    pub fn with_policy_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.policy_timeout = timeout;
        self
    }

    /// Override the SSE put timeout (stalled-client detection).
    pub fn with_sse_put_timeout(mut self, timeout: Duration) -> Self {
        self.sse_put_timeout = timeout;
        self
    }

    /// Override the pipeline queue bound.
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Apply the policy's request hook and record the pre/post pair.
    ///
    /// A `PolicyReject` from the hook propagates unchanged to the HTTP layer.
    pub async fn process_request(&self, request: Request, ctx: &Arc<PolicyContext>) -> Result<Request> {
        let span = tracing::info_span!(
            "policy.process_request",
            policy.name = self.policy.name(),
            request.model = %request.model,
            luthien.transaction_id = %ctx.transaction_id,
        );
        async {
            ctx.set_request(request.clone());
            let final_request = self.policy.on_request(request.clone(), ctx).await?;
            self.recorder.record_request(&request, &final_request).await;
            ctx.set_request(final_request.clone());
            Ok(final_request)
        }
        .instrument(span)
        .await
    }

    /// Run the streaming pipeline over the upstream chunk stream.
    ///
    /// Returns a stream of SSE frame strings; an `Err` item means the
    /// pipeline failed after streaming began and the HTTP body must end
    /// without its normal terminator.
    pub fn process_streaming_response(
        &self,
        upstream: ChunkStream,
        ctx: Arc<PolicyContext>,
    ) -> ReceiverStream<Result<String>> {
        let (egress_tx, egress_rx) = mpsc::channel(self.queue_size);
        let (sse_tx, sse_rx) = mpsc::channel(self.queue_size);
        let (out_tx, out_rx) = mpsc::channel(self.queue_size);

        let model = ctx.request().map(|r| r.model).unwrap_or_default();
        let mut formatter: Box<dyn ClientFormatter> = match self.client_format {
            ClientFormat::OpenAi => {
                Box::new(OpenAiFormatter::new().with_put_timeout(self.sse_put_timeout))
            }
            ClientFormat::Anthropic => Box::new(
                AnthropicFormatter::new(ctx.transaction_id.clone(), model)
                    .with_put_timeout(self.sse_put_timeout),
            ),
        };

        let executor = StreamingPolicyExecutor::new(self.policy_timeout);
        let policy = self.policy.clone();
        let recorder = self.recorder.clone();

        let mut stages: JoinSet<Result<()>> = JoinSet::new();
        {
            let recorder = recorder.clone();
            stages.spawn(async move {
                executor.process(upstream, egress_tx, policy, ctx, recorder).await
            });
        }
        stages.spawn(async move { formatter.process(egress_rx, sse_tx).await });

        let transaction_id = self.recorder_transaction_id();
        tokio::spawn(Self::supervise(
            stages,
            sse_rx,
            out_tx,
            recorder,
            self.emitter.clone(),
            transaction_id,
        ));

        ReceiverStream::new(out_rx)
    }

    /// Apply the policy's response hook to a non-streaming response and
    /// record the pre/post pair.
    pub async fn process_full_response(
        &self,
        response: FullResponse,
        ctx: &Arc<PolicyContext>,
    ) -> Result<FullResponse> {
        let span = tracing::info_span!(
            "policy.process_response",
            policy.name = self.policy.name(),
            luthien.transaction_id = %ctx.transaction_id,
        );
        async {
            let final_response = self.policy.on_response(response.clone(), ctx).await?;
            self.recorder.record_response(&response, &final_response).await;
            Ok(final_response)
        }
        .instrument(span)
        .await
    }

    fn recorder_transaction_id(&self) -> String {
        // The recorder is per-transaction; reuse its id for the error event.
        self.recorder.transaction_id().to_string()
    }

    /// Forward SSE frames to the drainer while watching the stage tasks.
    /// The biased order makes a stage failure win over a queued frame, so a
    /// trailing `[DONE]`/`message_stop` produced between a failure and its
    /// observation is never forwarded.
    async fn supervise(
        mut stages: JoinSet<Result<()>>,
        mut sse_rx: mpsc::Receiver<Option<String>>,
        out_tx: mpsc::Sender<Result<String>>,
        recorder: Arc<TransactionRecorder>,
        emitter: EventEmitter,
        transaction_id: String,
    ) {
        let mut failure: Option<GatewayError> = None;
        loop {
            tokio::select! {
                biased;
                Some(joined) = stages.join_next(), if !stages.is_empty() => {
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(error)) => {
                            failure = Some(error);
                            break;
                        }
                        Err(join_error) => {
                            failure = Some(GatewayError::Internal(join_error.to_string()));
                            break;
                        }
                    }
                }
                frame = sse_rx.recv() => {
                    match frame {
                        Some(Some(frame)) => {
                            // The drainer dropped the stream: client is gone.
                            if out_tx.send(Ok(frame)).await.is_err() {
                                break;
                            }
                        }
                        Some(None) | None => break,
                    }
                }
            }
        }

        stages.abort_all();
        while stages.join_next().await.is_some() {}

        if let Some(error) = failure {
            emitter
                .emit(
                    &transaction_id,
                    "transaction.error",
                    &json!({
                        "error": {"type": error.kind(), "message": error.to_string()},
                    }),
                )
                .await;
            let _ = out_tx.send(Err(error)).await;
        }

        recorder.finalize_streaming_response().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::{stream, StreamExt};

    use crate::llm::chunk::{ChatChunk, FinishReason};
    use crate::llm::chunk_builders::{text_chunk, text_response};
    use crate::policy::noop::NoOpPolicy;
    use crate::policy::StreamingPolicyContext;

    fn scripted(chunks: Vec<ChatChunk>) -> ChunkStream {
        stream::iter(chunks.into_iter().map(Ok)).boxed()
    }

    fn orchestrator(policy: Arc<dyn Policy>, format: ClientFormat) -> PolicyOrchestrator {
        let emitter = EventEmitter::null();
        let recorder = Arc::new(TransactionRecorder::new("txn-test", emitter.clone()));
        PolicyOrchestrator::new(policy, format, recorder, emitter)
    }

    async fn collect(mut stream: ReceiverStream<Result<String>>) -> Vec<Result<String>> {
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn test_streaming_passthrough_openai() {
        // Scenario S1 end to end through the orchestrator.
        let orch = orchestrator(Arc::new(NoOpPolicy), ClientFormat::OpenAi);
        let ctx = Arc::new(PolicyContext::for_testing());
        let frames = collect(orch.process_streaming_response(
            scripted(vec![
                text_chunk("Hello", None),
                text_chunk(" ", None),
                text_chunk("world", None),
                text_chunk("", Some(FinishReason::Stop)),
            ]),
            ctx,
        ))
        .await;

        let frames: Vec<String> = frames.into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(frames.len(), 5);
        assert!(frames[0].contains("Hello"));
        assert!(frames[3].contains("\"finish_reason\":\"stop\""));
        assert_eq!(frames[4], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_streaming_passthrough_anthropic() {
        let ctx = Arc::new(PolicyContext::for_testing());
        ctx.set_request(
            serde_json::from_value(serde_json::json!({
                "model": "claude-test",
                "messages": [{"role": "user", "content": "hi"}]
            }))
            .unwrap(),
        );

        let orch = orchestrator(Arc::new(NoOpPolicy), ClientFormat::Anthropic);
        let frames = collect(orch.process_streaming_response(
            scripted(vec![
                text_chunk("Hi", None),
                text_chunk("", Some(FinishReason::Stop)),
            ]),
            ctx,
        ))
        .await;

        let frames: Vec<String> = frames.into_iter().map(|f| f.unwrap()).collect();
        assert!(frames[0].starts_with("event: message_start\n"));
        assert!(frames.last().unwrap().starts_with("event: message_stop\n"));
    }

    struct TimingOutPolicy;

    #[async_trait]
    impl Policy for TimingOutPolicy {
        async fn on_chunk_received(&self, _ctx: &mut StreamingPolicyContext) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pipeline_failure_surfaces_error_without_done() {
        // Scenario S5 shape: the timeout error reaches the drainer and no
        // [DONE] frame precedes it.
        let orch = orchestrator(Arc::new(TimingOutPolicy), ClientFormat::OpenAi)
            .with_policy_timeout(Some(Duration::from_millis(100)));
        let ctx = Arc::new(PolicyContext::for_testing());
        let items = collect(
            orch.process_streaming_response(scripted(vec![text_chunk("x", None)]), ctx),
        )
        .await;

        assert!(items.iter().all(|item| match item {
            Ok(frame) => !frame.contains("[DONE]"),
            Err(_) => true,
        }));
        let error = items
            .into_iter()
            .find_map(|item| item.err())
            .expect("pipeline error must surface");
        assert!(matches!(error, GatewayError::PolicyTimeout(_)));
    }

    struct RejectingPolicy;

    #[async_trait]
    impl Policy for RejectingPolicy {
        async fn on_request(&self, _request: Request, _ctx: &PolicyContext) -> Result<Request> {
            Err(GatewayError::PolicyReject("no requests today".into()))
        }
    }

    #[tokio::test]
    async fn test_request_hook_reject_propagates() {
        let orch = orchestrator(Arc::new(RejectingPolicy), ClientFormat::OpenAi);
        let ctx = Arc::new(PolicyContext::for_testing());
        let request: Request = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();

        let err = orch.process_request(request, &ctx).await.unwrap_err();
        assert!(matches!(err, GatewayError::PolicyReject(_)));
    }

    #[tokio::test]
    async fn test_full_response_hook_runs() {
        let orch = orchestrator(Arc::new(NoOpPolicy), ClientFormat::OpenAi);
        let ctx = Arc::new(PolicyContext::for_testing());
        let response = text_response("fine", None);
        let out = orch.process_full_response(response.clone(), &ctx).await.unwrap();
        assert_eq!(out, response);
    }
}
