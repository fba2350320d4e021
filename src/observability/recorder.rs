//! Transaction recorder: buffers original and policy-modified IR so a full
//! pre/post pair can be emitted as a single finalization event.

use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;

use crate::llm::chunk::{ChatChunk, FinishReason};
use crate::llm::request::{Request, ToolCall};
use crate::llm::response::{FullResponse, ResponseChoice, ResponseMessage, RESPONSE_OBJECT};
use crate::observability::emitter::{safe_serialize, EventEmitter};

/// Default cap on buffered chunks per side.
pub const DEFAULT_MAX_CHUNKS_QUEUED: usize = 4096;

#[derive(Debug, Default)]
struct ChunkBuffer {
    chunks: Vec<ChatChunk>,
    truncated: bool,
}

/// Buffers ingress (upstream) and egress (policy-modified) chunks and emits
/// observability events at transaction boundaries.
///
/// If a buffer reaches its cap, further chunks are dropped for recording only
/// (never for delivery) and a truncation warning is emitted once per side.
pub struct TransactionRecorder {
    transaction_id: String,
    emitter: EventEmitter,
    max_chunks_queued: usize,
    ingress: Mutex<ChunkBuffer>,
    egress: Mutex<ChunkBuffer>,
}

impl TransactionRecorder {
    /// Recorder for one transaction with the default buffer cap.
    pub fn new(transaction_id: impl Into<String>, emitter: EventEmitter) -> Self {
        Self::with_cap(transaction_id, emitter, DEFAULT_MAX_CHUNKS_QUEUED)
    }

    /// Recorder with an explicit buffer cap.
    pub fn with_cap(
        transaction_id: impl Into<String>,
        emitter: EventEmitter,
        max_chunks_queued: usize,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            emitter,
            max_chunks_queued,
            ingress: Mutex::new(ChunkBuffer::default()),
            egress: Mutex::new(ChunkBuffer::default()),
        }
    }

    /// Id of the transaction this recorder belongs to.
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Emit the `transaction.request_recorded` event with the pre/post pair.
    pub async fn record_request(&self, original: &Request, final_request: &Request) {
        self.emitter
            .emit(
                &self.transaction_id,
                "transaction.request_recorded",
                &json!({
                    "original_model": original.model,
                    "final_model": final_request.model,
                    "original_request": safe_serialize(original),
                    "final_request": safe_serialize(final_request),
                }),
            )
            .await;
    }

    /// Buffer one upstream chunk.
    pub fn add_ingress_chunk(&self, chunk: &ChatChunk) {
        self.add(&self.ingress, "ingress", chunk);
    }

    /// Buffer one policy-emitted chunk.
    pub fn add_egress_chunk(&self, chunk: &ChatChunk) {
        self.add(&self.egress, "egress", chunk);
    }

    fn add(&self, buffer: &Mutex<ChunkBuffer>, side: &str, chunk: &ChatChunk) {
        let mut buffer = buffer.lock();
        if buffer.chunks.len() >= self.max_chunks_queued {
            if !buffer.truncated {
                buffer.truncated = true;
                self.emitter.record(
                    &self.transaction_id,
                    &format!("transaction.recorder.{side}_truncated"),
                    &json!({ "max_chunks_queued": self.max_chunks_queued }),
                );
            }
            return;
        }
        buffer.chunks.push(chunk.clone());
    }

    /// Emit the non-streaming pre/post response pair.
    pub async fn record_response(&self, original: &FullResponse, final_response: &FullResponse) {
        self.emitter
            .emit(
                &self.transaction_id,
                "transaction.non_streaming_response_recorded",
                &json!({
                    "original_finish_reason": original.finish_reason().map(|r| r.as_str()),
                    "final_finish_reason": final_response.finish_reason().map(|r| r.as_str()),
                    "original_response": safe_serialize(original),
                    "final_response": safe_serialize(final_response),
                }),
            )
            .await;
    }

    /// Reconstruct synthetic full responses from both buffers and emit the
    /// streaming finalization event. A truncated buffer yields a lower-bound
    /// reconstruction; the earlier truncation event documents the gap.
    pub async fn finalize_streaming_response(&self) {
        let (ingress_count, original) = {
            let buffer = self.ingress.lock();
            (buffer.chunks.len(), reconstruct_response(&buffer.chunks))
        };
        let (egress_count, final_response) = {
            let buffer = self.egress.lock();
            (buffer.chunks.len(), reconstruct_response(&buffer.chunks))
        };
        self.emitter
            .emit(
                &self.transaction_id,
                "transaction.streaming_response_recorded",
                &json!({
                    "ingress_chunks": ingress_count,
                    "egress_chunks": egress_count,
                    "original_response": safe_serialize(&original),
                    "final_response": safe_serialize(&final_response),
                }),
            )
            .await;
    }
}

// ---------------------------------------------------------------------------
// Response reconstruction
// ---------------------------------------------------------------------------

/// Rebuild a full response from buffered streaming chunks: text deltas are
/// concatenated, tool-call fragments merged by index, and the terminal
/// `finish_reason` carried through.
pub fn reconstruct_response(chunks: &[ChatChunk]) -> FullResponse {
    let mut id = String::new();
    let mut model = String::new();
    let mut content = String::new();
    let mut created = 0i64;
    let mut finish_reason = None;
    let mut tool_calls: BTreeMap<u32, (String, String, String)> = BTreeMap::new();

    for chunk in chunks {
        if id.is_empty() && !chunk.id.is_empty() {
            id = chunk.id.clone();
        }
        if model.is_empty() && !chunk.model.is_empty() {
            model = chunk.model.clone();
        }
        if created == 0 {
            created = chunk.created;
        }
        let Some(choice) = chunk.choices.first() else {
            continue;
        };
        if let Some(text) = choice.delta.content.as_deref() {
            content.push_str(text);
        }
        for fragment in choice.delta.tool_calls.as_deref().unwrap_or(&[]) {
            let entry = tool_calls.entry(fragment.index).or_default();
            if entry.0.is_empty() {
                if let Some(call_id) = fragment.id.as_deref() {
                    entry.0.push_str(call_id);
                }
            }
            if entry.1.is_empty() {
                if let Some(name) = fragment.name() {
                    entry.1.push_str(name);
                }
            }
            if let Some(arguments) = fragment.arguments() {
                entry.2.push_str(arguments);
            }
        }
        if let Some(reason) = choice.finish_reason {
            finish_reason = Some(reason);
        }
    }

    let tool_calls: Vec<ToolCall> = tool_calls
        .into_values()
        .map(|(call_id, name, arguments)| ToolCall::function(call_id, name, arguments))
        .collect();

    FullResponse {
        id,
        object: RESPONSE_OBJECT.to_string(),
        created,
        model,
        choices: vec![ResponseChoice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: if content.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(content)
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason: Some(finish_reason.unwrap_or(FinishReason::Stop)),
        }],
        usage: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
