//! Constructors for fabricated chunks and responses.
//!
//! Policies that substitute their own output use these instead of hand-rolling
//! IR values: `send_text` / `send_tool_call` on the streaming context and the
//! blocked-response path of judge policies are all backed by this module.

use chrono::Utc;
use uuid::Uuid;

use crate::llm::chunk::{
    ChatChunk, ChunkChoice, Delta, FinishReason, FunctionFragment, ToolCallFragment, CHUNK_OBJECT,
};
use crate::llm::request::ToolCall;
use crate::llm::response::{FullResponse, ResponseChoice, ResponseMessage, RESPONSE_OBJECT};

/// Model marker stamped on policy-fabricated chunks.
pub const POLICY_MODEL: &str = "luthien-policy";

fn new_chunk_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

/// Build a chunk carrying one text-content delta.
pub fn text_chunk(text: impl Into<String>, finish_reason: Option<FinishReason>) -> ChatChunk {
    let text = text.into();
    ChatChunk {
        id: new_chunk_id(),
        object: CHUNK_OBJECT.to_string(),
        created: Utc::now().timestamp(),
        model: POLICY_MODEL.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Delta {
                role: None,
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls: None,
            },
            finish_reason,
        }],
        complete_tool_call: false,
    }
}

/// Build a chunk carrying one complete tool call plus a terminal
/// `finish_reason = tool_calls`. The chunk is flagged so the Anthropic
/// formatter can expand it into a full block sequence.
pub fn tool_call_chunk(tool_call: ToolCall) -> ChatChunk {
    ChatChunk {
        id: new_chunk_id(),
        object: CHUNK_OBJECT.to_string(),
        created: Utc::now().timestamp(),
        model: POLICY_MODEL.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Delta {
                role: None,
                content: None,
                tool_calls: Some(vec![ToolCallFragment {
                    index: 0,
                    id: Some(tool_call.id),
                    call_type: Some(tool_call.call_type),
                    function: Some(FunctionFragment {
                        name: Some(tool_call.function.name),
                        arguments: Some(tool_call.function.arguments),
                    }),
                }]),
            },
            finish_reason: Some(FinishReason::ToolCalls),
        }],
        complete_tool_call: true,
    }
}

/// Build a complete text-only response with `finish_reason = stop`.
pub fn text_response(text: impl Into<String>, model: Option<&str>) -> FullResponse {
    FullResponse {
        id: new_chunk_id(),
        object: RESPONSE_OBJECT.to_string(),
        created: Utc::now().timestamp(),
        model: model.unwrap_or(POLICY_MODEL).to_string(),
        choices: vec![ResponseChoice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: Some(text.into()),
                tool_calls: None,
            },
            finish_reason: Some(FinishReason::Stop),
        }],
        usage: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
