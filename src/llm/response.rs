//! Common-format full (non-streaming) response types.

use serde::{Deserialize, Serialize};

use crate::llm::chunk::FinishReason;
use crate::llm::request::ToolCall;

/// Marker value used as `object` on full responses.
pub const RESPONSE_OBJECT: &str = "chat.completion";

fn default_response_object() -> String {
    RESPONSE_OBJECT.to_string()
}

/// A complete chat completion response in the common format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullResponse {
    /// Response id.
    pub id: String,
    /// Object tag, `chat.completion`.
    #[serde(default = "default_response_object")]
    pub object: String,
    /// Creation time, unix seconds.
    pub created: i64,
    /// Model that produced the response.
    pub model: String,
    /// Response choices.
    pub choices: Vec<ResponseChoice>,
    /// Token accounting, when the provider reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl FullResponse {
    /// The first choice's message content, empty when absent.
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or("")
    }

    /// The first choice's finish reason.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.first().and_then(|c| c.finish_reason)
    }

    /// The first choice's tool calls, if any.
    pub fn tool_calls(&self) -> Option<&[ToolCall]> {
        self.choices
            .first()
            .and_then(|c| c.message.tool_calls.as_deref())
    }
}

/// One response choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseChoice {
    /// Choice index.
    pub index: u32,
    /// The assistant message.
    pub message: ResponseMessage,
    /// Terminal reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// The assistant message of a response choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Always `assistant`.
    pub role: String,
    /// Text content; absent for pure tool-call turns.
    #[serde(default)]
    pub content: Option<String>,
    /// Tool calls requested by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// Token accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens consumed.
    pub prompt_tokens: u32,
    /// Completion tokens produced.
    pub completion_tokens: u32,
    /// Sum of the two.
    pub total_tokens: u32,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
