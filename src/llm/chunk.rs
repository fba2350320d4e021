//! Common-format streaming chunk types.
//!
//! The intermediate representation (IR) of a single streaming delta, modeled
//! on OpenAI chat-completion chunks. Every upstream provider's output is
//! converted to this shape before it reaches the policy pipeline, and the
//! client formatters re-serialize it to the wire format the caller asked for.

use serde::{Deserialize, Serialize};

/// Marker value used as `object` on streaming chunks.
pub const CHUNK_OBJECT: &str = "chat.completion.chunk";

fn default_chunk_object() -> String {
    CHUNK_OBJECT.to_string()
}

/// One streaming delta in the common format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChunk {
    /// Response id, stable across all chunks of one response.
    pub id: String,
    /// Object tag, `chat.completion.chunk`.
    #[serde(default = "default_chunk_object")]
    pub object: String,
    /// Creation time, unix seconds.
    pub created: i64,
    /// Model that produced the chunk.
    pub model: String,
    /// Per-choice deltas. Single-choice in the common case.
    pub choices: Vec<ChunkChoice>,
    /// Framework-internal marker: this chunk was fabricated from one complete
    /// tool call (`send_tool_call`). The Anthropic formatter expands such a
    /// chunk into a full start/delta/stop block sequence. Never serialized.
    #[serde(skip)]
    pub complete_tool_call: bool,
}

impl ChatChunk {
    /// The first choice's delta, if any.
    pub fn first_delta(&self) -> Option<&Delta> {
        self.choices.first().map(|c| &c.delta)
    }

    /// The first choice's finish reason, if the chunk carried one.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.first().and_then(|c| c.finish_reason)
    }
}

/// One choice slot within a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Choice index.
    pub index: u32,
    /// The delta payload.
    #[serde(default)]
    pub delta: Delta,
    /// Terminal marker, present at most once per response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Delta payload: a text fragment, tool-call fragments, or a role-only
/// preamble. Content and tool-call fragments never coexist in one delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Role announcement, typically only on the first chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Text content fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool-call fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallFragment>>,
}

impl Delta {
    /// True when the delta carries neither content nor tool fragments.
    pub fn is_empty(&self) -> bool {
        self.content.as_deref().is_none_or(str::is_empty)
            && self.tool_calls.as_ref().is_none_or(Vec::is_empty)
    }
}

/// A fragment of one tool call. `index` is the per-tool-call slot, stable
/// across fragments; `id` and `name` typically appear only on the opening
/// fragment; `arguments` fragments concatenate in arrival order into a JSON
/// document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    /// Tool-call slot.
    pub index: u32,
    /// Tool-call id, opening fragment only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Call type, typically `function`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    /// Function name / arguments fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionFragment>,
}

impl ToolCallFragment {
    /// Name fragment, if present.
    pub fn name(&self) -> Option<&str> {
        self.function.as_ref().and_then(|f| f.name.as_deref())
    }

    /// Arguments fragment, if present.
    pub fn arguments(&self) -> Option<&str> {
        self.function.as_ref().and_then(|f| f.arguments.as_deref())
    }
}

/// Name/arguments fragment of a function call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionFragment {
    /// Function name, typically appears once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Prefix of the arguments JSON document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Terminal marker on a chunk or response choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of turn.
    Stop,
    /// The model is requesting tool execution.
    ToolCalls,
    /// Token limit reached.
    Length,
    /// Provider content filter fired.
    ContentFilter,
    /// Any other provider-specific reason.
    #[serde(other)]
    Other,
}

impl FinishReason {
    /// Wire string in the OpenAI format.
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Other => "other",
        }
    }

    /// Equivalent Anthropic `stop_reason`.
    pub fn anthropic_stop_reason(&self) -> &'static str {
        match self {
            FinishReason::Stop => "end_turn",
            FinishReason::ToolCalls => "tool_use",
            FinishReason::Length => "max_tokens",
            FinishReason::ContentFilter | FinishReason::Other => "end_turn",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
