//! Semantic blocks reconstructed from streaming deltas.

use serde::{Deserialize, Serialize};

use crate::llm::request::ToolCall;

/// A contiguous semantic region of the response: accumulated text or one
/// accumulated tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamBlock {
    /// Accumulated text content.
    Content(ContentBlock),
    /// Accumulated tool call.
    ToolCall(ToolCallBlock),
}

impl StreamBlock {
    /// True once the block has been marked complete.
    pub fn is_complete(&self) -> bool {
        match self {
            StreamBlock::Content(b) => b.complete,
            StreamBlock::ToolCall(b) => b.complete,
        }
    }

    /// Borrow as a content block, if that is what this is.
    pub fn as_content(&self) -> Option<&ContentBlock> {
        match self {
            StreamBlock::Content(b) => Some(b),
            StreamBlock::ToolCall(_) => None,
        }
    }

    /// Borrow as a tool-call block, if that is what this is.
    pub fn as_tool_call(&self) -> Option<&ToolCallBlock> {
        match self {
            StreamBlock::ToolCall(b) => Some(b),
            StreamBlock::Content(_) => None,
        }
    }
}

/// Text accumulated from content deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Id of the chunk stream that opened the block.
    pub id: String,
    /// Accumulated text.
    pub text: String,
    /// Whether the block has completed.
    pub complete: bool,
}

/// One tool call accumulated from fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallBlock {
    /// Tool-call slot index.
    pub index: u32,
    /// Tool-call id. Set by the opening fragment and sticky thereafter.
    pub id: String,
    /// Function name. Sticky like `id`.
    pub name: String,
    /// Arguments fragments concatenated in arrival order.
    pub arguments: String,
    /// Whether the block has completed.
    pub complete: bool,
}

impl ToolCallBlock {
    /// The assembled call in request form, for judge policies and replay.
    pub fn tool_call(&self) -> ToolCall {
        ToolCall::function(self.id.clone(), self.name.clone(), self.arguments.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
