//! Incremental block assembly from streaming chunks.
//!
//! [`StreamAssembler::feed`] is a pure state update; it performs no I/O. The
//! policy executor drives it chunk by chunk and invokes hooks between feeds.
//!
//! Transition rules per choice (single-choice common case):
//!
//! | current           | incoming delta              | action                          |
//! |-------------------|-----------------------------|---------------------------------|
//! | none              | text content                | open content block, append      |
//! | content           | text content                | append                          |
//! | content           | tool-call fragment          | complete content, open tool     |
//! | tool call (i)     | fragment, same index        | merge                           |
//! | tool call (i)     | fragment, different index   | complete current, open new      |
//! | tool call         | text content                | complete tool, open content     |
//! | any               | finish_reason               | complete current, record reason |
//! | any               | empty (role-only) delta     | no change                       |

use crate::error::{GatewayError, Result};
use crate::llm::chunk::{ChatChunk, ToolCallFragment};
use crate::streaming::blocks::{ContentBlock, StreamBlock, ToolCallBlock};
use crate::streaming::state::StreamState;

/// State machine turning a chunk stream into block lifecycle events.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    state: StreamState,
}

impl StreamAssembler {
    /// Fresh assembler with empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the stream state.
    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Mutable access, used by the emission helpers to move the watermark.
    pub fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    /// Apply one chunk. Clears `just_completed` from the previous step,
    /// registers the raw chunk, and applies the transition table.
    pub fn feed(&mut self, chunk: &ChatChunk) -> Result<()> {
        self.state.just_completed = None;
        self.state.raw_chunks.push(chunk.clone());

        let Some(choice) = chunk.choices.first() else {
            return Ok(());
        };
        let delta = &choice.delta;

        let has_content = delta.content.as_deref().is_some_and(|c| !c.is_empty());
        let has_tool_calls = delta.tool_calls.as_ref().is_some_and(|t| !t.is_empty());
        if has_content && has_tool_calls {
            return Err(GatewayError::MalformedChunk(
                "delta carries both content and tool_calls".to_string(),
            ));
        }

        if has_content {
            let text = delta.content.as_deref().unwrap_or("");
            self.apply_content(&chunk.id, text);
        } else if has_tool_calls {
            for fragment in delta.tool_calls.as_deref().unwrap_or(&[]) {
                self.apply_tool_fragment(fragment);
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.complete_current();
            self.state.finish_reason = Some(reason);
        }

        Ok(())
    }

    fn apply_content(&mut self, chunk_id: &str, text: &str) {
        if let Some(StreamBlock::Content(block)) = &mut self.state.current_block {
            block.text.push_str(text);
            return;
        }
        if self.state.current_block.is_some() {
            self.complete_current();
        }
        self.open_content(chunk_id, text);
    }

    fn apply_tool_fragment(&mut self, fragment: &ToolCallFragment) {
        if let Some(StreamBlock::ToolCall(block)) = &mut self.state.current_block {
            if block.index == fragment.index {
                // id and name are sticky: later fragments never overwrite them.
                if block.id.is_empty() {
                    if let Some(id) = fragment.id.as_deref() {
                        block.id.push_str(id);
                    }
                }
                if block.name.is_empty() {
                    if let Some(name) = fragment.name() {
                        block.name.push_str(name);
                    }
                }
                if let Some(arguments) = fragment.arguments() {
                    block.arguments.push_str(arguments);
                }
                return;
            }
        }
        if self.state.current_block.is_some() {
            self.complete_current();
        }
        self.open_tool_call(fragment);
    }

    fn open_content(&mut self, chunk_id: &str, text: &str) {
        self.state.current_block = Some(StreamBlock::Content(ContentBlock {
            id: chunk_id.to_string(),
            text: text.to_string(),
            complete: false,
        }));
    }

    fn open_tool_call(&mut self, fragment: &ToolCallFragment) {
        self.state.current_block = Some(StreamBlock::ToolCall(ToolCallBlock {
            index: fragment.index,
            id: fragment.id.clone().unwrap_or_default(),
            name: fragment.name().unwrap_or_default().to_string(),
            arguments: fragment.arguments().unwrap_or_default().to_string(),
            complete: false,
        }));
    }

    fn complete_current(&mut self) {
        if let Some(mut block) = self.state.current_block.take() {
            match &mut block {
                StreamBlock::Content(b) => b.complete = true,
                StreamBlock::ToolCall(b) => b.complete = true,
            }
            self.state.blocks.push(block.clone());
            self.state.just_completed = Some(block);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
