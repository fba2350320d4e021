//! Per-response stream state owned by the policy executor.

use crate::llm::chunk::{ChatChunk, FinishReason};
use crate::streaming::blocks::StreamBlock;

/// Mutable state for the life of one streaming response.
///
/// `just_completed` is readable for exactly one assembler step per completion
/// event; [`crate::streaming::assembler::StreamAssembler::feed`] clears it
/// before applying the next chunk.
#[derive(Debug, Default)]
pub struct StreamState {
    /// Blocks completed so far, in ingress order.
    pub blocks: Vec<StreamBlock>,
    /// The block currently accumulating, if any.
    pub current_block: Option<StreamBlock>,
    /// The block completed by the most recent chunk, if any.
    pub just_completed: Option<StreamBlock>,
    /// Raw ingress chunks, for pass-through replay.
    pub raw_chunks: Vec<ChatChunk>,
    /// Index into `raw_chunks` up to which chunks have been emitted.
    pub last_emitted_index: usize,
    /// Terminal reason once seen.
    pub finish_reason: Option<FinishReason>,
}

impl StreamState {
    /// Fresh state for a new response.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent raw ingress chunk.
    pub fn last_chunk(&self) -> Option<&ChatChunk> {
        self.raw_chunks.last()
    }

    /// Raw chunks not yet emitted (from the watermark to the end).
    pub fn unemitted_chunks(&self) -> &[ChatChunk] {
        &self.raw_chunks[self.last_emitted_index..]
    }

    /// Advance the emission watermark to the end of the raw buffer.
    pub fn mark_emitted(&mut self) {
        self.last_emitted_index = self.raw_chunks.len();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
