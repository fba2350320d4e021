//! Client formatters: IR chunks to on-the-wire SSE.
//!
//! One formatter per client wire format. Both read IR chunks from the egress
//! queue until the `None` sentinel and write SSE frame strings to the output
//! queue, terminated by their own `None` sentinel. Writes use a bounded put
//! with a timeout so a stalled client fails the pipeline instead of wedging
//! it.

pub mod anthropic;
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{GatewayError, Result};
use crate::llm::chunk::ChatChunk;

pub use anthropic::AnthropicFormatter;
pub use openai::OpenAiFormatter;

/// Default timeout for puts onto the SSE queue.
pub const SSE_PUT_TIMEOUT: Duration = Duration::from_secs(30);

/// Wire format requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFormat {
    /// `/v1/chat/completions`-style `data:` frames.
    OpenAi,
    /// `/v1/messages`-style `event:`/`data:` frames.
    Anthropic,
}

/// A pipeline stage converting IR chunks to SSE frame strings.
#[async_trait]
pub trait ClientFormatter: Send {
    /// Drain `input` until its sentinel, writing frames to `output`. Always
    /// sends the output sentinel before returning.
    async fn process(
        &mut self,
        input: mpsc::Receiver<Option<ChatChunk>>,
        output: mpsc::Sender<Option<String>>,
    ) -> Result<()>;
}

/// Bounded put with timeout. A full queue past the deadline means the client
/// stopped reading.
pub(crate) async fn safe_put(
    output: &mpsc::Sender<Option<String>>,
    item: Option<String>,
    timeout: Duration,
) -> Result<()> {
    match tokio::time::timeout(timeout, output.send(item)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(GatewayError::PipelineClosed),
        Err(_) => Err(GatewayError::ClientStalled(timeout)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
