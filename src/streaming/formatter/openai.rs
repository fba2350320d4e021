//! OpenAI SSE formatter.
//!
//! Each IR chunk maps to one `data: <json>\n\n` frame; end of stream is
//! `data: [DONE]\n\n`. No other event types exist in this format.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::llm::chunk::ChatChunk;
use crate::streaming::formatter::{safe_put, ClientFormatter, SSE_PUT_TIMEOUT};

/// Stateless chunk-per-frame formatter.
pub struct OpenAiFormatter {
    put_timeout: Duration,
}

impl OpenAiFormatter {
    /// Formatter with the default put timeout.
    pub fn new() -> Self {
        Self {
            put_timeout: SSE_PUT_TIMEOUT,
        }
    }

    /// Override the put timeout.
    pub fn with_put_timeout(mut self, timeout: Duration) -> Self {
        self.put_timeout = timeout;
        self
    }

    async fn run(
        &self,
        input: &mut mpsc::Receiver<Option<ChatChunk>>,
        output: &mpsc::Sender<Option<String>>,
    ) -> Result<()> {
        loop {
            match input.recv().await {
                Some(Some(chunk)) => {
                    let frame = format!("data: {}\n\n", serde_json::to_string(&chunk)?);
                    safe_put(output, Some(frame), self.put_timeout).await?;
                }
                Some(None) => {
                    safe_put(output, Some("data: [DONE]\n\n".to_string()), self.put_timeout).await?;
                    return Ok(());
                }
                // Sender dropped without a sentinel: upstream stage died. End
                // without [DONE]; the supervisor surfaces the real error.
                None => return Ok(()),
            }
        }
    }
}

impl Default for OpenAiFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientFormatter for OpenAiFormatter {
    async fn process(
        &mut self,
        mut input: mpsc::Receiver<Option<ChatChunk>>,
        output: mpsc::Sender<Option<String>>,
    ) -> Result<()> {
        let result = self.run(&mut input, &output).await;
        let _ = tokio::time::timeout(self.put_timeout, output.send(None)).await;
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
