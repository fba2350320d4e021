//! Anthropic SSE formatter.
//!
//! OpenAI-style chunks carry no explicit block open/close signals, so this
//! formatter is stateful: it synthesizes `message_start`,
//! `content_block_start`/`content_block_delta`/`content_block_stop`,
//! `message_delta` and `message_stop` events with monotonically increasing
//! block indices. Chunks fabricated from a whole tool call expand into a
//! complete start/delta/stop sequence.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::llm::chunk::{ChatChunk, ToolCallFragment};
use crate::streaming::formatter::{safe_put, ClientFormatter, SSE_PUT_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    ToolUse,
}

/// Stateful IR-to-Anthropic-SSE converter for one response.
pub struct AnthropicFormatter {
    transaction_id: String,
    model_name: String,
    put_timeout: Duration,
    message_started: bool,
    open_block: Option<OpenBlock>,
    block_index: u32,
    next_index: u32,
}

impl AnthropicFormatter {
    /// Formatter for one response. `model_name` appears in `message_start`.
    pub fn new(transaction_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            model_name: model_name.into(),
            put_timeout: SSE_PUT_TIMEOUT,
            message_started: false,
            open_block: None,
            block_index: 0,
            next_index: 0,
        }
    }

    /// Override the put timeout.
    pub fn with_put_timeout(mut self, timeout: Duration) -> Self {
        self.put_timeout = timeout;
        self
    }

    fn frame(event: &Value) -> String {
        let event_type = event["type"].as_str().unwrap_or("content_block_delta");
        format!("event: {event_type}\ndata: {event}\n\n")
    }

    fn message_start_event(&self) -> Value {
        json!({
            "type": "message_start",
            "message": {
                "id": format!("msg_{}", self.transaction_id),
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": self.model_name,
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": 0, "output_tokens": 0},
            }
        })
    }

    fn close_block(&mut self, events: &mut Vec<Value>) {
        if self.open_block.take().is_some() {
            events.push(json!({
                "type": "content_block_stop",
                "index": self.block_index,
            }));
        }
    }

    fn open_text_block(&mut self, events: &mut Vec<Value>) {
        self.block_index = self.next_index;
        self.next_index += 1;
        self.open_block = Some(OpenBlock::Text);
        events.push(json!({
            "type": "content_block_start",
            "index": self.block_index,
            "content_block": {"type": "text", "text": ""},
        }));
    }

    fn open_tool_block(&mut self, fragment: &ToolCallFragment, events: &mut Vec<Value>) {
        self.block_index = self.next_index;
        self.next_index += 1;
        self.open_block = Some(OpenBlock::ToolUse);
        events.push(json!({
            "type": "content_block_start",
            "index": self.block_index,
            "content_block": {
                "type": "tool_use",
                "id": fragment.id.clone().unwrap_or_default(),
                "name": fragment.name().unwrap_or_default(),
                "input": {},
            },
        }));
    }

    /// Expand one whole-tool-call chunk into start/delta/stop.
    fn expand_complete_tool_call(&mut self, chunk: &ChatChunk, events: &mut Vec<Value>) {
        self.close_block(events);
        let fragments = chunk
            .first_delta()
            .and_then(|d| d.tool_calls.as_deref())
            .unwrap_or(&[]);
        for fragment in fragments {
            self.open_tool_block(fragment, events);
            events.push(json!({
                "type": "content_block_delta",
                "index": self.block_index,
                "delta": {
                    "type": "input_json_delta",
                    "partial_json": fragment.arguments().unwrap_or_default(),
                },
            }));
            self.close_block(events);
        }
    }

    /// Events for one IR chunk.
    fn events_for_chunk(&mut self, chunk: &ChatChunk) -> Vec<Value> {
        let mut events = Vec::new();

        if chunk.complete_tool_call {
            self.expand_complete_tool_call(chunk, &mut events);
        } else if let Some(delta) = chunk.first_delta() {
            if let Some(text) = delta.content.as_deref().filter(|t| !t.is_empty()) {
                if self.open_block != Some(OpenBlock::Text) {
                    self.close_block(&mut events);
                    self.open_text_block(&mut events);
                }
                events.push(json!({
                    "type": "content_block_delta",
                    "index": self.block_index,
                    "delta": {"type": "text_delta", "text": text},
                }));
            } else if let Some(fragments) = delta.tool_calls.as_deref() {
                for fragment in fragments {
                    let opens = fragment.id.is_some() || fragment.name().is_some();
                    if opens || self.open_block != Some(OpenBlock::ToolUse) {
                        self.close_block(&mut events);
                        self.open_tool_block(fragment, &mut events);
                    }
                    if let Some(arguments) = fragment.arguments().filter(|a| !a.is_empty()) {
                        events.push(json!({
                            "type": "content_block_delta",
                            "index": self.block_index,
                            "delta": {"type": "input_json_delta", "partial_json": arguments},
                        }));
                    }
                }
            }
        }

        if let Some(reason) = chunk.finish_reason() {
            self.close_block(&mut events);
            events.push(json!({
                "type": "message_delta",
                "delta": {
                    "stop_reason": reason.anthropic_stop_reason(),
                    "stop_sequence": null,
                },
                "usage": {"output_tokens": 0},
            }));
        }

        events
    }

    async fn run(
        &mut self,
        input: &mut mpsc::Receiver<Option<ChatChunk>>,
        output: &mpsc::Sender<Option<String>>,
    ) -> Result<()> {
        loop {
            match input.recv().await {
                Some(Some(chunk)) => {
                    if !self.message_started {
                        self.message_started = true;
                        let start = self.message_start_event();
                        safe_put(output, Some(Self::frame(&start)), self.put_timeout).await?;
                    }
                    for event in self.events_for_chunk(&chunk) {
                        safe_put(output, Some(Self::frame(&event)), self.put_timeout).await?;
                    }
                }
                Some(None) => {
                    if self.message_started {
                        let mut trailing = Vec::new();
                        self.close_block(&mut trailing);
                        trailing.push(json!({"type": "message_stop"}));
                        for event in trailing {
                            safe_put(output, Some(Self::frame(&event)), self.put_timeout).await?;
                        }
                    }
                    return Ok(());
                }
                // Upstream stage died without a sentinel: end without
                // message_stop; the supervisor surfaces the real error.
                None => return Ok(()),
            }
        }
    }
}

#[async_trait]
impl ClientFormatter for AnthropicFormatter {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chunk::{ChunkChoice, Delta, FinishReason, FunctionFragment};
    use crate::llm::chunk_builders::{text_chunk, tool_call_chunk};
    use crate::llm::request::ToolCall;

    async fn run_formatter(items: Vec<Option<ChatChunk>>) -> Vec<(String, Value)> {
        let (in_tx, in_rx) = mpsc::channel(32);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        for item in items {
            in_tx.send(item).await.unwrap();
        }
        drop(in_tx);

        AnthropicFormatter::new("txn-1", "claude-test")
            .process(in_rx, out_tx)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(Some(frame)) = out_rx.try_recv() {
            let mut lines = frame.lines();
            let event_type = lines.next().unwrap().trim_start_matches("event: ").to_string();
            let data: Value =
                serde_json::from_str(lines.next().unwrap().trim_start_matches("data: ")).unwrap();
            events.push((event_type, data));
        }
        events
    }

    fn tool_fragment_chunk(
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> ChatChunk {
        ChatChunk {
            id: "c".into(),
            object: "chat.completion.chunk".into(),
            created: 0,
            model: "m".into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ToolCallFragment {
                        index,
                        id: id.map(String::from),
                        call_type: Some("function".into()),
                        function: Some(FunctionFragment {
                            name: name.map(String::from),
                            arguments: arguments.map(String::from),
                        }),
                    }]),
                },
                finish_reason: None,
            }],
            complete_tool_call: false,
        }
    }

    #[tokio::test]
    async fn test_simple_text_passthrough() {
        // Scenario S2: full expected event order for a three-delta stream.
        let events = run_formatter(vec![
            Some(text_chunk("Hello", None)),
            Some(text_chunk(" ", None)),
            Some(text_chunk("world", None)),
            Some(text_chunk("", Some(FinishReason::Stop))),
            None,
        ])
        .await;

        let types: Vec<&str> = events.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let (_, start) = &events[0];
        assert_eq!(start["message"]["id"], "msg_txn-1");
        assert_eq!(start["message"]["model"], "claude-test");
        assert_eq!(start["message"]["usage"]["input_tokens"], 0);

        let (_, block_start) = &events[1];
        assert_eq!(block_start["index"], 0);
        assert_eq!(block_start["content_block"]["type"], "text");

        assert_eq!(events[2].1["delta"]["text"], "Hello");
        assert_eq!(events[3].1["delta"]["text"], " ");
        assert_eq!(events[4].1["delta"]["text"], "world");
        assert_eq!(events[5].1["index"], 0);
        assert_eq!(events[6].1["delta"]["stop_reason"], "end_turn");
    }

    #[tokio::test]
    async fn test_tool_call_from_raw_fragments() {
        let events = run_formatter(vec![
            Some(tool_fragment_chunk(0, Some("call_1"), Some("search"), None)),
            Some(tool_fragment_chunk(0, None, None, Some(r#"{"q":"#))),
            Some(tool_fragment_chunk(0, None, None, Some(r#""x"}"#))),
            Some(text_chunk("", Some(FinishReason::ToolCalls))),
            None,
        ])
        .await;

        let types: Vec<&str> = events.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let (_, start) = &events[1];
        assert_eq!(start["content_block"]["type"], "tool_use");
        assert_eq!(start["content_block"]["id"], "call_1");
        assert_eq!(start["content_block"]["name"], "search");

        assert_eq!(events[2].1["delta"]["type"], "input_json_delta");
        assert_eq!(events[2].1["delta"]["partial_json"], r#"{"q":"#);
        assert_eq!(events[5].1["delta"]["stop_reason"], "tool_use");
    }

    #[tokio::test]
    async fn test_synthetic_tool_call_expansion() {
        // A policy-fabricated whole tool call expands into a complete block
        // sequence, then the carried finish_reason closes the message.
        let events = run_formatter(vec![
            Some(text_chunk("checking", None)),
            Some(tool_call_chunk(ToolCall::function("call_9", "lookup", r#"{"k":1}"#))),
            None,
        ])
        .await;

        let types: Vec<&str> = events.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "message_start",
                "content_block_start", // text block
                "content_block_delta",
                "content_block_stop",  // closed by the tool expansion
                "content_block_start", // tool_use block
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        // Indices increment across blocks.
        assert_eq!(events[1].1["index"], 0);
        assert_eq!(events[4].1["index"], 1);
        assert_eq!(events[4].1["content_block"]["name"], "lookup");
        assert_eq!(events[5].1["delta"]["partial_json"], r#"{"k":1}"#);
        assert_eq!(events[7].1["delta"]["stop_reason"], "tool_use");
    }

    #[tokio::test]
    async fn test_empty_stream_emits_nothing() {
        let events = run_formatter(vec![None]).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_length_maps_to_max_tokens() {
        let events = run_formatter(vec![
            Some(text_chunk("x", None)),
            Some(text_chunk("", Some(FinishReason::Length))),
            None,
        ])
        .await;
        let message_delta = events.iter().find(|(t, _)| t == "message_delta").unwrap();
        assert_eq!(message_delta.1["delta"]["stop_reason"], "max_tokens");
    }
}
