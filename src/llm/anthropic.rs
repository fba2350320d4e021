//! Anthropic messages wire schema and conversion to/from the common format.
//!
//! The `/v1/messages` endpoint accepts Anthropic-shaped requests and returns
//! Anthropic-shaped responses, while the pipeline works exclusively in the
//! common format. Streaming conversion lives in the Anthropic client
//! formatter; this module handles requests and full responses.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::llm::chunk::FinishReason;
use crate::llm::request::{
    FunctionSchema, Message, MessageContent, Request, Role, ToolCall, ToolDefinition,
};
use crate::llm::response::FullResponse;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// An Anthropic `/v1/messages` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicRequest {
    /// Target model.
    pub model: String,
    /// Conversation turns.
    pub messages: Vec<AnthropicMessage>,
    /// System prompt, plain or as blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<AnthropicContent>,
    /// Maximum tokens to generate (required by the Anthropic schema).
    pub max_tokens: u32,
    /// Streaming flag.
    #[serde(default)]
    pub stream: bool,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Tool definitions with `input_schema`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    /// Fields passed through untouched.
    #[serde(flatten)]
    pub extra_fields: Map<String, Value>,
}

/// One Anthropic conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    /// `user` or `assistant`.
    pub role: String,
    /// Plain text or content blocks.
    pub content: AnthropicContent,
}

/// Anthropic message content: a string or a block list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    /// Plain text.
    Text(String),
    /// Structured blocks.
    Blocks(Vec<AnthropicContentBlock>),
}

impl AnthropicContent {
    /// Concatenated text of all text blocks.
    pub fn flatten_text(&self) -> String {
        match self {
            AnthropicContent::Text(t) => t.clone(),
            AnthropicContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    AnthropicContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// One Anthropic content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentBlock {
    /// Text block.
    Text {
        /// The text.
        text: String,
    },
    /// Image block.
    Image {
        /// Source descriptor (base64 or URL).
        source: Value,
    },
    /// Assistant tool invocation.
    ToolUse {
        /// Tool-use id.
        id: String,
        /// Tool name.
        name: String,
        /// Parsed input object.
        input: Value,
    },
    /// Tool execution result supplied by the client.
    ToolResult {
        /// Id of the `tool_use` being answered.
        tool_use_id: String,
        /// Result payload.
        #[serde(default)]
        content: Value,
        /// Whether the tool failed.
        #[serde(default)]
        is_error: bool,
    },
}

/// Anthropic tool definition (`input_schema` instead of `parameters`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicTool {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the input object.
    pub input_schema: Value,
}

// ---------------------------------------------------------------------------
// Request conversion
// ---------------------------------------------------------------------------

/// Convert an Anthropic request into the common format.
pub fn anthropic_request_to_ir(request: AnthropicRequest) -> Request {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        messages.push(Message::text(Role::System, system.flatten_text()));
    }

    for turn in &request.messages {
        match turn.role.as_str() {
            "assistant" => messages.extend(convert_assistant_turn(&turn.content)),
            _ => messages.extend(convert_user_turn(&turn.content)),
        }
    }

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionSchema {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: Some(tool.input_schema.clone()),
                },
            })
            .collect()
    });

    Request {
        model: request.model,
        messages,
        stream: request.stream,
        max_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        tools,
        extra_fields: Map::new(),
    }
}

fn convert_user_turn(content: &AnthropicContent) -> Vec<Message> {
    let mut messages = Vec::new();
    match content {
        AnthropicContent::Text(text) => messages.push(Message::text(Role::User, text.clone())),
        AnthropicContent::Blocks(blocks) => {
            let mut text = String::new();
            for block in blocks {
                match block {
                    AnthropicContentBlock::Text { text: t } => text.push_str(t),
                    AnthropicContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error: _,
                    } => messages.push(Message {
                        role: Role::Tool,
                        content: Some(MessageContent::Text(tool_result_text(content))),
                        tool_calls: None,
                        tool_call_id: Some(tool_use_id.clone()),
                        name: None,
                    }),
                    AnthropicContentBlock::Image { .. } | AnthropicContentBlock::ToolUse { .. } => {}
                }
            }
            if !text.is_empty() {
                messages.push(Message::text(Role::User, text));
            }
        }
    }
    messages
}

fn convert_assistant_turn(content: &AnthropicContent) -> Vec<Message> {
    let (mut text, mut tool_calls) = (String::new(), Vec::new());
    match content {
        AnthropicContent::Text(t) => text.push_str(t),
        AnthropicContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    AnthropicContentBlock::Text { text: t } => text.push_str(t),
                    AnthropicContentBlock::ToolUse { id, name, input } => {
                        tool_calls.push(ToolCall::function(
                            id.clone(),
                            name.clone(),
                            input.to_string(),
                        ));
                    }
                    _ => {}
                }
            }
        }
    }
    vec![Message {
        role: Role::Assistant,
        content: if text.is_empty() { None } else { Some(MessageContent::Text(text)) },
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
        name: None,
    }]
}

fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b["text"].as_str())
            .collect::<Vec<_>>()
            .join(""),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Response conversion
// ---------------------------------------------------------------------------

/// Render a common-format full response as an Anthropic message body.
pub fn response_to_anthropic(response: &FullResponse, transaction_id: &str) -> Value {
    let mut content = Vec::new();
    let text = response.content();
    if !text.is_empty() {
        content.push(json!({"type": "text", "text": text}));
    }
    for call in response.tool_calls().unwrap_or(&[]) {
        let input: Value = serde_json::from_str(&call.function.arguments)
            .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
        content.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.function.name,
            "input": input,
        }));
    }

    let stop_reason = response
        .finish_reason()
        .unwrap_or(FinishReason::Stop)
        .anthropic_stop_reason();
    let usage = response.usage.as_ref();

    json!({
        "id": format!("msg_{transaction_id}"),
        "type": "message",
        "role": "assistant",
        "model": response.model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {
            "input_tokens": usage.map_or(0, |u| u.prompt_tokens),
            "output_tokens": usage.map_or(0, |u| u.completion_tokens),
        },
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::response::{ResponseChoice, ResponseMessage, Usage};

    #[test]
    fn test_simple_request_conversion() {
        let request: AnthropicRequest = serde_json::from_value(json!({
            "model": "claude-3-opus",
            "max_tokens": 512,
            "system": "be terse",
            "stream": true,
            "messages": [{"role": "user", "content": "hello"}]
        }))
        .unwrap();

        let ir = anthropic_request_to_ir(request);
        assert_eq!(ir.model, "claude-3-opus");
        assert!(ir.stream);
        assert_eq!(ir.max_tokens, Some(512));
        assert_eq!(ir.messages.len(), 2);
        assert_eq!(ir.messages[0].role, Role::System);
        assert_eq!(ir.last_message_text(), "hello");
    }

    #[test]
    fn test_tool_result_becomes_tool_message() {
        let request: AnthropicRequest = serde_json::from_value(json!({
            "model": "claude-3-opus",
            "max_tokens": 100,
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "tu_1", "name": "search", "input": {"q": "x"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "tu_1", "content": "42 results"}
                ]}
            ]
        }))
        .unwrap();

        let ir = anthropic_request_to_ir(request);
        assert_eq!(ir.messages.len(), 2);

        let assistant = &ir.messages[0];
        assert_eq!(assistant.role, Role::Assistant);
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "tu_1");
        assert_eq!(calls[0].function.name, "search");
        assert_eq!(calls[0].function.arguments, r#"{"q":"x"}"#);

        let tool = &ir.messages[1];
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("tu_1"));
        assert_eq!(tool.content.as_ref().unwrap().as_text(), Some("42 results"));
    }

    #[test]
    fn test_tools_input_schema_conversion() {
        let request: AnthropicRequest = serde_json::from_value(json!({
            "model": "claude-3-opus",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{
                "name": "get_weather",
                "description": "Weather lookup",
                "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}
            }]
        }))
        .unwrap();

        let ir = anthropic_request_to_ir(request);
        let tool = &ir.tools.as_ref().unwrap()[0];
        assert_eq!(tool.function.name, "get_weather");
        assert_eq!(
            tool.function.parameters.as_ref().unwrap()["properties"]["city"]["type"],
            "string"
        );
    }

    #[test]
    fn test_response_conversion_text() {
        let response = FullResponse {
            id: "r1".into(),
            object: "chat.completion".into(),
            created: 0,
            model: "gpt-4o".into(),
            choices: vec![ResponseChoice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant".into(),
                    content: Some("hello".into()),
                    tool_calls: None,
                },
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        };

        let body = response_to_anthropic(&response, "txn-7");
        assert_eq!(body["id"], "msg_txn-7");
        assert_eq!(body["content"][0]["type"], "text");
        assert_eq!(body["content"][0]["text"], "hello");
        assert_eq!(body["stop_reason"], "end_turn");
        assert_eq!(body["usage"]["input_tokens"], 10);
        assert_eq!(body["usage"]["output_tokens"], 5);
    }

    #[test]
    fn test_response_conversion_tool_use() {
        let response = FullResponse {
            id: "r1".into(),
            object: "chat.completion".into(),
            created: 0,
            model: "m".into(),
            choices: vec![ResponseChoice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant".into(),
                    content: None,
                    tool_calls: Some(vec![ToolCall::function("c1", "search", r#"{"q":"x"}"#)]),
                },
                finish_reason: Some(FinishReason::ToolCalls),
            }],
            usage: None,
        };

        let body = response_to_anthropic(&response, "t");
        assert_eq!(body["content"][0]["type"], "tool_use");
        assert_eq!(body["content"][0]["input"]["q"], "x");
        assert_eq!(body["stop_reason"], "tool_use");
    }
}
