//! Adapter for the OpenAI Chat Completions dialect.
//!
//! Used by OpenAI itself and every vendor that clones its API.  The stream is
//! standard SSE: `data:` lines carrying `choices[].delta` objects, ended by a
//! `data: [DONE]` sentinel.

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use super::sse::{classify_stream_error, sse_data};
use super::{AdapterRequest, HttpRequest, Provider, ProviderAdapter};
use crate::accumulator::StreamAccumulator;
use crate::error::{LlmError, Result};
use crate::types::{Message, Role, StreamEvent, ToolDefinition};

/// Adapter for OpenAI-compatible providers.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleAdapter {
    provider: Provider,
    base_url: String,
}

impl OpenAiCompatibleAdapter {
    pub fn new(provider: Provider, base_url: impl Into<String>) -> Self {
        Self {
            provider,
            base_url: base_url.into(),
        }
    }

    /// Convert messages to the wire format, with an optional leading system
    /// prompt.
    fn wire_messages(&self, system_prompt: Option<&str>, messages: &[Message]) -> Vec<Value> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
            wire.push(json!({"role": "system", "content": system}));
        }
        wire.extend(messages_to_openai(messages, self.provider.supports_images()));
        wire
    }
}

impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn build_request(&self, request: &AdapterRequest<'_>) -> Result<HttpRequest> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = json!({
            "model": request.model,
            "stream": true,
            "messages": self.wire_messages(request.system_prompt, request.messages),
        });

        if !request.tools.is_empty() {
            body["tools"] = tools_to_openai(request.tools);
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if self.provider.supports_stream_usage() {
            body["stream_options"] = json!({"include_usage": true});
        }

        let mut headers = HeaderMap::new();
        // Local servers run without credentials.
        if !request.api_key.is_empty() {
            let auth_value = format!("Bearer {}", request.api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value).map_err(|e| LlmError::InvalidResponse {
                    detail: format!("invalid authorization header: {e}"),
                })?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        Ok(HttpRequest { url, headers, body })
    }

    fn ends_stream(&self, line: &str) -> bool {
        sse_data(line) == Some("[DONE]")
    }

    fn decode(&self, line: &str, acc: &mut StreamAccumulator) -> Option<StreamEvent> {
        let data = sse_data(line)?;

        if data == "[DONE]" {
            return acc.finish().then_some(StreamEvent::Done);
        }

        // Unparseable frames are skipped, not fatal.
        let v: Value = serde_json::from_str(data).ok()?;

        // Usage usually arrives in a trailing chunk with empty `choices`.
        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            if let Some(input) = usage["prompt_tokens"].as_u64() {
                acc.set_input_tokens(saturate(input));
            }
            if let Some(output) = usage["completion_tokens"].as_u64() {
                acc.set_output_tokens(saturate(output));
            }
        }

        if let Some(err) = v.get("error").filter(|e| e.is_object()) {
            let message = err["message"].as_str().unwrap_or_default();
            let kind = match &err["type"] {
                Value::String(t) => t.clone(),
                _ => match &err["code"] {
                    Value::String(c) => c.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => String::new(),
                },
            };
            return Some(StreamEvent::Error(classify_stream_error(&kind, message)));
        }

        let choice = &v["choices"][0];
        let delta = &choice["delta"];
        if delta.is_null() {
            return None;
        }

        let mut event = None;

        if let Some(content) = delta["content"].as_str().filter(|c| !c.is_empty()) {
            acc.push_text(content);
            event = Some(StreamEvent::PartialText(content.to_owned()));
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for (position, tc) in tool_calls.iter().enumerate() {
                let index = tc["index"]
                    .as_u64()
                    .map_or(position as u32, saturate);
                let id = tc["id"].as_str();
                let func = &tc["function"];
                let name = func["name"].as_str();
                let arguments = func["arguments"].as_str();

                acc.merge_tool_call(index, id, name, arguments);

                // Text on the same line takes precedence as the event.
                if event.is_none() {
                    event = Some(StreamEvent::ToolCallDelta {
                        index,
                        id: id.map(str::to_owned),
                        name: name.map(str::to_owned),
                        arguments_delta: arguments.unwrap_or_default().to_owned(),
                    });
                }
            }
        }

        let terminal = matches!(
            choice["finish_reason"].as_str(),
            Some("stop" | "tool_calls")
        );
        if terminal && acc.finish() && event.is_none() {
            return Some(StreamEvent::Done);
        }

        event
    }
}

fn saturate(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Wire conversion
// ---------------------------------------------------------------------------

/// Convert internal messages to the Chat Completions wire format.
///
/// System messages stay in the `messages` array, tool calls go in
/// `assistant.tool_calls`, and tool results use `role: "tool"` with a
/// `tool_call_id`.
pub fn messages_to_openai(messages: &[Message], images: bool) -> Vec<Value> {
    let mut wire_messages: Vec<Value> = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => {
                wire_messages.push(json!({
                    "role": "system",
                    "content": msg.content,
                }));
            }
            Role::User => {
                if images && !msg.images.is_empty() {
                    let mut parts = vec![json!({"type": "text", "text": msg.content})];
                    parts.extend(msg.images.iter().map(|img| {
                        json!({
                            "type": "image_url",
                            "image_url": {"url": img.data_url()},
                        })
                    }));
                    wire_messages.push(json!({"role": "user", "content": parts}));
                } else {
                    wire_messages.push(json!({
                        "role": "user",
                        "content": msg.content,
                    }));
                }
            }
            Role::Assistant => {
                if msg.tool_calls.is_empty() {
                    wire_messages.push(json!({
                        "role": "assistant",
                        "content": msg.content,
                    }));
                } else {
                    let tool_calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments,
                                }
                            })
                        })
                        .collect();

                    let mut m = json!({
                        "role": "assistant",
                        "tool_calls": tool_calls,
                    });

                    if !msg.content.is_empty() {
                        m["content"] = json!(msg.content);
                    }

                    wire_messages.push(m);
                }
            }
            Role::Tool => {
                wire_messages.push(json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id,
                    "content": msg.content,
                }));
            }
        }
    }

    wire_messages
}

/// Convert tool definitions into the `{"type": "function", "function": {...}}`
/// shape.
pub fn tools_to_openai(tools: &[ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect();
    json!(tool_values)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
