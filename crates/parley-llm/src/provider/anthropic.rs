//! Adapter for the native Anthropic Messages API.
//!
//! Anthropic sends `event:` and `data:` line pairs.  The JSON payload repeats
//! the event name in its `type` field, so the `event:` lines are ignored and
//! each `data:` line is decoded on its own.

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use super::sse::{classify_stream_error, sse_data};
use super::{AdapterRequest, HttpRequest, Provider, ProviderAdapter};
use crate::accumulator::StreamAccumulator;
use crate::error::{LlmError, Result};
use crate::types::{Message, Role, StreamEvent, ToolDefinition};

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Beta header required when authenticating with an OAuth access token.
const ANTHROPIC_OAUTH_BETA: &str = "oauth-2025-04-20";

/// `max_tokens` is mandatory on this API.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Adapter for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Build auth and content headers.
    ///
    /// Standard keys go in `x-api-key`; OAuth tokens (`sk-ant-oat` prefix)
    /// use `Authorization: Bearer` plus the OAuth beta header.
    fn headers(api_key: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        if api_key.starts_with("sk-ant-oat") {
            headers.insert(
                AUTHORIZATION,
                header_value(&format!("Bearer {api_key}"), "authorization")?,
            );
            headers.insert(
                "anthropic-beta",
                HeaderValue::from_static(ANTHROPIC_OAUTH_BETA),
            );
        } else {
            headers.insert("x-api-key", header_value(api_key, "API key")?);
        }

        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        Ok(headers)
    }
}

fn header_value(value: &str, what: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| LlmError::InvalidResponse {
        detail: format!("invalid {what} header: {e}"),
    })
}

impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn build_request(&self, request: &AdapterRequest<'_>) -> Result<HttpRequest> {
        let url = format!("{}/v1/messages", self.base_url);
        let (system, messages) = messages_to_anthropic(request.system_prompt, request.messages);

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
            "messages": messages,
        });

        if let Some(system) = system {
            body["system"] = json!(system);
        }

        if !request.tools.is_empty() {
            body["tools"] = tools_to_anthropic(request.tools);
        }

        let headers = Self::headers(request.api_key)?;

        Ok(HttpRequest { url, headers, body })
    }

    fn decode(&self, line: &str, acc: &mut StreamAccumulator) -> Option<StreamEvent> {
        let data = sse_data(line)?;
        let v: Value = serde_json::from_str(data).ok()?;

        match v["type"].as_str()? {
            "message_start" => {
                if let Some(input) = v["message"]["usage"]["input_tokens"].as_u64() {
                    acc.set_input_tokens(u32::try_from(input).unwrap_or(u32::MAX));
                }
                None
            }

            "content_block_start" => {
                let index = block_index(&v);
                let block = &v["content_block"];
                match block["type"].as_str() {
                    Some("tool_use") => {
                        let id = block["id"].as_str();
                        let name = block["name"].as_str();
                        acc.merge_tool_call(index, id, name, None);
                        Some(StreamEvent::ToolCallDelta {
                            index,
                            id: id.map(str::to_owned),
                            name: name.map(str::to_owned),
                            arguments_delta: String::new(),
                        })
                    }
                    Some("text") => {
                        let text = block["text"].as_str().filter(|t| !t.is_empty())?;
                        acc.push_text(text);
                        Some(StreamEvent::PartialText(text.to_owned()))
                    }
                    _ => None,
                }
            }

            "content_block_delta" => {
                let index = block_index(&v);
                let delta = &v["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        let text = delta["text"].as_str().filter(|t| !t.is_empty())?;
                        acc.push_text(text);
                        Some(StreamEvent::PartialText(text.to_owned()))
                    }
                    Some("input_json_delta") => {
                        let partial = delta["partial_json"].as_str().unwrap_or_default();
                        acc.merge_tool_call(index, None, None, Some(partial));
                        Some(StreamEvent::ToolCallDelta {
                            index,
                            id: None,
                            name: None,
                            arguments_delta: partial.to_owned(),
                        })
                    }
                    other => {
                        tracing::trace!(delta_type = ?other, "ignoring unknown delta type");
                        None
                    }
                }
            }

            "message_delta" => {
                if let Some(output) = v["usage"]["output_tokens"].as_u64() {
                    acc.set_output_tokens(u32::try_from(output).unwrap_or(u32::MAX));
                }
                let terminal = matches!(
                    v["delta"]["stop_reason"].as_str(),
                    Some("end_turn" | "tool_use" | "max_tokens" | "stop_sequence")
                );
                (terminal && acc.finish()).then_some(StreamEvent::Done)
            }

            "message_stop" => acc.finish().then_some(StreamEvent::Done),

            "error" => {
                let err = &v["error"];
                Some(StreamEvent::Error(classify_stream_error(
                    err["type"].as_str().unwrap_or_default(),
                    err["message"].as_str().unwrap_or_default(),
                )))
            }

            other => {
                tracing::trace!(event_type = other, "ignoring SSE event");
                None
            }
        }
    }
}

fn block_index(v: &Value) -> u32 {
    v["index"]
        .as_u64()
        .and_then(|i| u32::try_from(i).ok())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Wire conversion
// ---------------------------------------------------------------------------

/// Split the system text out (Anthropic takes it as a top-level field) and
/// convert the remaining messages to the wire format.
///
/// Consecutive tool results are merged into a single user turn.
fn messages_to_anthropic(
    system_prompt: Option<&str>,
    messages: &[Message],
) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = system_prompt
        .filter(|s| !s.is_empty())
        .map(str::to_owned);
    let mut wire_messages: Vec<Value> = Vec::with_capacity(messages.len());
    let mut pending_results: Vec<Value> = Vec::new();

    for msg in messages {
        if msg.role != Role::Tool && !pending_results.is_empty() {
            wire_messages.push(json!({
                "role": "user",
                "content": std::mem::take(&mut pending_results),
            }));
        }

        match msg.role {
            Role::System => match &mut system {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(&msg.content);
                }
                None => {
                    system = Some(msg.content.clone());
                }
            },
            Role::User => {
                if msg.images.is_empty() {
                    wire_messages.push(json!({
                        "role": "user",
                        "content": msg.content,
                    }));
                } else {
                    let mut content: Vec<Value> = msg
                        .images
                        .iter()
                        .map(|img| {
                            json!({
                                "type": "image",
                                "source": {
                                    "type": "base64",
                                    "media_type": img.mime_type,
                                    "data": img.base64,
                                }
                            })
                        })
                        .collect();
                    content.push(json!({"type": "text", "text": msg.content}));
                    wire_messages.push(json!({"role": "user", "content": content}));
                }
            }
            Role::Assistant => {
                if msg.tool_calls.is_empty() {
                    wire_messages.push(json!({
                        "role": "assistant",
                        "content": msg.content,
                    }));
                } else {
                    let mut content: Vec<Value> = Vec::new();
                    if !msg.content.is_empty() {
                        content.push(json!({
                            "type": "text",
                            "text": msg.content,
                        }));
                    }
                    for tc in &msg.tool_calls {
                        content.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.arguments_value().unwrap_or_else(|| json!({})),
                        }));
                    }
                    wire_messages.push(json!({
                        "role": "assistant",
                        "content": content,
                    }));
                }
            }
            Role::Tool => {
                pending_results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id,
                    "content": msg.content,
                }));
            }
        }
    }

    if !pending_results.is_empty() {
        wire_messages.push(json!({
            "role": "user",
            "content": pending_results,
        }));
    }

    (system, wire_messages)
}

/// Convert tool definitions into the Anthropic API format.
fn tools_to_anthropic(tools: &[ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            })
        })
        .collect();
    json!(tool_values)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
