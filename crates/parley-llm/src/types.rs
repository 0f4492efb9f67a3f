//! Core types for LLM interaction.
//!
//! These types are provider-agnostic.  The adapters in [`crate::provider`]
//! translate them into each vendor's wire format and decode streamed replies
//! back into [`StreamEvent`] values.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LlmError;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions that shape model behavior.
    System,
    /// Input from the human user.
    User,
    /// Output from the LLM.
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

/// An image attached to a user message, already base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// MIME type, e.g. `"image/png"`.
    pub mime_type: String,
    /// Base64 payload without a `data:` prefix.
    pub base64: String,
}

impl ImageAttachment {
    /// Encode raw image bytes.
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            base64: BASE64.encode(bytes),
        }
    }

    /// The image as a `data:` URL.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

/// A single message in a conversation history.
///
/// Messages are built once and never mutated; the role decides the wire
/// shape each adapter produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,

    /// The textual content of the message.
    ///
    /// For [`Role::Tool`] messages this is the serialized tool result.
    #[serde(default)]
    pub content: String,

    /// Images attached to a user message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,

    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Which tool call this message answers (only for [`Role::Tool`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            images: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a user message carrying images.
    pub fn user_with_images(content: impl Into<String>, images: Vec<ImageAttachment>) -> Self {
        Self {
            images,
            ..Self::with_role(Role::User, content.into())
        }
    }

    /// Create an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create an assistant message that contains tool calls.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, String::new())
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, content.into())
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the LLM for correlating results.
    pub id: String,

    /// The name of the tool to invoke.
    pub name: String,

    /// Arguments as raw JSON text, exactly as the model produced them.
    pub arguments: String,
}

impl ToolCall {
    /// Parse the argument text.  Invalid JSON yields `None`.
    pub fn arguments_value(&self) -> Option<Value> {
        serde_json::from_str(&self.arguments).ok()
    }
}

/// A tool definition exposed to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description of what the tool does.
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the tool's input parameters.
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Read a tool from the "functions array" shape.
    ///
    /// Accepts both `{"type":"function","function":{...}}` and the bare
    /// `{"name", "description", "parameters"}` form.  A missing schema
    /// becomes an empty object schema.
    pub fn from_function_json(v: &Value) -> Option<Self> {
        let func = if v["type"] == "function" && v["function"].is_object() {
            &v["function"]
        } else {
            v
        };

        let name = func["name"].as_str()?.to_owned();
        let description = func["description"].as_str().unwrap_or_default().to_owned();
        let input_schema = match &func["parameters"] {
            Value::Null => serde_json::json!({"type": "object", "properties": {}}),
            schema => schema.clone(),
        };

        Some(Self {
            name,
            description,
            input_schema,
        })
    }
}

// ---------------------------------------------------------------------------
// LLM response
// ---------------------------------------------------------------------------

/// The final result of one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmResponse {
    /// The model produced a final text answer.
    Text(String),

    /// The model wants one or more tools run before continuing.
    ToolCalls(Vec<ToolCall>),
}

/// Token usage reported by the provider, when it reports any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

// ---------------------------------------------------------------------------
// Streaming events
// ---------------------------------------------------------------------------

/// The normalized event alphabet every adapter decodes into.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A chunk of assistant text, in production order.
    PartialText(String),

    /// A fragment of a tool call, keyed by its stable index.
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: String,
    },

    /// The first terminal signal of the exchange.
    Done,

    /// The provider reported an error in-band.
    Error(LlmError),
}
