//! Per-exchange stream accumulator.
//!
//! Providers stream text and tool-call fragments across many SSE lines.  The
//! adapters fold each line into a [`StreamAccumulator`], which is owned by the
//! exchange's read loop and handed to `decode` by `&mut`, so there is exactly
//! one writer.  When the stream ends the accumulator is reduced into an
//! [`LlmResponse`].

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::{LlmError, Result};
use crate::types::{LlmResponse, ToolCall, Usage};

/// In-progress tool call being assembled from streaming deltas.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PartialToolCall {
    /// The tool call id (usually sent with the first fragment).
    pub id: String,
    /// The function name.
    pub name: String,
    /// Accumulated argument JSON text.
    pub arguments: String,
}

/// Mutable fold target for one streamed exchange.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    /// Append-only assistant text.
    text: String,

    /// Tool calls keyed by their stream index.  Fragments for different
    /// indices may interleave; ordering within an index is arrival order.
    tool_calls: BTreeMap<u32, PartialToolCall>,

    input_tokens: Option<u32>,
    output_tokens: Option<u32>,

    /// Set by the first terminal signal.
    done: bool,
}

impl StreamAccumulator {
    /// Create a new empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text fragment.
    pub fn push_text(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    /// The text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Merge a tool-call fragment into the slot for `index`, creating the
    /// slot on first sight.  `id` replaces, `name` and `arguments` append.
    pub fn merge_tool_call(
        &mut self,
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) {
        let slot = self.tool_calls.entry(index).or_default();
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            id.clone_into(&mut slot.id);
        }
        if let Some(name) = name {
            slot.name.push_str(name);
        }
        if let Some(args) = arguments {
            slot.arguments.push_str(args);
        }
    }

    /// The in-progress tool call at `index`, if one was opened.
    pub fn tool_call(&self, index: u32) -> Option<&PartialToolCall> {
        self.tool_calls.get(&index)
    }

    /// Whether any tool call slot has been opened.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn set_input_tokens(&mut self, tokens: u32) {
        self.input_tokens = Some(tokens);
    }

    pub fn set_output_tokens(&mut self, tokens: u32) {
        self.output_tokens = Some(tokens);
    }

    /// Token usage collected so far.
    pub fn usage(&self) -> Usage {
        Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }

    /// Record a terminal signal.  Returns `true` only for the first one; the
    /// vendor may send several (e.g. a stop reason followed by a stop event)
    /// in either order.
    pub fn finish(&mut self) -> bool {
        !std::mem::replace(&mut self.done, true)
    }

    /// Whether a terminal signal has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Reduce the accumulated state into the final response.
    ///
    /// Tool calls take priority over text: they must be acted on before any
    /// narration is surfaced.  A stream with neither fails closed with
    /// [`LlmError::EmptyResponse`].
    pub fn into_response(self) -> Result<(LlmResponse, Usage)> {
        let usage = self.usage();

        if self.tool_calls.is_empty() {
            if self.text.is_empty() {
                return Err(LlmError::EmptyResponse);
            }
            return Ok((LlmResponse::Text(self.text), usage));
        }

        let calls = self
            .tool_calls
            .into_values()
            .map(|b| ToolCall {
                id: if b.id.is_empty() {
                    format!("call_{}", Uuid::now_v7().simple())
                } else {
                    b.id
                },
                name: b.name,
                arguments: if b.arguments.trim().is_empty() {
                    "{}".to_owned()
                } else {
                    b.arguments
                },
            })
            .collect();

        Ok((LlmResponse::ToolCalls(calls), usage))
    }
}
