//! Provider adapters.
//!
//! Each vendor family is one [`ProviderAdapter`] implementation:
//!
//! - [`openai`] -- the OpenAI Chat Completions dialect, shared by OpenAI,
//!   DeepSeek, Groq, Mistral, OpenRouter, xAI, Gemini's compatibility
//!   endpoint, Ollama and LM Studio.
//! - [`anthropic`] -- the native Anthropic Messages dialect.
//!
//! [`Provider::adapter`] is the only place a vendor maps to an
//! implementation; the exchange loop only ever sees the trait.

pub mod anthropic;
pub mod openai;
pub mod sse;

use std::fmt;
use std::str::FromStr;

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::accumulator::StreamAccumulator;
use crate::error::{LlmError, Result};
use crate::types::{Message, StreamEvent, ToolDefinition};

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiCompatibleAdapter;

// ---------------------------------------------------------------------------
// Provider catalogue
// ---------------------------------------------------------------------------

/// Known LLM vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAI,
    DeepSeek,
    Groq,
    Mistral,
    OpenRouter,
    XAi,
    Google,
    Ollama,
    LmStudio,
}

/// The wire dialect a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAiCompatible,
    Anthropic,
}

impl Provider {
    /// Every known provider.
    pub const ALL: [Self; 10] = [
        Self::Anthropic,
        Self::OpenAI,
        Self::DeepSeek,
        Self::Groq,
        Self::Mistral,
        Self::OpenRouter,
        Self::XAi,
        Self::Google,
        Self::Ollama,
        Self::LmStudio,
    ];

    /// Stable lowercase identifier, as used in settings files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
            Self::DeepSeek => "deepseek",
            Self::Groq => "groq",
            Self::Mistral => "mistral",
            Self::OpenRouter => "openrouter",
            Self::XAi => "xai",
            Self::Google => "google",
            Self::Ollama => "ollama",
            Self::LmStudio => "lmstudio",
        }
    }

    pub fn dialect(self) -> Dialect {
        match self {
            Self::Anthropic => Dialect::Anthropic,
            _ => Dialect::OpenAiCompatible,
        }
    }

    /// Default API base URL.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com",
            Self::OpenAI => "https://api.openai.com/v1",
            Self::DeepSeek => "https://api.deepseek.com/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Mistral => "https://api.mistral.ai/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::XAi => "https://api.x.ai/v1",
            Self::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::Ollama => "http://localhost:11434/v1",
            Self::LmStudio => "http://localhost:1234/v1",
        }
    }

    /// Environment variable holding the credential.  Empty for local
    /// providers.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAI => "OPENAI_API_KEY",
            Self::DeepSeek => "DEEPSEEK_API_KEY",
            Self::Groq => "GROQ_API_KEY",
            Self::Mistral => "MISTRAL_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
            Self::XAi => "XAI_API_KEY",
            Self::Google => "GOOGLE_API_KEY",
            Self::Ollama | Self::LmStudio => "",
        }
    }

    /// Self-hosted, credential-free providers.
    pub fn is_local(self) -> bool {
        matches!(self, Self::Ollama | Self::LmStudio)
    }

    pub fn requires_api_key(self) -> bool {
        !self.is_local()
    }

    /// Whether user messages may carry image parts.
    pub fn supports_images(self) -> bool {
        !matches!(self, Self::DeepSeek | Self::Groq | Self::LmStudio)
    }

    /// Whether the endpoint accepts `stream_options.include_usage`.  Many
    /// compatible servers reject the unknown parameter outright.
    pub fn supports_stream_usage(self) -> bool {
        matches!(self, Self::OpenAI | Self::DeepSeek)
    }

    /// Guess the vendor from a model identifier.
    pub fn infer_from_model(model: &str) -> Option<Self> {
        let m = model.trim().to_ascii_lowercase();
        if m.is_empty() {
            return None;
        }

        let starts = |prefixes: &[&str]| prefixes.iter().any(|p| m.starts_with(p));

        if starts(&["claude"]) {
            Some(Self::Anthropic)
        } else if starts(&["gpt-", "chatgpt", "o1", "o3", "o4", "codex"]) {
            Some(Self::OpenAI)
        } else if starts(&["deepseek"]) {
            Some(Self::DeepSeek)
        } else if starts(&["grok"]) {
            Some(Self::XAi)
        } else if starts(&["gemini"]) {
            Some(Self::Google)
        } else if starts(&["mistral", "codestral", "pixtral", "magistral"]) {
            Some(Self::Mistral)
        } else if m.contains('/') {
            // `vendor/model` naming is OpenRouter's.
            Some(Self::OpenRouter)
        } else if m.contains(':') {
            // `name:tag` naming is Ollama's.
            Some(Self::Ollama)
        } else {
            None
        }
    }

    /// Build the adapter for this provider, optionally against a non-default
    /// base URL.
    pub fn adapter(self, base_url: Option<&str>) -> Box<dyn ProviderAdapter> {
        let base_url = base_url
            .unwrap_or(self.default_base_url())
            .trim_end_matches('/')
            .to_owned();
        match self.dialect() {
            Dialect::Anthropic => Box::new(AnthropicAdapter::new(base_url)),
            Dialect::OpenAiCompatible => Box::new(OpenAiCompatibleAdapter::new(self, base_url)),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == needle)
            .ok_or_else(|| LlmError::Config {
                reason: format!("unknown provider: {s}"),
            })
    }
}

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

/// Everything an adapter needs to build one outbound request.
#[derive(Debug, Clone, Copy)]
pub struct AdapterRequest<'a> {
    pub messages: &'a [Message],
    pub system_prompt: Option<&'a str>,
    pub model: &'a str,
    pub tools: &'a [ToolDefinition],
    pub api_key: &'a str,
    pub max_tokens: Option<u32>,
}

/// A fully prepared HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Value,
}

/// One vendor wire dialect.
///
/// Adapters hold no per-exchange state: all stream state lives in the
/// [`StreamAccumulator`] passed to [`decode`](Self::decode).
pub trait ProviderAdapter: Send + Sync {
    /// The provider this adapter was built for.
    fn provider(&self) -> Provider;

    /// Translate normalized messages and tools into the vendor request.
    fn build_request(&self, request: &AdapterRequest<'_>) -> Result<HttpRequest>;

    /// Decode one transport line, folding it into `acc`.
    ///
    /// Returns `None` for lines that carry no event: comments, heartbeats,
    /// `event:` lines, unrecognized or malformed payloads.
    fn decode(&self, line: &str, acc: &mut StreamAccumulator) -> Option<StreamEvent>;

    /// Whether `line` is the dialect's end-of-stream sentinel.  Nothing
    /// follows it, so the reader stops without waiting for trailing chunks.
    fn ends_stream(&self, line: &str) -> bool {
        let _ = line;
        false
    }
}
