//! Vendor-agnostic streaming chat-completion client.
//!
//! Talks to the OpenAI Chat Completions family (OpenAI, DeepSeek, Groq,
//! Mistral, OpenRouter, xAI, Gemini, Ollama, LM Studio) and the native
//! Anthropic Messages API through one abstraction, with timeout, retry and
//! model-fallback policy that stays safe for tool-calling conversations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ResolvedModel   ┌────────────┐   line    ┌──────────────┐
//! │ ModelRouter │──────────────────>│ LlmClient  │──────────>│ ProviderAdap.│
//! │ (resolve)   │                   │ (exchange) │<──────────│ (decode)     │
//! └─────────────┘                   └─────┬──────┘   event   └──────┬───────┘
//!                                         │                        │ &mut
//!                                         │ reduce          ┌──────┴───────┐
//!                                         └────────────────>│ Accumulator  │
//!                                                           └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] -- Messages, tool calls, responses and stream events.
//! - [`provider`] -- The provider catalogue and per-dialect adapters.
//! - [`accumulator`] -- Per-exchange stream fold target.
//! - [`client`] -- The single-flight streaming exchange with retry.
//! - [`router`] -- Model, fallback and tier resolution.
//! - [`config`] -- TOML settings.
//! - [`observer`] -- Exchange metrics and diagnostics.
//! - [`error`] -- Client error types.

pub mod accumulator;
pub mod client;
pub mod config;
pub mod error;
pub mod observer;
pub mod provider;
pub mod router;
pub mod types;

// Re-export the most commonly used types at the crate root.
pub use accumulator::{PartialToolCall, StreamAccumulator};
pub use client::LlmClient;
pub use config::{LlmClientConfig, ModelSpec, RouterSettings, Settings};
pub use error::{LlmError, LlmErrorKind, Result};
pub use observer::{ExchangeMetrics, ExchangeObserver, ExchangeOutcome, TracingObserver};
pub use provider::{AdapterRequest, Dialect, HttpRequest, Provider, ProviderAdapter};
pub use router::{
    AgentModel, Complexity, CredentialStore, EnvCredentials, ModelRouter, ResolvedModel,
    StaticCredentials,
};
pub use types::{
    ImageAttachment, LlmResponse, Message, Role, StreamEvent, ToolCall, ToolDefinition, Usage,
};
