//! Client and router settings.
//!
//! Settings are read from a TOML file with two sections:
//!
//! ```toml
//! [client]
//! max_retries = 2
//! backoff_ms = [250, 750]
//! first_byte_timeout_ms = 20000
//!
//! [client.endpoints]
//! ollama = "http://gpu-box:11434/v1"
//!
//! [router]
//! default_model = { provider = "anthropic", model = "claude-sonnet-4-20250514" }
//! fallback_model = { model = "gpt-4o" }
//! ```
//!
//! Every field has a default, so an empty file is valid.  Credentials never
//! live here; see [`crate::router::CredentialStore`].

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};
use crate::provider::Provider;

// ---------------------------------------------------------------------------
// Client settings
// ---------------------------------------------------------------------------

/// Timeouts, retry policy and endpoint overrides for [`crate::LlmClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmClientConfig {
    /// Retries after the first attempt.  Tool turns ignore this and never
    /// retry.
    pub max_retries: u32,

    /// Backoff before each retry, in milliseconds.  The last entry repeats.
    pub backoff_ms: Vec<u64>,

    /// Time allowed for the response headers to arrive.
    pub first_byte_timeout_ms: u64,

    /// Upper bound on the whole exchange, retries included.
    pub exchange_deadline_ms: u64,

    /// Wait used for a 429 that carries no `Retry-After`.
    pub rate_limit_default_wait_ms: u64,

    /// How long to keep reading after the terminal signal for trailing
    /// chunks such as usage.
    pub post_done_grace_ms: u64,

    /// Bytes of an error response body kept in the error detail.
    pub error_body_limit: usize,

    /// Response token cap.  Anthropic requires one and falls back to 4096.
    pub max_tokens: Option<u32>,

    /// Per-provider base URL overrides.
    pub endpoints: HashMap<Provider, String>,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: vec![250, 750],
            first_byte_timeout_ms: 20_000,
            exchange_deadline_ms: 60_000,
            rate_limit_default_wait_ms: 5_000,
            post_done_grace_ms: 1_000,
            error_body_limit: 2048,
            max_tokens: None,
            endpoints: HashMap::new(),
        }
    }
}

impl LlmClientConfig {
    /// Backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let idx = (retry.saturating_sub(1) as usize).min(self.backoff_ms.len().saturating_sub(1));
        Duration::from_millis(self.backoff_ms.get(idx).copied().unwrap_or(0))
    }

    pub fn first_byte_timeout(&self) -> Duration {
        Duration::from_millis(self.first_byte_timeout_ms)
    }

    pub fn exchange_deadline(&self) -> Duration {
        Duration::from_millis(self.exchange_deadline_ms)
    }

    pub fn rate_limit_default_wait(&self) -> Duration {
        Duration::from_millis(self.rate_limit_default_wait_ms)
    }

    pub fn post_done_grace(&self) -> Duration {
        Duration::from_millis(self.post_done_grace_ms)
    }

    /// The configured base URL override for `provider`, if any.
    pub fn endpoint(&self, provider: Provider) -> Option<&str> {
        self.endpoints.get(&provider).map(String::as_str)
    }

    /// Point `provider` at a different base URL.
    pub fn with_endpoint(mut self, provider: Provider, base_url: impl Into<String>) -> Self {
        self.endpoints.insert(provider, base_url.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.first_byte_timeout_ms == 0 || self.exchange_deadline_ms == 0 {
            return Err(LlmError::Config {
                reason: "timeouts must be greater than zero".into(),
            });
        }

        for (provider, base_url) in &self.endpoints {
            let url = url::Url::parse(base_url).map_err(|e| LlmError::Config {
                reason: format!("invalid endpoint for {provider}: {e}"),
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(LlmError::Config {
                    reason: format!("endpoint for {provider} must be http or https"),
                });
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Router settings
// ---------------------------------------------------------------------------

/// A model reference.  The provider is inferred from the model name when
/// omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    pub model: String,
}

impl ModelSpec {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider: Some(provider),
            model: model.into(),
        }
    }

    /// A spec whose provider is inferred from the model name.
    pub fn inferred(model: impl Into<String>) -> Self {
        Self {
            provider: None,
            model: model.into(),
        }
    }

    /// The explicit provider, or the one inferred from the model name.
    pub fn resolved_provider(&self) -> Option<Provider> {
        self.provider
            .or_else(|| Provider::infer_from_model(&self.model))
    }
}

/// Model choices consumed by [`crate::ModelRouter`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// The global default model.
    pub default_model: Option<ModelSpec>,

    /// Used after a fallback-worthy failure of the primary.
    pub fallback_model: Option<ModelSpec>,

    /// Route by task complexity.
    pub task_routing: bool,

    /// Model for light tasks when task routing is on.
    pub light_model: Option<ModelSpec>,

    /// Model for heavy tasks when task routing is on.
    pub heavy_model: Option<ModelSpec>,

    /// Allow a last-resort local model.
    pub offline_fallback: bool,

    /// The local model to use as the last resort.  Must be on a local
    /// provider.
    pub offline_model: Option<ModelSpec>,
}

// ---------------------------------------------------------------------------
// Settings file
// ---------------------------------------------------------------------------

/// Top-level settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub client: LlmClientConfig,
    pub router: RouterSettings,
}

impl Settings {
    /// Load and validate settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| LlmError::Config {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;

        let settings = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content).map_err(|e| LlmError::Config {
            reason: format!("failed to parse TOML settings: {e}"),
        })?;
        settings.client.validate()?;
        Ok(settings)
    }
}
