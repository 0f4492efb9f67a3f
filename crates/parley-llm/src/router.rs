//! Model router.
//!
//! Resolves which provider, model and credential an exchange should target:
//! the primary model, a fallback after a failure, a tier chosen by estimated
//! task complexity, or a last-resort local model.  Resolution is pure over
//! [`RouterSettings`] and an injected [`CredentialStore`]; nothing here does
//! I/O beyond what the store itself does.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{ModelSpec, RouterSettings};
use crate::error::{LlmError, Result};
use crate::provider::Provider;

/// An agent's own default model.  Same shape as any configured model.
pub type AgentModel = ModelSpec;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Source of provider credentials.
pub trait CredentialStore: Send + Sync {
    /// The standard credential for `provider`.
    fn api_key(&self, provider: Provider) -> Option<String>;

    /// A tier-specific credential.  Falls back to the standard one when
    /// absent.
    fn tier_api_key(&self, provider: Provider, tier: Complexity) -> Option<String> {
        let _ = (provider, tier);
        None
    }
}

/// Reads credentials from each provider's environment variable.
///
/// Tier credentials live in `<VAR>_LIGHT` and `<VAR>_HEAVY`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

fn env_value(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

impl CredentialStore for EnvCredentials {
    fn api_key(&self, provider: Provider) -> Option<String> {
        env_value(provider.api_key_env())
    }

    fn tier_api_key(&self, provider: Provider, tier: Complexity) -> Option<String> {
        let var = provider.api_key_env();
        let suffix = match tier {
            Complexity::Light => "LIGHT",
            Complexity::Heavy => "HEAVY",
            Complexity::Standard => return None,
        };
        if var.is_empty() {
            return None;
        }
        env_value(&format!("{var}_{suffix}"))
    }
}

/// Fixed in-memory credentials.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: HashMap<Provider, String>,
    tier_keys: HashMap<(Provider, Complexity), String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, provider: Provider, key: impl Into<String>) -> Self {
        self.keys.insert(provider, key.into());
        self
    }

    pub fn with_tier_key(
        mut self,
        provider: Provider,
        tier: Complexity,
        key: impl Into<String>,
    ) -> Self {
        self.tier_keys.insert((provider, tier), key.into());
        self
    }
}

impl CredentialStore for StaticCredentials {
    fn api_key(&self, provider: Provider) -> Option<String> {
        self.keys.get(&provider).cloned()
    }

    fn tier_api_key(&self, provider: Provider, tier: Complexity) -> Option<String> {
        self.tier_keys.get(&(provider, tier)).cloned()
    }
}

// ---------------------------------------------------------------------------
// Complexity estimation
// ---------------------------------------------------------------------------

/// Estimated complexity of a task, used to select a model tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Short, factual tasks.
    Light,
    /// The default tier.
    Standard,
    /// Deep reasoning, multi-step planning or code generation.
    Heavy,
}

impl Complexity {
    /// Estimate task complexity from its input text.
    pub fn estimate(input: &str) -> Self {
        let lower = input.to_lowercase();
        let word_count = lower.split_whitespace().count();
        let has_code_markers = lower.contains("```")
            || lower.contains("fn ")
            || lower.contains("class ")
            || lower.contains("def ");
        let has_multi_step = lower.contains(" and then ")
            || lower.contains(" after that ")
            || lower.contains(" step ")
            || lower.contains(" steps ");
        let has_analysis_keywords = lower.contains("analyze")
            || lower.contains("compare")
            || lower.contains("evaluate")
            || lower.contains("synthesize")
            || lower.contains("design")
            || lower.contains("architect");

        if has_code_markers || has_analysis_keywords || (has_multi_step && word_count > 50) {
            Self::Heavy
        } else if word_count > 30 || has_multi_step {
            Self::Standard
        } else {
            Self::Light
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Light => "light",
            Self::Standard => "standard",
            Self::Heavy => "heavy",
        })
    }
}

impl FromStr for Complexity {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "standard" => Ok(Self::Standard),
            "heavy" => Ok(Self::Heavy),
            other => Err(LlmError::Config {
                reason: format!("unknown complexity tier: {other}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// A concrete exchange target.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub provider: Provider,
    pub model: String,
    /// Empty for credential-free local providers.
    pub api_key: String,
    pub is_fallback: bool,
}

impl fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field(
                "api_key",
                &if self.api_key.is_empty() { "" } else { "<redacted>" },
            )
            .field("is_fallback", &self.is_fallback)
            .finish()
    }
}

/// Resolves exchange targets from settings and credentials.
#[derive(Clone)]
pub struct ModelRouter {
    settings: RouterSettings,
    credentials: Arc<dyn CredentialStore>,
}

impl fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRouter")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ModelRouter {
    pub fn new(settings: RouterSettings, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            settings,
            credentials,
        }
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// The standard credential for `provider`.  Local providers always
    /// resolve, with an empty key when none is stored.
    fn credential(&self, provider: Provider) -> Option<String> {
        let key = self
            .credentials
            .api_key(provider)
            .filter(|k| !k.is_empty());
        if provider.is_local() {
            Some(key.unwrap_or_default())
        } else {
            key
        }
    }

    fn resolve_spec(&self, spec: &ModelSpec) -> Option<ResolvedModel> {
        if spec.model.trim().is_empty() {
            return None;
        }
        let provider = spec.resolved_provider()?;
        let api_key = self.credential(provider)?;
        Some(ResolvedModel {
            provider,
            model: spec.model.clone(),
            api_key,
            is_fallback: false,
        })
    }

    /// The primary target: the agent's own model when it is resolvable and
    /// credentialed, else the global default.
    pub fn resolve_primary(&self, agent: Option<&AgentModel>) -> Option<ResolvedModel> {
        if let Some(resolved) = agent.and_then(|spec| self.resolve_spec(spec)) {
            tracing::debug!(provider = %resolved.provider, model = %resolved.model, "using agent model");
            return Some(resolved);
        }

        let resolved = self
            .settings
            .default_model
            .as_ref()
            .and_then(|spec| self.resolve_spec(spec));
        if resolved.is_none() {
            tracing::debug!("no credentialed default model");
        }
        resolved
    }

    /// The configured fallback, if credentialed and distinct from the
    /// primary.
    pub fn resolve_fallback(&self) -> Option<ResolvedModel> {
        let fallback = self
            .settings
            .fallback_model
            .as_ref()
            .and_then(|spec| self.resolve_spec(spec))?;

        let same_as_primary = self
            .resolve_primary(None)
            .is_some_and(|p| p.provider == fallback.provider && p.model == fallback.model);
        if same_as_primary {
            return None;
        }

        Some(ResolvedModel {
            is_fallback: true,
            ..fallback
        })
    }

    /// The target for a task of the given complexity.
    ///
    /// Anything not fully configured for the tier resolves to the primary.
    pub fn resolve_for_complexity(&self, tier: Complexity) -> Option<ResolvedModel> {
        if !self.settings.task_routing {
            return self.resolve_primary(None);
        }

        let spec = match tier {
            Complexity::Standard => return self.resolve_primary(None),
            Complexity::Light => self.settings.light_model.as_ref(),
            Complexity::Heavy => self.settings.heavy_model.as_ref(),
        };

        let tiered = spec.filter(|s| !s.model.trim().is_empty()).and_then(|spec| {
            let provider = spec.resolved_provider()?;
            let api_key = self
                .credentials
                .tier_api_key(provider, tier)
                .filter(|k| !k.is_empty())
                .or_else(|| self.credential(provider))?;
            Some(ResolvedModel {
                provider,
                model: spec.model.clone(),
                api_key,
                is_fallback: false,
            })
        });

        match tiered {
            Some(resolved) => {
                tracing::debug!(%tier, provider = %resolved.provider, model = %resolved.model, "routed request to model tier");
                Some(resolved)
            }
            None => self.resolve_primary(None),
        }
    }

    /// Estimate complexity and resolve in one step.
    pub fn resolve_for_input(&self, input: &str) -> Option<ResolvedModel> {
        self.resolve_for_complexity(Complexity::estimate(input))
    }

    /// The last-resort local model, when enabled.
    pub fn resolve_offline_fallback(&self) -> Option<ResolvedModel> {
        if !self.settings.offline_fallback {
            return None;
        }
        let spec = self.settings.offline_model.as_ref()?;
        let provider = spec.resolved_provider().filter(|p| p.is_local())?;
        if spec.model.trim().is_empty() {
            return None;
        }
        Some(ResolvedModel {
            provider,
            model: spec.model.clone(),
            api_key: String::new(),
            is_fallback: true,
        })
    }

    /// Whether a failed exchange is worth repeating on another model.
    pub fn should_fallback(error: &LlmError) -> bool {
        matches!(
            error,
            LlmError::ServerError { .. }
                | LlmError::Timeout
                | LlmError::NetworkError { .. }
                | LlmError::EmptyResponse
                | LlmError::RateLimited { .. }
                | LlmError::ModelNotFound { .. }
        )
    }

    /// Whether the failure means the network (not the provider) is the
    /// problem, so only a local model can help.
    pub fn is_network_error(error: &LlmError) -> bool {
        matches!(error, LlmError::NetworkError { .. } | LlmError::Timeout)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
