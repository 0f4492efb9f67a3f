//! Client error types.
//!
//! Every failure an exchange can surface is an [`LlmError`].  The variants
//! form a closed taxonomy: the retry loop, the model router, and callers all
//! match on them to decide between retrying, switching models, or showing the
//! description to the user verbatim.

use std::fmt;
use std::time::Duration;

/// Unified error type for the chat-completion client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    // -- Credentials ---------------------------------------------------------
    /// No credential is available for a provider that requires one.
    #[error("no API key configured for {provider}")]
    NoApiKey { provider: String },

    /// The provider rejected the credential (HTTP 401 / 403).
    #[error("authentication failed: the provider rejected the API key")]
    AuthenticationFailed,

    // -- Capacity ------------------------------------------------------------
    /// The provider throttled the request (HTTP 429).
    #[error("rate limited by the provider{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// The requested model does not exist on the provider (HTTP 404).
    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    /// The first byte or the whole exchange missed its deadline.
    #[error("the model took too long to respond")]
    Timeout,

    /// The connection failed or dropped mid-stream.
    #[error("network error: {detail}")]
    NetworkError { detail: String },

    /// The provider returned a 5xx status or a mid-stream server error.
    #[error("provider server error ({code}): {detail}")]
    ServerError { code: u16, detail: String },

    // -- Response shape ------------------------------------------------------
    /// The stream finished without any text or tool calls.
    #[error("the model returned an empty response")]
    EmptyResponse,

    /// The response could not be interpreted.
    #[error("invalid response from provider: {detail}")]
    InvalidResponse { detail: String },

    // -- Control -------------------------------------------------------------
    /// The exchange was cancelled by the caller or superseded by a newer one.
    #[error("request cancelled")]
    Cancelled,

    // -- Configuration -------------------------------------------------------
    /// Settings could not be loaded or validated.
    #[error("config error: {reason}")]
    Config { reason: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LlmError>;

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}s", d.as_secs_f64().ceil()),
        None => String::new(),
    }
}

/// Fieldless discriminant of [`LlmError`], cheap to copy into metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmErrorKind {
    NoApiKey,
    AuthenticationFailed,
    RateLimited,
    ModelNotFound,
    Timeout,
    NetworkError,
    ServerError,
    EmptyResponse,
    InvalidResponse,
    Cancelled,
    Config,
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoApiKey => "no_api_key",
            Self::AuthenticationFailed => "authentication_failed",
            Self::RateLimited => "rate_limited",
            Self::ModelNotFound => "model_not_found",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
            Self::ServerError => "server_error",
            Self::EmptyResponse => "empty_response",
            Self::InvalidResponse => "invalid_response",
            Self::Cancelled => "cancelled",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

impl LlmError {
    /// The discriminant of this error.
    pub fn kind(&self) -> LlmErrorKind {
        match self {
            Self::NoApiKey { .. } => LlmErrorKind::NoApiKey,
            Self::AuthenticationFailed => LlmErrorKind::AuthenticationFailed,
            Self::RateLimited { .. } => LlmErrorKind::RateLimited,
            Self::ModelNotFound { .. } => LlmErrorKind::ModelNotFound,
            Self::Timeout => LlmErrorKind::Timeout,
            Self::NetworkError { .. } => LlmErrorKind::NetworkError,
            Self::ServerError { .. } => LlmErrorKind::ServerError,
            Self::EmptyResponse => LlmErrorKind::EmptyResponse,
            Self::InvalidResponse { .. } => LlmErrorKind::InvalidResponse,
            Self::Cancelled => LlmErrorKind::Cancelled,
            Self::Config { .. } => LlmErrorKind::Config,
        }
    }

    /// Whether the exchange loop may replay the request after this error.
    ///
    /// Only bounded-duration failures qualify.  Everything else either cannot
    /// be fixed by trying again or was requested by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServerError { .. }
                | Self::Timeout
                | Self::NetworkError { .. }
                | Self::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::NetworkError {
                detail: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_set() {
        assert!(LlmError::Timeout.is_retryable());
        assert!(
            LlmError::ServerError {
                code: 503,
                detail: String::new()
            }
            .is_retryable()
        );
        assert!(LlmError::RateLimited { retry_after: None }.is_retryable());
        assert!(!LlmError::AuthenticationFailed.is_retryable());
        assert!(!LlmError::EmptyResponse.is_retryable());
        assert!(!LlmError::Cancelled.is_retryable());
    }

    #[test]
    fn descriptions_are_human_readable() {
        let err = LlmError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(err.to_string(), "rate limited by the provider, retry after 2s");
        assert_eq!(
            LlmError::RateLimited { retry_after: None }.to_string(),
            "rate limited by the provider"
        );
        assert_eq!(
            LlmError::ModelNotFound {
                model: "gpt-9".into()
            }
            .to_string(),
            "model not found: gpt-9"
        );
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(LlmError::Cancelled.kind(), LlmErrorKind::Cancelled);
        assert_eq!(LlmErrorKind::ServerError.to_string(), "server_error");
    }
}
