//! Exchange metrics and diagnostics.
//!
//! [`LlmClient`](crate::LlmClient) reports attempts, retries and the finished
//! exchange to an injected [`ExchangeObserver`].  The default
//! [`TracingObserver`] turns them into `tracing` events.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{LlmError, LlmErrorKind};
use crate::provider::Provider;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// How an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Completed,
    Failed(LlmErrorKind),
}

impl Serialize for ExchangeOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Completed => serializer.serialize_str("completed"),
            Self::Failed(kind) => serializer.collect_str(kind),
        }
    }
}

/// Metrics for one exchange, written once when it ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeMetrics {
    /// Time-ordered unique id.
    pub exchange_id: Uuid,
    pub provider: Provider,
    pub model: String,
    /// Whether the target was a fallback model.
    pub was_fallback: bool,
    pub started_at: DateTime<Utc>,
    /// Wall time from `send` to the outcome.
    pub duration: Duration,
    /// HTTP attempts made, including retries.
    pub attempts: u32,
    /// Time until response headers of the successful attempt.
    pub time_to_first_byte: Option<Duration>,
    /// Time until the first text fragment.
    pub time_to_first_token: Option<Duration>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub outcome: ExchangeOutcome,
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Receives diagnostics from the exchange loop.  All methods default to
/// no-ops.
pub trait ExchangeObserver: Send + Sync {
    /// An HTTP attempt is about to be sent.
    fn attempt_started(&self, exchange_id: Uuid, provider: Provider, attempt: u32) {
        let _ = (exchange_id, provider, attempt);
    }

    /// A failed attempt will be retried after `delay`.
    fn retry_scheduled(&self, exchange_id: Uuid, attempt: u32, delay: Duration, error: &LlmError) {
        let _ = (exchange_id, attempt, delay, error);
    }

    /// The stream broke protocol in a way that did not abort the exchange,
    /// e.g. it ended without a terminal signal.
    fn protocol_anomaly(&self, exchange_id: Uuid, detail: &str) {
        let _ = (exchange_id, detail);
    }

    /// The exchange ended.
    fn exchange_finished(&self, metrics: &ExchangeMetrics) {
        let _ = metrics;
    }
}

/// Observer that logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ExchangeObserver for TracingObserver {
    fn attempt_started(&self, exchange_id: Uuid, provider: Provider, attempt: u32) {
        tracing::debug!(%exchange_id, %provider, attempt, "sending LLM request");
    }

    fn retry_scheduled(&self, exchange_id: Uuid, attempt: u32, delay: Duration, error: &LlmError) {
        tracing::warn!(
            %exchange_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "LLM request failed, retrying"
        );
    }

    fn protocol_anomaly(&self, exchange_id: Uuid, detail: &str) {
        tracing::warn!(%exchange_id, detail, "stream protocol anomaly");
    }

    fn exchange_finished(&self, metrics: &ExchangeMetrics) {
        let duration_ms = metrics.duration.as_millis() as u64;
        match metrics.outcome {
            ExchangeOutcome::Completed => tracing::info!(
                exchange_id = %metrics.exchange_id,
                provider = %metrics.provider,
                model = %metrics.model,
                was_fallback = metrics.was_fallback,
                attempts = metrics.attempts,
                duration_ms,
                input_tokens = ?metrics.input_tokens,
                output_tokens = ?metrics.output_tokens,
                "LLM exchange completed"
            ),
            ExchangeOutcome::Failed(kind) => tracing::warn!(
                exchange_id = %metrics.exchange_id,
                provider = %metrics.provider,
                model = %metrics.model,
                was_fallback = metrics.was_fallback,
                attempts = metrics.attempts,
                duration_ms,
                error_kind = %kind,
                "LLM exchange failed"
            ),
        }
    }
}
