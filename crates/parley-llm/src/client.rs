//! Streaming exchange orchestrator.
//!
//! [`LlmClient::send`] runs one chat-completion exchange against a
//! [`ResolvedModel`]: it builds the vendor request through the provider's
//! adapter, streams the SSE reply line by line into a
//! [`StreamAccumulator`], and reduces it to an [`LlmResponse`].  Around that it
//! applies the first-byte timeout, the whole-exchange deadline, bounded retry
//! and cancellation.
//!
//! A client runs one exchange at a time.  Starting a new `send` cancels the
//! one in flight, which then resolves to [`LlmError::Cancelled`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::header::RETRY_AFTER;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::accumulator::StreamAccumulator;
use crate::config::LlmClientConfig;
use crate::error::{LlmError, Result};
use crate::observer::{ExchangeMetrics, ExchangeObserver, ExchangeOutcome, TracingObserver};
use crate::provider::sse::LineBuffer;
use crate::provider::{AdapterRequest, HttpRequest, ProviderAdapter};
use crate::router::ResolvedModel;
use crate::types::{LlmResponse, Message, Role, StreamEvent, ToolDefinition, Usage};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// The exchange currently allowed to run.
#[derive(Debug)]
struct InFlight {
    generation: u64,
    token: CancellationToken,
}

/// Per-exchange counters, filled in as the exchange progresses.
#[derive(Debug)]
struct ExchangeStats {
    start: Instant,
    attempts: u32,
    time_to_first_byte: Option<Duration>,
    time_to_first_token: Option<Duration>,
    /// Set once text or a tool-call fragment of this exchange has been
    /// surfaced.  A failure after that point is not retried.
    committed: bool,
    usage: Usage,
}

/// Vendor-agnostic streaming chat client.
pub struct LlmClient {
    config: Arc<LlmClientConfig>,
    http: reqwest::Client,
    observer: Arc<dyn ExchangeObserver>,
    in_flight: Mutex<Option<InFlight>>,
    generation: AtomicU64,
    last_metrics: Mutex<Option<ExchangeMetrics>>,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LlmClient {
    /// Create a client that reports to a [`TracingObserver`].
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        // No overall reqwest timeout: the exchange deadline covers it.
        let http = reqwest::Client::builder()
            .connect_timeout(config.first_byte_timeout())
            .build()
            .map_err(|e| LlmError::NetworkError {
                detail: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
            observer: Arc::new(TracingObserver),
            in_flight: Mutex::new(None),
            generation: AtomicU64::new(0),
            last_metrics: Mutex::new(None),
        })
    }

    /// Replace the diagnostics observer.
    pub fn with_observer(mut self, observer: Arc<dyn ExchangeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &LlmClientConfig {
        &self.config
    }

    /// Metrics of the last exchange that was not superseded.
    pub fn last_metrics(&self) -> Option<ExchangeMetrics> {
        lock(&self.last_metrics).clone()
    }

    /// Cancel the running exchange, if any.  Its `send` returns
    /// [`LlmError::Cancelled`].
    pub fn cancel(&self) {
        if let Some(running) = lock(&self.in_flight).take() {
            tracing::debug!(generation = running.generation, "cancelling LLM exchange");
            running.token.cancel();
        }
    }

    /// Total attempts allowed for a conversation, excluding the extra
    /// rate-limit retry.
    ///
    /// A conversation carrying tool results gets exactly one attempt: the
    /// tools already ran and a replay could repeat their side effects.
    fn attempt_budget(&self, messages: &[Message]) -> u32 {
        if messages.iter().any(|m| m.role == Role::Tool) {
            1
        } else {
            self.config.max_retries.saturating_add(1)
        }
    }

    /// Run one streamed exchange.
    ///
    /// `on_text` receives text fragments in stream order as they arrive.
    pub async fn send<F>(
        &self,
        target: &ResolvedModel,
        messages: &[Message],
        system_prompt: Option<&str>,
        tools: &[ToolDefinition],
        mut on_text: F,
    ) -> Result<LlmResponse>
    where
        F: FnMut(&str) + Send,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.in_flight).replace(InFlight {
            generation,
            token: token.clone(),
        }) {
            tracing::debug!(generation = previous.generation, "superseding LLM exchange");
            previous.token.cancel();
        }

        let exchange_id = Uuid::now_v7();
        let started_at: DateTime<Utc> = Utc::now();
        let mut stats = ExchangeStats {
            start: Instant::now(),
            attempts: 0,
            time_to_first_byte: None,
            time_to_first_token: None,
            committed: false,
            usage: Usage::default(),
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(LlmError::Cancelled),
            _ = tokio::time::sleep(self.config.exchange_deadline()) => Err(LlmError::Timeout),
            r = self.run(exchange_id, target, messages, system_prompt, tools, &mut stats, &mut on_text) => r,
        };

        let superseded = {
            let mut slot = lock(&self.in_flight);
            match slot.as_ref() {
                Some(running) if running.generation == generation => {
                    *slot = None;
                    false
                }
                Some(_) => true,
                None => false,
            }
        };
        let result = if superseded {
            Err(LlmError::Cancelled)
        } else {
            result
        };

        let metrics = ExchangeMetrics {
            exchange_id,
            provider: target.provider,
            model: target.model.clone(),
            was_fallback: target.is_fallback,
            started_at,
            duration: stats.start.elapsed(),
            attempts: stats.attempts,
            time_to_first_byte: stats.time_to_first_byte,
            time_to_first_token: stats.time_to_first_token,
            input_tokens: stats.usage.input_tokens,
            output_tokens: stats.usage.output_tokens,
            outcome: match &result {
                Ok(_) => ExchangeOutcome::Completed,
                Err(e) => ExchangeOutcome::Failed(e.kind()),
            },
        };
        self.observer.exchange_finished(&metrics);
        if !superseded {
            *lock(&self.last_metrics) = Some(metrics);
        }

        result
    }

    // -- Retry loop ----------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn run<F>(
        &self,
        exchange_id: Uuid,
        target: &ResolvedModel,
        messages: &[Message],
        system_prompt: Option<&str>,
        tools: &[ToolDefinition],
        stats: &mut ExchangeStats,
        on_text: &mut F,
    ) -> Result<LlmResponse>
    where
        F: FnMut(&str) + Send,
    {
        if target.provider.requires_api_key() && target.api_key.is_empty() {
            return Err(LlmError::NoApiKey {
                provider: target.provider.to_string(),
            });
        }

        let adapter = target
            .provider
            .adapter(self.config.endpoint(target.provider));
        let request = adapter.build_request(&AdapterRequest {
            messages,
            system_prompt,
            model: &target.model,
            tools,
            api_key: &target.api_key,
            max_tokens: self.config.max_tokens,
        })?;

        let tool_turn = messages.iter().any(|m| m.role == Role::Tool);
        let budget = self.attempt_budget(messages);
        let mut failures = 0u32;
        let mut rate_limit_retried = false;

        loop {
            stats.attempts += 1;
            self.observer
                .attempt_started(exchange_id, target.provider, stats.attempts);

            let err = match self
                .attempt(exchange_id, &*adapter, &request, &target.model, stats, on_text)
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if tool_turn || !err.is_retryable() {
                return Err(err);
            }
            // A replay would hand the caller the same fragments again.
            if stats.committed {
                tracing::debug!(error = %err, "LLM stream failed after output, not retrying");
                return Err(err);
            }

            let delay = match &err {
                LlmError::RateLimited { retry_after } => {
                    if rate_limit_retried {
                        return Err(err);
                    }
                    rate_limit_retried = true;
                    retry_after.unwrap_or_else(|| self.config.rate_limit_default_wait())
                }
                _ => {
                    failures += 1;
                    if failures >= budget {
                        return Err(err);
                    }
                    self.config.backoff(failures)
                }
            };

            self.observer
                .retry_scheduled(exchange_id, stats.attempts, delay, &err);
            tokio::time::sleep(delay).await;
        }
    }

    // -- Single attempt ------------------------------------------------------

    async fn attempt<F>(
        &self,
        exchange_id: Uuid,
        adapter: &dyn ProviderAdapter,
        request: &HttpRequest,
        model: &str,
        stats: &mut ExchangeStats,
        on_text: &mut F,
    ) -> Result<LlmResponse>
    where
        F: FnMut(&str) + Send,
    {
        let pending = self
            .http
            .post(&request.url)
            .headers(request.headers.clone())
            .json(&request.body)
            .send();

        let response = tokio::select! {
            r = pending => r?,
            _ = tokio::time::sleep(self.config.first_byte_timeout()) => {
                tracing::debug!(url = %request.url, "first-byte timeout");
                return Err(LlmError::Timeout);
            }
        };
        stats.time_to_first_byte = Some(stats.start.elapsed());

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = read_error_body(response, self.config.error_body_limit).await;
            let err = status_error(code, retry_after, model, body.clone());
            tracing::debug!(status = code, body = %body, error = %err, "LLM request rejected");
            return Err(err);
        }

        self.read_stream(exchange_id, adapter, response, stats, on_text)
            .await
    }

    // -- Streaming -----------------------------------------------------------

    async fn read_stream<F>(
        &self,
        exchange_id: Uuid,
        adapter: &dyn ProviderAdapter,
        response: reqwest::Response,
        stats: &mut ExchangeStats,
        on_text: &mut F,
    ) -> Result<LlmResponse>
    where
        F: FnMut(&str) + Send,
    {
        let mut acc = StreamAccumulator::new();
        let mut lines = LineBuffer::new();
        let mut body = response.bytes_stream();
        // Set once the terminal signal arrives; trailing chunks are read until
        // then.
        let mut grace_until: Option<Instant> = None;

        loop {
            let next = match grace_until {
                Some(deadline) => match tokio::time::timeout_at(deadline, body.next()).await {
                    Ok(next) => next,
                    Err(_) => break,
                },
                None => body.next().await,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                // A transport hiccup after the terminal signal loses nothing.
                Some(Err(_)) if acc.is_done() => break,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    if let Some(line) = lines.finish() {
                        apply_line(adapter, &line, &mut acc, stats, on_text)?;
                    }
                    break;
                }
            };

            let mut closed = false;
            for line in lines.push(&chunk) {
                apply_line(adapter, &line, &mut acc, stats, on_text)?;
                if adapter.ends_stream(&line) {
                    closed = true;
                    break;
                }
            }
            if closed {
                break;
            }

            if acc.is_done() && grace_until.is_none() {
                grace_until = Some(Instant::now() + self.config.post_done_grace());
            }
        }

        if !acc.is_done() {
            self.observer
                .protocol_anomaly(exchange_id, "stream ended without a terminal signal");
        }

        stats.usage = acc.usage();
        let (response, _usage) = acc.into_response()?;
        Ok(response)
    }
}

/// Decode one line and act on the resulting event.
fn apply_line<F>(
    adapter: &dyn ProviderAdapter,
    line: &str,
    acc: &mut StreamAccumulator,
    stats: &mut ExchangeStats,
    on_text: &mut F,
) -> Result<()>
where
    F: FnMut(&str) + Send,
{
    let was_done = acc.is_done();

    match adapter.decode(line, acc) {
        Some(StreamEvent::PartialText(text)) => {
            if was_done {
                return Err(content_after_terminal());
            }
            if stats.time_to_first_token.is_none() {
                stats.time_to_first_token = Some(stats.start.elapsed());
            }
            stats.committed = true;
            on_text(&text);
        }
        Some(StreamEvent::ToolCallDelta { .. }) => {
            if was_done {
                return Err(content_after_terminal());
            }
            stats.committed = true;
        }
        Some(StreamEvent::Error(e)) => return Err(e),
        Some(StreamEvent::Done) | None => {}
    }

    Ok(())
}

/// Map a non-2xx status to an error.  `body` is the drained, bounded error
/// body.
fn status_error(code: u16, retry_after: Option<Duration>, model: &str, body: String) -> LlmError {
    match code {
        401 | 403 => LlmError::AuthenticationFailed,
        404 => LlmError::ModelNotFound {
            model: model.to_owned(),
        },
        429 => LlmError::RateLimited { retry_after },
        500..=599 => LlmError::ServerError { code, detail: body },
        _ => LlmError::InvalidResponse {
            detail: format!("unexpected HTTP status {code}: {body}"),
        },
    }
}

fn content_after_terminal() -> LlmError {
    LlmError::InvalidResponse {
        detail: "content after terminal event".into(),
    }
}

/// Longest vendor-requested wait honoured; larger values are clamped.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Parse a `Retry-After` value: delta seconds (fractions allowed) or an
/// HTTP date.  The result never exceeds [`MAX_RETRY_AFTER`].
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_nan() || secs < 0.0 {
            return None;
        }
        let wait = Duration::try_from_secs_f64(secs).unwrap_or(MAX_RETRY_AFTER);
        return Some(wait.min(MAX_RETRY_AFTER));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = (at.with_timezone(&Utc) - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO);
    Some(wait.min(MAX_RETRY_AFTER))
}

/// Read at most `limit` bytes of an error body.
async fn read_error_body(response: reqwest::Response, limit: usize) -> String {
    let mut body: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();

    while body.len() < limit {
        let Some(Ok(chunk)) = stream.next().await else {
            break;
        };
        let room = limit - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    String::from_utf8_lossy(&body).trim().to_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
