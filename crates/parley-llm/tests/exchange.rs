//! End-to-end exchange tests against a mock HTTP server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parley_llm::{
    ExchangeObserver, ExchangeOutcome, LlmClient, LlmClientConfig, LlmError, LlmErrorKind,
    LlmResponse, Message, ModelRouter, Provider, ResolvedModel, ToolCall, ToolDefinition,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const HELLO_SSE: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"},\"finish_reason\":null}]}\n\n",
    ": keep-alive\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\" world\"},\"finish_reason\":null}]}\n\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

fn config(server: &MockServer) -> LlmClientConfig {
    LlmClientConfig {
        backoff_ms: vec![10, 20],
        first_byte_timeout_ms: 2_000,
        exchange_deadline_ms: 10_000,
        rate_limit_default_wait_ms: 50,
        post_done_grace_ms: 100,
        ..LlmClientConfig::default()
    }
    .with_endpoint(Provider::OpenAI, format!("{}/v1", server.uri()))
    .with_endpoint(Provider::Ollama, format!("{}/v1", server.uri()))
    .with_endpoint(Provider::Anthropic, server.uri())
}

fn target(provider: Provider, model: &str, api_key: &str) -> ResolvedModel {
    ResolvedModel {
        provider,
        model: model.to_owned(),
        api_key: api_key.to_owned(),
        is_fallback: false,
    }
}

fn openai() -> ResolvedModel {
    target(Provider::OpenAI, "gpt-4o", "sk-test")
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_owned(), "text/event-stream")
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}

#[derive(Default)]
struct Recorder {
    attempts: AtomicU32,
    retries: AtomicU32,
}

impl ExchangeObserver for Recorder {
    fn attempt_started(&self, _exchange_id: Uuid, _provider: Provider, _attempt: u32) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    fn retry_scheduled(&self, _exchange_id: Uuid, _attempt: u32, _delay: Duration, _error: &LlmError) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Happy paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streams_text_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("accept", "text/event-stream"))
        .respond_with(sse(HELLO_SSE))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let mut streamed = Vec::new();
    let resp = client
        .send(&openai(), &[Message::user("hi")], Some("be brief"), &[], |t| {
            streamed.push(t.to_owned())
        })
        .await
        .unwrap();

    assert_eq!(resp, LlmResponse::Text("Hello world".into()));
    assert_eq!(streamed, vec!["Hello", " world"]);

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"][0], json!({"role": "system", "content": "be brief"}));

    let metrics = client.last_metrics().unwrap();
    assert_eq!(metrics.outcome, ExchangeOutcome::Completed);
    assert_eq!(metrics.attempts, 1);
    assert!(metrics.time_to_first_byte.is_some());
    assert!(metrics.time_to_first_token.is_some());
}

#[tokio::test]
async fn trailing_usage_chunk_is_captured() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":11,\"completion_tokens\":1}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .respond_with(sse(body))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let resp = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap();
    assert_eq!(resp, LlmResponse::Text("ok".into()));

    let metrics = client.last_metrics().unwrap();
    assert_eq!(metrics.input_tokens, Some(11));
    assert_eq!(metrics.output_tokens, Some(1));
}

#[tokio::test]
async fn anthropic_tool_use_stream() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":30}}}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"lookup\",\"input\":{}}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"query\\\":\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"abc\\\"}\"}}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":12}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(sse(body))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let tools = [ToolDefinition {
        name: "lookup".into(),
        description: "Look something up".into(),
        input_schema: json!({"type": "object", "properties": {"query": {"type": "string"}}}),
    }];
    let resp = client
        .send(
            &target(Provider::Anthropic, "claude-sonnet-4-20250514", "sk-ant-test"),
            &[Message::user("look up abc")],
            None,
            &tools,
            |_| {},
        )
        .await
        .unwrap();

    let LlmResponse::ToolCalls(calls) = resp else {
        panic!("expected ToolCalls response");
    };
    assert_eq!(
        calls,
        vec![ToolCall {
            id: "toolu_1".into(),
            name: "lookup".into(),
            arguments: r#"{"query":"abc"}"#.into(),
        }]
    );

    let metrics = client.last_metrics().unwrap();
    assert_eq!(metrics.input_tokens, Some(30));
    assert_eq!(metrics.output_tokens, Some(12));
}

#[tokio::test]
async fn local_provider_sends_no_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse(HELLO_SSE))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    client
        .send(
            &target(Provider::Ollama, "qwen2.5:7b", ""),
            &[Message::user("hi")],
            None,
            &[],
            |_| {},
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_errors_are_retried_then_succeed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(sse(HELLO_SSE))
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let client = LlmClient::new(config(&server))
        .unwrap()
        .with_observer(recorder.clone());
    let resp = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap();

    assert_eq!(resp, LlmResponse::Text("Hello world".into()));
    assert_eq!(request_count(&server).await, 3);
    assert_eq!(recorder.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.retries.load(Ordering::SeqCst), 2);

    let metrics = client.last_metrics().unwrap();
    assert!(!metrics.was_fallback);
    assert_eq!(metrics.attempts, 3);
}

#[tokio::test]
async fn exhausted_budget_surfaces_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded, try later"))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let err = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap_err();

    assert_eq!(
        err,
        LlmError::ServerError {
            code: 503,
            detail: "overloaded, try later".into()
        }
    );
    assert_eq!(request_count(&server).await, 3);
    assert_eq!(
        client.last_metrics().unwrap().outcome,
        ExchangeOutcome::Failed(LlmErrorKind::ServerError)
    );
}

#[tokio::test]
async fn error_body_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(10_000)))
        .mount(&server)
        .await;

    let cfg = LlmClientConfig {
        max_retries: 0,
        error_body_limit: 64,
        ..config(&server)
    };
    let client = LlmClient::new(cfg).unwrap();
    let err = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap_err();

    let LlmError::ServerError { detail, .. } = err else {
        panic!("expected ServerError, got {err:?}");
    };
    assert_eq!(detail.len(), 64);
}

#[tokio::test]
async fn tool_turn_gets_a_single_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let messages = [
        Message::user("look up abc"),
        Message::assistant_tool_calls(vec![ToolCall {
            id: "call_1".into(),
            name: "lookup".into(),
            arguments: r#"{"query":"abc"}"#.into(),
        }]),
        Message::tool_result("call_1", "a letter sequence"),
    ];
    let err = client
        .send(&openai(), &messages, None, &[], |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, LlmError::ServerError { code: 500, .. }));
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn tool_turn_does_not_retry_rate_limits() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let err = client
        .send(
            &openai(),
            &[Message::tool_result("call_1", "done")],
            None,
            &[],
            |_| {},
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LlmError::RateLimited { .. }));
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn auth_failure_is_immediate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let err = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap_err();

    assert_eq!(err, LlmError::AuthenticationFailed);
    assert!(!ModelRouter::should_fallback(&err));
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn unknown_model_maps_to_model_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let err = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap_err();

    assert_eq!(
        err,
        LlmError::ModelNotFound {
            model: "gpt-4o".into()
        }
    );
    assert!(ModelRouter::should_fallback(&err));
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn rate_limit_retry_is_outside_the_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(sse(HELLO_SSE))
        .mount(&server)
        .await;

    let cfg = LlmClientConfig {
        max_retries: 0,
        ..config(&server)
    };
    let client = LlmClient::new(cfg).unwrap();
    let resp = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap();

    assert_eq!(resp, LlmResponse::Text("Hello world".into()));
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn rate_limit_then_full_budget_of_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(sse(HELLO_SSE))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let resp = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap();

    assert_eq!(resp, LlmResponse::Text("Hello world".into()));
    assert_eq!(request_count(&server).await, 4);
    assert_eq!(client.last_metrics().unwrap().attempts, 4);
}

#[tokio::test]
async fn rate_limit_waits_for_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(sse(HELLO_SSE))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let started = Instant::now();
    let resp = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap();

    assert_eq!(resp, LlmResponse::Text("Hello world".into()));
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn second_rate_limit_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let err = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap_err();

    assert_eq!(
        err,
        LlmError::RateLimited {
            retry_after: Some(Duration::ZERO)
        }
    );
    assert_eq!(request_count(&server).await, 2);
}

// ---------------------------------------------------------------------------
// Stream shape
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_stream_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse("data: [DONE]\n\n"))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let err = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap_err();

    assert_eq!(err, LlmError::EmptyResponse);
    assert!(ModelRouter::should_fallback(&err));
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn content_after_terminal_is_invalid() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"done\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" or not\"},\"finish_reason\":null}]}\n\n",
    );
    Mock::given(method("POST"))
        .respond_with(sse(body))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let err = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, LlmError::InvalidResponse { .. }));
}

#[tokio::test]
async fn failure_after_streamed_text_is_not_replayed() {
    let server = MockServer::start().await;
    let broken = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"},\"finish_reason\":null}]}\n\n",
        "data: {\"error\":{\"type\":\"server_error\",\"message\":\"upstream died\"}}\n\n",
    );
    Mock::given(method("POST"))
        .respond_with(sse(broken))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(sse(HELLO_SSE))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let mut streamed = Vec::new();
    let err = client
        .send(&openai(), &[Message::user("hi")], None, &[], |t| {
            streamed.push(t.to_owned())
        })
        .await
        .unwrap_err();

    assert_eq!(
        err,
        LlmError::ServerError {
            code: 500,
            detail: "upstream died".into()
        }
    );
    assert_eq!(streamed, vec!["Hello"]);
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn failure_before_any_output_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(
            "data: {\"error\":{\"type\":\"server_error\",\"message\":\"upstream died\"}}\n\n",
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(sse(HELLO_SSE))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let mut streamed = Vec::new();
    let resp = client
        .send(&openai(), &[Message::user("hi")], None, &[], |t| {
            streamed.push(t.to_owned())
        })
        .await
        .unwrap();

    assert_eq!(resp, LlmResponse::Text("Hello world".into()));
    assert_eq!(streamed, vec!["Hello", " world"]);
    assert_eq!(request_count(&server).await, 2);
}

/// Serve one chunked SSE response whose connection stays open after `body`.
async fn serve_open_stream(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 64 * 1024];
        let _ = socket.read(&mut buf).await;

        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
        let chunk = format!("{:x}\r\n{body}\r\n", body.len());
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(chunk.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    format!("http://{addr}/v1")
}

#[tokio::test]
async fn done_sentinel_ends_the_stream() {
    let base = serve_open_stream(HELLO_SSE).await;
    let cfg = LlmClientConfig {
        post_done_grace_ms: 5_000,
        ..LlmClientConfig::default()
    }
    .with_endpoint(Provider::OpenAI, base);

    let client = LlmClient::new(cfg).unwrap();
    let started = Instant::now();
    let resp = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap();

    assert_eq!(resp, LlmResponse::Text("Hello world".into()));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn finish_reason_waits_out_the_grace_window() {
    let body = "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"},\"finish_reason\":\"stop\"}]}\n\n";
    let base = serve_open_stream(body).await;
    let cfg = LlmClientConfig {
        post_done_grace_ms: 300,
        ..LlmClientConfig::default()
    }
    .with_endpoint(Provider::OpenAI, base);

    let client = LlmClient::new(cfg).unwrap();
    let started = Instant::now();
    let resp = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap();

    assert_eq!(resp, LlmResponse::Text("ok".into()));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3));
}

#[tokio::test]
async fn stream_without_terminal_is_still_reduced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(
            "data: {\"choices\":[{\"delta\":{\"content\":\"cut short\"}}]}",
        ))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let resp = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap();
    assert_eq!(resp, LlmResponse::Text("cut short".into()));
}

#[tokio::test]
async fn in_band_error_aborts() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: error\n",
        "data: {\"type\":\"error\",\"error\":{\"type\":\"invalid_request_error\",\"message\":\"prompt too long\"}}\n\n",
    );
    Mock::given(method("POST"))
        .respond_with(sse(body))
        .mount(&server)
        .await;

    let client = LlmClient::new(config(&server)).unwrap();
    let err = client
        .send(
            &target(Provider::Anthropic, "claude-sonnet-4-20250514", "sk-ant-test"),
            &[Message::user("hi")],
            None,
            &[],
            |_| {},
        )
        .await
        .unwrap_err();

    assert_eq!(
        err,
        LlmError::InvalidResponse {
            detail: "prompt too long".into()
        }
    );
    assert_eq!(request_count(&server).await, 1);
}

// ---------------------------------------------------------------------------
// Timeouts and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_byte_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(HELLO_SSE).set_delay(Duration::from_millis(800)))
        .mount(&server)
        .await;

    let cfg = LlmClientConfig {
        max_retries: 0,
        first_byte_timeout_ms: 100,
        ..config(&server)
    };
    let client = LlmClient::new(cfg).unwrap();
    let err = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap_err();

    assert_eq!(err, LlmError::Timeout);
    assert!(ModelRouter::is_network_error(&err));
}

#[tokio::test]
async fn exchange_deadline_is_a_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(HELLO_SSE).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let cfg = LlmClientConfig {
        first_byte_timeout_ms: 5_000,
        exchange_deadline_ms: 200,
        ..config(&server)
    };
    let client = LlmClient::new(cfg).unwrap();
    let started = Instant::now();
    let err = client
        .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
        .await
        .unwrap_err();

    assert_eq!(err, LlmError::Timeout);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn cancel_stops_the_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(HELLO_SSE).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let client = Arc::new(LlmClient::new(config(&server)).unwrap());
    let running = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .send(&openai(), &[Message::user("hi")], None, &[], |_| {})
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    client.cancel();

    let err = running.await.unwrap().unwrap_err();
    assert_eq!(err, LlmError::Cancelled);
    assert!(!ModelRouter::should_fallback(&err));
}

#[tokio::test]
async fn new_send_supersedes_the_running_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("first question"))
        .respond_with(sse(HELLO_SSE).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("second question"))
        .respond_with(sse(HELLO_SSE))
        .mount(&server)
        .await;

    let client = Arc::new(LlmClient::new(config(&server)).unwrap());
    let first = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .send(&openai(), &[Message::user("first question")], None, &[], |_| {})
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = client
        .send(&openai(), &[Message::user("second question")], None, &[], |_| {})
        .await
        .unwrap();

    assert_eq!(second, LlmResponse::Text("Hello world".into()));
    assert_eq!(first.await.unwrap().unwrap_err(), LlmError::Cancelled);

    let metrics = client.last_metrics().unwrap();
    assert_eq!(metrics.outcome, ExchangeOutcome::Completed);
}
