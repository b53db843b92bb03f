//! Tests for bionic-llm: request shape, retry policy, and the OpenAI-compatible
//! provider against a local mock server

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bionic_core::{DialogueMessage, ToolSchema};
use bionic_llm::*;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ===========================================================================
// ChatRequest
// ===========================================================================

#[test]
fn chat_request_omits_unset_fields() {
    let req = ChatRequest {
        model: "qwen3:1.7b".into(),
        messages: vec![ChatMessage::user("hi")],
        ..Default::default()
    };
    let value = serde_json::to_value(&req).unwrap();
    assert_eq!(value["model"], "qwen3:1.7b");
    assert_eq!(value["stream"], false);
    assert!(value.get("tools").is_none());
    assert!(value.get("temperature").is_none());
    assert!(value.get("max_tokens").is_none());
    assert!(value.get("response_format").is_none());
}

#[test]
fn chat_request_structured_streaming_shape() {
    let req = ChatRequest {
        model: "m".into(),
        stream: true,
        stream_options: Some(StreamOptions {
            include_usage: true,
        }),
        response_format: Some(ResponseFormat::json_object()),
        chat_template_kwargs: Some(json!({"enable_thinking": true})),
        ..Default::default()
    };
    let value = serde_json::to_value(&req).unwrap();
    assert_eq!(value["stream_options"]["include_usage"], true);
    assert_eq!(value["response_format"]["type"], "json_object");
    assert_eq!(value["chat_template_kwargs"]["enable_thinking"], true);
}

// ===========================================================================
// ChatMessage / ChatTool
// ===========================================================================

#[test]
fn chat_message_tool_turns() {
    let call = WireToolCall::new("call_1", "weather", r#"{"city":"Oslo"}"#);
    let assistant = ChatMessage::assistant_tool_calls(vec![call]);
    let value = serde_json::to_value(&assistant).unwrap();
    assert_eq!(value["role"], "assistant");
    assert!(value["content"].is_null());
    assert_eq!(value["tool_calls"][0]["type"], "function");
    assert_eq!(value["tool_calls"][0]["function"]["arguments"], r#"{"city":"Oslo"}"#);

    let tool = ChatMessage::tool("call_1", "sunny");
    let value = serde_json::to_value(&tool).unwrap();
    assert_eq!(value["role"], "tool");
    assert_eq!(value["tool_call_id"], "call_1");
}

#[test]
fn chat_message_from_dialogue() {
    let msg: ChatMessage = (&DialogueMessage::assistant("earlier reply")).into();
    assert_eq!(msg.role, "assistant");
    assert_eq!(msg.content.as_deref(), Some("earlier reply"));
}

#[test]
fn chat_tool_from_schema() {
    let mut schema = ToolSchema::new("weather", "Weather lookup", Value::Null);
    schema.guidance = Some("Only for cities".into());
    let tool = ChatTool::from(&schema);
    assert_eq!(tool.tool_type, "function");
    assert_eq!(tool.function.parameters["type"], "object");
    assert!(tool.function.description.contains("## Usage"));
}

#[test]
fn wire_tool_call_defaults() {
    let call: WireToolCall =
        serde_json::from_str(r#"{"function":{"name":"ping"}}"#).unwrap();
    assert_eq!(call.id, "");
    assert_eq!(call.call_type, "function");
    assert_eq!(call.function.arguments, "");
}

// ===========================================================================
// LlmError / RetryPolicy
// ===========================================================================

#[test]
fn llm_error_retryable_classes() {
    assert!(LlmError::RateLimited { retry_after_ms: 10 }.is_retryable());
    assert!(LlmError::StreamError("reset".into()).is_retryable());
    assert!(!LlmError::AuthFailed("bad key".into()).is_retryable());
    assert!(!LlmError::Cancelled.is_retryable());
    assert!(!LlmError::InvalidResponse("x".into()).is_retryable());
}

#[test]
fn retry_delay_is_exponential_and_capped() {
    let policy = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(350),
    };
    assert_eq!(policy.delay(0, None), Duration::from_millis(100));
    assert_eq!(policy.delay(1, None), Duration::from_millis(200));
    assert_eq!(policy.delay(2, None), Duration::from_millis(350));
    assert_eq!(policy.delay(0, Some(250)), Duration::from_millis(250));
    assert_eq!(policy.delay(0, Some(60_000)), Duration::from_millis(350));
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn retry_stops_on_success() {
    let calls = AtomicUsize::new(0);
    let result = fast_policy(3)
        .run(&CancellationToken::new(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(LlmError::RequestFailed {
                    status: 503,
                    message: "busy".into(),
                })
            } else {
                Ok(n)
            }
        })
        .await;
    assert_eq!(result.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_gives_up_after_max_attempts() {
    let calls = AtomicUsize::new(0);
    let result: LlmResult<()> = fast_policy(3)
        .run(&CancellationToken::new(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::StreamError("reset".into()))
        })
        .await;
    assert!(matches!(result, Err(LlmError::StreamError(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_does_not_repeat_permanent_errors() {
    let calls = AtomicUsize::new(0);
    let result: LlmResult<()> = fast_policy(3)
        .run(&CancellationToken::new(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::AuthFailed("nope".into()))
        })
        .await;
    assert!(matches!(result, Err(LlmError::AuthFailed(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_backoff_is_cancellable() {
    let cancel = CancellationToken::new();
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(30),
    };
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let result: LlmResult<()> = policy
        .run(&cancel, || async { Err(LlmError::StreamError("reset".into())) })
        .await;
    assert!(matches!(result, Err(LlmError::Cancelled)));
}

// ===========================================================================
// OpenAiProvider against a mock server
// ===========================================================================

#[derive(Clone, Default)]
struct MockState {
    hits: Arc<AtomicUsize>,
    fail_first: usize,
    last_body: Arc<Mutex<Option<Value>>>,
    last_auth: Arc<Mutex<Option<String>>>,
}

async fn chat_completions(
    State(state): State<MockState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let n = state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_auth.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let streaming = body["stream"].as_bool().unwrap_or(false);
    *state.last_body.lock().unwrap() = Some(body);

    if n < state.fail_first {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response();
    }

    if streaming {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"<think>plan</think>\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"{\\\"answer\\\":\\\"hi\\\"}\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":12,\"completion_tokens\":4,\"total_tokens\":16}}\n\n",
            "data: [DONE]\n\n",
        );
        ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response()
    } else {
        Json(json!({
            "choices": [{
                "message": {"role": "assistant", "content": "plain answer"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 8, "completion_tokens": 2, "total_tokens": 10}
        }))
        .into_response()
    }
}

async fn spawn_mock(state: MockState) -> String {
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/v1", addr)
}

fn request(model: &str) -> ChatRequest {
    ChatRequest {
        model: model.into(),
        messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hello")],
        ..Default::default()
    }
}

#[tokio::test]
async fn provider_streams_text_and_usage() {
    let state = MockState::default();
    let base = spawn_mock(state.clone()).await;
    let provider = OpenAiProvider::new(base).with_api_key("sk-test");

    let mut stream = provider
        .complete_stream(request("m"), CancellationToken::new())
        .await
        .unwrap();

    let mut text = String::new();
    let mut usage = None;
    let mut finish = None;
    while let Some(delta) = stream.next().await {
        match delta.unwrap() {
            StreamDelta::Text(t) => text.push_str(&t),
            StreamDelta::Usage(u) => usage = Some(u),
            StreamDelta::Done { finish_reason } => finish = finish_reason,
            StreamDelta::Reasoning(_) => {}
        }
    }
    assert_eq!(text, "<think>plan</think>{\"answer\":\"hi\"}");
    assert_eq!(usage.unwrap().prompt_tokens, 12);
    assert_eq!(finish.as_deref(), Some("stop"));

    let body = state.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(
        state.last_auth.lock().unwrap().as_deref(),
        Some("Bearer sk-test")
    );
}

#[tokio::test]
async fn provider_complete_non_streaming() {
    let state = MockState::default();
    let base = spawn_mock(state.clone()).await;
    let provider = OpenAiProvider::new(format!("{}/", base));

    let resp = provider
        .complete(request("m"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resp.content, "plain answer");
    assert_eq!(resp.usage.total_tokens, 10);
    assert!(resp.tool_calls.is_empty());
    assert!(state.last_auth.lock().unwrap().is_none());

    let body = state.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["stream"], false);
}

#[tokio::test]
async fn provider_maps_server_error_status() {
    let state = MockState {
        fail_first: usize::MAX,
        ..Default::default()
    };
    let base = spawn_mock(state).await;
    let provider = OpenAiProvider::new(base);

    let err = provider
        .complete(request("m"), CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        LlmError::RequestFailed { status, message } => {
            assert_eq!(status, 500);
            assert!(message.contains("exploded"));
        }
        other => panic!("expected RequestFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn provider_recovers_through_retry_policy() {
    let state = MockState {
        fail_first: 1,
        ..Default::default()
    };
    let base = spawn_mock(state.clone()).await;
    let provider = OpenAiProvider::new(base);
    let cancel = CancellationToken::new();

    let resp = fast_policy(3)
        .run(&cancel, || provider.complete(request("m"), cancel.clone()))
        .await
        .unwrap();
    assert_eq!(resp.content, "plain answer");
    assert_eq!(state.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn provider_honours_pre_cancelled_token() {
    let base = spawn_mock(MockState::default()).await;
    let provider = OpenAiProvider::new(base);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = provider.complete(request("m"), cancel).await;
    assert!(matches!(result, Err(LlmError::Cancelled)));
}
