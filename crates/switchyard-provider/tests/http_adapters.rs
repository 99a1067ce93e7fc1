//! End-to-end adapter tests against a local mock HTTP server.

use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use switchyard_provider::providers::anthropic::AnthropicProvider;
use switchyard_provider::providers::ollama::OllamaProvider;
use switchyard_provider::providers::openai::new_openai_provider;
use switchyard_provider::providers::openrouter::OpenRouterProvider;
use switchyard_provider::{
    ChatRequest, Message, Provider, ProviderConfig, ProviderError, StopReason, StreamChunk, Usage,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(frames: &[&str]) -> String {
    frames.iter().map(|f| format!("{f}\n\n")).collect()
}

fn anthropic_config(server: &MockServer) -> ProviderConfig {
    ProviderConfig::new("anthropic", "claude-test")
        .with_api_key("test-api-key")
        .with_base_url(server.uri())
}

fn openai_config(server: &MockServer, provider: &str) -> ProviderConfig {
    ProviderConfig::new(provider, "gpt-test")
        .with_api_key("sk-test")
        .with_base_url(server.uri())
}

async fn collect(stream: switchyard_provider::ChunkStream) -> Vec<StreamChunk> {
    stream.collect().await
}

#[tokio::test]
async fn anthropic_chat_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-api-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({"model": "claude-test", "system": "be brief"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-test",
            "content": [{"type": "text", "text": "Hi!"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 2}
        })))
        .mount(&server)
        .await;

    let request = ChatRequest::new(vec![Message::user("hello")]).with_system_prompt("be brief");
    let response = AnthropicProvider::new()
        .chat(&request, &anthropic_config(&server))
        .await
        .unwrap();

    assert_eq!(response.text(), "Hi!");
    assert_eq!(response.stop_reason, StopReason::EndTurn);
    assert_eq!(response.usage.output_tokens, 2);
}

#[tokio::test]
async fn anthropic_http_error_carries_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
        .mount(&server)
        .await;

    let err = AnthropicProvider::new()
        .chat(
            &ChatRequest::new(vec![Message::user("hi")]),
            &anthropic_config(&server),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn anthropic_stream_single_terminal_and_skips_corrupt_frame() {
    let server = MockServer::start().await;
    let body = sse(&[
        r#"event: message_start
data: {"type":"message_start","message":{"id":"msg_1","model":"claude-test","usage":{"input_tokens":12,"output_tokens":1}}}"#,
        r#"event: content_block_start
data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        r#"event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
        r#"data: {this is not json"#,
        r#"event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}"#,
        r#"event: content_block_stop
data: {"type":"content_block_stop","index":0}"#,
        r#"event: message_delta
data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}"#,
        r#"event: message_stop
data: {"type":"message_stop"}"#,
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let chunks = collect(
        AnthropicProvider::new()
            .chat_stream(
                &ChatRequest::new(vec![Message::user("hi")]),
                &anthropic_config(&server),
            )
            .await,
    )
    .await;

    assert_eq!(
        chunks,
        vec![
            StreamChunk::text("Hel"),
            StreamChunk::text("lo"),
            StreamChunk::Done {
                stop_reason: Some(StopReason::EndTurn),
                usage: Some(Usage {
                    input_tokens: 12,
                    output_tokens: 5
                }),
            },
        ]
    );
}

#[tokio::test]
async fn anthropic_stream_non_2xx_is_one_error_chunk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let chunks = collect(
        AnthropicProvider::new()
            .chat_stream(
                &ChatRequest::new(vec![Message::user("hi")]),
                &anthropic_config(&server),
            )
            .await,
    )
    .await;

    assert_eq!(chunks.len(), 1);
    match &chunks[0] {
        StreamChunk::Error { error } => {
            assert!(error.contains("529"));
            assert!(error.contains("overloaded"));
        }
        other => panic!("expected error chunk, got {other:?}"),
    }
}

#[tokio::test]
async fn openai_chat_maps_tool_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "model": "gpt-test",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "read", "arguments": "{\"path\":\"a.txt\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 20, "completion_tokens": 8}
        })))
        .mount(&server)
        .await;

    let response = new_openai_provider()
        .chat(
            &ChatRequest::new(vec![Message::user("read a.txt")]),
            &openai_config(&server, "openai"),
        )
        .await
        .unwrap();

    assert_eq!(response.stop_reason, StopReason::ToolUse);
    assert_eq!(response.tool_uses().count(), 1);
    assert_eq!(response.usage.input_tokens, 20);
}

#[tokio::test]
async fn openai_stream_accumulates_by_index() {
    let server = MockServer::start().await;
    let body = sse(&[
        r#"data: {"choices":[{"index":0,"delta":{"role":"assistant","content":"Reading"}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_9","type":"function","function":{"name":"read","arguments":""}}]}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"pa"}}]}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"th\":\"x\"}"}}]}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
        r#"data: {"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":4}}"#,
        "data: [DONE]",
    ]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true, "stream_options": {"include_usage": true}})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let chunks = collect(
        new_openai_provider()
            .chat_stream(
                &ChatRequest::new(vec![Message::user("go")]),
                &openai_config(&server, "openai"),
            )
            .await,
    )
    .await;

    let starts = chunks
        .iter()
        .filter(|c| matches!(c, StreamChunk::ToolUseStart { .. }))
        .count();
    assert_eq!(starts, 1);
    assert!(chunks.contains(&StreamChunk::ToolUseEnd {
        id: "call_9".to_string(),
        name: "read".to_string(),
        input: r#"{"path":"x"}"#.to_string(),
    }));
    assert_eq!(chunks.iter().filter(|c| c.is_terminal()).count(), 1);
    assert_eq!(
        chunks.last(),
        Some(&StreamChunk::Done {
            stop_reason: Some(StopReason::ToolUse),
            usage: Some(Usage {
                input_tokens: 3,
                output_tokens: 4
            }),
        })
    );
}

#[tokio::test]
async fn openrouter_sends_routing_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("x-title", "demo-app"))
        .and(header("http-referer", "https://demo.example"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "gen-1",
            "model": "gpt-test",
            "choices": [{"message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = OpenRouterProvider::with_app("https://demo.example", "demo-app")
        .chat(
            &ChatRequest::new(vec![Message::user("hi")]),
            &openai_config(&server, "openrouter"),
        )
        .await
        .unwrap();
    assert_eq!(response.text(), "ok");
}

#[tokio::test]
async fn ollama_streams_ndjson() {
    let server = MockServer::start().await;
    let body = [
        r#"{"model":"llama","message":{"role":"assistant","content":"Hi"},"done":false}"#,
        r#"{"model":"llama","message":{"role":"assistant","content":" there"},"done":false}"#,
        r#"not json at all"#,
        r#"{"model":"llama","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","prompt_eval_count":7,"eval_count":2}"#,
    ]
    .join("\n");
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"model": "llama", "stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let config = ProviderConfig::new("ollama", "llama").with_base_url(server.uri());
    let chunks = collect(
        OllamaProvider::new()
            .chat_stream(&ChatRequest::new(vec![Message::user("hi")]), &config)
            .await,
    )
    .await;

    assert_eq!(
        chunks,
        vec![
            StreamChunk::text("Hi"),
            StreamChunk::text(" there"),
            StreamChunk::Done {
                stop_reason: Some(StopReason::EndTurn),
                usage: Some(Usage {
                    input_tokens: 7,
                    output_tokens: 2
                }),
            },
        ]
    );
}

#[tokio::test]
async fn chat_respects_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_json(json!({"message": {"role": "assistant", "content": "late"}, "done": true})),
        )
        .mount(&server)
        .await;

    let config = ProviderConfig::new("ollama", "llama")
        .with_base_url(server.uri())
        .with_timeout(Duration::from_millis(100));
    let err = OllamaProvider::new()
        .chat(&ChatRequest::new(vec![Message::user("hi")]), &config)
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Timeout(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unconfigured_openai_fails_without_network() {
    let server = MockServer::start().await;
    let config = ProviderConfig::new("openai", "gpt-test").with_base_url(server.uri());

    assert!(!new_openai_provider().is_configured(&config));
    let err = new_openai_provider()
        .chat(&ChatRequest::new(vec![Message::user("hi")]), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::NotConfigured(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}
