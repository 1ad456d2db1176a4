//! Integration tests for Anthropic connector using wiremock
//!
//! These tests mock the Anthropic API to verify the egress connector's HTTP behavior.

use modelgate_core::{
    CacheDirective, ChatMessage, Error, InvocationContext, InvocationRequest, Provider,
    StreamEvent, UsageInfo,
};
use modelgate_egress::anthropic::{AnthropicConfig, AnthropicConnector};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

fn connector(server: &MockServer) -> AnthropicConnector {
    AnthropicConnector::new(
        AnthropicConfig::new("test-key").with_base_url(format!("{}/v1", server.uri())),
    )
    .unwrap()
}

fn event_stream(events: &[(&str, &str)]) -> ResponseTemplate {
    let body: String = events
        .iter()
        .map(|(name, data)| format!("event: {}\ndata: {}\n\n", name, data))
        .collect();
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

#[tokio::test]
async fn test_anthropic_invoke_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(serde_json::json!({
            "model": "claude-3-5-haiku-latest",
            "max_tokens": 1024,
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "msg_123",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-haiku-latest",
            "content": [{"type": "text", "text": "Hi"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 2}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = InvocationRequest::new("anthropic", "").with_message(ChatMessage::user("Hello"));
    let result = connector(&mock_server)
        .invoke(&InvocationContext::new(), request)
        .await
        .unwrap();

    assert_eq!(result.content, "Hi");
    assert_eq!(result.usage, UsageInfo::new(5, 2));
}

#[tokio::test]
async fn test_anthropic_invoke_with_system_and_cache() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(serde_json::json!({
            "system": [{
                "type": "text",
                "text": "You are terse.",
                "cache_control": {"type": "ephemeral", "ttl": "5m"}
            }],
            "messages": [{"role": "user", "content": "Hello"}],
            "max_tokens": 64
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{"type": "text", "text": "Hi"}],
            "usage": {
                "input_tokens": 5,
                "output_tokens": 1,
                "cache_creation_input_tokens": 12
            }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = InvocationRequest::new("anthropic", "")
        .with_message(ChatMessage::system("You are terse."))
        .with_message(ChatMessage::user("Hello"))
        .with_max_tokens(64)
        .with_cache(CacheDirective::ephemeral().with_ttl("5m"));

    let result = connector(&mock_server)
        .invoke(&InvocationContext::new(), request)
        .await
        .unwrap();
    assert_eq!(result.usage.cache_creation_tokens, 12);
}

#[tokio::test]
async fn test_anthropic_stream_round_trip() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(event_stream(&[
            (
                "message_start",
                r#"{"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","content":[],"model":"claude","usage":{"input_tokens":5,"output_tokens":1}}}"#,
            ),
            (
                "content_block_start",
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            ),
            ("ping", r#"{"type":"ping"}"#),
            (
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            ),
            ("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
            (
                "message_delta",
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn","stop_sequence":null},"usage":{"output_tokens":2}}"#,
            ),
            ("message_stop", r#"{"type":"message_stop"}"#),
        ]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = InvocationRequest::new("anthropic", "").with_message(ChatMessage::user("Hello"));
    let (events, error) = connector(&mock_server)
        .invoke_stream(InvocationContext::new(), request)
        .collect()
        .await;

    assert!(error.is_none(), "unexpected error: {:?}", error);
    assert_eq!(
        events,
        vec![
            StreamEvent::Usage(UsageInfo::new(5, 1)),
            StreamEvent::Content("Hi".into()),
            StreamEvent::FinishReason("end_turn".into()),
            StreamEvent::Usage(UsageInfo::new(5, 2)),
        ]
    );
}

#[tokio::test]
async fn test_anthropic_stream_error_event() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(event_stream(&[
            (
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            ),
            (
                "error",
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            ),
        ]))
        .mount(&mock_server)
        .await;

    let request = InvocationRequest::new("anthropic", "").with_message(ChatMessage::user("Hello"));
    let (events, error) = connector(&mock_server)
        .invoke_stream(InvocationContext::new(), request)
        .collect()
        .await;

    assert_eq!(events, vec![StreamEvent::Content("Hi".into())]);
    match error {
        Some(Error::UpstreamSemantic { kind, message }) => {
            assert_eq!(kind, "overloaded_error");
            assert_eq!(message, "Overloaded");
        }
        other => panic!("Expected UpstreamSemantic, got {:?}", other),
    }
}

#[tokio::test]
async fn test_anthropic_invalid_api_key() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "type": "error",
            "error": {"type": "authentication_error", "message": "invalid x-api-key"}
        })))
        .mount(&mock_server)
        .await;

    let request = InvocationRequest::new("anthropic", "").with_message(ChatMessage::user("Hello"));
    let err = connector(&mock_server)
        .invoke(&InvocationContext::new(), request)
        .await
        .unwrap_err();

    match err {
        Error::UpstreamHttp { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("authentication_error"));
        }
        other => panic!("Expected UpstreamHttp, got {:?}", other),
    }
}

#[tokio::test]
async fn test_anthropic_stream_without_message_stop() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(event_stream(&[(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        )]))
        .mount(&mock_server)
        .await;

    let request = InvocationRequest::new("anthropic", "").with_message(ChatMessage::user("Hello"));
    let (events, error) = connector(&mock_server)
        .invoke_stream(InvocationContext::new(), request)
        .collect()
        .await;

    assert_eq!(events, vec![StreamEvent::Content("Hi".into())]);
    assert!(matches!(error, Some(Error::UpstreamProtocol(_))));
}
