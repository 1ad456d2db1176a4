//! Integration tests for the Gemini connector using wiremock

use modelgate_core::{
    ChatMessage, Error, InvocationContext, InvocationRequest, Provider, StreamEvent, UsageInfo,
};
use modelgate_egress::gemini::{GeminiConfig, GeminiConnector};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path, query_param},
};

fn connector(server: &MockServer) -> GeminiConnector {
    GeminiConnector::new(
        GeminiConfig::new("g-key").with_base_url(format!("{}/v1beta", server.uri())),
    )
    .unwrap()
}

fn sse_response(frames: &[&str]) -> ResponseTemplate {
    let body: String = frames.iter().map(|f| format!("data: {}\r\n\r\n", f)).collect();
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

#[tokio::test]
async fn test_gemini_invoke_sends_history() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash-8b:generateContent"))
        .and(header("x-goog-api-key", "g-key"))
        .and(body_partial_json(serde_json::json!({
            "contents": [
                {"role": "user", "parts": [{"text": "You are terse."}]},
                {"role": "user", "parts": [{"text": "Hi"}]},
                {"role": "model", "parts": [{"text": "Hello!"}]},
                {"role": "user", "parts": [{"text": "Hello"}]}
            ],
            "generationConfig": {"responseMimeType": "text/plain", "topK": 20}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hi"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2, "totalTokenCount": 7}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut request = InvocationRequest::new("gemini", "")
        .with_message(ChatMessage::system("You are terse."))
        .with_message(ChatMessage::user("Hi"))
        .with_message(ChatMessage::assistant("Hello!"))
        .with_message(ChatMessage::user("Hello"));
    request.top_k = Some(20);

    let result = connector(&mock_server)
        .invoke(&InvocationContext::new(), request)
        .await
        .unwrap();

    assert_eq!(result.content, "Hi");
    assert_eq!(result.usage, UsageInfo::new(5, 2));
}

#[tokio::test]
async fn test_gemini_invoke_without_candidates_fails() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [],
            "promptFeedback": {"blockReason": "SAFETY"}
        })))
        .mount(&mock_server)
        .await;

    let request = InvocationRequest::new("gemini", "gemini-pro").with_message(ChatMessage::user("Hello"));
    let err = connector(&mock_server)
        .invoke(&InvocationContext::new(), request)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "upstream_protocol_error");
}

#[tokio::test]
async fn test_gemini_stream_round_trip() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash-8b:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .and(header("x-goog-api-key", "g-key"))
        .respond_with(sse_response(&[
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hi"}]}}],"usageMetadata":{"promptTokenCount":5}}"#,
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":""}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":2,"totalTokenCount":7}}"#,
        ]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = InvocationRequest::new("gemini", "").with_message(ChatMessage::user("Hello"));
    let (events, error) = connector(&mock_server)
        .invoke_stream(InvocationContext::new(), request)
        .collect()
        .await;

    assert!(error.is_none(), "unexpected error: {:?}", error);
    assert_eq!(
        events,
        vec![
            StreamEvent::Content("Hi".into()),
            StreamEvent::Usage(UsageInfo::new(5, 0)),
            StreamEvent::FinishReason("STOP".into()),
            StreamEvent::Usage(UsageInfo::new(5, 2)),
        ]
    );
}

#[tokio::test]
async fn test_gemini_stream_http_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash-8b:streamGenerateContent"))
        .respond_with(ResponseTemplate::new(400).set_body_string("API key not valid"))
        .mount(&mock_server)
        .await;

    let request = InvocationRequest::new("gemini", "").with_message(ChatMessage::user("Hello"));
    let (events, error) = connector(&mock_server)
        .invoke_stream(InvocationContext::new(), request)
        .collect()
        .await;

    assert!(events.is_empty());
    assert!(matches!(error, Some(Error::UpstreamHttp { status: 400, .. })));
}
