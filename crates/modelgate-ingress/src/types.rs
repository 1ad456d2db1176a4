//! Wire types of the RPC surface and their mapping to core types

use axum::http::StatusCode;
use modelgate_core::{
    CacheDirective, Cancellation, ChatMessage, Error, InvocationRequest, InvocationResult, Role,
    StreamEvent, UsageInfo,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request ID for tracing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new request ID
    pub fn generate() -> Self {
        Self(format!("req_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Reuse a caller-supplied ID when it is usable as a header value
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() || value.len() > 128 || !value.is_ascii() {
            return None;
        }
        Some(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request-wide prompt cache switch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheControl {
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default)]
    pub ttl: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_directive: Option<CacheDirective>,
}

/// Body of both `Invoke` and `InvokeStream`.
///
/// Numeric fields follow proto3 conventions: zero means "not set".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default)]
    pub top_p: f32,
    #[serde(default)]
    pub top_k: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

fn non_zero_f32(value: f32) -> Option<f32> {
    (value != 0.0).then_some(value)
}

fn non_zero_u32(value: u32) -> Option<u32> {
    (value != 0).then_some(value)
}

impl TryFrom<InvokeRequest> for InvocationRequest {
    type Error = Error;

    fn try_from(wire: InvokeRequest) -> Result<Self, Self::Error> {
        let messages = wire
            .messages
            .into_iter()
            .map(|m| {
                let role: Role = m.role.parse()?;
                Ok(ChatMessage {
                    role,
                    content: m.content,
                    cache: m.cache_directive,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let cache = wire.cache_control.filter(|c| c.use_cache).map(|c| {
            let directive = CacheDirective::ephemeral();
            if c.ttl.is_empty() {
                directive
            } else {
                directive.with_ttl(c.ttl)
            }
        });

        Ok(InvocationRequest {
            provider: wire.provider,
            model: wire.model,
            messages,
            temperature: non_zero_f32(wire.temperature),
            top_p: non_zero_f32(wire.top_p),
            top_k: non_zero_u32(wire.top_k),
            max_tokens: non_zero_u32(wire.max_tokens),
            cache,
        })
    }
}

/// Body of a successful `Invoke`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub content: String,
    pub usage: UsageInfo,
}

impl From<InvocationResult> for InvokeResponse {
    fn from(result: InvocationResult) -> Self {
        Self {
            content: result.content,
            usage: result.usage,
        }
    }
}

/// One `data:` payload of `InvokeStream`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunk {
    ContentChunk(String),
    FinishReason(String),
    Usage(UsageInfo),
}

impl From<StreamEvent> for StreamChunk {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Content(text) => StreamChunk::ContentChunk(text),
            StreamEvent::FinishReason(reason) => StreamChunk::FinishReason(reason),
            StreamEvent::Usage(usage) => StreamChunk::Usage(usage),
        }
    }
}

/// Ingress error types
#[derive(Debug, Error)]
pub enum IngressError {
    /// Body could not be decoded
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Failure raised below the HTTP layer
    #[error(transparent)]
    Invocation(#[from] Error),
}

impl IngressError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngressError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            IngressError::Invocation(err) => match err {
                Error::UnknownProvider(_) | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                Error::UpstreamHttp { .. }
                | Error::UpstreamProtocol(_)
                | Error::UpstreamSemantic { .. }
                | Error::Transport(_) => StatusCode::BAD_GATEWAY,
                Error::Canceled(Cancellation::DeadlineExceeded) => StatusCode::GATEWAY_TIMEOUT,
                // Client closed request; nobody is usually left to read it
                Error::Canceled(Cancellation::Canceled) => StatusCode::from_u16(499)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                Error::Serialization(_) => StatusCode::BAD_GATEWAY,
                Error::Configuration(_) | Error::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IngressError::InvalidRequest(_) => "invalid_request",
            IngressError::Invocation(err) => err.kind(),
        }
    }

    /// JSON error document shared by both routes
    pub fn body(&self) -> ErrorBody {
        let status = match self {
            IngressError::Invocation(Error::UpstreamHttp { status, .. }) => Some(*status),
            _ => None,
        };
        ErrorBody {
            error: ErrorDetail {
                kind: self.kind().to_string(),
                message: self.to_string(),
                status,
            },
        }
    }
}

impl axum::response::IntoResponse for IngressError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("Request failed with {}: {}", status, self);
        } else {
            tracing::debug!("Request rejected with {}: {}", status, self);
        }
        (status, axum::Json(self.body())).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    /// Upstream HTTP status, when the failure came from one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Ingress result type
pub type IngressResult<T> = Result<T, IngressError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_generation() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("req_"));
    }

    #[test]
    fn test_request_id_from_header() {
        assert_eq!(
            RequestId::from_header(" abc-123 ").map(|id| id.to_string()),
            Some("abc-123".to_string())
        );
        assert!(RequestId::from_header("").is_none());
        assert!(RequestId::from_header(&"x".repeat(200)).is_none());
    }

    #[test]
    fn test_zero_numerics_mean_unset() {
        let wire: InvokeRequest = serde_json::from_value(serde_json::json!({
            "provider": "openai",
            "messages": [{"role": "user", "content": "Hello"}],
            "temperature": 0,
            "max_tokens": 0
        }))
        .unwrap();

        let request = InvocationRequest::try_from(wire).unwrap();
        assert_eq!(request.provider, "openai");
        assert_eq!(request.model, "");
        assert_eq!(request.temperature, None);
        assert_eq!(request.max_tokens, None);
        assert_eq!(request.top_p, None);
        assert_eq!(request.top_k, None);
        assert_eq!(request.cache, None);
    }

    #[test]
    fn test_full_request_conversion() {
        let wire: InvokeRequest = serde_json::from_value(serde_json::json!({
            "provider": "anthropic",
            "model": "claude-3-5-haiku-latest",
            "messages": [
                {"role": "system", "content": "Be terse.", "cache_directive": {"type": "ephemeral"}},
                {"role": "user", "content": "Hello"}
            ],
            "temperature": 0.5,
            "max_tokens": 64,
            "top_p": 0.25,
            "top_k": 40,
            "cache_control": {"use_cache": true, "ttl": "1h"}
        }))
        .unwrap();

        let request = InvocationRequest::try_from(wire).unwrap();
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].cache, Some(CacheDirective::ephemeral()));
        assert_eq!(request.messages[1].cache, None);
        assert_eq!(request.temperature, Some(0.5));
        assert_eq!(request.top_p, Some(0.25));
        assert_eq!(request.top_k, Some(40));
        assert_eq!(request.max_tokens, Some(64));
        assert_eq!(request.cache, Some(CacheDirective::ephemeral().with_ttl("1h")));
    }

    #[test]
    fn test_cache_control_off_is_ignored() {
        let wire = InvokeRequest {
            provider: "openai".into(),
            cache_control: Some(CacheControl {
                use_cache: false,
                ttl: "5m".into(),
            }),
            ..Default::default()
        };
        assert_eq!(InvocationRequest::try_from(wire).unwrap().cache, None);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let wire = InvokeRequest {
            provider: "openai".into(),
            messages: vec![WireMessage {
                role: "tool".into(),
                content: "x".into(),
                cache_directive: None,
            }],
            ..Default::default()
        };
        let err = InvocationRequest::try_from(wire).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_stream_chunk_wire_shape() {
        let json = |event| serde_json::to_value(StreamChunk::from(event)).unwrap();
        assert_eq!(
            json(StreamEvent::Content("Hi".into())),
            serde_json::json!({"content_chunk": "Hi"})
        );
        assert_eq!(
            json(StreamEvent::FinishReason("stop".into())),
            serde_json::json!({"finish_reason": "stop"})
        );
        assert_eq!(
            json(StreamEvent::Usage(UsageInfo::new(5, 2))),
            serde_json::json!({"usage": {
                "prompt_tokens": 5,
                "completion_tokens": 2,
                "total_tokens": 7,
                "cache_read_tokens": 0,
                "cache_creation_tokens": 0
            }})
        );
    }

    #[test]
    fn test_status_mapping() {
        let status = |err: Error| IngressError::from(err).status();
        assert_eq!(status(Error::UnknownProvider("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(Error::InvalidRequest("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(Error::UpstreamHttp {
                status: 401,
                body: "no".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status(Error::Transport("reset".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status(Error::Canceled(Cancellation::DeadlineExceeded)),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status(Error::Configuration("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_body_carries_upstream_status() {
        let body = IngressError::from(Error::UpstreamHttp {
            status: 429,
            body: "slow down".into(),
        })
        .body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["type"], "upstream_http_error");
        assert_eq!(json["error"]["status"], 429);
        assert!(json["error"]["message"].as_str().unwrap().contains("slow down"));

        let json = serde_json::to_value(IngressError::InvalidRequest("bad".into()).body()).unwrap();
        assert!(json["error"].get("status").is_none());
    }
}
