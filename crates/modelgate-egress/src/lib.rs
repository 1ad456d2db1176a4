//! ModelGate Egress Connectors
//!
//! This crate provides adapters to upstream LLM vendors:
//! - OpenAI and OpenRouter (delta-style chat completions)
//! - Anthropic (event-typed messages stream)
//! - Gemini (native chat-session client with a response iterator)
//!
//! Each adapter turns vendor wire traffic into `modelgate_core` stream events.

pub mod anthropic;
mod chat_completions;
pub mod client;
pub mod gemini;
pub mod openai;
pub mod openrouter;
pub mod sse;

pub use anthropic::{AnthropicConfig, AnthropicConnector};
pub use client::{HttpClientConfig, create_client};
pub use gemini::{GeminiConfig, GeminiConnector};
pub use openai::{OpenAIConfig, OpenAIConnector};
pub use openrouter::{OpenRouterConfig, OpenRouterConnector};

use thiserror::Error;

/// Egress-specific errors
#[derive(Debug, Error)]
pub enum EgressError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Provider returned error: {status_code} - {message}")]
    ProviderError { status_code: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Provider reported {kind}: {message}")]
    UpstreamEvent { kind: String, message: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl From<EgressError> for modelgate_core::Error {
    fn from(err: EgressError) -> Self {
        use modelgate_core::Error;
        match err {
            EgressError::HttpError(e) if e.is_decode() => Error::UpstreamProtocol(e.to_string()),
            EgressError::HttpError(e) => Error::Transport(e.to_string()),
            EgressError::ProviderError {
                status_code,
                message,
            } => Error::UpstreamHttp {
                status: status_code,
                body: message,
            },
            EgressError::ParseError(msg) => Error::UpstreamProtocol(msg),
            EgressError::StreamError(msg) => Error::Transport(msg),
            EgressError::UpstreamEvent { kind, message } => {
                Error::UpstreamSemantic { kind, message }
            }
            EgressError::ConfigError(msg) => Error::Configuration(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, EgressError>;

/// Reject blank credentials at construction time
pub(crate) fn require_api_key(vendor: &str, api_key: &str) -> Result<()> {
    if api_key.trim().is_empty() {
        return Err(EgressError::ConfigError(format!(
            "{} API key is required",
            vendor
        )));
    }
    Ok(())
}
