//! Vendor-neutral request, result and stream event types

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Normalized invocation request, owned by exactly one invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Registry key of the provider to call
    pub provider: String,

    /// Model identifier; empty means the adapter's default model
    pub model: String,

    /// Conversation in order
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Nucleus sampling threshold
    pub top_p: Option<f32>,

    /// Top-k sampling
    pub top_k: Option<u32>,

    /// Maximum number of tokens to generate
    pub max_tokens: Option<u32>,

    /// Request-wide prompt cache directive
    pub cache: Option<CacheDirective>,
}

impl InvocationRequest {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_cache(mut self, cache: CacheDirective) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Model to send upstream, falling back to the adapter default
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.model.is_empty() {
            default
        } else {
            &self.model
        }
    }

    /// Reject requests no vendor can serve
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(Error::InvalidRequest(
                "messages must contain at least one message".to_string(),
            ));
        }
        Ok(())
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheDirective>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            cache: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_cache(mut self, cache: CacheDirective) -> Self {
        self.cache = Some(cache);
        self
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(Error::InvalidRequest(format!("unsupported role '{}'", other))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory prompt-cache directive, forwarded to vendors that support it.
///
/// The gateway never stores or validates cached content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDirective {
    /// Vendor policy flag, e.g. `ephemeral`
    #[serde(rename = "type", default = "default_cache_kind")]
    pub kind: String,

    /// Optional time-to-live understood by the vendor, e.g. `5m` or `1h`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

impl CacheDirective {
    pub fn ephemeral() -> Self {
        Self {
            kind: default_cache_kind(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: impl Into<String>) -> Self {
        self.ttl = Some(ttl.into());
        self
    }
}

fn default_cache_kind() -> String {
    "ephemeral".to_string()
}

/// Complete result of a synchronous invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub content: String,
    pub usage: UsageInfo,
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default)]
    pub cache_read_tokens: u32,
    #[serde(default)]
    pub cache_creation_tokens: u32,
}

impl UsageInfo {
    /// Usage with the total derived from prompt and completion counts
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            ..Default::default()
        }
    }

    pub fn with_cache(mut self, read: u32, creation: u32) -> Self {
        self.cache_read_tokens = read;
        self.cache_creation_tokens = creation;
        self
    }

    /// True when no field of `self` is below the same field of `earlier`
    pub fn dominates(&self, earlier: &UsageInfo) -> bool {
        self.prompt_tokens >= earlier.prompt_tokens
            && self.completion_tokens >= earlier.completion_tokens
            && self.total_tokens >= earlier.total_tokens
            && self.cache_read_tokens >= earlier.cache_read_tokens
            && self.cache_creation_tokens >= earlier.cache_creation_tokens
    }
}

/// Vendor-agnostic stream event, exactly the unit forwarded on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEvent {
    /// Text delta, verbatim from upstream
    Content(String),

    /// Vendor finish reason, unmodified
    FinishReason(String),

    /// Running usage snapshot
    Usage(UsageInfo),
}
