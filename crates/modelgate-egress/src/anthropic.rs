//! Anthropic egress connector

use crate::{
    EgressError, Result,
    client::{HttpClientConfig, create_client, read_json, send_checked},
    require_api_key,
    sse::{SseReader, parse_frame, premature_eof},
};
use async_trait::async_trait;
use modelgate_core::{
    CacheDirective, EventSender, InvocationContext, InvocationRequest, InvocationResult,
    InvocationStream, Provider, Role, StreamEvent, UsageInfo, UsageTracker, spawn_producer,
    stream::DEFAULT_EVENT_BUFFER,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
pub const API_VERSION: &str = "2023-06-01";

/// Anthropic requires `max_tokens`; used when the request leaves it unset
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic connector configuration
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key for authentication
    pub api_key: String,

    /// Base URL for Anthropic API (default: https://api.anthropic.com/v1)
    pub base_url: String,

    /// Model used when a request leaves it empty
    pub default_model: String,

    /// API version header value
    pub api_version: String,

    pub stream_buffer: usize,
}

impl AnthropicConfig {
    /// Create a new Anthropic configuration
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            api_version: API_VERSION.to_string(),
            stream_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Set the base URL (for custom endpoints)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the API version
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity;
        self
    }
}

/// Anthropic connector
pub struct AnthropicConnector {
    config: Arc<AnthropicConfig>,
    client: Client,
}

impl AnthropicConnector {
    /// Create a new Anthropic connector with its own client
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let client = create_client(&HttpClientConfig::default())?;
        Self::with_client(config, client)
    }

    /// Create a connector sharing an existing connection pool
    pub fn with_client(config: AnthropicConfig, client: Client) -> Result<Self> {
        require_api_key("Anthropic", &config.api_key)?;
        info!(
            "Initializing Anthropic connector (base_url: {}, default_model: {}, api_version: {})",
            config.base_url, config.default_model, config.api_version
        );
        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }
}

fn messages_request(
    client: &Client,
    config: &AnthropicConfig,
    body: &AnthropicRequest,
) -> reqwest::RequestBuilder {
    debug!("┌─────────────────────────────────────────────────────────");
    debug!("│ Anthropic Request Headers");
    debug!("├─────────────────────────────────────────────────────────");
    debug!("│ x-api-key: <api_key>");
    debug!("│ anthropic-version: {}", config.api_version);
    debug!("│ stream: {}", body.stream.unwrap_or(false));
    debug!("└─────────────────────────────────────────────────────────");

    let mut builder = client
        .post(format!("{}/messages", config.base_url))
        .header("x-api-key", &config.api_key)
        .header("anthropic-version", &config.api_version)
        .header("Content-Type", "application/json");
    if body.stream == Some(true) {
        builder = builder.header("Accept", "text/event-stream");
    }
    builder.json(body)
}

#[async_trait]
impl Provider for AnthropicConnector {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    #[instrument(skip(self, ctx, request), fields(provider = "anthropic", model = %request.model))]
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        request: InvocationRequest,
    ) -> modelgate_core::Result<InvocationResult> {
        request.validate()?;
        debug!("Sending non-streaming request to Anthropic");

        let body = to_anthropic_request(&request, &self.config.default_model, false);
        let response = send_checked(
            "Anthropic",
            ctx,
            messages_request(&self.client, &self.config, &body),
        )
        .await?;
        let response: AnthropicResponse = read_json("Anthropic", ctx, response).await?;
        Ok(from_anthropic_response(response))
    }

    #[instrument(skip(self, ctx, request), fields(provider = "anthropic", model = %request.model))]
    fn invoke_stream(&self, ctx: InvocationContext, request: InvocationRequest) -> InvocationStream {
        debug!("Starting Anthropic stream");
        let config = self.config.clone();
        let client = self.client.clone();

        spawn_producer(ctx, self.config.stream_buffer, move |tx| async move {
            request.validate()?;
            let body = to_anthropic_request(&request, &config.default_model, true);
            let response = send_checked(
                "Anthropic",
                tx.context(),
                messages_request(&client, &config, &body),
            )
            .await?;
            debug!("Anthropic stream established");
            relay_stream(SseReader::from_response(response), tx).await
        })
    }
}

/// Read event-typed frames until `message_stop`, emitting normalized events
async fn relay_stream(mut sse: SseReader, tx: EventSender) -> modelgate_core::Result<()> {
    let ctx = tx.context().clone();
    let mut tracker = UsageTracker::new();

    while let Some(data) = sse.next_data(&ctx).await? {
        let event: AnthropicStreamEvent = parse_frame("Anthropic", &data)?;
        match normalize_event(event, &mut tracker)? {
            Step::Emit(events) => {
                for event in events {
                    tx.emit(event).await?;
                }
            }
            Step::Stop => {
                debug!("Anthropic stream completed");
                return Ok(());
            }
        }
    }

    Err(premature_eof())
}

// Anthropic API types

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<AnthropicTextBlock>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicTextBlock>),
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicTextBlock {
    #[serde(rename = "type")]
    type_: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheDirective>,
}

impl AnthropicTextBlock {
    fn text(text: impl Into<String>, cache_control: Option<CacheDirective>) -> Self {
        Self {
            type_: "text",
            text: text.into(),
            cache_control,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicResponseBlock>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponseBlock {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
}

impl From<AnthropicUsage> for UsageInfo {
    fn from(usage: AnthropicUsage) -> Self {
        UsageInfo::new(usage.input_tokens, usage.output_tokens).with_cache(
            usage.cache_read_input_tokens,
            usage.cache_creation_input_tokens,
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        message: AnthropicStreamMessage,
    },
    ContentBlockStart {},
    ContentBlockDelta {
        delta: AnthropicStreamDelta,
    },
    ContentBlockStop {},
    MessageDelta {
        #[serde(default)]
        delta: AnthropicStreamMessageDelta,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: AnthropicErrorBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamMessage {
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicStreamMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    #[serde(rename = "type", default)]
    type_: String,
    #[serde(default)]
    message: String,
}

/// What to do after one stream event
#[derive(Debug, PartialEq)]
enum Step {
    Emit(Vec<StreamEvent>),
    Stop,
}

fn to_anthropic_request(
    request: &InvocationRequest,
    default_model: &str,
    stream: bool,
) -> AnthropicRequest {
    let mut system = Vec::new();
    let mut messages = Vec::with_capacity(request.messages.len());

    for message in &request.messages {
        if message.role == Role::System {
            let cache = message.cache.clone().or_else(|| request.cache.clone());
            system.push(AnthropicTextBlock::text(message.content.clone(), cache));
            continue;
        }

        let content = match message.cache {
            Some(ref directive) => AnthropicContent::Blocks(vec![AnthropicTextBlock::text(
                message.content.clone(),
                Some(directive.clone()),
            )]),
            None => AnthropicContent::Text(message.content.clone()),
        };
        messages.push(AnthropicMessage {
            role: message.role.as_str().to_string(),
            content,
        });
    }

    AnthropicRequest {
        model: request.model_or(default_model).to_string(),
        messages,
        system,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        stream: stream.then_some(true),
        temperature: request.temperature,
        top_p: request.top_p,
    }
}

fn from_anthropic_response(response: AnthropicResponse) -> InvocationResult {
    let content = response
        .content
        .into_iter()
        .filter(|block| block.type_ == "text")
        .map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");

    InvocationResult {
        content,
        usage: response.usage.into(),
    }
}

fn normalize_event(
    event: AnthropicStreamEvent,
    tracker: &mut UsageTracker,
) -> modelgate_core::Result<Step> {
    let mut events = Vec::new();

    match event {
        AnthropicStreamEvent::MessageStart { message } => {
            if let Some(usage) = message.usage
                && let Some(snapshot) = tracker.observe(usage.into())
            {
                events.push(StreamEvent::Usage(snapshot));
            }
        }
        AnthropicStreamEvent::ContentBlockDelta { delta } => match delta {
            AnthropicStreamDelta::TextDelta { text } if !text.is_empty() => {
                events.push(StreamEvent::Content(text));
            }
            AnthropicStreamDelta::TextDelta { .. } => {}
            AnthropicStreamDelta::Other => trace!("ignoring non-text content delta"),
        },
        AnthropicStreamEvent::MessageDelta { delta, usage } => {
            if let Some(reason) = delta.stop_reason
                && !reason.is_empty()
            {
                events.push(StreamEvent::FinishReason(reason));
            }
            if let Some(usage) = usage
                && let Some(snapshot) = tracker.observe(usage.into())
            {
                events.push(StreamEvent::Usage(snapshot));
            }
        }
        AnthropicStreamEvent::MessageStop => return Ok(Step::Stop),
        AnthropicStreamEvent::Error { error } => {
            warn!("Anthropic stream error event: {} - {}", error.type_, error.message);
            return Err(EgressError::UpstreamEvent {
                kind: error.type_,
                message: error.message,
            }
            .into());
        }
        AnthropicStreamEvent::ContentBlockStart {}
        | AnthropicStreamEvent::ContentBlockStop {}
        | AnthropicStreamEvent::Ping
        | AnthropicStreamEvent::Unknown => {}
    }

    Ok(Step::Emit(events))
}
