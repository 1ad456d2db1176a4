//! Gemini egress connector
//!
//! Drives the native chat-session client in [`session`]: prior turns become the
//! session history, the last message is sent, and the streaming reply is pulled
//! from a response iterator until it is exhausted.

pub mod session;

use crate::{
    EgressError, Result,
    client::{HttpClientConfig, create_client},
    require_api_key,
};
use async_trait::async_trait;
use modelgate_core::{
    ChatMessage, EventSender, InvocationContext, InvocationRequest, InvocationResult,
    InvocationStream, Provider, Role, StreamEvent, UsageInfo, UsageTracker, spawn_producer,
    stream::DEFAULT_EVENT_BUFFER,
};
use reqwest::Client;
use session::{ChatSession, Content, GeminiClient, GenerateContentResponse};
use tracing::{debug, info, instrument};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash-8b";

/// Finish reason reported when the reply ends without one
const IMPLICIT_FINISH_REASON: &str = "stop";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    pub stream_buffer: usize,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            stream_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity;
        self
    }
}

pub struct GeminiConnector {
    config: GeminiConfig,
    client: GeminiClient,
}

impl GeminiConnector {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = create_client(&HttpClientConfig::default())?;
        Self::with_client(config, client)
    }

    pub fn with_client(config: GeminiConfig, client: Client) -> Result<Self> {
        require_api_key("Gemini", &config.api_key)?;
        info!(
            "Initializing Gemini connector (base_url: {}, default_model: {})",
            config.base_url, config.default_model
        );
        let client = GeminiClient::new(client, config.base_url.clone(), config.api_key.clone());
        Ok(Self { config, client })
    }

    /// Open a session configured from `request`, returning it with the text to send
    fn start_session(&self, request: &InvocationRequest) -> modelgate_core::Result<(ChatSession, String)> {
        request.validate()?;

        let mut model = self
            .client
            .generative_model(request.model_or(&self.config.default_model));
        if let Some(temperature) = request.temperature {
            model.set_temperature(temperature);
        }
        if let Some(top_p) = request.top_p {
            model.set_top_p(top_p);
        }
        if let Some(top_k) = request.top_k {
            model.set_top_k(top_k);
        }
        if let Some(max_tokens) = request.max_tokens {
            model.set_max_output_tokens(max_tokens);
        }

        let (last, earlier) = request
            .messages
            .split_last()
            .ok_or_else(|| {
                modelgate_core::Error::InvalidRequest("empty conversation".to_string())
            })?;

        let mut session = model.start_chat();
        session.history = earlier.iter().map(to_content).collect();
        Ok((session, last.content.clone()))
    }
}

/// Gemini has two conversational roles; system turns travel as user turns
fn to_content(message: &ChatMessage) -> Content {
    let role = match message.role {
        Role::Assistant => "model",
        Role::User | Role::System => "user",
    };
    Content::text(role, message.content.clone())
}

#[async_trait]
impl Provider for GeminiConnector {
    fn name(&self) -> &str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    #[instrument(skip(self, ctx, request), fields(provider = "gemini", model = %request.model))]
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        request: InvocationRequest,
    ) -> modelgate_core::Result<InvocationResult> {
        let (mut session, text) = self.start_session(&request)?;
        let response = session.send_message(ctx, &text).await?;
        from_gemini_response(response)
    }

    #[instrument(skip(self, ctx, request), fields(provider = "gemini", model = %request.model))]
    fn invoke_stream(&self, ctx: InvocationContext, request: InvocationRequest) -> InvocationStream {
        debug!("Starting Gemini stream");
        let prepared = self.start_session(&request);

        spawn_producer(ctx, self.config.stream_buffer, move |tx| async move {
            let (mut session, text) = prepared?;
            let ctx = tx.context().clone();
            let mut responses = session.send_message_stream(&ctx, &text).await?;
            debug!("Gemini stream established");

            let mut relay = Relay::new(tx);
            while let Some(response) = responses.next().await {
                relay.forward(response?).await?;
            }
            relay.finish().await
        })
    }
}

fn from_gemini_response(response: GenerateContentResponse) -> modelgate_core::Result<InvocationResult> {
    let has_parts = response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .is_some_and(|content| !content.parts.is_empty());
    if !has_parts {
        return Err(EgressError::ParseError("Gemini returned no response candidates".to_string()).into());
    }

    let content = response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<String>()
        })
        .unwrap_or_default();

    Ok(InvocationResult {
        content,
        usage: response.usage_metadata.map(UsageInfo::from).unwrap_or_default(),
    })
}

/// Turns partial responses into stream events
struct Relay {
    tx: EventSender,
    tracker: UsageTracker,
    finished: bool,
}

impl Relay {
    fn new(tx: EventSender) -> Self {
        Self {
            tx,
            tracker: UsageTracker::new(),
            finished: false,
        }
    }

    async fn forward(&mut self, response: GenerateContentResponse) -> modelgate_core::Result<()> {
        for event in self.normalize(response) {
            self.tx.emit(event).await?;
        }
        Ok(())
    }

    fn normalize(&mut self, response: GenerateContentResponse) -> Vec<StreamEvent> {
        let mut events: Vec<StreamEvent> = response
            .texts()
            .filter(|text| !text.is_empty())
            .map(|text| StreamEvent::Content(text.to_string()))
            .collect();

        if let Some(reason) = response
            .candidates
            .iter()
            .find_map(|c| c.finish_reason.as_deref().filter(|r| !r.is_empty()))
        {
            self.finished = true;
            events.push(StreamEvent::FinishReason(reason.to_string()));
        }

        if let Some(usage) = response.usage_metadata
            && let Some(snapshot) = self.tracker.observe(usage.into())
        {
            events.push(StreamEvent::Usage(snapshot));
        }

        events
    }

    async fn finish(self) -> modelgate_core::Result<()> {
        if !self.finished {
            self.tx
                .emit(StreamEvent::FinishReason(IMPLICIT_FINISH_REASON.to_string()))
                .await?;
        }
        debug!("Gemini stream completed");
        Ok(())
    }
}
