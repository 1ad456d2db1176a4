//! Delta-style chat completions protocol shared by OpenAI-compatible vendors

use crate::{
    EgressError,
    client::{read_json, send_checked},
    sse::{SseReader, parse_frame, premature_eof},
};
use modelgate_core::{
    EventSender, InvocationContext, InvocationRequest, InvocationResult, StreamEvent, UsageInfo,
    UsageTracker,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Where and how to reach one OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    pub vendor: &'static str,
    pub base_url: String,
    pub api_key: String,
    /// Extra vendor headers sent on every request
    pub headers: Vec<(&'static str, String)>,
}

impl Endpoint {
    fn request(&self, client: &Client, body: &ChatRequest) -> reqwest::RequestBuilder {
        let mut builder = client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json");
        if body.stream == Some(true) {
            builder = builder.header("Accept", "text/event-stream");
        }
        for (name, value) in &self.headers {
            builder = builder.header(*name, value);
        }
        builder.json(body)
    }

    pub async fn complete(
        &self,
        client: &Client,
        ctx: &InvocationContext,
        body: ChatRequest,
    ) -> modelgate_core::Result<InvocationResult> {
        debug!("Sending non-streaming request to {}", self.vendor);
        let response = send_checked(self.vendor, ctx, self.request(client, &body)).await?;
        let response: ChatResponse = read_json(self.vendor, ctx, response).await?;
        from_chat_response(self.vendor, response)
    }

    /// Drive one streaming call to completion, emitting normalized events on `tx`
    pub async fn stream(
        &self,
        client: &Client,
        tx: EventSender,
        body: ChatRequest,
    ) -> modelgate_core::Result<()> {
        let ctx = tx.context().clone();
        debug!("Sending streaming request to {}", self.vendor);
        let response = send_checked(self.vendor, &ctx, self.request(client, &body)).await?;
        debug!("{} stream established", self.vendor);

        let mut sse = SseReader::from_response(response);
        let mut tracker = UsageTracker::new();

        while let Some(data) = sse.next_data(&ctx).await? {
            if data.trim() == "[DONE]" {
                debug!("{} stream completed", self.vendor);
                return Ok(());
            }
            let chunk: ChatChunk = parse_frame(self.vendor, &data)?;
            for event in normalize_chunk(chunk, &mut tracker)? {
                tx.emit(event).await?;
            }
        }

        Err(premature_eof())
    }
}

// Wire types

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatRequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatRequestMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u32,
}

impl From<ChatUsage> for UsageInfo {
    fn from(usage: ChatUsage) -> Self {
        UsageInfo {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage
                .total_tokens
                .max(usage.prompt_tokens.saturating_add(usage.completion_tokens)),
            cache_read_tokens: usage
                .prompt_tokens_details
                .map(|d| d.cached_tokens)
                .unwrap_or_default(),
            cache_creation_tokens: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChatChunkChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    error: Option<ChatStreamError>,
}

#[derive(Debug, Deserialize)]
struct ChatChunkChoice {
    #[serde(default)]
    delta: Option<ChatDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

/// In-band error some OpenAI-compatible vendors send mid-stream
#[derive(Debug, Deserialize)]
struct ChatStreamError {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: String,
}

pub(crate) fn to_chat_request(
    request: &InvocationRequest,
    default_model: &str,
    stream: bool,
) -> ChatRequest {
    ChatRequest {
        model: request.model_or(default_model).to_string(),
        messages: request
            .messages
            .iter()
            .map(|m| ChatRequestMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect(),
        stream: stream.then_some(true),
        stream_options: stream.then_some(StreamOptions {
            include_usage: true,
        }),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        top_p: request.top_p,
    }
}

fn from_chat_response(vendor: &str, response: ChatResponse) -> modelgate_core::Result<InvocationResult> {
    let choice = response.choices.into_iter().next().ok_or_else(|| {
        EgressError::ParseError(format!("{} response contained no choices", vendor))
    })?;

    Ok(InvocationResult {
        content: choice.message.content.unwrap_or_default(),
        usage: response.usage.map(UsageInfo::from).unwrap_or_default(),
    })
}

/// Translate one chunk into events, ordered Content, FinishReason, Usage
pub(crate) fn normalize_chunk(
    chunk: ChatChunk,
    tracker: &mut UsageTracker,
) -> modelgate_core::Result<Vec<StreamEvent>> {
    if let Some(error) = chunk.error {
        let kind = error
            .kind
            .or_else(|| error.code.map(|c| c.to_string().trim_matches('"').to_string()))
            .unwrap_or_else(|| "error".to_string());
        return Err(EgressError::UpstreamEvent {
            kind,
            message: error.message,
        }
        .into());
    }

    let mut events = Vec::new();

    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(content) = choice.delta.and_then(|d| d.content)
            && !content.is_empty()
        {
            events.push(StreamEvent::Content(content));
        }
        if let Some(reason) = choice.finish_reason
            && !reason.is_empty()
        {
            events.push(StreamEvent::FinishReason(reason));
        }
    }

    if let Some(usage) = chunk.usage
        && let Some(snapshot) = tracker.observe(usage.into())
    {
        events.push(StreamEvent::Usage(snapshot));
    }

    trace!("normalized chunk into {} events", events.len());
    Ok(events)
}
