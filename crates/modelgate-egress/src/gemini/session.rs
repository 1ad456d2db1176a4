//! Native Gemini chat-session client
//!
//! Mirrors the shape of Google's SDKs: a [`GenerativeModel`] carries generation
//! settings, [`GenerativeModel::start_chat`] opens a [`ChatSession`] with a
//! history, and streaming replies are pulled from a [`ResponseIterator`].

use crate::{
    EgressError,
    client::{read_json, send_checked},
    sse::{SseReader, parse_frame},
};
use modelgate_core::{InvocationContext, UsageInfo};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Connection to the Generative Language API
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn generative_model(&self, name: impl Into<String>) -> GenerativeModel {
        GenerativeModel {
            client: self.clone(),
            name: name.into(),
            generation_config: GenerationConfig {
                response_mime_type: Some("text/plain".to_string()),
                ..Default::default()
            },
        }
    }

    fn post(&self, model: &str, method: &str, body: &GenerateContentRequest) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/models/{}:{}", self.base_url, model, method))
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
    }
}

#[derive(Debug, Clone)]
pub struct GenerativeModel {
    client: GeminiClient,
    name: String,
    generation_config: GenerationConfig,
}

impl GenerativeModel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_temperature(&mut self, temperature: f32) {
        self.generation_config.temperature = Some(temperature);
    }

    pub fn set_top_p(&mut self, top_p: f32) {
        self.generation_config.top_p = Some(top_p);
    }

    pub fn set_top_k(&mut self, top_k: u32) {
        self.generation_config.top_k = Some(top_k);
    }

    pub fn set_max_output_tokens(&mut self, max_tokens: u32) {
        self.generation_config.max_output_tokens = Some(max_tokens);
    }

    pub fn start_chat(self) -> ChatSession {
        ChatSession {
            model: self,
            history: Vec::new(),
        }
    }
}

/// A conversation whose history is sent with every message
#[derive(Debug, Clone)]
pub struct ChatSession {
    model: GenerativeModel,
    pub history: Vec<Content>,
}

impl ChatSession {
    fn request_for(&self, text: &str) -> GenerateContentRequest {
        let mut contents = self.history.clone();
        contents.push(Content::text("user", text));
        GenerateContentRequest {
            contents,
            generation_config: self.model.generation_config.clone(),
        }
    }

    /// Send `text` as the next user turn and wait for the whole reply.
    ///
    /// On success both the turn and the first candidate are appended to the history.
    pub async fn send_message(
        &mut self,
        ctx: &InvocationContext,
        text: &str,
    ) -> modelgate_core::Result<GenerateContentResponse> {
        let body = self.request_for(text);
        debug!(
            "Gemini generateContent (model: {}, contents: {})",
            self.model.name,
            body.contents.len()
        );
        let response = send_checked(
            "Gemini",
            ctx,
            self.model.client.post(&self.model.name, "generateContent", &body),
        )
        .await?;
        let response: GenerateContentResponse = read_json("Gemini", ctx, response).await?;
        response.check_error()?;

        self.history.push(Content::text("user", text));
        if let Some(content) = response.candidates.first().and_then(|c| c.content.clone()) {
            self.history.push(content);
        }
        Ok(response)
    }

    /// Send `text` as the next user turn and return an iterator over the partial replies
    pub async fn send_message_stream(
        &mut self,
        ctx: &InvocationContext,
        text: &str,
    ) -> modelgate_core::Result<ResponseIterator> {
        let body = self.request_for(text);
        debug!(
            "Gemini streamGenerateContent (model: {}, contents: {})",
            self.model.name,
            body.contents.len()
        );
        let response = send_checked(
            "Gemini",
            ctx,
            self.model
                .client
                .post(&self.model.name, "streamGenerateContent?alt=sse", &body)
                .header("Accept", "text/event-stream"),
        )
        .await?;

        self.history.push(Content::text("user", text));
        Ok(ResponseIterator {
            sse: SseReader::from_response(response),
            ctx: ctx.clone(),
        })
    }
}

/// Pull-based view over a streaming reply
pub struct ResponseIterator {
    sse: SseReader,
    ctx: InvocationContext,
}

impl ResponseIterator {
    /// Next partial response; `None` once the reply is exhausted
    pub async fn next(&mut self) -> Option<modelgate_core::Result<GenerateContentResponse>> {
        let data = match self.sse.next_data(&self.ctx).await {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => return Some(Err(e)),
        };
        Some(
            parse_frame::<GenerateContentResponse>("Gemini", &data)
                .and_then(|response| response.check_error().map(|_| response)),
        )
    }
}

// Wire types

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            parts: vec![Part {
                text: Some(text.into()),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    error: Option<GeminiErrorBody>,
}

impl GenerateContentResponse {
    /// Text of every part of every candidate, in order
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|content| content.parts.iter())
            .filter_map(|part| part.text.as_deref())
    }

    fn check_error(&self) -> modelgate_core::Result<()> {
        match self.error {
            Some(ref error) => Err(EgressError::UpstreamEvent {
                kind: error.status.clone().unwrap_or_else(|| error.code.to_string()),
                message: error.message.clone(),
            }
            .into()),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
    #[serde(default)]
    pub cached_content_token_count: u32,
}

impl From<UsageMetadata> for UsageInfo {
    fn from(usage: UsageMetadata) -> Self {
        UsageInfo {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count.max(
                usage
                    .prompt_token_count
                    .saturating_add(usage.candidates_token_count),
            ),
            cache_read_tokens: usage.cached_content_token_count,
            cache_creation_tokens: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}
