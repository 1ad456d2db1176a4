//! OpenRouter egress connector
//!
//! OpenRouter speaks the OpenAI chat completions dialect, plus optional
//! attribution headers identifying the calling application.

use crate::{
    Result,
    chat_completions::{Endpoint, to_chat_request},
    client::{HttpClientConfig, create_client},
    require_api_key,
};
use async_trait::async_trait;
use modelgate_core::{
    InvocationContext, InvocationRequest, InvocationResult, InvocationStream, Provider,
    spawn_producer, stream::DEFAULT_EVENT_BUFFER,
};
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "google/gemini-flash-1.5-8b";

#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,

    /// Sent as `HTTP-Referer`
    pub site_url: Option<String>,

    /// Sent as `X-Title`
    pub app_name: Option<String>,

    pub stream_buffer: usize,
}

impl OpenRouterConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            site_url: None,
            app_name: None,
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

    pub fn with_attribution(
        mut self,
        site_url: Option<String>,
        app_name: Option<String>,
    ) -> Self {
        self.site_url = site_url;
        self.app_name = app_name;
        self
    }

    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity;
        self
    }
}

pub struct OpenRouterConnector {
    config: OpenRouterConfig,
    endpoint: Arc<Endpoint>,
    client: Client,
}

impl OpenRouterConnector {
    pub fn new(config: OpenRouterConfig) -> Result<Self> {
        let client = create_client(&HttpClientConfig::default())?;
        Self::with_client(config, client)
    }

    pub fn with_client(config: OpenRouterConfig, client: Client) -> Result<Self> {
        require_api_key("OpenRouter", &config.api_key)?;

        let mut headers = Vec::new();
        if let Some(ref url) = config.site_url {
            headers.push(("HTTP-Referer", url.clone()));
        }
        if let Some(ref name) = config.app_name {
            headers.push(("X-Title", name.clone()));
        }

        info!(
            "Initializing OpenRouter connector (base_url: {}, default_model: {}, api_key_length: {})",
            config.base_url,
            config.default_model,
            config.api_key.len()
        );

        let endpoint = Arc::new(Endpoint {
            vendor: "OpenRouter",
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            headers,
        });

        Ok(Self {
            config,
            endpoint,
            client,
        })
    }
}

#[async_trait]
impl Provider for OpenRouterConnector {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    #[instrument(skip(self, ctx, request), fields(provider = "openrouter", model = %request.model))]
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        request: InvocationRequest,
    ) -> modelgate_core::Result<InvocationResult> {
        request.validate()?;
        let body = to_chat_request(&request, &self.config.default_model, false);
        self.endpoint.complete(&self.client, ctx, body).await
    }

    #[instrument(skip(self, ctx, request), fields(provider = "openrouter", model = %request.model))]
    fn invoke_stream(&self, ctx: InvocationContext, request: InvocationRequest) -> InvocationStream {
        debug!("Starting OpenRouter stream");
        let endpoint = self.endpoint.clone();
        let client = self.client.clone();
        let default_model = self.config.default_model.clone();

        spawn_producer(ctx, self.config.stream_buffer, move |tx| async move {
            request.validate()?;
            let body = to_chat_request(&request, &default_model, true);
            endpoint.stream(&client, tx, body).await
        })
    }
}
