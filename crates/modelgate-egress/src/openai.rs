//! OpenAI egress connector

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

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// OpenAI connector configuration
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// API key for authentication
    pub api_key: String,

    /// Base URL for OpenAI API (default: https://api.openai.com/v1)
    pub base_url: String,

    /// Model used when a request leaves it empty
    pub default_model: String,

    /// Organization ID (optional)
    pub organization: Option<String>,

    /// Capacity of each stream's event buffer
    pub stream_buffer: usize,
}

impl OpenAIConfig {
    /// Create a new OpenAI configuration
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            organization: None,
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

    /// Set the organization ID
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity;
        self
    }
}

/// OpenAI connector
pub struct OpenAIConnector {
    config: OpenAIConfig,
    endpoint: Arc<Endpoint>,
    client: Client,
}

impl OpenAIConnector {
    /// Create a new OpenAI connector with its own client
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let client = create_client(&HttpClientConfig::default())?;
        Self::with_client(config, client)
    }

    /// Create a connector sharing an existing connection pool
    pub fn with_client(config: OpenAIConfig, client: Client) -> Result<Self> {
        require_api_key("OpenAI", &config.api_key)?;

        let mut headers = Vec::new();
        if let Some(ref org) = config.organization {
            headers.push(("OpenAI-Organization", org.clone()));
        }

        info!(
            "Initializing OpenAI connector (base_url: {}, default_model: {})",
            config.base_url, config.default_model
        );

        let endpoint = Arc::new(Endpoint {
            vendor: "OpenAI",
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
impl Provider for OpenAIConnector {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    #[instrument(skip(self, ctx, request), fields(provider = "openai", model = %request.model))]
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        request: InvocationRequest,
    ) -> modelgate_core::Result<InvocationResult> {
        request.validate()?;
        let body = to_chat_request(&request, &self.config.default_model, false);
        self.endpoint.complete(&self.client, ctx, body).await
    }

    #[instrument(skip(self, ctx, request), fields(provider = "openai", model = %request.model))]
    fn invoke_stream(&self, ctx: InvocationContext, request: InvocationRequest) -> InvocationStream {
        debug!("Starting OpenAI stream");
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
