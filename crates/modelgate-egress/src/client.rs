//! Shared HTTP client utilities

use crate::{EgressError, Result};
use modelgate_core::InvocationContext;
use reqwest::{Client, ClientBuilder, Response};
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    /// Note: This applies to the entire request including streaming responses,
    /// so it must outlast the longest stream the gateway is expected to relay.
    pub timeout_secs: u64,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Maximum number of idle connections per host
    pub pool_max_idle_per_host: usize,

    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 32,
            user_agent: format!("ModelGate/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Create a configured HTTP client with connection pooling.
///
/// One client is built at startup and cloned into every adapter; clones share
/// the same pool.
pub fn create_client(config: &HttpClientConfig) -> Result<Client> {
    ClientBuilder::new()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        // Expire idle connections before upstream servers close them
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(&config.user_agent)
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| EgressError::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

/// Log upstream response status and headers at debug level
pub(crate) fn log_response_headers(vendor: &str, response: &Response) {
    debug!("┌─────────────────────────────────────────────────────────");
    debug!("│ {} Response Headers", vendor);
    debug!("├─────────────────────────────────────────────────────────");
    debug!("│ Status: {}", response.status());
    for (name, value) in response.headers() {
        if let Ok(val_str) = value.to_str() {
            debug!("│ {}: {}", name, val_str);
        }
    }
    debug!("└─────────────────────────────────────────────────────────");
}

/// Send a prepared request, racing both the send and any error-body read against `ctx`.
///
/// Non-2xx answers become a single `UpstreamHttp` carrying the status and body.
pub(crate) async fn send_checked(
    vendor: &str,
    ctx: &InvocationContext,
    request: reqwest::RequestBuilder,
) -> modelgate_core::Result<Response> {
    let response = ctx
        .run(request.send())
        .await?
        .map_err(EgressError::from)?;

    log_response_headers(vendor, &response);

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = ctx
        .run(response.text())
        .await?
        .unwrap_or_else(|_| "Unable to read error body".to_string());
    warn!("{} returned HTTP {}: {}", vendor, status.as_u16(), body);

    Err(EgressError::ProviderError {
        status_code: status.as_u16(),
        message: body,
    }
    .into())
}

/// Read a complete JSON body, racing the read against `ctx`
pub(crate) async fn read_json<T>(
    vendor: &str,
    ctx: &InvocationContext,
    response: Response,
) -> modelgate_core::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let body = ctx.run(response.text()).await?.map_err(EgressError::from)?;
    serde_json::from_str(&body).map_err(|e| {
        EgressError::ParseError(format!("Failed to parse {} response: {}", vendor, e)).into()
    })
}
