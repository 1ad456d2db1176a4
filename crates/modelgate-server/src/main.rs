//! ModelGate Server
//!
//! This server provides:
//! - One registry of vendor adapters (OpenAI, Anthropic, Gemini, OpenRouter)
//! - Unary invocations on `POST /v1/invoke`
//! - Streaming invocations as server-sent events on `POST /v1/invoke/stream`
//! - A health check on `GET /healthz`
//!
//! Usage:
//! ```bash
//! # With environment variables only
//! OPENAI_API_KEY=your_key modelgate-server
//!
//! # With config file (env vars override it, flags override both)
//! modelgate-server --config config.yaml --port 8080
//! ```
//!
//! Test with:
//! ```bash
//! curl http://localhost:50051/v1/invoke \
//!   -H "Content-Type: application/json" \
//!   -d '{
//!     "provider": "openai",
//!     "messages": [{"role": "user", "content": "Hello!"}]
//!   }'
//!
//! # Streaming request
//! curl -N http://localhost:50051/v1/invoke/stream \
//!   -H "Content-Type: application/json" \
//!   -d '{
//!     "provider": "anthropic",
//!     "messages": [{"role": "user", "content": "Count to 5"}]
//!   }'
//! ```

mod config;
mod providers;

use anyhow::Context;
use clap::Parser;
use config::{LogFormat, ServerConfig};
use modelgate_egress::create_client;
use modelgate_ingress::{RpcState, router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// ModelGate Server - vendor-neutral LLM invocation gateway
#[derive(Parser)]
#[command(name = "modelgate-server")]
#[command(version = concat!(env!("VERSION"), " (", env!("SHA"), ")"))]
#[command(about = "Single invocation API in front of several LLM vendors", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "MODELGATE_CONFIG")]
    config: Option<String>,

    /// Port to listen on (overrides config and environment)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,
}

fn init_tracing(config: &ServerConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|e| {
        eprintln!(
            "Warning: Invalid log level '{}' ({}), using info",
            config.logging.level, e
        );
        EnvFilter::new("info")
    });

    match config.logging.format {
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => ServerConfig::from_file(config_path)?,
        None => ServerConfig::default(),
    };

    // Merge environment variables (they override config file)
    config.merge_env();

    // CLI flags have the highest precedence
    if let Some(port) = cli.port {
        config.port = port;
    }

    init_tracing(&config)?;

    info!(
        "🚀 Initializing ModelGate {} ({})",
        env!("VERSION"),
        env!("SHA")
    );
    match &cli.config {
        Some(path) => info!("📁 Loaded configuration from: {}", path),
        None => info!("📁 Using default configuration"),
    }

    // One pooled client shared by every adapter
    let client = create_client(&config.http_client.to_http_client_config())
        .context("Failed to create HTTP client")?;
    let registry = providers::build_registry(&config, client)?;
    info!("Registered providers: {}", registry.names().join(", "));

    let mut state =
        RpcState::new(Arc::new(registry)).with_stream_buffer(config.streaming.buffer_size);
    if config.streaming.request_timeout_secs > 0 {
        state = state.with_request_timeout(Duration::from_secs(
            config.streaming.request_timeout_secs,
        ));
        info!(
            "⏱  Invocation deadline: {}s",
            config.streaming.request_timeout_secs
        );
    } else {
        warn!("No invocation deadline configured; streams end only on completion or disconnect");
    }

    let app = router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("");
    info!("✅ ModelGate listening on http://{}", addr);
    info!("   - Invoke:        POST http://{}/v1/invoke", addr);
    info!("   - InvokeStream:  POST http://{}/v1/invoke/stream", addr);
    info!("   - Health check:  GET  http://{}/healthz", addr);
    info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
