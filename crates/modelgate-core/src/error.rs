//! Error types for ModelGate Core

use thiserror::Error;

/// Why an invocation context finished before its work did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    /// The caller cancelled explicitly (or disconnected)
    Canceled,
    /// The context deadline elapsed
    DeadlineExceeded,
}

impl std::fmt::Display for Cancellation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cancellation::Canceled => write!(f, "context canceled"),
            Cancellation::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid credential/setting at adapter construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Registry miss; raised before any network activity
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream answered with a non-2xx status
    #[error("Upstream request failed with status {status}: {body}")]
    UpstreamHttp { status: u16, body: String },

    /// Malformed frame or payload from upstream
    #[error("Upstream protocol error: {0}")]
    UpstreamProtocol(String),

    /// Vendor-reported in-band error event
    #[error("Upstream error ({kind}): {message}")]
    UpstreamSemantic { kind: String, message: String },

    /// Connection, TLS or read failure talking to upstream
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Canceled(Cancellation),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable name used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration_error",
            Error::UnknownProvider(_) => "unknown_provider",
            Error::InvalidRequest(_) => "invalid_request",
            Error::UpstreamHttp { .. } => "upstream_http_error",
            Error::UpstreamProtocol(_) => "upstream_protocol_error",
            Error::UpstreamSemantic { .. } => "upstream_error",
            Error::Transport(_) => "transport_error",
            Error::Canceled(Cancellation::Canceled) => "canceled",
            Error::Canceled(Cancellation::DeadlineExceeded) => "deadline_exceeded",
            Error::Serialization(_) => "serialization_error",
            Error::Internal(_) => "internal_error",
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Canceled(_))
    }
}

impl From<Cancellation> for Error {
    fn from(reason: Cancellation) -> Self {
        Error::Canceled(reason)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
