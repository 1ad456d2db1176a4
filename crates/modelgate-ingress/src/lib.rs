//! ModelGate Ingress
//!
//! This crate exposes the provider registry over HTTP:
//! - `POST /v1/invoke` for unary invocations
//! - `POST /v1/invoke/stream` for server-sent event streams
//! - `GET /healthz`
//!
//! The [`bridge`] module owns the forwarding loop between an adapter's
//! event/error channels and the outbound stream.

pub mod bridge;
pub mod middleware;
pub mod rpc;
pub mod types;

pub use bridge::{ChannelSink, OutboundSink, forward};
pub use rpc::{RpcState, router};
pub use types::{
    CacheControl, ErrorBody, ErrorDetail, IngressError, IngressResult, InvokeRequest,
    InvokeResponse, RequestId, StreamChunk, WireMessage,
};
