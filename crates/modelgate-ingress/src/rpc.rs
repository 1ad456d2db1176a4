//! HTTP rendering of the `Invoke` / `InvokeStream` service

use crate::{
    bridge::{ChannelSink, forward},
    middleware::{RequestIdExt, request_context_middleware},
    types::{
        ErrorBody, IngressError, IngressResult, InvokeRequest, InvokeResponse, StreamChunk,
    },
};
use axum::{
    Extension, Json, Router,
    extract::{State, rejection::JsonRejection},
    middleware,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::StreamExt;
use modelgate_core::{
    Cancellation, DEFAULT_EVENT_BUFFER, Error, InvocationContext, InvocationRequest,
    ProviderRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared state of the RPC router
#[derive(Debug, Clone)]
pub struct RpcState {
    registry: Arc<ProviderRegistry>,
    stream_buffer: usize,
    request_timeout: Option<Duration>,
}

impl RpcState {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            stream_buffer: DEFAULT_EVENT_BUFFER,
            request_timeout: None,
        }
    }

    /// Capacity of the outbound frame buffer per streaming call
    pub fn with_stream_buffer(mut self, stream_buffer: usize) -> Self {
        self.stream_buffer = stream_buffer.max(1);
        self
    }

    /// Deadline applied to every invocation
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    fn context(&self) -> InvocationContext {
        let ctx = InvocationContext::new();
        match self.request_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }
}

/// Create the RPC router
pub fn router(state: RpcState) -> Router {
    Router::new()
        .route("/v1/invoke", post(invoke))
        .route("/v1/invoke/stream", post(invoke_stream))
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

fn decode(payload: Result<Json<InvokeRequest>, JsonRejection>) -> IngressResult<InvocationRequest> {
    let Json(wire) = payload.map_err(|e| IngressError::InvalidRequest(e.body_text()))?;
    Ok(InvocationRequest::try_from(wire)?)
}

/// Unary `Invoke`
async fn invoke(
    State(state): State<Arc<RpcState>>,
    Extension(RequestIdExt(request_id)): Extension<RequestIdExt>,
    payload: Result<Json<InvokeRequest>, JsonRejection>,
) -> IngressResult<Json<InvokeResponse>> {
    let request = decode(payload)?;
    info!(
        "Invoke request_id={} provider={} model={} messages={}",
        request_id,
        request.provider,
        request.model,
        request.messages.len()
    );

    let ctx = state.context();
    let result = state.registry.invoke(&ctx, request).await?;

    debug!(
        "Invoke request_id={} completed: {} chars, {} total tokens",
        request_id,
        result.content.len(),
        result.usage.total_tokens
    );
    Ok(Json(result.into()))
}

/// One frame on the outbound SSE channel
enum Frame {
    Chunk(StreamChunk),
    Failure(ErrorBody),
}

impl From<modelgate_core::StreamEvent> for Frame {
    fn from(event: modelgate_core::StreamEvent) -> Self {
        Frame::Chunk(event.into())
    }
}

/// How long a terminal error frame may wait for room in the outbound buffer
const FAILURE_FRAME_GRACE: Duration = Duration::from_secs(5);

impl Frame {
    fn into_event(self) -> Result<Event, axum::Error> {
        match self {
            Frame::Chunk(chunk) => Event::default().json_data(chunk),
            Frame::Failure(body) => Event::default().event("error").json_data(body),
        }
    }
}

/// Server-streaming `InvokeStream`.
///
/// Provider lookup and request validation happen before the response starts,
/// so those failures are plain HTTP errors. Anything later ends the SSE body
/// with a single `error` frame.
async fn invoke_stream(
    State(state): State<Arc<RpcState>>,
    Extension(RequestIdExt(request_id)): Extension<RequestIdExt>,
    payload: Result<Json<InvokeRequest>, JsonRejection>,
) -> IngressResult<Response> {
    let request = decode(payload)?;
    state.registry.get(&request.provider)?;
    request.validate()?;

    info!(
        "InvokeStream request_id={} provider={} model={} messages={}",
        request_id,
        request.provider,
        request.model,
        request.messages.len()
    );

    let ctx = state.context();
    let stream = state.registry.invoke_stream(ctx.clone(), request)?;
    let (tx, rx) = mpsc::channel::<Frame>(state.stream_buffer);

    tokio::spawn(async move {
        let sink = ChannelSink::new(tx.clone());
        match forward(stream, &ctx, &sink).await {
            Ok(()) => debug!("InvokeStream request_id={} completed", request_id),
            Err(Error::Canceled(Cancellation::Canceled)) if tx.is_closed() => {
                debug!("InvokeStream request_id={} client disconnected", request_id)
            }
            Err(err) => {
                warn!("InvokeStream request_id={} failed: {}", request_id, err);
                let failure = IngressError::from(err).body();
                if !send_failure(&tx, failure, FAILURE_FRAME_GRACE).await {
                    debug!(
                        "InvokeStream request_id={} error frame dropped, client not reading",
                        request_id
                    );
                }
            }
        }
    });

    let body = ReceiverStream::new(rx).map(Frame::into_event);
    Ok(Sse::new(body)
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// Deliver the terminal error frame unless the client is gone or stays full
/// for longer than `grace`.
async fn send_failure(tx: &mpsc::Sender<Frame>, failure: ErrorBody, grace: Duration) -> bool {
    tokio::select! {
        sent = tx.send(Frame::Failure(failure)) => sent.is_ok(),
        _ = tx.closed() => false,
        _ = tokio::time::sleep(grace) => false,
    }
}

async fn healthz(State(state): State<Arc<RpcState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "providers": state.registry.names(),
    }))
}
