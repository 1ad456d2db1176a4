//! Provider trait definitions

use crate::{
    Result,
    context::InvocationContext,
    normalized::{InvocationRequest, InvocationResult},
    stream::InvocationStream,
};

/// A vendor adapter.
///
/// Implementations are shared read-only across concurrent invocations; all
/// per-call state lives inside a single `invoke` or `invoke_stream` call.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Registry key, e.g. `openai`
    fn name(&self) -> &str;

    /// Model used when the request leaves `model` empty
    fn default_model(&self) -> &str;

    /// Run one request to completion
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        request: InvocationRequest,
    ) -> Result<InvocationResult>;

    /// Start a streaming request.
    ///
    /// Returns immediately; all upstream work happens on a spawned producer
    /// that observes `ctx`. Failures, including request construction errors,
    /// arrive on the stream's error channel.
    fn invoke_stream(&self, ctx: InvocationContext, request: InvocationRequest)
    -> InvocationStream;
}
