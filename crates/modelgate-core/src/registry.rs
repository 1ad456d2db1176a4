//! Name-keyed provider registry

use crate::{
    Error, Result,
    context::InvocationContext,
    normalized::{InvocationRequest, InvocationResult},
    provider::Provider,
    stream::InvocationStream,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Adapters keyed by provider name.
///
/// Populated once at startup, then shared read-only. Every call resolves the
/// provider before anything else happens, so an unknown name never reaches the
/// network.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under its own name, replacing any previous entry
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        info!(
            "Registered provider '{}' (default model: {})",
            name,
            provider.default_model()
        );
        self.providers.insert(name, provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownProvider(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub async fn invoke(
        &self,
        ctx: &InvocationContext,
        request: InvocationRequest,
    ) -> Result<InvocationResult> {
        let provider = self.get(&request.provider)?;
        debug!("Dispatching invoke to '{}'", provider.name());
        provider.invoke(ctx, request).await
    }

    /// Resolve the provider, then hand the request to its streaming path
    pub fn invoke_stream(
        &self,
        ctx: InvocationContext,
        request: InvocationRequest,
    ) -> Result<InvocationStream> {
        let provider = self.get(&request.provider)?;
        debug!("Dispatching invoke_stream to '{}'", provider.name());
        Ok(provider.invoke_stream(ctx, request))
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
