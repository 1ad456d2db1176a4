//! ModelGate Core Types and Traits
//!
//! This crate provides the vendor-neutral pieces shared by every layer of the gateway:
//! - Normalized request, result and stream event types
//! - The provider trait and the registry that dispatches to it
//! - Invocation contexts carrying cancellation and deadlines
//! - The event/error channel pair of a streaming invocation
//! - Monotonic usage tracking
//! - Core error types

pub mod context;
pub mod error;
pub mod normalized;
pub mod provider;
pub mod registry;
pub mod stream;
pub mod usage;

pub use context::InvocationContext;
pub use error::{Cancellation, Error, Result};
pub use normalized::{
    CacheDirective, ChatMessage, InvocationRequest, InvocationResult, Role, StreamEvent,
    UsageInfo,
};
pub use provider::Provider;
pub use registry::ProviderRegistry;
pub use stream::{DEFAULT_EVENT_BUFFER, EventSender, InvocationStream, spawn_producer};
pub use usage::UsageTracker;
