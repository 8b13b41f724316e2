//! Provider layer for Aimux.
//!
//! Binds configured providers to transports and wraps them in clients that
//! own timeouts, usage and health bookkeeping.
//!
//! # Architecture
//!
//! - [`traits::Transport`]: trait every backend implements
//! - [`registry`]: static provider table, endpoints, probes and enablement hints
//! - [`http_provider::HttpProvider`]: OpenAI-compatible HTTP transport
//! - [`cli_provider::CliProvider`]: local command-line transport
//! - [`capability::bind`]: config to transport factory
//! - [`client::ProviderClient`]: the four operations for one provider
//! - [`health::HealthMonitor`]: per-provider health state and sweep scheduler
//! - [`usage::UsageEmitter`]: sampled usage events
//! - [`cancel`]: abort signals composed with timeouts

pub mod cancel;
pub mod capability;
pub mod cli_provider;
pub mod client;
pub mod health;
pub mod http_provider;
pub mod registry;
pub mod traits;
pub mod usage;

// Re-export main types for convenience
pub use cancel::{AbortController, AbortSignal};
pub use capability::{bind, default_binder, Binder, Capability};
pub use client::{ProviderClient, TextStream};
pub use health::HealthMonitor;
pub use registry::{ProviderSpec, PROVIDERS};
pub use traits::{CallSettings, GenerationRequest, GenerationResponse, Transport};
pub use usage::UsageEmitter;
