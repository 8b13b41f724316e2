//! Aimux Runtime: the context that owns shared state and the service facade.
//!
//! This crate contains:
//! - **context**: `AiRuntimeContext`, owner of the config store, client cache, health and usage
//! - **service**: `AiService`, fallback-aware generation, chat, streaming and embeddings

pub mod context;
pub mod service;

pub use context::AiRuntimeContext;
pub use service::{AiService, ServiceOptions, UsageListener};
