//! Aimux Core: shared vocabulary for the AI provider layer.
//!
//! This crate contains:
//! - **types**: provider ids, chat messages, call options, results, usage and health records
//! - **error**: the `AiError` / `ConfigError` taxonomy
//! - **listeners**: synchronous listener sets with unsubscribe handles
//! - **config**: env parsing, secret resolution, building, validation, typed updates, the cached store

pub mod config;
pub mod error;
pub mod listeners;
pub mod types;

pub use config::{AiConfig, AiConfigPatch, ConfigStore, Env, ProviderConfig};
pub use error::{AiError, CapabilityKind, ConfigError, ConfigIssue};
pub use listeners::{ListenerSet, Subscription};
pub use types::*;
