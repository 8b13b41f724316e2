//! Configuration system: schema, env parsing, secrets, building, typed
//! updates and the cached store.
//!
//! # Usage
//! ```no_run
//! use aimux_core::config::ConfigStore;
//!
//! let store = ConfigStore::from_process_env();
//! let cfg = store.get().expect("valid AI configuration");
//! println!("Default provider: {}", cfg.default_provider);
//! ```

pub mod builder;
pub mod defaults;
pub mod env;
pub mod patch;
pub mod schema;
pub mod secrets;
pub mod store;

// Re-export key types
pub use builder::{build_config, ensure_fallback_order, is_provider_configured, validate};
pub use env::Env;
pub use patch::{
    AiConfigPatch, AnalyticsPatch, CredentialsPatch, LimitsPatch, ModelsPatch, MonitoringPatch,
    ProviderConfigPatch,
};
pub use schema::{
    AiConfig, AnalyticsConfig, Compatibility, MonitoringConfig, ProviderConfig,
    ProviderCredentials, ProviderLimits, ProviderModels,
};
pub use secrets::SecretResolver;
pub use store::{ConfigStore, EnvSource};
