//! Configuration schema: the immutable snapshot handed to every component.
//!
//! Hierarchy: `AiConfig` → `ProviderConfig` (per `ProviderId`) →
//! `ProviderCredentials`, `ProviderModels`, `ProviderLimits`; plus the global
//! `AnalyticsConfig` and `MonitoringConfig` policies.
//!
//! JSON uses **camelCase** keys; Rust uses snake_case.
//! Secret fields are never serialized and are redacted from `Debug`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ProviderId;

/// Priority assigned to a provider missing from the fallback order.
pub const INFINITE_PRIORITY: u64 = u64::MAX;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration snapshot.
///
/// Built from environment-style input by [`super::builder::build_config`]
/// and never mutated in place; updates produce a new snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    pub default_provider: ProviderId,
    pub enable_features: bool,
    pub enable_streaming: bool,
    pub enable_fallback: bool,
    /// Global token cap, clamped per provider by `ProviderLimits::max_tokens`.
    pub max_tokens: u32,
    pub temperature: f64,
    pub request_timeout_ms: u64,
    /// Permutation of every known provider id, default provider first.
    pub fallback_order: Vec<ProviderId>,
    pub providers: BTreeMap<ProviderId, ProviderConfig>,
    pub analytics: AnalyticsConfig,
    pub monitoring: MonitoringConfig,
}

impl AiConfig {
    pub fn provider(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(&id)
    }

    /// Whether `id` exists and is enabled.
    pub fn is_provider_enabled(&self, id: ProviderId) -> bool {
        self.provider(id).is_some_and(|p| p.enabled)
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.values().filter(|p| p.enabled)
    }
}

// ─────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────

/// How strictly a provider follows the OpenAI wire format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compatibility {
    #[default]
    Strict,
    Compatible,
}

/// Configuration for a single provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: ProviderId,
    pub label: String,
    /// Derived: credentials complete and not force-disabled.
    pub enabled: bool,
    /// Admin override that disables an otherwise complete provider.
    #[serde(default)]
    pub force_disabled: bool,
    /// Index within `AiConfig::fallback_order`.
    pub failover_priority: u64,
    pub credentials: ProviderCredentials,
    pub models: ProviderModels,
    pub limits: ProviderLimits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub compatibility: Compatibility,
}

/// Connection fields for a provider.
///
/// `api_key` and `auth_token` are secrets: skipped on serialization and
/// printed as `***` by `Debug`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderCredentials {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub use_vertex_ai: bool,
    /// Path to a service-account JSON file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<String>,

    // CLI execution
    pub use_cli: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_command: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cli_args: Vec<String>,
    pub use_oauth: bool,
    #[serde(rename = "useGCloudADC")]
    pub use_gcloud_adc: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_working_directory: Option<String>,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(v: &Option<String>) -> &'static str {
            if v.is_some() {
                "***"
            } else {
                "<none>"
            }
        }
        f.debug_struct("ProviderCredentials")
            .field("api_key", &redact(&self.api_key))
            .field("auth_token", &redact(&self.auth_token))
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("project", &self.project)
            .field("location", &self.location)
            .field("api_version", &self.api_version)
            .field("use_vertex_ai", &self.use_vertex_ai)
            .field("use_cli", &self.use_cli)
            .field("cli_command", &self.cli_command)
            .field("use_oauth", &self.use_oauth)
            .field("use_gcloud_adc", &self.use_gcloud_adc)
            .finish_non_exhaustive()
    }
}

/// Per-provider model selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderModels {
    pub default: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<String>,
    /// Providers this one prefers to hand over to. Never contains itself.
    #[serde(default)]
    pub fallback: Vec<ProviderId>,
}

/// Advisory numeric ceilings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderLimits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_requests_per_minute: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
}

// ─────────────────────────────────────────────
// Analytics / Monitoring
// ─────────────────────────────────────────────

/// Usage-event policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsConfig {
    pub enabled: bool,
    /// Fraction of events emitted, `0.0..=1.0`.
    pub sample_rate: f64,
    pub event_name: String,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 1.0,
            event_name: "ai.usage".to_string(),
        }
    }
}

/// Health-monitoring policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub health_check_interval_ms: u64,
    pub unhealthy_threshold: u32,
    pub recovery_window_ms: u64,
    pub track_latency: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            health_check_interval_ms: 60_000,
            unhealthy_threshold: 3,
            recovery_window_ms: 300_000,
            track_latency: true,
        }
    }
}
