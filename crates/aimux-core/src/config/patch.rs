//! Typed partial updates for [`AiConfig`].
//!
//! Merge contract: `None` keeps the current value, `Some` replaces it.
//! Nested structs merge field by field. `Vec` fields (the fallback order,
//! per-provider fallback lists, CLI args) are replaced wholesale, so a patch
//! touching `fallback_order` must carry the complete order or validation
//! rejects it.
//!
//! `enabled` and `failover_priority` are derived and cannot be patched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::schema::*;
use crate::types::ProviderId;

/// Assigns `Some` values over the target field.
macro_rules! merge_fields {
    ($patch:expr, $target:expr, [$($field:ident),* $(,)?]) => {
        $(
            if let Some(v) = &$patch.$field {
                $target.$field = v.clone();
            }
        )*
    };
}

/// Like `merge_fields!` for targets that are themselves `Option`.
macro_rules! merge_optional_fields {
    ($patch:expr, $target:expr, [$($field:ident),* $(,)?]) => {
        $(
            if let Some(v) = &$patch.$field {
                $target.$field = Some(v.clone());
            }
        )*
    };
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiConfigPatch {
    pub default_provider: Option<ProviderId>,
    pub enable_features: Option<bool>,
    pub enable_streaming: Option<bool>,
    pub enable_fallback: Option<bool>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub request_timeout_ms: Option<u64>,
    pub fallback_order: Option<Vec<ProviderId>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub providers: BTreeMap<ProviderId, ProviderConfigPatch>,
    pub analytics: Option<AnalyticsPatch>,
    pub monitoring: Option<MonitoringPatch>,
}

impl AiConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == AiConfigPatch::default()
    }

    /// Merge onto `config`. Does not re-derive or validate; see
    /// `builder::finalize`.
    pub fn apply_to(&self, config: &mut AiConfig) {
        merge_fields!(
            self,
            config,
            [
                default_provider,
                enable_features,
                enable_streaming,
                enable_fallback,
                max_tokens,
                temperature,
                request_timeout_ms,
                fallback_order,
            ]
        );

        for (id, patch) in &self.providers {
            if let Some(provider) = config.providers.get_mut(id) {
                patch.apply_to(provider);
            }
        }
        if let Some(patch) = &self.analytics {
            merge_fields!(patch, config.analytics, [enabled, sample_rate, event_name]);
        }
        if let Some(patch) = &self.monitoring {
            merge_fields!(
                patch,
                config.monitoring,
                [
                    enabled,
                    health_check_interval_ms,
                    unhealthy_threshold,
                    recovery_window_ms,
                    track_latency,
                ]
            );
        }
    }

    /// Convenience for the common single-provider patch.
    pub fn provider(mut self, id: ProviderId, patch: ProviderConfigPatch) -> Self {
        self.providers.insert(id, patch);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfigPatch {
    pub label: Option<String>,
    pub force_disabled: Option<bool>,
    pub credentials: Option<CredentialsPatch>,
    pub models: Option<ModelsPatch>,
    pub limits: Option<LimitsPatch>,
    pub request_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub compatibility: Option<Compatibility>,
}

impl ProviderConfigPatch {
    fn apply_to(&self, provider: &mut ProviderConfig) {
        merge_fields!(self, provider, [label, force_disabled, compatibility]);
        merge_optional_fields!(self, provider, [request_timeout_ms, max_retries]);

        if let Some(c) = &self.credentials {
            let target = &mut provider.credentials;
            merge_optional_fields!(
                c,
                target,
                [
                    api_key,
                    auth_token,
                    base_url,
                    organization,
                    project,
                    location,
                    api_version,
                    credentials_file,
                    cli_command,
                    cli_working_directory,
                ]
            );
            merge_fields!(c, target, [use_vertex_ai, use_cli, cli_args, use_oauth, use_gcloud_adc]);
        }
        if let Some(m) = &self.models {
            merge_fields!(m, provider.models, [default, fallback]);
            merge_optional_fields!(m, provider.models, [chat, streaming, embedding]);
        }
        if let Some(l) = &self.limits {
            merge_optional_fields!(
                l,
                provider.limits,
                [max_tokens, max_requests_per_minute, concurrency]
            );
        }
    }
}

/// Secret fields deserialize but never serialize, matching the schema.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CredentialsPatch {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    pub base_url: Option<String>,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub location: Option<String>,
    pub api_version: Option<String>,
    pub use_vertex_ai: Option<bool>,
    pub credentials_file: Option<String>,
    pub use_cli: Option<bool>,
    pub cli_command: Option<String>,
    pub cli_args: Option<Vec<String>>,
    pub use_oauth: Option<bool>,
    #[serde(rename = "useGCloudADC")]
    pub use_gcloud_adc: Option<bool>,
    pub cli_working_directory: Option<String>,
}

impl std::fmt::Debug for CredentialsPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsPatch")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("auth_token", &self.auth_token.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("use_cli", &self.use_cli)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelsPatch {
    pub default: Option<String>,
    pub chat: Option<String>,
    pub streaming: Option<String>,
    pub embedding: Option<String>,
    pub fallback: Option<Vec<ProviderId>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitsPatch {
    pub max_tokens: Option<u32>,
    pub max_requests_per_minute: Option<u32>,
    pub concurrency: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsPatch {
    pub enabled: Option<bool>,
    pub sample_rate: Option<f64>,
    pub event_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringPatch {
    pub enabled: Option<bool>,
    pub health_check_interval_ms: Option<u64>,
    pub unhealthy_threshold: Option<u32>,
    pub recovery_window_ms: Option<u64>,
    pub track_latency: Option<bool>,
}
