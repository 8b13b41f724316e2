//! Configuration builder: turns an [`Env`] snapshot into a validated
//! [`AiConfig`].
//!
//! Pipeline: per-provider credentials (through the [`SecretResolver`]) →
//! model/limit defaults with env overrides → optional typed patch →
//! `enabled` derivation → failover priorities → validation.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::defaults::{
    default_limits, default_models, DEFAULT_GEMINI_API_VERSION, DEFAULT_GOOGLE_LOCATION,
    DEFAULT_MAX_RETRIES, DEFAULT_MAX_TOKENS, DEFAULT_PROVIDER, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_TEMPERATURE,
};
use super::env::{parse_provider_list, Env};
use super::patch::AiConfigPatch;
use super::schema::*;
use super::secrets::SecretResolver;
use crate::error::{ConfigError, ConfigIssue};
use crate::types::ProviderId;

/// Build a fresh snapshot from `env`, optionally merging `overrides` before
/// validation.
pub fn build_config(
    env: &Env,
    secrets: &SecretResolver,
    overrides: Option<&AiConfigPatch>,
) -> Result<AiConfig, ConfigError> {
    let default_provider = env
        .get("DEFAULT_AI_PROVIDER")
        .and_then(|v| v.parse::<ProviderId>().ok())
        .unwrap_or(DEFAULT_PROVIDER);

    let fallback_order = ensure_fallback_order(
        default_provider,
        &parse_provider_list(env.raw("AI_FALLBACK_ORDER")),
    );

    let providers: BTreeMap<ProviderId, ProviderConfig> = ProviderId::ALL
        .iter()
        .map(|&id| (id, build_provider_config(id, env, secrets)))
        .collect();

    let mut config = AiConfig {
        default_provider,
        enable_features: env.bool_or("ENABLE_AI_FEATURES", true),
        enable_streaming: env.bool_or("ENABLE_AI_STREAMING", true),
        enable_fallback: env.bool_or("ENABLE_AI_FALLBACK", true),
        max_tokens: env.u32_or("AI_MAX_TOKENS", DEFAULT_MAX_TOKENS),
        temperature: env.f64_or("AI_TEMPERATURE", DEFAULT_TEMPERATURE),
        request_timeout_ms: env.u64_or("AI_REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT_MS),
        fallback_order,
        providers,
        analytics: AnalyticsConfig {
            enabled: env.bool_or("AI_ANALYTICS_ENABLED", true),
            sample_rate: env.f64_or("AI_ANALYTICS_SAMPLE_RATE", 1.0),
            event_name: env
                .raw("AI_ANALYTICS_EVENT_NAME")
                .map(str::to_string)
                .unwrap_or_else(|| AnalyticsConfig::default().event_name),
        },
        monitoring: {
            let d = MonitoringConfig::default();
            MonitoringConfig {
                enabled: env.bool_or("AI_MONITORING_ENABLED", d.enabled),
                health_check_interval_ms: env
                    .u64_or("AI_HEALTHCHECK_INTERVAL_MS", d.health_check_interval_ms),
                unhealthy_threshold: env.u32_or("AI_UNHEALTHY_THRESHOLD", d.unhealthy_threshold),
                recovery_window_ms: env.u64_or("AI_RECOVERY_WINDOW_MS", d.recovery_window_ms),
                track_latency: env.bool_or("AI_MONITOR_LATENCY", d.track_latency),
            }
        },
    };

    if let Some(patch) = overrides {
        patch.apply_to(&mut config);
    }

    finalize(config)
}

/// Re-derive `enabled` and failover priorities, then validate.
///
/// Shared by the initial build and by `ConfigStore::update`.
pub fn finalize(mut config: AiConfig) -> Result<AiConfig, ConfigError> {
    for provider in config.providers.values_mut() {
        provider.enabled =
            !provider.force_disabled && is_provider_configured(provider.id, &provider.credentials);
    }
    apply_failover_priority(&mut config);
    validate(&config)?;

    debug!(
        default_provider = %config.default_provider,
        enabled = config.enabled_providers().count(),
        "AI configuration built"
    );
    Ok(config)
}

// ─────────────────────────────────────────────
// Fallback order
// ─────────────────────────────────────────────

/// Default provider first, then `order` deduplicated (first occurrence
/// wins), then every remaining known provider in canonical order.
pub fn ensure_fallback_order(default_provider: ProviderId, order: &[ProviderId]) -> Vec<ProviderId> {
    let mut seen = BTreeSet::new();
    std::iter::once(default_provider)
        .chain(order.iter().copied())
        .chain(ProviderId::ALL)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Each provider's priority is its index within `fallback_order`.
pub fn apply_failover_priority(config: &mut AiConfig) {
    for (id, provider) in config.providers.iter_mut() {
        provider.failover_priority = config
            .fallback_order
            .iter()
            .position(|p| p == id)
            .map(|i| i as u64)
            .unwrap_or(INFINITE_PRIORITY);
    }
}

// ─────────────────────────────────────────────
// Provider construction
// ─────────────────────────────────────────────

fn env_key(id: ProviderId, suffix: &str) -> String {
    format!("{}_{}", id.env_namespace(), suffix)
}

fn build_provider_config(id: ProviderId, env: &Env, secrets: &SecretResolver) -> ProviderConfig {
    let credentials = build_credentials(id, env, secrets);

    let mut models = default_models(id);
    let fallback = parse_provider_list(env.raw(&env_key(id, "FALLBACK")));
    if !fallback.is_empty() {
        models.fallback = fallback.into_iter().filter(|p| *p != id).collect();
    }
    if let Some(v) = env.get(&env_key(id, "MODEL_DEFAULT")) {
        models.default = v;
    }
    if let Some(v) = env.get(&env_key(id, "MODEL_CHAT")) {
        models.chat = Some(v);
    }
    if let Some(v) = env.get(&env_key(id, "MODEL_STREAMING")) {
        models.streaming = Some(v);
    }
    if let Some(v) = env.get(&env_key(id, "MODEL_EMBEDDING")) {
        models.embedding = Some(v);
    }

    let mut limits = default_limits(id);
    if let Some(cap) = env.get(&env_key(id, "MAX_TOKENS")).and_then(|v| v.parse().ok()) {
        limits.max_tokens = Some(cap);
    }

    let global_timeout = env.u64_or("AI_REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT_MS);
    let global_retries = env.u32_or("AI_MAX_RETRIES", DEFAULT_MAX_RETRIES);

    ProviderConfig {
        id,
        label: id.label(),
        enabled: false,
        force_disabled: env.bool_or(&env_key(id, "DISABLED"), false),
        failover_priority: INFINITE_PRIORITY,
        credentials,
        models,
        limits,
        request_timeout_ms: Some(env.u64_or(&env_key(id, "TIMEOUT_MS"), global_timeout)),
        max_retries: Some(env.u32_or(&env_key(id, "MAX_RETRIES"), global_retries)),
        compatibility: if id == ProviderId::OpenAiCompatible {
            Compatibility::Compatible
        } else {
            Compatibility::Strict
        },
    }
}

/// Collect connection fields for `id`. Secret-bearing keys go through the
/// resolver; plain fields are read straight from `env`.
pub fn build_credentials(id: ProviderId, env: &Env, secrets: &SecretResolver) -> ProviderCredentials {
    match id {
        ProviderId::OpenAi => {
            let api_key = secrets.resolve(env, "OPENAI_API_KEY");
            let mut creds = ProviderCredentials {
                base_url: env.get("OPENAI_BASE_URL"),
                organization: env.get("OPENAI_ORGANIZATION"),
                project: env.get("OPENAI_PROJECT"),
                ..Default::default()
            };
            if env.bool_or("OPENAI_USE_CLI", false) {
                let use_oauth = env.bool_or("OPENAI_USE_OAUTH", false);
                creds.use_cli = true;
                creds.use_oauth = use_oauth || api_key.is_none();
                creds.api_key = if use_oauth { None } else { api_key };
                creds.cli_command =
                    Some(env.get("OPENAI_CLI_COMMAND").unwrap_or_else(|| "codex".into()));
                creds.cli_args = env.list("OPENAI_CLI_ARGS");
                creds.cli_working_directory = env.get("OPENAI_CLI_WORKING_DIR");
            } else {
                creds.api_key = api_key;
            }
            creds
        }
        ProviderId::Anthropic => ProviderCredentials {
            api_key: secrets.resolve(env, "ANTHROPIC_API_KEY"),
            base_url: env.get("ANTHROPIC_BASE_URL"),
            ..Default::default()
        },
        ProviderId::Gateway => ProviderCredentials {
            auth_token: secrets.resolve(env, "AI_GATEWAY_TOKEN"),
            api_key: secrets.resolve(env, "AI_GATEWAY_API_KEY"),
            base_url: env.get("AI_GATEWAY_URL"),
            ..Default::default()
        },
        ProviderId::OpenAiCompatible => ProviderCredentials {
            api_key: secrets.resolve(env, "OPENAI_COMPATIBLE_API_KEY"),
            base_url: env.get("OPENAI_COMPATIBLE_BASE_URL"),
            organization: env.get("OPENAI_COMPATIBLE_ORG"),
            ..Default::default()
        },
        ProviderId::Google => build_google_credentials(env, secrets),
    }
}

fn build_google_credentials(env: &Env, secrets: &SecretResolver) -> ProviderCredentials {
    let use_cli = env.bool_or("GOOGLE_GENAI_USE_CLI", false);
    let use_vertex = env.bool_or("GOOGLE_GENAI_USE_VERTEXAI", false);
    let api_version = Some(
        env.get("GEMINI_API_VERSION")
            .unwrap_or_else(|| DEFAULT_GEMINI_API_VERSION.into()),
    );
    let resolve_key = || {
        secrets
            .resolve(env, "GOOGLE_API_KEY")
            .or_else(|| secrets.resolve(env, "GEMINI_API_KEY"))
    };

    if use_cli {
        let use_adc = env.bool_or("GOOGLE_GENAI_USE_GCLOUD_ADC", false);
        let use_oauth = env.bool_or("GOOGLE_GENAI_USE_OAUTH", false);
        let api_key = resolve_key();
        let project = env.get("GOOGLE_CLOUD_PROJECT");
        let keyless_with_project = api_key.is_none() && project.is_some();

        ProviderCredentials {
            api_key: if use_oauth || use_adc { None } else { api_key },
            project: if use_adc || use_oauth { project } else { None },
            location: use_adc.then(|| {
                env.get("GOOGLE_CLOUD_LOCATION")
                    .unwrap_or_else(|| DEFAULT_GOOGLE_LOCATION.into())
            }),
            use_cli: true,
            cli_command: Some(
                env.get("GOOGLE_GENAI_CLI_COMMAND")
                    .unwrap_or_else(|| "gemini".into()),
            ),
            cli_args: env.list("GOOGLE_GENAI_CLI_ARGS"),
            use_oauth: use_oauth || (keyless_with_project && !use_adc),
            use_gcloud_adc: use_adc || (keyless_with_project && !use_oauth),
            cli_working_directory: env.get("GOOGLE_GENAI_CLI_WORKING_DIR"),
            api_version,
            ..Default::default()
        }
    } else if use_vertex {
        ProviderCredentials {
            project: env.get("GOOGLE_CLOUD_PROJECT"),
            location: Some(
                env.get("GOOGLE_CLOUD_LOCATION")
                    .unwrap_or_else(|| DEFAULT_GOOGLE_LOCATION.into()),
            ),
            credentials_file: env.get("GOOGLE_APPLICATION_CREDENTIALS"),
            auth_token: secrets.resolve(env, "GOOGLE_ACCESS_TOKEN"),
            use_vertex_ai: true,
            ..Default::default()
        }
    } else {
        ProviderCredentials {
            api_key: resolve_key(),
            api_version,
            ..Default::default()
        }
    }
}

/// Credential completeness per provider kind. Pure.
pub fn is_provider_configured(id: ProviderId, c: &ProviderCredentials) -> bool {
    match id {
        ProviderId::OpenAi => {
            if c.use_cli {
                c.use_oauth || c.api_key.is_some()
            } else {
                c.api_key.is_some()
            }
        }
        ProviderId::Anthropic => c.api_key.is_some(),
        ProviderId::Gateway => {
            (c.auth_token.is_some() || c.api_key.is_some()) && c.base_url.is_some()
        }
        ProviderId::OpenAiCompatible => c.api_key.is_some() && c.base_url.is_some(),
        ProviderId::Google => {
            if c.use_cli {
                c.use_oauth || c.use_gcloud_adc || c.api_key.is_some() || c.project.is_some()
            } else if c.use_vertex_ai {
                c.project.is_some()
            } else {
                c.api_key.is_some()
            }
        }
    }
}

// ─────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────

/// Check every rule and report all violations at once.
pub fn validate(config: &AiConfig) -> Result<(), ConfigError> {
    let mut issues = Vec::new();

    if config.max_tokens == 0 {
        issues.push(ConfigIssue::new("maxTokens", "must be greater than 0"));
    }
    if !(config.temperature >= 0.0) {
        issues.push(ConfigIssue::new("temperature", "must be >= 0"));
    }
    if config.request_timeout_ms == 0 {
        issues.push(ConfigIssue::new("requestTimeoutMs", "must be greater than 0"));
    }

    let analytics = &config.analytics;
    if !(0.0..=1.0).contains(&analytics.sample_rate) {
        issues.push(ConfigIssue::new("analytics.sampleRate", "must be between 0 and 1"));
    }
    if analytics.event_name.trim().is_empty() {
        issues.push(ConfigIssue::new("analytics.eventName", "must not be empty"));
    }

    let monitoring = &config.monitoring;
    if monitoring.health_check_interval_ms == 0 {
        issues.push(ConfigIssue::new(
            "monitoring.healthCheckIntervalMs",
            "must be greater than 0",
        ));
    }
    if monitoring.unhealthy_threshold == 0 {
        issues.push(ConfigIssue::new(
            "monitoring.unhealthyThreshold",
            "must be greater than 0",
        ));
    }

    if config.fallback_order.is_empty() {
        issues.push(ConfigIssue::new("fallbackOrder", "must not be empty"));
    }
    let mut seen = BTreeSet::new();
    for id in &config.fallback_order {
        if !seen.insert(*id) {
            issues.push(ConfigIssue::new(
                "fallbackOrder",
                format!("provider {} is listed more than once", id),
            ));
        }
    }

    for id in ProviderId::ALL {
        if !config.fallback_order.contains(&id) {
            issues.push(ConfigIssue::new(
                "fallbackOrder",
                format!("Fallback order is missing provider {}.", id),
            ));
        }
        match config.providers.get(&id) {
            Some(provider) => validate_provider(provider, &mut issues),
            None => issues.push(ConfigIssue::new(
                format!("providers.{}", id),
                "missing provider configuration",
            )),
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ConfigError { issues })
    }
}

fn validate_provider(p: &ProviderConfig, issues: &mut Vec<ConfigIssue>) {
    let path = |field: &str| format!("providers.{}.{}", p.id, field);
    let c = &p.credentials;

    if p.models.default.trim().is_empty() {
        issues.push(ConfigIssue::new(path("models.default"), "must not be empty"));
    }
    if p.id == ProviderId::Anthropic && p.models.embedding.is_some() {
        issues.push(ConfigIssue::new(
            path("models.embedding"),
            "Anthropic provider does not support embeddings; remove the embedding model configuration.",
        ));
    }
    if p.limits.concurrency == Some(0) {
        issues.push(ConfigIssue::new(path("limits.concurrency"), "must be greater than 0"));
    }
    if p.request_timeout_ms == Some(0) {
        issues.push(ConfigIssue::new(path("requestTimeoutMs"), "must be greater than 0"));
    }

    if !p.enabled {
        return;
    }
    match p.id {
        ProviderId::OpenAi => {
            if c.api_key.is_none() && !(c.use_cli && c.use_oauth) {
                issues.push(ConfigIssue::new(
                    path("credentials.apiKey"),
                    "openai provider requires an API key.",
                ));
            }
        }
        ProviderId::Anthropic => {
            if c.api_key.is_none() {
                issues.push(ConfigIssue::new(
                    path("credentials.apiKey"),
                    "anthropic provider requires an API key.",
                ));
            }
        }
        ProviderId::Gateway => {
            if c.auth_token.is_none() && c.api_key.is_none() {
                issues.push(ConfigIssue::new(
                    path("credentials.authToken"),
                    "AI gateway requires an auth token or API key.",
                ));
            }
            if c.base_url.is_none() {
                issues.push(ConfigIssue::new(
                    path("credentials.baseUrl"),
                    "AI gateway requires a base URL.",
                ));
            }
        }
        ProviderId::OpenAiCompatible => {
            if c.api_key.is_none() {
                issues.push(ConfigIssue::new(
                    path("credentials.apiKey"),
                    "OpenAI compatible provider requires an API key.",
                ));
            }
            if c.base_url.is_none() {
                issues.push(ConfigIssue::new(
                    path("credentials.baseUrl"),
                    "OpenAI compatible provider requires a base URL.",
                ));
            }
        }
        ProviderId::Google => {
            if c.use_vertex_ai {
                if c.project.is_none() {
                    issues.push(ConfigIssue::new(
                        path("credentials.project"),
                        "Google Vertex AI requires a project ID.",
                    ));
                }
            } else if c.use_cli {
                let adc = c.use_gcloud_adc || c.project.is_some();
                if c.api_key.is_none() && !c.use_oauth && !adc {
                    issues.push(ConfigIssue::new(
                        path("credentials.apiKey"),
                        "Google Gemini CLI requires an API key, OAuth, or gcloud ADC.",
                    ));
                }
            } else if c.api_key.is_none() {
                issues.push(ConfigIssue::new(
                    path("credentials.apiKey"),
                    "Google AI (Developer API) requires an API key (GEMINI_API_KEY or GOOGLE_API_KEY).",
                ));
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
