//! Compiled-in per-provider defaults and global fallbacks.

use super::schema::{ProviderLimits, ProviderModels};
use crate::types::ProviderId;

pub const DEFAULT_PROVIDER: ProviderId = ProviderId::OpenAi;
pub const DEFAULT_MAX_TOKENS: u32 = 8192;
pub const DEFAULT_TEMPERATURE: f64 = 0.2;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_SECRETS_DIR: &str = "/run/secrets";
pub const DEFAULT_GOOGLE_LOCATION: &str = "us-central1";
pub const DEFAULT_GEMINI_API_VERSION: &str = "v1";

/// Model selection a provider starts from before overrides.
pub fn default_models(id: ProviderId) -> ProviderModels {
    use ProviderId::*;

    let (default, streaming, embedding, fallback): (&str, &str, Option<&str>, Vec<ProviderId>) =
        match id {
            OpenAi => (
                "gpt-4.1-mini",
                "gpt-4.1-mini",
                Some("text-embedding-3-large"),
                vec![Anthropic, Gateway],
            ),
            Anthropic => (
                "claude-3-5-sonnet-latest",
                "claude-3-5-haiku-latest",
                None,
                vec![OpenAi, Gateway],
            ),
            Gateway => (
                "gpt-4.1-mini",
                "gpt-4.1-mini",
                Some("text-embedding-3-small"),
                vec![OpenAi, Anthropic],
            ),
            OpenAiCompatible => (
                "gpt-4.1-mini",
                "gpt-4.1-mini",
                Some("text-embedding-ada-002"),
                vec![OpenAi, Gateway],
            ),
            Google => (
                "gemini-2.0-flash-exp",
                "gemini-1.5-flash",
                Some("text-embedding-004"),
                vec![OpenAi, Anthropic],
            ),
        };

    ProviderModels {
        default: default.to_string(),
        chat: Some(default.to_string()),
        streaming: Some(streaming.to_string()),
        embedding: embedding.map(str::to_string),
        fallback,
    }
}

/// Numeric ceilings a provider starts from.
pub fn default_limits(id: ProviderId) -> ProviderLimits {
    let (max_tokens, rpm, concurrency) = match id {
        ProviderId::OpenAi => (8192, 500, 8),
        ProviderId::Anthropic => (4000, 200, 4),
        ProviderId::Gateway => (4000, 450, 6),
        ProviderId::OpenAiCompatible => (4000, 120, 4),
        ProviderId::Google => (8192, 300, 6),
    };
    ProviderLimits {
        max_tokens: Some(max_tokens),
        max_requests_per_minute: Some(rpm),
        concurrency: Some(concurrency),
    }
}
