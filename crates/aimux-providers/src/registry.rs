//! Provider registry: static specs for the five supported providers.
//!
//! Each `ProviderSpec` describes how to reach a provider: display name,
//! default API base, embedding support, and the local CLI that can stand in
//! for the HTTP API. Helpers derive endpoints, health probes and enablement
//! hints from a `ProviderConfig`.

use aimux_core::config::ProviderConfig;
use aimux_core::types::ProviderId;

// ─────────────────────────────────────────────
// Specs
// ─────────────────────────────────────────────

/// Static specification describing one provider.
#[derive(Clone, Debug)]
pub struct ProviderSpec {
    pub id: ProviderId,
    /// Human-readable name for logs. E.g. `"OpenAI"`.
    pub display_name: &'static str,
    /// API base used when the credentials carry none.
    pub default_api_base: Option<&'static str>,
    /// Whether the HTTP API exposes embeddings.
    pub supports_embeddings: bool,
    /// Local command-line tool that can replace the HTTP API.
    pub cli: Option<CliSpec>,
}

/// Static capabilities of a provider's CLI. Never probed at runtime.
#[derive(Clone, Debug)]
pub struct CliSpec {
    pub command: &'static str,
    pub supports_streaming: bool,
    pub supports_embeddings: bool,
    pub install_hint: &'static str,
}

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const GOOGLE_OPENAI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const GOOGLE_MODELS_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Every provider, in canonical order.
pub static PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        id: ProviderId::OpenAi,
        display_name: "OpenAI",
        default_api_base: Some("https://api.openai.com/v1"),
        supports_embeddings: true,
        cli: Some(CliSpec {
            command: "codex",
            supports_streaming: true,
            supports_embeddings: false,
            install_hint: "Install with: npm i -g @openai/codex, then run `codex login`",
        }),
    },
    ProviderSpec {
        id: ProviderId::Anthropic,
        display_name: "Anthropic",
        default_api_base: Some("https://api.anthropic.com/v1"),
        supports_embeddings: false,
        cli: Some(CliSpec {
            command: "claude",
            supports_streaming: true,
            supports_embeddings: false,
            install_hint: "Install the Claude Code CLI and set ANTHROPIC_API_KEY",
        }),
    },
    ProviderSpec {
        id: ProviderId::Gateway,
        display_name: "AI Gateway",
        default_api_base: None,
        supports_embeddings: true,
        cli: None,
    },
    ProviderSpec {
        id: ProviderId::OpenAiCompatible,
        display_name: "OpenAI Compatible",
        default_api_base: None,
        supports_embeddings: true,
        cli: None,
    },
    ProviderSpec {
        id: ProviderId::Google,
        display_name: "Google Gemini",
        default_api_base: Some(GOOGLE_OPENAI_BASE),
        supports_embeddings: true,
        cli: Some(CliSpec {
            command: "gemini",
            supports_streaming: true,
            supports_embeddings: false,
            install_hint: "Install with: npm install -g @google/gemini-cli, then run `gemini` to authenticate",
        }),
    },
];

/// Spec for `id`. Every `ProviderId` has one.
pub fn find(id: ProviderId) -> &'static ProviderSpec {
    PROVIDERS
        .iter()
        .find(|spec| spec.id == id)
        .unwrap_or(&PROVIDERS[0])
}

// ─────────────────────────────────────────────
// Endpoints
// ─────────────────────────────────────────────

/// Join a base URL and a path with exactly one `/` between them.
pub fn append_path(base: &str, path: &str) -> String {
    let base = base.trim_end_matches(['/', '\\']);
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Resolved HTTP connection details for the OpenAI-style wire format.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpEndpoint {
    pub base_url: String,
    pub bearer: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl std::fmt::Debug for HttpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEndpoint")
            .field("base_url", &self.base_url)
            .field("bearer", &self.bearer.as_ref().map(|_| "***"))
            .field("headers", &self.headers.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish()
    }
}

fn vertex_base(config: &ProviderConfig) -> Option<String> {
    let project = config.credentials.project.as_deref()?;
    let location = config.credentials.location.as_deref().unwrap_or("us-central1");
    Some(format!(
        "https://{loc}-aiplatform.googleapis.com/v1/projects/{project}/locations/{loc}",
        loc = location,
        project = project
    ))
}

/// HTTP endpoint for `config`, or `None` when the credentials lack the
/// pieces (base URL, project) needed to address the API.
pub fn http_endpoint(config: &ProviderConfig) -> Option<HttpEndpoint> {
    let c = &config.credentials;
    let spec = find(config.id);
    let mut headers = Vec::new();

    let (base_url, bearer) = match config.id {
        ProviderId::OpenAi | ProviderId::OpenAiCompatible => {
            if let Some(org) = &c.organization {
                headers.push(("OpenAI-Organization".to_string(), org.clone()));
            }
            if let Some(project) = &c.project {
                headers.push(("OpenAI-Project".to_string(), project.clone()));
            }
            let base = c
                .base_url
                .clone()
                .or_else(|| spec.default_api_base.map(String::from))?;
            (base, c.api_key.clone())
        }
        ProviderId::Anthropic => {
            headers.push(("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()));
            let base = c
                .base_url
                .clone()
                .or_else(|| spec.default_api_base.map(String::from))?;
            (base, c.api_key.clone())
        }
        ProviderId::Gateway => (
            c.base_url.clone()?,
            c.auth_token.clone().or_else(|| c.api_key.clone()),
        ),
        ProviderId::Google => {
            if c.use_vertex_ai {
                (
                    append_path(&vertex_base(config)?, "/endpoints/openapi"),
                    c.auth_token.clone(),
                )
            } else {
                (
                    c.base_url.clone().unwrap_or_else(|| GOOGLE_OPENAI_BASE.to_string()),
                    c.api_key.clone(),
                )
            }
        }
    };

    Some(HttpEndpoint {
        base_url,
        bearer,
        headers,
    })
}

/// A lightweight "list models" request used by the health sweep.
#[derive(Clone, PartialEq, Eq)]
pub struct HealthProbe {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl std::fmt::Debug for HealthProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthProbe")
            .field("url", &self.url)
            .field("headers", &self.headers.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish()
    }
}

/// Probe request for `config`, or `None` when there is nothing to probe
/// (CLI mode, or credentials too incomplete to authenticate).
pub fn health_probe(config: &ProviderConfig) -> Option<HealthProbe> {
    let c = &config.credentials;
    if c.use_cli {
        return None;
    }
    let bearer = |token: &str| ("Authorization".to_string(), format!("Bearer {}", token));

    match config.id {
        ProviderId::OpenAi => {
            let key = c.api_key.as_deref()?;
            let base = c.base_url.as_deref().unwrap_or("https://api.openai.com/v1");
            let mut headers = vec![bearer(key)];
            if let Some(org) = &c.organization {
                headers.push(("OpenAI-Organization".to_string(), org.clone()));
            }
            if let Some(project) = &c.project {
                headers.push(("OpenAI-Project".to_string(), project.clone()));
            }
            Some(HealthProbe {
                url: append_path(base, "/models"),
                headers,
            })
        }
        ProviderId::Anthropic => {
            let key = c.api_key.as_deref()?;
            let base = c.base_url.as_deref().unwrap_or("https://api.anthropic.com/v1");
            Some(HealthProbe {
                url: append_path(base, "/models"),
                headers: vec![
                    ("x-api-key".to_string(), key.to_string()),
                    ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
                ],
            })
        }
        ProviderId::Gateway => {
            let token = c.auth_token.as_deref().or(c.api_key.as_deref())?;
            let base = c.base_url.as_deref()?;
            Some(HealthProbe {
                url: append_path(base, "/models"),
                headers: vec![bearer(token)],
            })
        }
        ProviderId::OpenAiCompatible => {
            let key = c.api_key.as_deref()?;
            let base = c.base_url.as_deref()?;
            Some(HealthProbe {
                url: append_path(base, "/models"),
                headers: vec![bearer(key)],
            })
        }
        ProviderId::Google => {
            if c.use_vertex_ai {
                let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
                if let Some(token) = c.auth_token.as_deref() {
                    headers.push(bearer(token));
                }
                Some(HealthProbe {
                    url: append_path(&vertex_base(config)?, "/models"),
                    headers,
                })
            } else {
                let key = c.api_key.as_deref()?;
                Some(HealthProbe {
                    url: GOOGLE_MODELS_URL.to_string(),
                    headers: vec![("x-goog-api-key".to_string(), key.to_string())],
                })
            }
        }
    }
}

/// Actionable remediation for a provider that is not enabled.
pub fn enablement_hint(config: &ProviderConfig) -> String {
    if config.force_disabled {
        return format!(
            "Unset {}_DISABLED to re-enable the {} provider.",
            config.id.env_namespace(),
            find(config.id).display_name
        );
    }
    let c = &config.credentials;
    let hint = match config.id {
        ProviderId::OpenAi if c.use_cli => {
            "Set OPENAI_USE_OAUTH=true or OPENAI_API_KEY (or _FILE) to enable the Codex CLI provider."
        }
        ProviderId::OpenAi => "Set OPENAI_API_KEY or OPENAI_API_KEY_FILE to enable the OpenAI provider.",
        ProviderId::Anthropic => {
            "Set ANTHROPIC_API_KEY or ANTHROPIC_API_KEY_FILE to enable the Anthropic provider."
        }
        ProviderId::Gateway => {
            "Set AI_GATEWAY_TOKEN or AI_GATEWAY_API_KEY (or _FILE) and AI_GATEWAY_URL to enable the AI gateway provider."
        }
        ProviderId::OpenAiCompatible => {
            "Set both OPENAI_COMPATIBLE_API_KEY (or _FILE) and OPENAI_COMPATIBLE_BASE_URL to enable the OpenAI compatible provider."
        }
        ProviderId::Google if c.use_vertex_ai => {
            "Set GOOGLE_GENAI_USE_VERTEXAI=true, GOOGLE_CLOUD_PROJECT, and optionally GOOGLE_CLOUD_LOCATION to enable Google Vertex AI."
        }
        ProviderId::Google if c.use_cli => {
            "Set GEMINI_API_KEY, GOOGLE_GENAI_USE_OAUTH=true, or GOOGLE_GENAI_USE_GCLOUD_ADC=true with GOOGLE_CLOUD_PROJECT to enable the Gemini CLI."
        }
        ProviderId::Google => {
            "Set GEMINI_API_KEY or GOOGLE_API_KEY (or _FILE) to enable Google Gemini (Developer API)."
        }
    };
    hint.to_string()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use aimux_core::config::{build_config, Env, SecretResolver};

    fn provider(pairs: &[(&str, &str)], id: ProviderId) -> ProviderConfig {
        let env = Env::from_pairs(pairs.iter().copied());
        let config =
            build_config(&env, &SecretResolver::with_secrets_dir("/nonexistent"), None).unwrap();
        config.providers[&id].clone()
    }

    #[test]
    fn test_every_provider_has_a_spec() {
        for id in ProviderId::ALL {
            assert_eq!(find(id).id, id);
        }
        assert_eq!(PROVIDERS.len(), ProviderId::ALL.len());
    }

    #[test]
    fn test_cli_table() {
        assert_eq!(find(ProviderId::Google).cli.as_ref().unwrap().command, "gemini");
        assert_eq!(find(ProviderId::OpenAi).cli.as_ref().unwrap().command, "codex");
        assert!(find(ProviderId::Gateway).cli.is_none());
        assert!(PROVIDERS
            .iter()
            .filter_map(|s| s.cli.as_ref())
            .all(|cli| cli.supports_streaming && !cli.supports_embeddings));
    }

    #[test]
    fn test_append_path() {
        assert_eq!(append_path("http://x/v1/", "/models"), "http://x/v1/models");
        assert_eq!(append_path("http://x/v1", "models"), "http://x/v1/models");
        assert_eq!(append_path("http://x/v1//", "/models"), "http://x/v1/models");
    }

    #[test]
    fn test_openai_probe_carries_org_headers() {
        let cfg = provider(
            &[
                ("OPENAI_API_KEY", "sk-1"),
                ("OPENAI_ORGANIZATION", "org-1"),
                ("OPENAI_BASE_URL", "http://localhost:9/v1/"),
            ],
            ProviderId::OpenAi,
        );
        let probe = health_probe(&cfg).unwrap();
        assert_eq!(probe.url, "http://localhost:9/v1/models");
        assert!(probe
            .headers
            .contains(&("Authorization".to_string(), "Bearer sk-1".to_string())));
        assert!(probe
            .headers
            .contains(&("OpenAI-Organization".to_string(), "org-1".to_string())));
    }

    #[test]
    fn test_anthropic_probe_uses_api_key_header() {
        let cfg = provider(&[("ANTHROPIC_API_KEY", "sk-ant")], ProviderId::Anthropic);
        let probe = health_probe(&cfg).unwrap();
        assert_eq!(probe.url, "https://api.anthropic.com/v1/models");
        assert!(probe
            .headers
            .contains(&("anthropic-version".to_string(), "2023-06-01".to_string())));
    }

    #[test]
    fn test_google_probe_modes() {
        let dev = provider(&[("GEMINI_API_KEY", "g")], ProviderId::Google);
        assert_eq!(health_probe(&dev).unwrap().url, GOOGLE_MODELS_URL);

        let vertex = provider(
            &[
                ("GOOGLE_GENAI_USE_VERTEXAI", "true"),
                ("GOOGLE_CLOUD_PROJECT", "p1"),
                ("GOOGLE_CLOUD_LOCATION", "europe-west4"),
            ],
            ProviderId::Google,
        );
        assert_eq!(
            health_probe(&vertex).unwrap().url,
            "https://europe-west4-aiplatform.googleapis.com/v1/projects/p1/locations/europe-west4/models"
        );

        let cli = provider(&[("GOOGLE_GENAI_USE_CLI", "true"), ("GEMINI_API_KEY", "g")], ProviderId::Google);
        assert!(health_probe(&cli).is_none());
    }

    #[test]
    fn test_probe_needs_credentials() {
        let cfg = provider(&[], ProviderId::OpenAiCompatible);
        assert!(health_probe(&cfg).is_none());
    }

    #[test]
    fn test_http_endpoint_resolution() {
        let openai = provider(&[("OPENAI_API_KEY", "sk")], ProviderId::OpenAi);
        let ep = http_endpoint(&openai).unwrap();
        assert_eq!(ep.base_url, "https://api.openai.com/v1");
        assert_eq!(ep.bearer.as_deref(), Some("sk"));

        let gateway = provider(&[("AI_GATEWAY_TOKEN", "t")], ProviderId::Gateway);
        assert!(http_endpoint(&gateway).is_none());

        let vertex = provider(
            &[("GOOGLE_GENAI_USE_VERTEXAI", "1"), ("GOOGLE_CLOUD_PROJECT", "p")],
            ProviderId::Google,
        );
        assert!(http_endpoint(&vertex)
            .unwrap()
            .base_url
            .ends_with("/projects/p/locations/us-central1/endpoints/openapi"));
    }

    #[test]
    fn test_endpoint_debug_redacts_bearer() {
        let openai = provider(&[("OPENAI_API_KEY", "sk-hidden")], ProviderId::OpenAi);
        let dbg = format!("{:?}", http_endpoint(&openai).unwrap());
        assert!(!dbg.contains("sk-hidden"));
    }

    #[test]
    fn test_enablement_hints() {
        let anthropic = provider(&[], ProviderId::Anthropic);
        assert!(enablement_hint(&anthropic).contains("ANTHROPIC_API_KEY"));

        let vertex = provider(&[("GOOGLE_GENAI_USE_VERTEXAI", "true")], ProviderId::Google);
        assert!(enablement_hint(&vertex).contains("GOOGLE_CLOUD_PROJECT"));

        let forced = provider(
            &[("OPENAI_API_KEY", "k"), ("AI_OPENAI_DISABLED", "true")],
            ProviderId::OpenAi,
        );
        assert_eq!(
            enablement_hint(&forced),
            "Unset AI_OPENAI_DISABLED to re-enable the OpenAI provider."
        );
    }
}
