//! Error taxonomy shared by every Aimux crate.

use std::fmt;

use thiserror::Error;

use crate::types::ProviderId;

/// One violated validation rule: a dotted field path plus a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigIssue {
    pub path: String,
    pub message: String,
}

impl ConfigIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigIssue {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Schema validation failure. Lists every issue, not just the first.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub struct ConfigError {
    pub issues: Vec<ConfigIssue>,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid AI configuration")?;
        for (i, issue) in self.issues.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, issue)?;
        }
        Ok(())
    }
}

/// Capability a provider may lack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapabilityKind {
    Streaming,
    Embeddings,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Streaming => f.write_str("streaming"),
            CapabilityKind::Embeddings => f.write_str("embeddings"),
        }
    }
}

/// Errors surfaced by the AI layer.
#[derive(Clone, Debug, Error)]
pub enum AiError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Provider {provider} is not enabled. {hint}")]
    ProviderDisabled { provider: ProviderId, hint: String },

    #[error("Provider {provider} does not support {capability}")]
    Unsupported {
        provider: ProviderId,
        capability: CapabilityKind,
    },

    #[error("{provider} request failed: {message}")]
    Transport {
        provider: ProviderId,
        message: String,
        /// Provider error code or HTTP status, when known.
        code: Option<String>,
        retryable: bool,
    },

    #[error("{0}")]
    Aborted(String),

    #[error("AI features are disabled")]
    FeaturesDisabled,

    #[error("AI streaming is disabled")]
    StreamingDisabled,

    #[error("No AI providers available")]
    NoProvidersAvailable,
}

impl AiError {
    pub fn transport(provider: ProviderId, message: impl Into<String>) -> Self {
        AiError::Transport {
            provider,
            message: message.into(),
            code: None,
            retryable: false,
        }
    }

    /// Code recorded on failed usage events.
    pub fn code(&self) -> Option<String> {
        match self {
            AiError::Config(_) => Some("config".into()),
            AiError::ProviderDisabled { .. } => Some("provider_disabled".into()),
            AiError::Unsupported { .. } => Some("unsupported".into()),
            AiError::Transport { code, .. } => code.clone(),
            AiError::Aborted(_) => Some("aborted".into()),
            AiError::FeaturesDisabled | AiError::StreamingDisabled => Some("disabled".into()),
            AiError::NoProvidersAvailable => Some("no_providers".into()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AiError::Transport { retryable: true, .. })
    }
}
