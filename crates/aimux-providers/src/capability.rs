//! Capability binding: one `bind(config)` factory from a provider config
//! to the transport that serves it.

use std::sync::Arc;

use aimux_core::config::ProviderConfig;
use aimux_core::error::AiError;
use aimux_core::types::{EmbeddingRequest, ProviderId};

use crate::cli_provider::CliProvider;
use crate::http_provider::HttpProvider;
use crate::registry::{enablement_hint, find};
use crate::traits::{
    EmbeddingResponse, GenerationRequest, GenerationResponse, TokenStream, Transport,
};

/// A bound provider.
#[derive(Clone)]
pub enum Capability {
    /// OpenAI-compatible HTTP API.
    Http(Arc<HttpProvider>),
    /// Local command-line tool.
    Cli(Arc<CliProvider>),
    /// Caller-supplied transport with explicit capability flags.
    Custom {
        transport: Arc<dyn Transport>,
        supports_streaming: bool,
        supports_embeddings: bool,
    },
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("provider", &self.provider())
            .field("kind", &self.transport().kind().to_string())
            .field("streaming", &self.supports_streaming())
            .field("embeddings", &self.supports_embeddings())
            .finish()
    }
}

impl Capability {
    /// Wrap an arbitrary transport.
    pub fn custom(
        transport: Arc<dyn Transport>,
        supports_streaming: bool,
        supports_embeddings: bool,
    ) -> Self {
        Capability::Custom {
            transport,
            supports_streaming,
            supports_embeddings,
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        match self {
            Capability::Http(t) => t.clone(),
            Capability::Cli(t) => t.clone(),
            Capability::Custom { transport, .. } => transport.clone(),
        }
    }

    pub fn provider(&self) -> ProviderId {
        self.transport().provider()
    }

    pub fn supports_streaming(&self) -> bool {
        match self {
            Capability::Http(_) => true,
            Capability::Cli(cli) => cli.spec().supports_streaming,
            Capability::Custom {
                supports_streaming, ..
            } => *supports_streaming,
        }
    }

    pub fn supports_embeddings(&self) -> bool {
        match self {
            Capability::Http(http) => find(http.provider()).supports_embeddings,
            Capability::Cli(cli) => cli.spec().supports_embeddings,
            Capability::Custom {
                supports_embeddings, ..
            } => *supports_embeddings,
        }
    }

    /// Handle for text generation with `model`.
    pub fn language_model(&self, model: &str) -> ModelHandle {
        ModelHandle {
            transport: self.transport(),
            model: model.to_string(),
        }
    }

    /// Handle for embeddings with `model`, if the provider supports them.
    pub fn embedding_model(&self, model: &str) -> Option<ModelHandle> {
        self.supports_embeddings().then(|| self.language_model(model))
    }
}

/// A transport paired with a concrete model id.
#[derive(Clone)]
pub struct ModelHandle {
    transport: Arc<dyn Transport>,
    model: String,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("provider", &self.transport.provider())
            .field("model", &self.model)
            .finish()
    }
}

impl ModelHandle {
    pub fn model_id(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, AiError> {
        self.transport.generate(&self.model, request).await
    }

    pub async fn stream(&self, request: &GenerationRequest) -> Result<TokenStream, AiError> {
        self.transport.stream(&self.model, request).await
    }

    pub async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, AiError> {
        self.transport.embed(&self.model, request).await
    }
}

/// Factory used to bind providers. Injectable for tests and embedders.
pub type Binder = Arc<dyn Fn(&ProviderConfig) -> Result<Capability, AiError> + Send + Sync>;

/// The standard binder: [`bind`].
pub fn default_binder() -> Binder {
    Arc::new(bind)
}

/// Bind `config` to its transport. Fails fast when the provider is not
/// enabled, naming what is missing.
pub fn bind(config: &ProviderConfig) -> Result<Capability, AiError> {
    if !config.enabled {
        return Err(AiError::ProviderDisabled {
            provider: config.id,
            hint: enablement_hint(config),
        });
    }
    if config.credentials.use_cli {
        Ok(Capability::Cli(Arc::new(CliProvider::new(config)?)))
    } else {
        Ok(Capability::Http(Arc::new(HttpProvider::new(config)?)))
    }
}
