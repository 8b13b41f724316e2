//! Transport trait: the seam every provider backend sits behind.
//!
//! An HTTP API, a local CLI, or a test double all implement [`Transport`];
//! the [`crate::client::ProviderClient`] never knows which one it talks to.

use async_trait::async_trait;
use futures::stream::BoxStream;

use aimux_core::error::{AiError, CapabilityKind};
use aimux_core::types::{ChatMessage, EmbeddingRequest, ProviderId, TokenUsage, ToolCall};

/// Effective per-call settings, computed by the client from call options,
/// the global configuration and the provider's limits.
#[derive(Clone, Debug, PartialEq)]
pub struct CallSettings {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub stop_sequences: Option<Vec<String>>,
    pub response_format: Option<serde_json::Value>,
    pub max_retries: u32,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.2,
            top_p: None,
            top_k: None,
            presence_penalty: None,
            frequency_penalty: None,
            stop_sequences: None,
            response_format: None,
            max_retries: 0,
        }
    }
}

/// One text-generation request. A plain prompt is a single user message.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub settings: CallSettings,
}

impl GenerationRequest {
    pub fn prompt(prompt: &str, settings: CallSettings) -> Self {
        GenerationRequest {
            messages: vec![ChatMessage::user(prompt)],
            settings,
        }
    }
}

/// What a transport returns for a completed generation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationResponse {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: TokenUsage,
    pub tool_calls: Vec<ToolCall>,
    /// Response messages, when the backend reports them.
    pub messages: Vec<ChatMessage>,
    pub warnings: Vec<String>,
}

/// What a transport returns for an embedding call: one vector per input.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmbeddingResponse {
    pub vectors: Vec<Vec<f32>>,
    pub usage: TokenUsage,
}

/// Lazy token stream. Dropping it cancels the underlying request.
pub type TokenStream = BoxStream<'static, Result<String, AiError>>;

/// A provider backend.
///
/// Cancellation is by drop: the client races every call against its abort
/// signal and drops the losing future, so implementations must not detach
/// work that outlives the returned future or stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which provider this transport serves.
    fn provider(&self) -> ProviderId;

    /// Short label for logs, e.g. `"http"` or `"cli:gemini"`.
    fn kind(&self) -> &str;

    async fn generate(
        &self,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, AiError>;

    async fn stream(&self, model: &str, request: &GenerationRequest) -> Result<TokenStream, AiError> {
        let _ = (model, request);
        Err(AiError::Unsupported {
            provider: self.provider(),
            capability: CapabilityKind::Streaming,
        })
    }

    async fn embed(
        &self,
        model: &str,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse, AiError> {
        let _ = (model, request);
        Err(AiError::Unsupported {
            provider: self.provider(),
            capability: CapabilityKind::Embeddings,
        })
    }
}
