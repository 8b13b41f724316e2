//! Generic HTTP transport for OpenAI-compatible APIs.
//!
//! Every HTTP provider (OpenAI, Anthropic, the AI gateway, self-hosted
//! OpenAI-compatible servers, Gemini and Vertex AI) is reached through the
//! `/chat/completions` and `/embeddings` endpoints of its base URL.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use aimux_core::config::ProviderConfig;
use aimux_core::error::AiError;
use aimux_core::types::{
    ChatMessage, ChatRole, EmbeddingInput, EmbeddingRequest, ProviderId, TokenUsage, ToolCall,
};

use crate::registry::{append_path, enablement_hint, find, http_endpoint, ProviderSpec};
use crate::traits::{
    EmbeddingResponse, GenerationRequest, GenerationResponse, TokenStream, Transport,
};

/// Base delay of the exponential retry backoff.
const RETRY_BASE_DELAY_MS: u64 = 250;

// ─────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
    #[serde(default)]
    total_tokens: Option<u32>,
}

impl From<WireUsage> for TokenUsage {
    fn from(u: WireUsage) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a EmbeddingInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// Transport that talks to an OpenAI-compatible HTTP API.
pub struct HttpProvider {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL (e.g. `"https://api.openai.com/v1"`).
    api_base: String,
    /// Bearer token, when the provider authenticates that way.
    bearer: Option<String>,
    /// Provider-specific headers (organization, API version, ...).
    extra_headers: HeaderMap,
    /// Retries for retryable failures.
    max_retries: u32,
    spec: &'static ProviderSpec,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("provider", &self.spec.display_name)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl HttpProvider {
    /// Create a transport for `config`.
    ///
    /// Fails with `ProviderDisabled` when the credentials cannot address
    /// the API (no base URL for gateway-style providers, no Vertex project).
    pub fn new(config: &ProviderConfig) -> Result<Self, AiError> {
        let spec = find(config.id);
        let endpoint = http_endpoint(config).ok_or_else(|| AiError::ProviderDisabled {
            provider: config.id,
            hint: enablement_hint(config),
        })?;

        let mut extra_headers = HeaderMap::new();
        for (key, value) in &endpoint.headers {
            if let (Ok(name), Ok(val)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                extra_headers.insert(name, val);
            } else {
                warn!(provider = %config.id, header = %key, "Invalid header; skipping");
            }
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AiError::transport(config.id, format!("failed to build HTTP client: {}", e)))?;

        debug!(
            provider = spec.display_name,
            api_base = %endpoint.base_url,
            "Creating HTTP transport"
        );

        Ok(HttpProvider {
            client,
            api_base: endpoint.base_url,
            bearer: endpoint.bearer,
            extra_headers,
            max_retries: config.max_retries.unwrap_or(0),
            spec,
        })
    }

    /// Build the full chat completions URL.
    fn completions_url(&self) -> String {
        append_path(&self.api_base, "/chat/completions")
    }

    fn embeddings_url(&self) -> String {
        append_path(&self.api_base, "/embeddings")
    }

    fn provider_id(&self) -> ProviderId {
        self.spec.id
    }

    /// POST `body` to `url`, retrying retryable failures with exponential
    /// backoff. Returns the first successful response.
    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        max_retries: u32,
    ) -> Result<reqwest::Response, AiError> {
        let mut attempt = 0u32;
        loop {
            let mut request = self
                .client
                .post(url)
                .headers(self.extra_headers.clone())
                .json(body);
            if let Some(token) = &self.bearer {
                request = request.bearer_auth(token);
            }

            let err = match request.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => self.status_error(resp).await,
                Err(e) => {
                    error!(provider = self.spec.display_name, error = %e, "HTTP request failed");
                    AiError::Transport {
                        provider: self.provider_id(),
                        message: e.to_string(),
                        code: e.status().map(|s| s.as_u16().to_string()),
                        retryable: e.is_connect() || e.is_timeout() || e.is_request(),
                    }
                }
            };
            if !err.is_retryable() || attempt >= max_retries {
                return Err(err);
            }
            let delay = RETRY_BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(16));
            warn!(
                provider = self.spec.display_name,
                attempt = attempt + 1,
                delay_ms = delay,
                error = %err,
                "Retrying request"
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;
            attempt += 1;
        }
    }

    async fn status_error(&self, response: reqwest::Response) -> AiError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        error!(
            provider = self.spec.display_name,
            status = %status,
            body = %body,
            "API error"
        );
        AiError::Transport {
            provider: self.provider_id(),
            message: format!("{}: {}", status, body),
            code: Some(status.as_u16().to_string()),
            retryable: status.as_u16() == 429 || status.is_server_error(),
        }
    }

    fn parse_error(&self, e: impl std::fmt::Display) -> AiError {
        error!(provider = self.spec.display_name, error = %e, "Failed to parse response");
        AiError::transport(self.provider_id(), format!("invalid response: {}", e))
    }

    fn completion_body<'a>(
        model: &'a str,
        request: &'a GenerationRequest,
        stream: bool,
    ) -> ChatCompletionRequest<'a> {
        let s = &request.settings;
        ChatCompletionRequest {
            model,
            messages: &request.messages,
            max_tokens: s.max_tokens,
            temperature: s.temperature,
            top_p: s.top_p,
            top_k: s.top_k,
            presence_penalty: s.presence_penalty,
            frequency_penalty: s.frequency_penalty,
            stop: s.stop_sequences.as_deref(),
            response_format: s.response_format.as_ref(),
            stream,
        }
    }
}

#[async_trait]
impl Transport for HttpProvider {
    fn provider(&self) -> ProviderId {
        self.provider_id()
    }

    fn kind(&self) -> &str {
        "http"
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, AiError> {
        debug!(
            provider = self.spec.display_name,
            model = %model,
            messages = request.messages.len(),
            "Calling chat completions"
        );

        let body = Self::completion_body(model, request, false);
        let response = self
            .post_json(&self.completions_url(), &body, request.settings.max_retries)
            .await?;
        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|e| self.parse_error(e))?;

        let usage = parsed.usage.map(TokenUsage::from).unwrap_or_default();
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| self.parse_error("response has no choices"))?;
        let text = choice.message.content.unwrap_or_default();
        let tool_calls = choice.message.tool_calls.unwrap_or_default();

        debug!(
            provider = self.spec.display_name,
            chars = text.len(),
            tool_calls = tool_calls.len(),
            finish_reason = choice.finish_reason.as_deref().unwrap_or("?"),
            "Completion received"
        );

        Ok(GenerationResponse {
            messages: vec![ChatMessage::new(ChatRole::Assistant, text.clone())],
            text,
            finish_reason: choice.finish_reason,
            usage,
            tool_calls,
            warnings: Vec::new(),
        })
    }

    async fn stream(&self, model: &str, request: &GenerationRequest) -> Result<TokenStream, AiError> {
        debug!(provider = self.spec.display_name, model = %model, "Opening completion stream");

        let body = Self::completion_body(model, request, true);
        let response = self
            .post_json(&self.completions_url(), &body, request.settings.max_retries)
            .await?;

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(sse_tokens(self.provider_id(), bytes))
    }

    async fn embed(
        &self,
        model: &str,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse, AiError> {
        if !self.spec.supports_embeddings {
            return Err(AiError::Unsupported {
                provider: self.provider_id(),
                capability: aimux_core::error::CapabilityKind::Embeddings,
            });
        }
        let body = EmbeddingsRequest {
            model,
            input: &request.input,
            dimensions: request.dimensions,
        };
        let response = self.post_json(&self.embeddings_url(), &body, self.max_retries).await?;
        let mut parsed: EmbeddingsResponse =
            response.json().await.map_err(|e| self.parse_error(e))?;
        parsed.data.sort_by_key(|d| d.index);

        Ok(EmbeddingResponse {
            vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
            usage: parsed.usage.map(TokenUsage::from).unwrap_or_default(),
        })
    }
}

// ─────────────────────────────────────────────
// Server-sent events
// ─────────────────────────────────────────────

struct SseState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    finished: bool,
    provider: ProviderId,
}

impl SseState {
    /// Consume complete lines from the buffer, queueing content deltas.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                self.finished = true;
                self.buffer.clear();
                return;
            }
            match serde_json::from_str::<StreamEvent>(data) {
                Ok(event) => {
                    for choice in event.choices {
                        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                            self.pending.push_back(content);
                        }
                    }
                }
                Err(e) => warn!(provider = %self.provider, error = %e, "Skipping malformed SSE event"),
            }
        }
    }
}

/// Turn an SSE byte stream into a stream of content tokens.
fn sse_tokens(
    provider: ProviderId,
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
) -> TokenStream {
    let state = SseState {
        bytes,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
        provider,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(token) = st.pending.pop_front() {
                return Some((Ok(token), st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend_from_slice(&chunk);
                    st.drain_lines();
                }
                Some(Err(e)) => {
                    st.finished = true;
                    let err = AiError::Transport {
                        provider: st.provider,
                        message: format!("stream interrupted: {}", e),
                        code: None,
                        retryable: false,
                    };
                    return Some((Err(err), st));
                }
                None => {
                    st.buffer.push(b'\n');
                    st.drain_lines();
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
