//! Provider client: one provider's four operations with timeout/abort
//! composition, usage emission and health bookkeeping.
//!
//! Every operation resolves the model, computes call settings, races the
//! transport call against the composed abort future and then records the
//! outcome (health first, then usage) before returning.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use chrono::Utc;
use futures::Stream;
use tracing::{debug, warn};

use aimux_core::config::{AiConfig, AnalyticsConfig, ProviderConfig};
use aimux_core::error::{AiError, CapabilityKind};
use aimux_core::types::{
    Annotation, CallOptions, ChatMessage, ChatResult, EmbeddingInput, EmbeddingRequest,
    EmbeddingResult, Operation, ProviderHealth, ProviderId, ResultMetadata, StreamChunk,
    TextResult, TokenUsage, UsageEvent, UsageMetrics,
};

use crate::cancel::{compose, AbortSignal, ComposedAbort};
use crate::capability::{Binder, Capability};
use crate::health::HealthMonitor;
use crate::traits::{CallSettings, GenerationRequest, TokenStream};
use crate::usage::{annotations_from, UsageEmitter};

/// Which model slot an operation draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelCategory {
    Default,
    Chat,
    Streaming,
    Embedding,
}

/// Effective token cap: the requested value clamped to the provider ceiling.
pub fn effective_max_tokens(requested: u32, ceiling: Option<u32>) -> u32 {
    match ceiling {
        Some(cap) => requested.min(cap),
        None => requested,
    }
}

/// Client bound to one provider under one configuration snapshot.
pub struct ProviderClient {
    config: Arc<AiConfig>,
    provider: ProviderConfig,
    capability: Capability,
    health: Arc<HealthMonitor>,
    usage: Arc<UsageEmitter>,
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("provider", &self.provider.id)
            .field("capability", &self.capability)
            .finish()
    }
}

/// Outcome summary handed to the bookkeeping step.
struct CallRecord<'a> {
    operation: Operation,
    model: &'a str,
    started: Instant,
    usage: TokenUsage,
    error: Option<&'a AiError>,
    prompt_length: usize,
    response_length: usize,
    annotations: &'a std::collections::BTreeMap<String, Annotation>,
}

impl ProviderClient {
    /// Bind `id` under `config` through `binder`.
    pub fn new(
        config: Arc<AiConfig>,
        id: ProviderId,
        binder: &Binder,
        health: Arc<HealthMonitor>,
        usage: Arc<UsageEmitter>,
    ) -> Result<Self, AiError> {
        let provider = config.provider(id).cloned().ok_or(AiError::ProviderDisabled {
            provider: id,
            hint: "Provider is not configured.".to_string(),
        })?;
        let capability = binder(&provider)?;
        debug!(provider = %id, capability = ?capability, "provider client created");
        Ok(ProviderClient {
            config,
            provider,
            capability,
            health,
            usage,
        })
    }

    pub fn provider(&self) -> ProviderId {
        self.provider.id
    }

    pub fn provider_config(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// This provider's health snapshot.
    pub fn get_health(&self) -> ProviderHealth {
        self.health.snapshot(self.provider.id)
    }

    /// Explicit override, then the category model, then the default model.
    pub fn resolve_model(&self, category: ModelCategory, explicit: Option<&str>) -> String {
        if let Some(model) = explicit.map(str::trim).filter(|m| !m.is_empty()) {
            return model.to_string();
        }
        let models = &self.provider.models;
        let slot = match category {
            ModelCategory::Default => None,
            ModelCategory::Chat => models.chat.as_ref(),
            ModelCategory::Streaming => models.streaming.as_ref(),
            ModelCategory::Embedding => models.embedding.as_ref(),
        };
        slot.cloned().unwrap_or_else(|| models.default.clone())
    }

    /// Call settings for `options`, with globals filling the gaps.
    pub fn call_settings(&self, options: &CallOptions) -> CallSettings {
        CallSettings {
            max_tokens: effective_max_tokens(
                options.max_tokens.unwrap_or(self.config.max_tokens),
                self.provider.limits.max_tokens,
            ),
            temperature: options.temperature.unwrap_or(self.config.temperature),
            top_p: options.top_p,
            top_k: options.top_k,
            presence_penalty: options.presence_penalty,
            frequency_penalty: options.frequency_penalty,
            stop_sequences: options.stop_sequences.clone(),
            response_format: options.response_format.clone(),
            max_retries: self.provider.max_retries.unwrap_or(0),
        }
    }

    /// Provider timeout, else the global one.
    pub fn timeout_ms(&self) -> u64 {
        self.provider
            .request_timeout_ms
            .unwrap_or(self.config.request_timeout_ms)
    }

    /// Race `call` against the composed abort. The abort future (and its
    /// timer) is dropped on every exit path.
    async fn run_abortable<T, F>(&self, call: F, signal: Option<&AbortSignal>) -> Result<T, AiError>
    where
        F: Future<Output = Result<T, AiError>>,
    {
        let abort = compose(self.timeout_ms(), signal);
        if let Some(reason) = abort.caller_aborted() {
            return Err(AiError::Aborted(reason));
        }
        tokio::select! {
            biased;
            result = call => result,
            reason = abort => Err(AiError::Aborted(reason)),
        }
    }

    /// Health update, then usage emission. Returns the metrics for the result.
    fn record(&self, r: CallRecord<'_>) -> UsageMetrics {
        let id = self.provider.id;
        let duration_ms = r.started.elapsed().as_millis() as u64;
        match r.error {
            None => self.health.mark_success(id, Some(duration_ms)),
            Some(e) => {
                warn!(provider = %id, operation = r.operation.as_str(), error = %e, "provider call failed");
                self.health.mark_failure(id, e.to_string());
            }
        }
        let metrics = UsageMetrics {
            provider: id,
            model: r.model.to_string(),
            success: r.error.is_none(),
            prompt_tokens: r.usage.prompt_tokens,
            completion_tokens: r.usage.completion_tokens,
            total_tokens: r.usage.resolved_total(),
            duration_ms,
            timestamp: Utc::now(),
            error_code: r.error.and_then(AiError::code),
            error_message: r.error.map(ToString::to_string),
            annotations: r.annotations.clone(),
        };
        self.usage.emit(
            &self.config.analytics,
            UsageEvent {
                metrics: metrics.clone(),
                operation: r.operation,
                prompt_length: r.prompt_length,
                response_length: r.response_length,
            },
        );
        metrics
    }

    // ── Operations ──

    /// Single-prompt completion.
    pub async fn generate_text(
        &self,
        prompt: &str,
        options: &CallOptions,
        signal: Option<&AbortSignal>,
    ) -> Result<TextResult, AiError> {
        let model = self.resolve_model(ModelCategory::Default, options.model.as_deref());
        let request = GenerationRequest::prompt(prompt, self.call_settings(options));
        let annotations = annotations_from(&options.metadata);
        let handle = self.capability.language_model(&model);
        let started = Instant::now();

        let outcome = self.run_abortable(handle.generate(&request), signal).await;
        let prompt_length = prompt.chars().count();
        match outcome {
            Ok(resp) => {
                let usage = self.record(CallRecord {
                    operation: Operation::Generate,
                    model: &model,
                    started,
                    usage: resp.usage,
                    error: None,
                    prompt_length,
                    response_length: resp.text.chars().count(),
                    annotations: &annotations,
                });
                Ok(TextResult {
                    text: resp.text,
                    provider: self.provider.id,
                    model,
                    finish_reason: resp.finish_reason,
                    usage,
                    metadata: ResultMetadata {
                        warnings: resp.warnings,
                    },
                })
            }
            Err(e) => {
                self.record(CallRecord {
                    operation: Operation::Generate,
                    model: &model,
                    started,
                    usage: TokenUsage::default(),
                    error: Some(&e),
                    prompt_length,
                    response_length: 0,
                    annotations: &annotations,
                });
                Err(e)
            }
        }
    }

    /// Multi-turn completion.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CallOptions,
        signal: Option<&AbortSignal>,
    ) -> Result<ChatResult, AiError> {
        let model = self.resolve_model(ModelCategory::Chat, options.model.as_deref());
        let request = GenerationRequest {
            messages: messages.to_vec(),
            settings: self.call_settings(options),
        };
        let annotations = annotations_from(&options.metadata);
        let handle = self.capability.language_model(&model);
        let started = Instant::now();
        let prompt_length = messages.iter().map(|m| m.content.chars().count()).sum();

        match self.run_abortable(handle.generate(&request), signal).await {
            Ok(resp) => {
                let usage = self.record(CallRecord {
                    operation: Operation::Chat,
                    model: &model,
                    started,
                    usage: resp.usage,
                    error: None,
                    prompt_length,
                    response_length: resp.text.chars().count(),
                    annotations: &annotations,
                });
                Ok(ChatResult {
                    text: resp.text,
                    provider: self.provider.id,
                    model,
                    finish_reason: resp.finish_reason,
                    usage,
                    metadata: ResultMetadata {
                        warnings: resp.warnings,
                    },
                    messages: (!resp.messages.is_empty()).then_some(resp.messages),
                    tool_calls: (!resp.tool_calls.is_empty()).then_some(resp.tool_calls),
                })
            }
            Err(e) => {
                self.record(CallRecord {
                    operation: Operation::Chat,
                    model: &model,
                    started,
                    usage: TokenUsage::default(),
                    error: Some(&e),
                    prompt_length,
                    response_length: 0,
                    annotations: &annotations,
                });
                Err(e)
            }
        }
    }

    /// Token stream. Fails before any transport call when the provider
    /// cannot stream.
    pub async fn stream_text(
        &self,
        prompt: &str,
        options: &CallOptions,
        signal: Option<&AbortSignal>,
    ) -> Result<TextStream, AiError> {
        if !self.capability.supports_streaming() {
            return Err(AiError::Unsupported {
                provider: self.provider.id,
                capability: CapabilityKind::Streaming,
            });
        }
        let model = self.resolve_model(ModelCategory::Streaming, options.model.as_deref());
        let request = GenerationRequest::prompt(prompt, self.call_settings(options));
        let annotations = annotations_from(&options.metadata);
        let handle = self.capability.language_model(&model);
        let started = Instant::now();
        let prompt_length = prompt.chars().count();

        let finalizer = StreamFinalizer {
            health: self.health.clone(),
            usage: self.usage.clone(),
            analytics: self.config.analytics.clone(),
            provider: self.provider.id,
            model: model.clone(),
            started,
            prompt_length,
            annotations,
        };

        // The whole stream, opening included, shares one abort deadline.
        let mut abort = compose(self.timeout_ms(), signal);
        if let Some(reason) = abort.caller_aborted() {
            let err = AiError::Aborted(reason);
            finalizer.finish(0, Some(&err));
            return Err(err);
        }
        let opened = tokio::select! {
            biased;
            result = handle.stream(&request) => result,
            reason = &mut abort => Err(AiError::Aborted(reason)),
        };
        match opened {
            Ok(tokens) => {
                debug!(provider = %self.provider.id, model = %model, "stream opened");
                Ok(TextStream {
                    inner: Some(tokens),
                    abort,
                    finalizer: Some(finalizer),
                    provider: self.provider.id,
                    model,
                    index: 0,
                    response_length: 0,
                    done: false,
                })
            }
            Err(e) => {
                finalizer.finish(0, Some(&e));
                Err(e)
            }
        }
    }

    /// Embeddings for one string or a batch.
    pub async fn embed(
        &self,
        request: &EmbeddingRequest,
        options: &CallOptions,
        signal: Option<&AbortSignal>,
    ) -> Result<EmbeddingResult, AiError> {
        let model = self.resolve_model(ModelCategory::Embedding, options.model.as_deref());
        let handle = self
            .capability
            .embedding_model(&model)
            .ok_or(AiError::Unsupported {
                provider: self.provider.id,
                capability: CapabilityKind::Embeddings,
            })?;
        let annotations = annotations_from(&options.metadata);
        let started = Instant::now();
        let prompt_length = request.input.char_len();

        match self.run_abortable(handle.embed(request), signal).await {
            Ok(resp) => {
                let usage = self.record(CallRecord {
                    operation: Operation::Embed,
                    model: &model,
                    started,
                    usage: resp.usage,
                    error: None,
                    prompt_length,
                    response_length: 0,
                    annotations: &annotations,
                });
                let vector = resp.vectors.first().cloned().unwrap_or_default();
                let vectors = match request.input {
                    EmbeddingInput::Batch(_) => Some(resp.vectors),
                    EmbeddingInput::Single(_) => None,
                };
                Ok(EmbeddingResult {
                    vector,
                    vectors,
                    provider: self.provider.id,
                    model,
                    usage,
                })
            }
            Err(e) => {
                self.record(CallRecord {
                    operation: Operation::Embed,
                    model: &model,
                    started,
                    usage: TokenUsage::default(),
                    error: Some(&e),
                    prompt_length,
                    response_length: 0,
                    annotations: &annotations,
                });
                Err(e)
            }
        }
    }
}

// ─────────────────────────────────────────────
// TextStream
// ─────────────────────────────────────────────

/// Bookkeeping that runs exactly once when a stream ends, however it ends.
struct StreamFinalizer {
    health: Arc<HealthMonitor>,
    usage: Arc<UsageEmitter>,
    analytics: AnalyticsConfig,
    provider: ProviderId,
    model: String,
    started: Instant,
    prompt_length: usize,
    annotations: std::collections::BTreeMap<String, Annotation>,
}

impl StreamFinalizer {
    fn finish(self, response_length: usize, error: Option<&AiError>) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        match error {
            None => self.health.mark_success(self.provider, Some(duration_ms)),
            Some(e) => self.health.mark_failure(self.provider, e.to_string()),
        }
        self.usage.emit(
            &self.analytics,
            UsageEvent {
                metrics: UsageMetrics {
                    provider: self.provider,
                    model: self.model,
                    success: error.is_none(),
                    prompt_tokens: None,
                    completion_tokens: None,
                    total_tokens: None,
                    duration_ms,
                    timestamp: Utc::now(),
                    error_code: error.and_then(AiError::code),
                    error_message: error.map(ToString::to_string),
                    annotations: self.annotations,
                },
                operation: Operation::Stream,
                prompt_length: self.prompt_length,
                response_length,
            },
        );
    }
}

/// Lazy, single-pass stream of [`StreamChunk`]s.
///
/// Normal completion ends with a `done` chunk carrying an empty token. An
/// abort or transport error is yielded once as `Err`, after which the
/// stream ends. Usage and health are recorded exactly once: on completion,
/// on error, or when the stream is dropped early.
pub struct TextStream {
    inner: Option<TokenStream>,
    abort: ComposedAbort,
    finalizer: Option<StreamFinalizer>,
    provider: ProviderId,
    model: String,
    index: usize,
    response_length: usize,
    done: bool,
}

impl std::fmt::Debug for TextStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextStream")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("index", &self.index)
            .field("done", &self.done)
            .finish()
    }
}

impl TextStream {
    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Characters yielded so far.
    pub fn response_length(&self) -> usize {
        self.response_length
    }

    fn terminate(&mut self, error: Option<&AiError>) {
        self.done = true;
        self.inner = None;
        if let Some(finalizer) = self.finalizer.take() {
            finalizer.finish(self.response_length, error);
        }
    }

    fn chunk(&self, token: String, done: bool) -> StreamChunk {
        StreamChunk {
            token,
            index: self.index,
            provider: self.provider,
            model: self.model.clone(),
            timestamp: Utc::now(),
            done,
        }
    }
}

impl Stream for TextStream {
    type Item = Result<StreamChunk, AiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        if let Poll::Ready(reason) = Pin::new(&mut this.abort).poll(cx) {
            let err = AiError::Aborted(reason);
            this.terminate(Some(&err));
            return Poll::Ready(Some(Err(err)));
        }

        let Some(inner) = this.inner.as_mut() else {
            this.terminate(None);
            return Poll::Ready(None);
        };

        match inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(token))) => {
                this.response_length += token.chars().count();
                let chunk = this.chunk(token, false);
                this.index += 1;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.terminate(Some(&e));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                let chunk = this.chunk(String::new(), true);
                this.terminate(None);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TextStream {
    fn drop(&mut self) {
        if self.finalizer.is_some() {
            debug!(provider = %self.provider, "stream dropped before completion");
            self.terminate(None);
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::AbortController;
    use crate::traits::{EmbeddingResponse, GenerationResponse, Transport};
    use aimux_core::config::{ConfigStore, Env, EnvSource, SecretResolver};
    use aimux_core::types::HealthStatus;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted transport for client tests.
    struct FakeTransport {
        id: ProviderId,
        reply: Result<String, AiError>,
        tokens: Vec<&'static str>,
        delay: Duration,
        seen: Mutex<Vec<(String, GenerationRequest)>>,
    }

    impl FakeTransport {
        fn ok(id: ProviderId, text: &str) -> Self {
            FakeTransport {
                id,
                reply: Ok(text.to_string()),
                tokens: vec!["a", "b", "c", "d"],
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn provider(&self) -> ProviderId {
            self.id
        }
        fn kind(&self) -> &str {
            "fake"
        }
        async fn generate(
            &self,
            model: &str,
            request: &GenerationRequest,
        ) -> Result<GenerationResponse, AiError> {
            self.seen.lock().unwrap().push((model.to_string(), request.clone()));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let text = self.reply.clone()?;
            Ok(GenerationResponse {
                text,
                finish_reason: Some("stop".into()),
                usage: TokenUsage {
                    prompt_tokens: Some(2),
                    completion_tokens: Some(3),
                    total_tokens: None,
                },
                ..Default::default()
            })
        }
        async fn stream(&self, _model: &str, _req: &GenerationRequest) -> Result<TokenStream, AiError> {
            let items: Vec<Result<String, AiError>> =
                self.tokens.iter().map(|t| Ok(t.to_string())).collect();
            Ok(futures::stream::iter(items).boxed())
        }
        async fn embed(
            &self,
            _model: &str,
            request: &EmbeddingRequest,
        ) -> Result<EmbeddingResponse, AiError> {
            Ok(EmbeddingResponse {
                vectors: request
                    .input
                    .values()
                    .iter()
                    .map(|v| vec![v.len() as f32, 1.0])
                    .collect(),
                usage: TokenUsage::default(),
            })
        }
    }

    struct Fixture {
        client: ProviderClient,
        health: Arc<HealthMonitor>,
        events: Arc<Mutex<Vec<UsageEvent>>>,
        transport: Arc<FakeTransport>,
    }

    fn fixture_with(pairs: &[(&str, &str)], transport: FakeTransport, streaming: bool) -> Fixture {
        let mut env = Env::from_pairs([("OPENAI_API_KEY", "sk-test")]);
        for (k, v) in pairs {
            env.set(*k, *v);
        }
        let store = Arc::new(ConfigStore::new(
            EnvSource::Static(env),
            SecretResolver::with_secrets_dir("/nonexistent"),
        ));
        let config = store.get().unwrap();
        let health = Arc::new(HealthMonitor::new(store));
        let usage = Arc::new(UsageEmitter::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = usage.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        let transport = Arc::new(transport);
        let shared: Arc<dyn Transport> = transport.clone();
        let binder: Binder =
            Arc::new(move |_cfg: &ProviderConfig| Ok(Capability::custom(shared.clone(), streaming, true)));
        let client =
            ProviderClient::new(config, ProviderId::OpenAi, &binder, health.clone(), usage).unwrap();
        Fixture {
            client,
            health,
            events,
            transport,
        }
    }

    fn fixture(transport: FakeTransport) -> Fixture {
        fixture_with(&[], transport, true)
    }

    #[test]
    fn test_effective_max_tokens() {
        assert_eq!(effective_max_tokens(10_000, Some(4_000)), 4_000);
        assert_eq!(effective_max_tokens(100, Some(4_000)), 100);
        assert_eq!(effective_max_tokens(100, None), 100);
    }

    #[test]
    fn test_resolve_model_precedence() {
        let f = fixture_with(&[("AI_OPENAI_MODEL_CHAT", "gpt-chat")], FakeTransport::ok(ProviderId::OpenAi, "x"), true);
        assert_eq!(f.client.resolve_model(ModelCategory::Chat, Some("explicit")), "explicit");
        assert_eq!(f.client.resolve_model(ModelCategory::Chat, None), "gpt-chat");
        assert_eq!(f.client.resolve_model(ModelCategory::Default, None), "gpt-4.1-mini");
        assert_eq!(
            f.client.resolve_model(ModelCategory::Embedding, Some("  ")),
            "text-embedding-3-large"
        );
    }

    #[test]
    fn test_call_settings_clamp_and_defaults() {
        let f = fixture_with(
            &[("AI_OPENAI_MAX_TOKENS", "1000"), ("AI_TEMPERATURE", "0.7")],
            FakeTransport::ok(ProviderId::OpenAi, "x"),
            true,
        );
        let settings = f.client.call_settings(&CallOptions {
            max_tokens: Some(5000),
            top_p: Some(0.9),
            ..Default::default()
        });
        assert_eq!(settings.max_tokens, 1000);
        assert_eq!(settings.temperature, 0.7);
        assert_eq!(settings.top_p, Some(0.9));

        let settings = f.client.call_settings(&CallOptions {
            max_tokens: Some(10),
            temperature: Some(0.0),
            ..Default::default()
        });
        assert_eq!(settings.max_tokens, 10);
        assert_eq!(settings.temperature, 0.0);
    }

    #[tokio::test]
    async fn test_generate_success_records_usage_and_health() {
        let f = fixture(FakeTransport::ok(ProviderId::OpenAi, "pong"));
        let mut options = CallOptions::default();
        options
            .metadata
            .insert("tenant".into(), serde_json::json!("acme"));

        let result = f.client.generate_text("ping", &options, None).await.unwrap();
        assert_eq!(result.text, "pong");
        assert_eq!(result.provider, ProviderId::OpenAi);
        assert_eq!(result.model, "gpt-4.1-mini");
        assert_eq!(result.usage.total_tokens, Some(5));
        assert!(result.usage.success);

        let events = f.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].operation, Operation::Generate);
        assert_eq!(events[0].prompt_length, 4);
        assert_eq!(events[0].response_length, 4);
        assert_eq!(
            events[0].metrics.annotations.get("tenant"),
            Some(&Annotation::Text("acme".into()))
        );
        assert_eq!(f.client.get_health().status, HealthStatus::Healthy);

        let seen = f.transport.seen.lock().unwrap();
        assert_eq!(seen[0].1.messages, vec![ChatMessage::user("ping")]);
    }

    #[tokio::test]
    async fn test_generate_failure_marks_health() {
        let mut t = FakeTransport::ok(ProviderId::OpenAi, "");
        t.reply = Err(AiError::transport(ProviderId::OpenAi, "rate limited"));
        let f = fixture(t);

        let err = f
            .client
            .generate_text("ping", &CallOptions::default(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));

        let health = f.health.snapshot(ProviderId::OpenAi);
        assert_eq!(health.consecutive_failures, 1);
        assert_eq!(health.status, HealthStatus::Degraded);

        let events = f.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].metrics.success);
        assert!(events[0]
            .metrics
            .error_message
            .as_deref()
            .unwrap()
            .contains("rate limited"));
    }

    #[tokio::test]
    async fn test_generate_timeout() {
        let mut t = FakeTransport::ok(ProviderId::OpenAi, "late");
        t.delay = Duration::from_millis(500);
        let f = fixture_with(&[("AI_OPENAI_TIMEOUT_MS", "30")], t, true);

        let err = f
            .client
            .generate_text("ping", &CallOptions::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "AI provider request exceeded 30ms");
        assert_eq!(f.health.snapshot(ProviderId::OpenAi).consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_generate_caller_abort() {
        let mut t = FakeTransport::ok(ProviderId::OpenAi, "late");
        t.delay = Duration::from_millis(500);
        let f = fixture(t);
        let controller = AbortController::new();
        let signal = controller.signal();

        let options = CallOptions::default();
        let call = f.client.generate_text("ping", &options, Some(&signal));
        let abort = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            controller.abort("stop");
        };
        let (result, _) = tokio::join!(call, abort);
        assert_eq!(result.unwrap_err().to_string(), "AI request aborted by caller");
    }

    #[tokio::test]
    async fn test_chat_prompt_length_and_messages() {
        let f = fixture(FakeTransport::ok(ProviderId::OpenAi, "hi!"));
        let messages = vec![ChatMessage::system("abc"), ChatMessage::user("de")];
        let result = f
            .client
            .chat(&messages, &CallOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(result.text, "hi!");
        assert!(result.tool_calls.is_none());
        let events = f.events.lock().unwrap();
        assert_eq!(events[0].operation, Operation::Chat);
        assert_eq!(events[0].prompt_length, 5);
    }

    #[tokio::test]
    async fn test_stream_yields_tokens_then_done() {
        let f = fixture(FakeTransport::ok(ProviderId::OpenAi, ""));
        let stream = f
            .client
            .stream_text("go", &CallOptions::default(), None)
            .await
            .unwrap();
        let chunks: Vec<StreamChunk> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].token, "a");
        assert_eq!(chunks[3].index, 3);
        assert!(chunks[4].done);
        assert_eq!(chunks[4].token, "");
        assert_eq!(chunks[4].model, "gpt-4.1-mini");

        let events = f.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].operation, Operation::Stream);
        assert_eq!(events[0].response_length, 4);
        assert!(events[0].metrics.success);
    }

    #[tokio::test]
    async fn test_stream_abort_after_two_tokens() {
        let f = fixture(FakeTransport::ok(ProviderId::OpenAi, ""));
        let controller = AbortController::new();
        let signal = controller.signal();
        let mut stream = f
            .client
            .stream_text("go", &CallOptions::default(), Some(&signal))
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().token, "a");
        assert_eq!(stream.next().await.unwrap().unwrap().token, "b");
        controller.abort("enough");

        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "AI request aborted by caller");
        assert!(stream.next().await.is_none());
        drop(stream);

        let events = f.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].response_length, 2);
        assert!(!events[0].metrics.success);
    }

    #[tokio::test]
    async fn test_stream_dropped_early_still_records() {
        let f = fixture(FakeTransport::ok(ProviderId::OpenAi, ""));
        let mut stream = f
            .client
            .stream_text("go", &CallOptions::default(), None)
            .await
            .unwrap();
        stream.next().await.unwrap().unwrap();
        drop(stream);

        let events = f.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].response_length, 1);
    }

    #[tokio::test]
    async fn test_stream_unsupported_fails_before_call() {
        let f = fixture_with(&[], FakeTransport::ok(ProviderId::OpenAi, ""), false);
        let err = f
            .client
            .stream_text("go", &CallOptions::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AiError::Unsupported {
                capability: CapabilityKind::Streaming,
                ..
            }
        ));
        assert!(f.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embed_batch_and_single() {
        let f = fixture(FakeTransport::ok(ProviderId::OpenAi, ""));
        let batch = EmbeddingRequest::new(vec!["a".to_string(), "bb".to_string(), "ccc".to_string()]);
        let result = f
            .client
            .embed(&batch, &CallOptions::default(), None)
            .await
            .unwrap();
        let vectors = result.vectors.clone().unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(result.vector, vectors[0]);
        assert_eq!(result.model, "text-embedding-3-large");

        let single = f
            .client
            .embed(&EmbeddingRequest::new("abcd"), &CallOptions::default(), None)
            .await
            .unwrap();
        assert!(single.vectors.is_none());
        assert_eq!(single.vector, vec![4.0, 1.0]);

        let events = f.events.lock().unwrap();
        assert_eq!(events[0].prompt_length, 6);
        assert_eq!(events[0].response_length, 0);
    }
}
