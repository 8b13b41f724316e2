//! AI service: the fallback facade callers use.
//!
//! Each operation walks a candidate chain: the preferred provider first,
//! then the rest of the configured fallback order. Disabled providers are
//! skipped, and so are unhealthy ones while monitoring is on (unless they
//! are the only candidate). The first success wins; when the chain runs out
//! the last error is returned.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use aimux_core::config::{ensure_fallback_order, AiConfig};
use aimux_core::error::AiError;
use aimux_core::listeners::Subscription;
use aimux_core::types::{
    CallOptions, ChatMessage, ChatResult, EmbeddingRequest, EmbeddingResult, HealthStatus,
    ProviderHealth, ProviderId, TextResult, UsageEvent,
};
use aimux_providers::cancel::AbortSignal;
use aimux_providers::client::{ProviderClient, TextStream};
use aimux_providers::registry::enablement_hint;

use crate::context::AiRuntimeContext;

/// Usage callback attached for the lifetime of one service.
pub type UsageListener = Arc<dyn Fn(&UsageEvent) + Send + Sync>;

/// How a service is set up.
#[derive(Clone, Default)]
pub struct ServiceOptions {
    /// Preferred provider; the configured default when unset.
    pub provider: Option<ProviderId>,
    /// Only ever try the preferred provider.
    pub disable_fallback: bool,
    pub on_usage: Option<UsageListener>,
}

impl std::fmt::Debug for ServiceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceOptions")
            .field("provider", &self.provider)
            .field("disable_fallback", &self.disable_fallback)
            .field("on_usage", &self.on_usage.is_some())
            .finish()
    }
}

impl From<ProviderId> for ServiceOptions {
    fn from(provider: ProviderId) -> Self {
        ServiceOptions {
            provider: Some(provider),
            ..Default::default()
        }
    }
}

/// Fallback-aware entry point for generation, chat, streaming and embeddings.
pub struct AiService {
    context: Arc<AiRuntimeContext>,
    current: Mutex<Option<ProviderId>>,
    allow_fallback: AtomicBool,
    usage_subscription: Mutex<Option<Subscription>>,
}

impl std::fmt::Debug for AiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiService")
            .field("current", &self.current_provider())
            .field("allow_fallback", &self.allow_fallback.load(Ordering::Relaxed))
            .finish()
    }
}

impl AiService {
    pub fn new(context: Arc<AiRuntimeContext>, options: impl Into<ServiceOptions>) -> Self {
        let options = options.into();
        let usage_subscription = options
            .on_usage
            .map(|listener| context.on_usage(move |event| listener(event)));
        AiService {
            context,
            current: Mutex::new(options.provider),
            allow_fallback: AtomicBool::new(!options.disable_fallback),
            usage_subscription: Mutex::new(usage_subscription),
        }
    }

    pub fn context(&self) -> &Arc<AiRuntimeContext> {
        &self.context
    }

    /// Provider the next call starts from, if one has been chosen.
    pub fn current_provider(&self) -> Option<ProviderId> {
        match self.current.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_current(&self, id: ProviderId) {
        match self.current.lock() {
            Ok(mut guard) => *guard = Some(id),
            Err(poisoned) => *poisoned.into_inner() = Some(id),
        }
    }

    /// Health snapshots for every known provider.
    pub fn get_provider_health(&self) -> Vec<ProviderHealth> {
        self.context.get_all_provider_health_status()
    }

    /// Make `id` the preferred provider for subsequent calls.
    pub fn switch_provider(&self, id: ProviderId, allow_fallback: bool) -> Result<(), AiError> {
        let config = self.context.get_config(false)?;
        if let Some(provider) = config.provider(id).filter(|p| !p.enabled) {
            return Err(AiError::ProviderDisabled {
                provider: id,
                hint: enablement_hint(provider),
            });
        }
        self.set_current(id);
        self.allow_fallback.store(allow_fallback, Ordering::Relaxed);
        info!(provider = %id, allow_fallback, "AI provider switched");
        Ok(())
    }

    /// Detach this service's usage listener.
    pub fn dispose(&self) {
        let subscription = match self.usage_subscription.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }

    // ── Chain resolution ──

    /// Candidate providers for one call, plus whether falling back is allowed.
    fn candidates(&self, config: &AiConfig, options: &CallOptions) -> (Vec<ProviderId>, bool) {
        let pinned = options.provider.is_some();
        let preferred = options
            .provider
            .or_else(|| self.current_provider())
            .unwrap_or(config.default_provider);
        let allow_fallback = config.enable_fallback
            && self.allow_fallback.load(Ordering::Relaxed)
            && !options.disable_fallback.unwrap_or(false)
            && !pinned;

        if allow_fallback {
            (ensure_fallback_order(preferred, &config.fallback_order), true)
        } else {
            (vec![preferred], false)
        }
    }

    /// Run `operation` against each candidate until one succeeds.
    async fn execute<T, F, Fut>(
        &self,
        operation: &'static str,
        options: &CallOptions,
        signal: Option<&AbortSignal>,
        run: F,
    ) -> Result<T, AiError>
    where
        F: Fn(Arc<ProviderClient>) -> Fut,
        Fut: Future<Output = Result<T, AiError>>,
    {
        let config = self.context.get_config(false)?;
        if !config.enable_features {
            return Err(AiError::FeaturesDisabled);
        }
        let (chain, allow_fallback) = self.candidates(&config, options);
        let sole = chain.len() == 1;
        let mut last_error: Option<AiError> = None;

        for id in chain {
            if !config.is_provider_enabled(id) {
                debug!(provider = %id, operation, "skipping disabled provider");
                continue;
            }
            if config.monitoring.enabled && !sole {
                let health = self.context.get_provider_health_status(id);
                if health.status == HealthStatus::Unhealthy {
                    debug!(provider = %id, operation, "skipping unhealthy provider");
                    continue;
                }
            }

            let attempt = match self.context.get_provider_client(id) {
                Ok(client) => run(client).await,
                Err(e) => Err(e),
            };
            match attempt {
                Ok(value) => {
                    self.set_current(id);
                    return Ok(value);
                }
                Err(e) => {
                    if !allow_fallback || signal.is_some_and(AbortSignal::is_aborted) {
                        return Err(e);
                    }
                    warn!(provider = %id, operation, error = %e, "provider failed; trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(AiError::NoProvidersAvailable))
    }

    // ── Operations ──

    pub async fn generate_text(
        &self,
        prompt: &str,
        options: &CallOptions,
        signal: Option<&AbortSignal>,
    ) -> Result<TextResult, AiError> {
        self.execute("generate", options, signal, |client| async move {
            client.generate_text(prompt, options, signal).await
        })
        .await
    }

    /// Open a token stream. Fallback covers opening the stream only; once
    /// tokens flow, errors surface through the stream itself.
    pub async fn stream_text(
        &self,
        prompt: &str,
        options: &CallOptions,
        signal: Option<&AbortSignal>,
    ) -> Result<TextStream, AiError> {
        let config = self.context.get_config(false)?;
        if config.enable_features && !config.enable_streaming {
            return Err(AiError::StreamingDisabled);
        }
        self.execute("stream", options, signal, |client| async move {
            client.stream_text(prompt, options, signal).await
        })
        .await
    }

    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CallOptions,
        signal: Option<&AbortSignal>,
    ) -> Result<ChatResult, AiError> {
        self.execute("chat", options, signal, |client| async move {
            client.chat(messages, options, signal).await
        })
        .await
    }

    pub async fn embed(
        &self,
        request: &EmbeddingRequest,
        options: &CallOptions,
        signal: Option<&AbortSignal>,
    ) -> Result<EmbeddingResult, AiError> {
        self.execute("embed", options, signal, |client| async move {
            client.embed(request, options, signal).await
        })
        .await
    }
}

impl Drop for AiService {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aimux_core::config::{ConfigStore, Env, EnvSource, ProviderConfig, SecretResolver};
    use aimux_core::error::CapabilityKind;
    use aimux_providers::cancel::AbortController;
    use aimux_providers::capability::{Binder, Capability};
    use aimux_providers::traits::{
        EmbeddingResponse, GenerationRequest, GenerationResponse, TokenStream, Transport,
    };
    use aimux_core::types::TokenUsage;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    /// Transport that answers with its provider name, or fails on demand.
    struct ScriptedTransport {
        id: ProviderId,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn provider(&self) -> ProviderId {
            self.id
        }
        fn kind(&self) -> &str {
            "scripted"
        }
        async fn generate(
            &self,
            _model: &str,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AiError::transport(self.id, "upstream unavailable"));
            }
            Ok(GenerationResponse {
                text: format!("hello from {}", self.id),
                finish_reason: Some("stop".into()),
                usage: TokenUsage::default(),
                ..Default::default()
            })
        }
        async fn stream(&self, _model: &str, _req: &GenerationRequest) -> Result<TokenStream, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AiError::transport(self.id, "upstream unavailable"));
            }
            let tokens = ["one ", "two ", "three ", "four "];
            Ok(futures::stream::iter(tokens.map(|t| Ok(t.to_string()))).boxed())
        }
        async fn embed(
            &self,
            _model: &str,
            request: &EmbeddingRequest,
        ) -> Result<EmbeddingResponse, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EmbeddingResponse {
                vectors: request
                    .input
                    .values()
                    .iter()
                    .enumerate()
                    .map(|(i, _)| vec![i as f32; 3])
                    .collect(),
                usage: TokenUsage::default(),
            })
        }
    }

    struct Harness {
        context: Arc<AiRuntimeContext>,
        calls: BTreeMap<ProviderId, Arc<AtomicUsize>>,
        events: Arc<Mutex<Vec<UsageEvent>>>,
    }

    impl Harness {
        fn calls(&self, id: ProviderId) -> usize {
            self.calls[&id].load(Ordering::SeqCst)
        }
    }

    /// OpenAI, Anthropic and Gateway enabled; `failing` providers error.
    fn harness(extra: &[(&str, &str)], failing: &[ProviderId]) -> Harness {
        let mut env = Env::from_pairs([
            ("OPENAI_API_KEY", "sk-test"),
            ("ANTHROPIC_API_KEY", "ak-test"),
            ("AI_GATEWAY_TOKEN", "gw-test"),
            ("AI_GATEWAY_URL", "https://gateway.example.com/v1"),
            ("AI_FALLBACK_ORDER", "openai,anthropic,gateway"),
        ]);
        for (k, v) in extra {
            env.set(*k, *v);
        }
        let store = Arc::new(ConfigStore::new(
            EnvSource::Static(env),
            SecretResolver::with_secrets_dir("/nonexistent"),
        ));

        let calls: BTreeMap<ProviderId, Arc<AtomicUsize>> = ProviderId::ALL
            .iter()
            .map(|id| (*id, Arc::new(AtomicUsize::new(0))))
            .collect();
        let failing = failing.to_vec();
        let counters = calls.clone();
        let binder: Binder = Arc::new(move |config: &ProviderConfig| {
            if !config.enabled {
                return Err(AiError::ProviderDisabled {
                    provider: config.id,
                    hint: String::new(),
                });
            }
            let transport = ScriptedTransport {
                id: config.id,
                fail: failing.contains(&config.id),
                calls: counters[&config.id].clone(),
            };
            let embeddings = config.id != ProviderId::Anthropic;
            Ok(Capability::custom(Arc::new(transport), true, embeddings))
        });

        let context = AiRuntimeContext::with_binder(store, binder);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = context.on_usage(move |e| sink.lock().unwrap().push(e.clone()));
        Harness {
            context,
            calls,
            events,
        }
    }

    fn service(h: &Harness) -> AiService {
        AiService::new(h.context.clone(), ServiceOptions::default())
    }

    fn trip(h: &Harness, id: ProviderId) {
        for _ in 0..3 {
            h.context.health().mark_failure(id, "down");
        }
        assert_eq!(
            h.context.get_provider_health_status(id).status,
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_successful_generation() {
        let h = harness(&[], &[]);
        let svc = service(&h);
        let result = svc
            .generate_text("ping", &CallOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(result.provider, ProviderId::OpenAi);
        assert!(!result.text.is_empty());

        let events = h.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].metrics.success);
        assert_eq!(svc.current_provider(), Some(ProviderId::OpenAi));
    }

    #[tokio::test]
    async fn test_chat_falls_back_on_failure() {
        let h = harness(&[], &[ProviderId::OpenAi]);
        let svc = service(&h);
        let result = svc
            .chat(&[ChatMessage::user("hi")], &CallOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(result.provider, ProviderId::Anthropic);
        assert_eq!(
            h.context
                .get_provider_health_status(ProviderId::OpenAi)
                .consecutive_failures,
            1
        );
        assert_eq!(svc.current_provider(), Some(ProviderId::Anthropic));
    }

    #[tokio::test]
    async fn test_no_fallback_rethrows_immediately() {
        let h = harness(&[], &[ProviderId::OpenAi]);
        let svc = AiService::new(
            h.context.clone(),
            ServiceOptions {
                disable_fallback: true,
                ..Default::default()
            },
        );
        let err = svc
            .generate_text("ping", &CallOptions::default(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("upstream unavailable"));
        assert_eq!(h.calls(ProviderId::Anthropic), 0);
    }

    #[tokio::test]
    async fn test_exhausted_chain_returns_last_error() {
        let h = harness(
            &[],
            &[ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Gateway],
        );
        let err = service(&h)
            .generate_text("ping", &CallOptions::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AiError::Transport {
                provider: ProviderId::Gateway,
                ..
            }
        ));
        assert_eq!(h.calls(ProviderId::OpenAi), 1);
        assert_eq!(h.calls(ProviderId::Anthropic), 1);
    }

    #[tokio::test]
    async fn test_skips_unhealthy_and_disabled() {
        // Chain: openai (unhealthy), google (disabled), anthropic (healthy).
        let h = harness(&[("AI_FALLBACK_ORDER", "openai,google,anthropic")], &[]);
        trip(&h, ProviderId::OpenAi);
        let result = service(&h)
            .generate_text("ping", &CallOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(result.provider, ProviderId::Anthropic);
        assert_eq!(h.calls(ProviderId::OpenAi), 0);
        assert_eq!(h.calls(ProviderId::Anthropic), 1);
    }

    #[tokio::test]
    async fn test_sole_unhealthy_candidate_is_still_tried() {
        let h = harness(&[], &[]);
        trip(&h, ProviderId::OpenAi);
        let options = CallOptions {
            provider: Some(ProviderId::OpenAi),
            ..Default::default()
        };
        let result = service(&h).generate_text("ping", &options, None).await.unwrap();
        assert_eq!(result.provider, ProviderId::OpenAi);
        assert_eq!(h.calls(ProviderId::OpenAi), 1);
    }

    #[tokio::test]
    async fn test_unhealthy_not_skipped_without_monitoring() {
        let h = harness(&[("AI_MONITORING_ENABLED", "false")], &[]);
        for _ in 0..5 {
            h.context.health().mark_failure(ProviderId::OpenAi, "down");
        }
        let result = service(&h)
            .generate_text("ping", &CallOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(result.provider, ProviderId::OpenAi);
    }

    #[tokio::test]
    async fn test_all_skipped_is_no_providers_available() {
        let h = harness(&[], &[]);
        let options = CallOptions {
            provider: Some(ProviderId::Google),
            ..Default::default()
        };
        let err = service(&h)
            .generate_text("ping", &options, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::NoProvidersAvailable));
    }

    #[tokio::test]
    async fn test_streaming_abort_after_two_tokens() {
        let h = harness(&[], &[]);
        let svc = service(&h);
        let controller = AbortController::new();
        let signal = controller.signal();
        let mut stream = svc
            .stream_text("count", &CallOptions::default(), Some(&signal))
            .await
            .unwrap();

        let mut tokens = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    tokens.push(chunk.token);
                    if tokens.len() == 2 {
                        controller.abort("user cancelled");
                    }
                }
                Err(e) => {
                    assert!(matches!(e, AiError::Aborted(_)));
                    break;
                }
            }
        }
        assert!(stream.next().await.is_none());
        drop(stream);

        assert_eq!(tokens, vec!["one ", "two "]);
        let events = h.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].response_length, "one two ".len());
    }

    #[tokio::test]
    async fn test_streaming_disabled() {
        let h = harness(&[("ENABLE_AI_STREAMING", "false")], &[]);
        let err = service(&h)
            .stream_text("x", &CallOptions::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::StreamingDisabled));
    }

    #[tokio::test]
    async fn test_features_disabled() {
        let h = harness(&[("ENABLE_AI_FEATURES", "false")], &[]);
        let err = service(&h)
            .generate_text("x", &CallOptions::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::FeaturesDisabled));
    }

    #[tokio::test]
    async fn test_embedding_batch() {
        let h = harness(&[], &[]);
        let request = EmbeddingRequest::new(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        let result = service(&h)
            .embed(&request, &CallOptions::default(), None)
            .await
            .unwrap();
        let vectors = result.vectors.clone().unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(result.vector, vectors[0]);
    }

    #[tokio::test]
    async fn test_embedding_skips_provider_without_support() {
        let h = harness(&[], &[]);
        let svc = AiService::new(h.context.clone(), ProviderId::Anthropic);
        let result = svc
            .embed(&EmbeddingRequest::new("x"), &CallOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(result.provider, ProviderId::OpenAi);

        let pinned = CallOptions {
            provider: Some(ProviderId::Anthropic),
            ..Default::default()
        };
        let err = svc
            .embed(&EmbeddingRequest::new("x"), &pinned, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AiError::Unsupported {
                capability: CapabilityKind::Embeddings,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_switch_provider() {
        let h = harness(&[], &[]);
        let svc = service(&h);
        svc.switch_provider(ProviderId::Gateway, false).unwrap();
        let result = svc
            .generate_text("ping", &CallOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(result.provider, ProviderId::Gateway);

        let err = svc.switch_provider(ProviderId::Google, true).unwrap_err();
        assert!(matches!(err, AiError::ProviderDisabled { .. }));
        assert_eq!(svc.current_provider(), Some(ProviderId::Gateway));
    }

    #[tokio::test]
    async fn test_on_usage_detached_on_dispose() {
        let h = harness(&[], &[]);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let svc = AiService::new(
            h.context.clone(),
            ServiceOptions {
                on_usage: Some(Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
                ..Default::default()
            },
        );
        svc.generate_text("a", &CallOptions::default(), None).await.unwrap();
        svc.dispose();
        svc.generate_text("b", &CallOptions::default(), None).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(h.events.lock().unwrap().len(), 2);
    }
}
