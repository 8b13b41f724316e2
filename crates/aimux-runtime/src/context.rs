//! Runtime context: the explicit owner of everything shared.
//!
//! One `AiRuntimeContext` holds the config store, the provider-client cache,
//! the health monitor and the usage emitter. Components receive it (or the
//! pieces they need) at construction; nothing lives in a global.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info};

use aimux_core::config::{AiConfig, AiConfigPatch, ConfigStore, ProviderConfig};
use aimux_core::error::{AiError, ConfigError};
use aimux_core::listeners::Subscription;
use aimux_core::types::{ProviderHealth, ProviderId, UsageEvent};
use aimux_providers::capability::{default_binder, Binder};
use aimux_providers::client::ProviderClient;
use aimux_providers::health::HealthMonitor;
use aimux_providers::usage::UsageEmitter;

type ClientCache = Mutex<BTreeMap<ProviderId, Arc<ProviderClient>>>;

pub struct AiRuntimeContext {
    store: Arc<ConfigStore>,
    health: Arc<HealthMonitor>,
    usage: Arc<UsageEmitter>,
    clients: Arc<ClientCache>,
    binder: Binder,
    config_subscription: Mutex<Option<Subscription>>,
}

impl std::fmt::Debug for AiRuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiRuntimeContext")
            .field("store", &self.store)
            .field("health", &self.health)
            .field("usage", &self.usage)
            .field("cached_clients", &self.lock_clients().len())
            .finish()
    }
}

fn lock(cache: &ClientCache) -> MutexGuard<'_, BTreeMap<ProviderId, Arc<ProviderClient>>> {
    match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl AiRuntimeContext {
    /// Context over `store` with the standard binder. Health monitoring is
    /// not scheduled until [`start_health_monitoring`](Self::start_health_monitoring).
    pub fn new(store: Arc<ConfigStore>) -> Arc<Self> {
        Self::with_binder(store, default_binder())
    }

    /// Context with a caller-supplied binder (custom transports, tests).
    pub fn with_binder(store: Arc<ConfigStore>, binder: Binder) -> Arc<Self> {
        let health = Arc::new(HealthMonitor::new(store.clone()));
        health.reset_all();
        let context = Arc::new(AiRuntimeContext {
            store: store.clone(),
            health,
            usage: Arc::new(UsageEmitter::new()),
            clients: Arc::new(Mutex::new(BTreeMap::new())),
            binder,
            config_subscription: Mutex::new(None),
        });

        // Invalidation runs in one synchronous pass inside the listener.
        let clients = Arc::downgrade(&context.clients);
        let health: Weak<HealthMonitor> = Arc::downgrade(&context.health);
        let subscription = store.on_change(move |config: &Arc<AiConfig>| {
            if let Some(clients) = clients.upgrade() {
                lock(&clients).clear();
            }
            if let Some(health) = health.upgrade() {
                health.reset_all();
                if health.is_requested() {
                    health.restart();
                }
            }
            debug!(
                default_provider = %config.default_provider,
                "AI configuration changed; clients and health reset"
            );
        });
        if let Ok(mut slot) = context.config_subscription.lock() {
            *slot = Some(subscription);
        }
        context
    }

    /// Context over the process environment, with monitoring scheduled when
    /// a tokio runtime is available.
    pub fn from_process_env() -> Arc<Self> {
        let context = Self::new(Arc::new(ConfigStore::from_process_env()));
        context.start_health_monitoring();
        context
    }

    fn lock_clients(&self) -> MutexGuard<'_, BTreeMap<ProviderId, Arc<ProviderClient>>> {
        lock(&self.clients)
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn usage(&self) -> &Arc<UsageEmitter> {
        &self.usage
    }

    // ── Clients ──

    /// The cached client for `id`, creating it on first use.
    ///
    /// A client is only cached while the snapshot it was built from is still
    /// current; a config change during construction triggers a rebuild.
    pub fn get_provider_client(&self, id: ProviderId) -> Result<Arc<ProviderClient>, AiError> {
        loop {
            // Resolve the snapshot first: a lazy build notifies listeners,
            // which take the client lock.
            let config = self.store.get()?;
            if let Some(client) = self.lock_clients().get(&id) {
                return Ok(client.clone());
            }
            let client = Arc::new(ProviderClient::new(
                config.clone(),
                id,
                &self.binder,
                self.health.clone(),
                self.usage.clone(),
            )?);
            let mut clients = self.lock_clients();
            let current = self.store.cached();
            if !current.is_some_and(|current| Arc::ptr_eq(&current, &config)) {
                debug!(provider = %id, "configuration changed while binding; rebuilding client");
                continue;
            }
            return Ok(clients.entry(id).or_insert(client).clone());
        }
    }

    /// Clients for every enabled provider in the fallback chain headed by
    /// `preferred`. Providers that fail to bind are left out.
    pub fn get_provider_clients_for_fallback(
        &self,
        preferred: Option<ProviderId>,
    ) -> Result<Vec<Arc<ProviderClient>>, AiError> {
        let chain = self.store.fallback_chain(preferred)?;
        Ok(chain
            .into_iter()
            .filter_map(|id| match self.get_provider_client(id) {
                Ok(client) => Some(client),
                Err(e) => {
                    debug!(provider = %id, error = %e, "provider skipped for fallback");
                    None
                }
            })
            .collect())
    }

    /// Number of cached clients.
    pub fn cached_client_count(&self) -> usize {
        self.lock_clients().len()
    }

    // ── Configuration surface ──

    pub fn get_config(&self, refresh: bool) -> Result<Arc<AiConfig>, ConfigError> {
        self.store.get_with(refresh)
    }

    pub fn refresh_config(&self) -> Result<Arc<AiConfig>, ConfigError> {
        self.store.refresh()
    }

    pub fn update_config(&self, patch: &AiConfigPatch) -> Result<Arc<AiConfig>, ConfigError> {
        self.store.update(patch)
    }

    /// Drop the cached snapshot and secrets, plus the clients built on them.
    pub fn reset_config_cache(&self) {
        self.store.reset();
        self.lock_clients().clear();
        self.health.reset_all();
    }

    pub fn on_config_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<AiConfig>) + Send + Sync + 'static,
    {
        self.store.on_change(listener)
    }

    pub fn is_enabled(&self) -> Result<bool, ConfigError> {
        self.store.is_enabled()
    }

    pub fn get_provider_config(&self, id: ProviderId) -> Result<Option<ProviderConfig>, ConfigError> {
        self.store.provider_config(id)
    }

    pub fn get_available_providers(&self, only_enabled: bool) -> Result<Vec<ProviderConfig>, ConfigError> {
        self.store.available_providers(only_enabled)
    }

    pub fn get_fallback_chain(&self, preferred: Option<ProviderId>) -> Result<Vec<ProviderId>, ConfigError> {
        self.store.fallback_chain(preferred)
    }

    // ── Health and usage surface ──

    pub fn get_provider_health_status(&self, id: ProviderId) -> ProviderHealth {
        self.health.snapshot(id)
    }

    pub fn get_all_provider_health_status(&self) -> Vec<ProviderHealth> {
        self.health.snapshot_all()
    }

    pub fn on_usage<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&UsageEvent) + Send + Sync + 'static,
    {
        self.usage.subscribe(listener)
    }

    pub fn remove_usage_listeners(&self) {
        self.usage.clear();
    }

    /// Schedule the periodic health sweep. Returns whether it was scheduled.
    pub fn start_health_monitoring(&self) -> bool {
        let started = self.health.start();
        if started {
            info!("AI health monitoring scheduled");
        }
        started
    }

    pub fn restart_health_monitoring(&self) -> bool {
        self.health.restart()
    }

    pub fn stop_health_monitoring(&self) {
        self.health.stop();
    }
}

impl Drop for AiRuntimeContext {
    fn drop(&mut self) {
        self.health.stop();
        let subscription = match self.config_subscription.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }
}
