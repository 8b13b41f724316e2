//! Cached configuration with change notification.
//!
//! The store owns the current [`AiConfig`] snapshot (behind an `Arc`), the
//! [`SecretResolver`] and the change listeners. Snapshots are built lazily
//! on first access. A failed build or update leaves the cached snapshot
//! untouched. Builds and updates are serialized, so concurrent first reads
//! build once. Listeners run after the new snapshot is installed and outside
//! every lock, so they may read the store again.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, info};

use super::builder::{build_config, ensure_fallback_order, finalize};
use super::env::Env;
use super::patch::AiConfigPatch;
use super::schema::{AiConfig, ProviderConfig};
use super::secrets::SecretResolver;
use crate::error::ConfigError;
use crate::listeners::{ListenerSet, Subscription};
use crate::types::ProviderId;

/// Where the store reads environment-style input from.
#[derive(Clone, Debug)]
pub enum EnvSource {
    /// Re-read `std::env` on every build.
    Process,
    /// A fixed snapshot.
    Static(Env),
}

impl EnvSource {
    fn load(&self) -> Env {
        match self {
            EnvSource::Process => Env::from_process(),
            EnvSource::Static(env) => env.clone(),
        }
    }
}

pub struct ConfigStore {
    source: RwLock<EnvSource>,
    secrets: SecretResolver,
    cached: RwLock<Option<Arc<AiConfig>>>,
    build: Mutex<()>,
    listeners: ListenerSet<Arc<AiConfig>>,
}

impl ConfigStore {
    pub fn new(source: EnvSource, secrets: SecretResolver) -> Self {
        ConfigStore {
            source: RwLock::new(source),
            secrets,
            cached: RwLock::new(None),
            build: Mutex::new(()),
            listeners: ListenerSet::new("config"),
        }
    }

    /// Store backed by the process environment.
    pub fn from_process_env() -> Self {
        Self::new(EnvSource::Process, SecretResolver::new())
    }

    /// Store backed by a fixed snapshot.
    pub fn with_env(env: Env) -> Self {
        Self::new(EnvSource::Static(env), SecretResolver::new())
    }

    /// Swap the input source and drop the secrets resolved from the old
    /// one. The cached snapshot stays until the next refresh.
    pub fn set_source(&self, source: EnvSource) {
        match self.source.write() {
            Ok(mut guard) => *guard = source,
            Err(poisoned) => *poisoned.into_inner() = source,
        }
        self.secrets.clear();
    }

    /// Current snapshot, building it on first access.
    pub fn get(&self) -> Result<Arc<AiConfig>, ConfigError> {
        if let Some(config) = self.cached() {
            return Ok(config);
        }
        let config = {
            let _build = self.lock_build();
            // Another caller may have built it while we waited.
            if let Some(config) = self.cached() {
                return Ok(config);
            }
            self.build_and_cache()?
        };
        self.listeners.emit(&config);
        Ok(config)
    }

    /// `get`, optionally forcing a rebuild.
    pub fn get_with(&self, refresh: bool) -> Result<Arc<AiConfig>, ConfigError> {
        if refresh {
            self.refresh()
        } else {
            self.get()
        }
    }

    /// Discard the cache and rebuild from the source.
    pub fn refresh(&self) -> Result<Arc<AiConfig>, ConfigError> {
        let config = {
            let _build = self.lock_build();
            self.build_and_cache()?
        };
        self.listeners.emit(&config);
        Ok(config)
    }

    /// Merge `patch` onto the current snapshot, re-derive and re-validate.
    pub fn update(&self, patch: &AiConfigPatch) -> Result<Arc<AiConfig>, ConfigError> {
        let fallback = self.get()?;
        let next = {
            let _build = self.lock_build();
            // Merge onto whatever is current once we hold the build lock.
            let current = self.cached().unwrap_or(fallback);
            let mut next = (*current).clone();
            patch.apply_to(&mut next);
            let next = Arc::new(finalize(next)?);
            self.write_cache(Some(next.clone()));
            next
        };
        info!("AI configuration updated");
        self.listeners.emit(&next);
        Ok(next)
    }

    /// Drop the cached snapshot and the secret cache. Does not notify.
    pub fn reset(&self) {
        let _build = self.lock_build();
        self.write_cache(None);
        self.secrets.clear();
        debug!("AI configuration cache reset");
    }

    /// Register a listener for every newly installed snapshot.
    ///
    /// The listener is not invoked with the current snapshot on registration.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<AiConfig>) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    pub fn is_enabled(&self) -> Result<bool, ConfigError> {
        Ok(self.get()?.enable_features)
    }

    pub fn provider_config(&self, id: ProviderId) -> Result<Option<ProviderConfig>, ConfigError> {
        Ok(self.get()?.provider(id).cloned())
    }

    /// Providers in canonical order, optionally only the enabled ones.
    pub fn available_providers(&self, only_enabled: bool) -> Result<Vec<ProviderConfig>, ConfigError> {
        let config = self.get()?;
        Ok(ProviderId::ALL
            .iter()
            .filter_map(|id| config.provider(*id))
            .filter(|p| !only_enabled || p.enabled)
            .cloned()
            .collect())
    }

    /// Fallback order headed by `preferred` (or the default provider),
    /// restricted to enabled providers.
    pub fn fallback_chain(&self, preferred: Option<ProviderId>) -> Result<Vec<ProviderId>, ConfigError> {
        let config = self.get()?;
        let head = preferred.unwrap_or(config.default_provider);
        Ok(ensure_fallback_order(head, &config.fallback_order)
            .into_iter()
            .filter(|id| config.is_provider_enabled(*id))
            .collect())
    }

    pub fn default_provider(&self) -> Result<ProviderId, ConfigError> {
        Ok(self.get()?.default_provider)
    }

    /// The cached snapshot, if one has been built.
    pub fn cached(&self) -> Option<Arc<AiConfig>> {
        match self.cached.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn lock_build(&self) -> MutexGuard<'_, ()> {
        match self.build.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Build from the source and cache the result. Callers hold the build
    /// lock and notify listeners after releasing it.
    fn build_and_cache(&self) -> Result<Arc<AiConfig>, ConfigError> {
        let env = match self.source.read() {
            Ok(guard) => guard.load(),
            Err(poisoned) => poisoned.into_inner().load(),
        };
        let config = Arc::new(build_config(&env, &self.secrets, None)?);
        self.write_cache(Some(config.clone()));
        Ok(config)
    }

    fn write_cache(&self, value: Option<Arc<AiConfig>>) {
        match self.cached.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("cached", &self.cached().is_some())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::patch::{MonitoringPatch, ProviderConfigPatch};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn store(pairs: &[(&str, &str)]) -> ConfigStore {
        ConfigStore::new(
            EnvSource::Static(Env::from_pairs(pairs.iter().copied())),
            SecretResolver::with_secrets_dir("/nonexistent"),
        )
    }

    #[test]
    fn test_get_is_lazy_and_cached() {
        let store = store(&[("OPENAI_API_KEY", "k")]);
        assert!(store.cached().is_none());
        let a = store.get().unwrap();
        let b = store.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_refresh_twice_gives_equal_but_independent_snapshots() {
        let store = store(&[("OPENAI_API_KEY", "k")]);
        let count = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let count = count.clone();
            store.on_change(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        let a = store.refresh().unwrap();
        let b = store.refresh().unwrap();
        assert_eq!(*a, *b);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_update_round_trips() {
        let store = store(&[("OPENAI_API_KEY", "k"), ("ANTHROPIC_API_KEY", "a")]);
        let before = store.get().unwrap();
        let after = store.update(&AiConfigPatch::default()).unwrap();
        assert_eq!(*before, *after);
    }

    #[test]
    fn test_failed_update_keeps_previous_snapshot() {
        let store = store(&[("OPENAI_API_KEY", "k")]);
        let before = store.get().unwrap();
        let notified = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let notified = notified.clone();
            store.on_change(move |_| {
                notified.fetch_add(1, Ordering::SeqCst);
            })
        };

        let bad = AiConfigPatch {
            fallback_order: Some(vec![ProviderId::OpenAi]),
            ..Default::default()
        };
        let err = store.update(&bad).unwrap_err();
        assert!(err.to_string().contains("Fallback order is missing provider"));
        assert!(Arc::ptr_eq(&before, &store.get().unwrap()));
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_update_notifies_with_new_snapshot() {
        let store = store(&[]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            store.on_change(move |cfg| seen.lock().unwrap().push(cfg.monitoring.unhealthy_threshold))
        };
        store.get().unwrap();
        store
            .update(&AiConfigPatch {
                monitoring: Some(MonitoringPatch {
                    unhealthy_threshold: Some(7),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![3, 7]);
    }

    #[test]
    fn test_listener_can_read_store_and_panics_are_isolated() {
        let store = Arc::new(store(&[]));
        let reads = Arc::new(AtomicUsize::new(0));
        let _bad = store.on_change(|_| panic!("listener bug"));
        let _good = {
            let weak = Arc::downgrade(&store);
            let reads = reads.clone();
            store.on_change(move |_| {
                if let Some(s) = weak.upgrade() {
                    assert!(s.cached().is_some());
                    reads.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        store.refresh().unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let store = store(&[]);
        let count = Arc::new(AtomicUsize::new(0));
        let sub = {
            let count = count.clone();
            store.on_change(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        store.refresh().unwrap();
        sub.unsubscribe();
        store.refresh().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_drops_cache_without_notifying() {
        let store = store(&[("OPENAI_API_KEY", "k")]);
        let count = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let count = count.clone();
            store.on_change(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        store.get().unwrap();
        store.reset();
        assert!(store.cached().is_none());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_source_applies_on_refresh() {
        let store = store(&[]);
        assert!(!store.get().unwrap().is_provider_enabled(ProviderId::Anthropic));
        store.set_source(EnvSource::Static(Env::from_pairs([("ANTHROPIC_API_KEY", "a")])));
        assert!(!store.get().unwrap().is_provider_enabled(ProviderId::Anthropic));
        assert!(store.refresh().unwrap().is_provider_enabled(ProviderId::Anthropic));
    }

    #[test]
    fn test_refresh_keeps_cached_secret_misses() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(
            EnvSource::Static(Env::new()),
            SecretResolver::with_secrets_dir(dir.path()),
        );
        assert!(!store.get().unwrap().is_provider_enabled(ProviderId::Anthropic));
        std::fs::write(dir.path().join("anthropic_api_key"), "a").unwrap();
        assert!(!store.refresh().unwrap().is_provider_enabled(ProviderId::Anthropic));
        store.reset();
        assert!(store.get().unwrap().is_provider_enabled(ProviderId::Anthropic));
    }

    #[test]
    fn test_concurrent_first_reads_build_once() {
        let store = Arc::new(store(&[("OPENAI_API_KEY", "k")]));
        let count = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let count = count.clone();
            store.on_change(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        let barrier = std::sync::Barrier::new(8);
        let snapshots: Vec<Arc<AiConfig>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        store.get().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(snapshots.iter().all(|s| Arc::ptr_eq(s, &snapshots[0])));
    }

    #[test]
    fn test_queries() {
        let store = store(&[
            ("OPENAI_API_KEY", "k"),
            ("GEMINI_API_KEY", "g"),
            ("DEFAULT_AI_PROVIDER", "google"),
        ]);
        assert!(store.is_enabled().unwrap());
        assert_eq!(store.default_provider().unwrap(), ProviderId::Google);
        assert_eq!(store.available_providers(true).unwrap().len(), 2);
        assert_eq!(store.available_providers(false).unwrap().len(), 5);
        assert_eq!(
            store.fallback_chain(None).unwrap(),
            vec![ProviderId::Google, ProviderId::OpenAi]
        );
        assert_eq!(
            store.fallback_chain(Some(ProviderId::OpenAi)).unwrap(),
            vec![ProviderId::OpenAi, ProviderId::Google]
        );
        assert_eq!(
            store
                .provider_config(ProviderId::OpenAi)
                .unwrap()
                .unwrap()
                .models
                .default,
            "gpt-4.1-mini"
        );
    }

    #[test]
    fn test_force_disable_through_update() {
        let store = store(&[("OPENAI_API_KEY", "k")]);
        let cfg = store
            .update(&AiConfigPatch::default().provider(
                ProviderId::OpenAi,
                ProviderConfigPatch {
                    force_disabled: Some(true),
                    ..Default::default()
                },
            ))
            .unwrap();
        assert!(!cfg.is_provider_enabled(ProviderId::OpenAi));
        assert!(store.fallback_chain(None).unwrap().is_empty());
    }
}
