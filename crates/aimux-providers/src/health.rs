//! Health monitor: per-provider state machine plus a periodic probe sweep.
//!
//! States move `healthy → degraded → unhealthy` on consecutive failures and
//! back on success. Recovery from `unhealthy` is lazy: a snapshot read past
//! the recovery window demotes the provider one step.
//!
//! The sweep runs on a spawned tokio task (same loop shape as a heartbeat:
//! `select!` over a sleep and a shutdown `Notify`). A sweep never overlaps
//! another one.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use aimux_core::config::{ConfigStore, MonitoringConfig};
use aimux_core::types::{HealthStatus, ProviderHealth, ProviderId};

use crate::registry::health_probe;

/// Lower bound on the sweep interval.
pub const MIN_HEALTH_CHECK_INTERVAL_MS: u64 = 10_000;

struct Scheduler {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Resets the single-flight flag when a sweep ends, even if cancelled.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct HealthMonitor {
    store: Arc<ConfigStore>,
    states: Mutex<BTreeMap<ProviderId, ProviderHealth>>,
    http: reqwest::Client,
    sweeping: AtomicBool,
    /// Set by `start`, cleared by `stop`. Survives policy changes that
    /// leave no task running.
    requested: AtomicBool,
    scheduler: Mutex<Option<Scheduler>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("tracked", &self.lock_states().len())
            .field("sweeping", &self.sweeping.load(Ordering::Acquire))
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

impl HealthMonitor {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        HealthMonitor {
            store,
            states: Mutex::new(BTreeMap::new()),
            http,
            sweeping: AtomicBool::new(false),
            requested: AtomicBool::new(false),
            scheduler: Mutex::new(None),
        }
    }

    fn lock_states(&self) -> MutexGuard<'_, BTreeMap<ProviderId, ProviderHealth>> {
        match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_scheduler(&self) -> MutexGuard<'_, Option<Scheduler>> {
        match self.scheduler.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current monitoring policy; defaults when the config cannot be built.
    fn policy(&self) -> MonitoringConfig {
        self.store
            .get()
            .map(|c| c.monitoring.clone())
            .unwrap_or_default()
    }

    fn update<F>(&self, id: ProviderId, f: F)
    where
        F: FnOnce(&mut ProviderHealth),
    {
        let mut states = self.lock_states();
        let entry = states.entry(id).or_insert_with(|| ProviderHealth::initial(id));
        f(entry);
    }

    // ── State transitions ──

    /// Record a successful call or probe.
    pub fn mark_success(&self, id: ProviderId, latency_ms: Option<u64>) {
        let policy = self.policy();
        self.update(id, |h| {
            h.status = HealthStatus::Healthy;
            h.consecutive_failures = 0;
            h.last_checked = Utc::now();
            h.latency_ms = if policy.track_latency { latency_ms } else { None };
            h.last_error = None;
        });
    }

    /// Record a failed call or probe.
    pub fn mark_failure(&self, id: ProviderId, error: impl Into<String>) {
        let policy = self.policy();
        let error = error.into();
        self.update(id, |h| {
            h.last_checked = Utc::now();
            h.consecutive_failures = h.consecutive_failures.saturating_add(1);
            h.last_error = Some(error);
            h.status = if !policy.enabled {
                HealthStatus::Degraded
            } else if h.consecutive_failures >= policy.unhealthy_threshold {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Degraded
            };
        });
        let failures = self.lock_states().get(&id).map(|h| h.consecutive_failures);
        debug!(provider = %id, failures = ?failures, "provider failure recorded");
    }

    /// Mark a provider degraded without counting a failure.
    pub fn mark_degraded(&self, id: ProviderId, reason: impl Into<String>) {
        let reason = reason.into();
        self.update(id, |h| {
            h.status = HealthStatus::Degraded;
            h.last_checked = Utc::now();
            h.last_error = Some(reason);
        });
    }

    /// Forget `id`'s history; it reads as healthy again.
    pub fn reset(&self, id: ProviderId) {
        self.lock_states().insert(id, ProviderHealth::initial(id));
    }

    /// Reset every known provider.
    pub fn reset_all(&self) {
        let mut states = self.lock_states();
        states.clear();
        for id in ProviderId::ALL {
            states.insert(id, ProviderHealth::initial(id));
        }
    }

    // ── Snapshots ──

    /// Copy of `id`'s health after applying the recovery window.
    pub fn snapshot(&self, id: ProviderId) -> ProviderHealth {
        let policy = self.policy();
        let mut states = self.lock_states();
        let entry = states.entry(id).or_insert_with(|| ProviderHealth::initial(id));
        apply_recovery_window(entry, &policy);
        entry.clone()
    }

    /// Stored record for `id`, without the recovery window.
    fn record(&self, id: ProviderId) -> ProviderHealth {
        self.lock_states()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| ProviderHealth::initial(id))
    }

    /// Snapshots for every known provider, in canonical order.
    pub fn snapshot_all(&self) -> Vec<ProviderHealth> {
        ProviderId::ALL.iter().map(|id| self.snapshot(*id)).collect()
    }

    // ── Probing ──

    /// Probe one provider and record the outcome. Returns the stored
    /// record; the recovery window applies only to explicit reads.
    pub async fn check_provider(&self, id: ProviderId) -> ProviderHealth {
        let config = match self.store.get() {
            Ok(config) => config,
            Err(e) => {
                warn!(provider = %id, error = %e, "health check skipped: invalid configuration");
                return self.record(id);
            }
        };
        let Some(provider) = config.provider(id) else {
            return self.record(id);
        };
        if !provider.enabled {
            self.mark_degraded(id, "provider not enabled");
            return self.record(id);
        }

        let Some(probe) = health_probe(provider) else {
            // Nothing to probe (CLI mode); treat as reachable.
            self.mark_success(id, None);
            return self.record(id);
        };

        let timeout_ms = provider
            .request_timeout_ms
            .unwrap_or(config.request_timeout_ms);
        let mut request = self
            .http
            .get(&probe.url)
            .timeout(Duration::from_millis(timeout_ms));
        for (key, value) in &probe.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let started = Instant::now();
        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                self.mark_success(id, Some(started.elapsed().as_millis() as u64));
            }
            Ok(resp) => {
                self.mark_failure(
                    id,
                    format!("Health check failed with status {}", resp.status().as_u16()),
                );
            }
            Err(e) if e.is_timeout() => {
                self.mark_failure(
                    id,
                    format!("AI provider health check timed out after {}ms", timeout_ms),
                );
            }
            Err(e) => self.mark_failure(id, e.to_string()),
        }
        self.record(id)
    }

    /// Probe every known provider in order. Returns `false` without doing
    /// anything when a sweep is already running or monitoring is off.
    pub async fn run_sweep(&self) -> bool {
        if !self.policy().enabled {
            return false;
        }
        if self.sweeping.swap(true, Ordering::AcqRel) {
            debug!("health sweep already in flight; skipping");
            return false;
        }
        let _guard = SweepGuard(&self.sweeping);

        for id in ProviderId::ALL {
            let health = self.check_provider(id).await;
            debug!(provider = %id, status = %health.status, "health check complete");
        }
        true
    }

    pub fn sweep_in_progress(&self) -> bool {
        self.sweeping.load(Ordering::Acquire)
    }

    // ── Scheduling ──

    /// Request the periodic sweep and (re)schedule it. The first sweep runs
    /// immediately.
    ///
    /// Returns `false` when monitoring is disabled or no tokio runtime is
    /// available. The request stands either way, so [`restart`](Self::restart)
    /// after a policy change schedules the sweep once monitoring is enabled.
    pub fn start(self: &Arc<Self>) -> bool {
        self.requested.store(true, Ordering::Release);
        self.schedule()
    }

    fn schedule(self: &Arc<Self>) -> bool {
        self.cancel();
        let policy = self.policy();
        if !policy.enabled {
            debug!("health monitoring disabled");
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("no tokio runtime; health monitoring not scheduled");
            return false;
        };

        let interval = Duration::from_millis(
            policy
                .health_check_interval_ms
                .max(MIN_HEALTH_CHECK_INTERVAL_MS),
        );
        let shutdown = Arc::new(Notify::new());
        let stop_signal = shutdown.clone();
        let monitor = Arc::downgrade(self);

        let task = runtime.spawn(async move {
            loop {
                match monitor.upgrade() {
                    Some(monitor) => {
                        monitor.run_sweep().await;
                    }
                    None => return,
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_signal.notified() => {
                        debug!("health scheduler shutting down");
                        return;
                    }
                }
            }
        });

        info!(interval_ms = interval.as_millis() as u64, "health monitoring started");
        *self.lock_scheduler() = Some(Scheduler { shutdown, task });
        true
    }

    /// Tear down and rebuild the schedule under the current policy.
    pub fn restart(self: &Arc<Self>) -> bool {
        self.start()
    }

    /// Withdraw the request and stop the periodic sweep. An in-flight sweep
    /// finishes on its own.
    pub fn stop(&self) {
        self.requested.store(false, Ordering::Release);
        self.cancel();
    }

    fn cancel(&self) {
        if let Some(scheduler) = self.lock_scheduler().take() {
            scheduler.shutdown.notify_one();
            debug!("health monitoring stopped");
        }
    }

    /// Whether monitoring was started and not stopped since.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub fn is_scheduled(&self) -> bool {
        self.lock_scheduler()
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Lazy recovery: an `unhealthy` record older than the window steps down to
/// `degraded` with one failure forgiven; a failure-free `degraded` record
/// becomes `healthy`.
fn apply_recovery_window(health: &mut ProviderHealth, policy: &MonitoringConfig) {
    if !policy.enabled {
        return;
    }
    let elapsed_ms = (Utc::now() - health.last_checked).num_milliseconds();
    if health.status == HealthStatus::Unhealthy && elapsed_ms >= policy.recovery_window_ms as i64 {
        health.status = HealthStatus::Degraded;
        health.consecutive_failures = health.consecutive_failures.saturating_sub(1);
    }
    if health.status == HealthStatus::Degraded && health.consecutive_failures == 0 {
        health.status = HealthStatus::Healthy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aimux_core::config::{Env, EnvSource, SecretResolver};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn monitor(pairs: &[(&str, &str)]) -> Arc<HealthMonitor> {
        let env = Env::from_pairs(pairs.iter().copied());
        let store = Arc::new(ConfigStore::new(
            EnvSource::Static(env),
            SecretResolver::with_secrets_dir("/nonexistent"),
        ));
        Arc::new(HealthMonitor::new(store))
    }

    fn raw(monitor: &HealthMonitor, id: ProviderId) -> ProviderHealth {
        monitor.lock_states().get(&id).cloned().unwrap()
    }

    #[test]
    fn test_failure_threshold() {
        let m = monitor(&[("AI_UNHEALTHY_THRESHOLD", "3")]);
        for n in 1..=5u32 {
            m.mark_failure(ProviderId::OpenAi, "boom");
            let h = m.snapshot(ProviderId::OpenAi);
            assert_eq!(h.consecutive_failures, n);
            let expected = if n < 3 {
                HealthStatus::Degraded
            } else {
                HealthStatus::Unhealthy
            };
            assert_eq!(h.status, expected, "after {} failures", n);
            assert_eq!(h.last_error.as_deref(), Some("boom"));
        }
    }

    #[test]
    fn test_monitoring_disabled_caps_at_degraded() {
        let m = monitor(&[("AI_MONITORING_ENABLED", "false"), ("AI_UNHEALTHY_THRESHOLD", "1")]);
        for _ in 0..10 {
            m.mark_failure(ProviderId::Anthropic, "down");
        }
        let h = m.snapshot(ProviderId::Anthropic);
        assert_eq!(h.status, HealthStatus::Degraded);
        assert_eq!(h.consecutive_failures, 10);
    }

    #[test]
    fn test_success_resets_and_tracks_latency() {
        let m = monitor(&[]);
        m.mark_failure(ProviderId::OpenAi, "x");
        m.mark_success(ProviderId::OpenAi, Some(42));
        let h = m.snapshot(ProviderId::OpenAi);
        assert_eq!(h.status, HealthStatus::Healthy);
        assert_eq!(h.consecutive_failures, 0);
        assert_eq!(h.latency_ms, Some(42));
        assert!(h.last_error.is_none());
    }

    #[test]
    fn test_latency_not_tracked_when_disabled() {
        let m = monitor(&[("AI_MONITOR_LATENCY", "false")]);
        m.mark_success(ProviderId::OpenAi, Some(42));
        assert_eq!(m.snapshot(ProviderId::OpenAi).latency_ms, None);
    }

    #[test]
    fn test_success_without_latency_tracking_clears_previous_latency() {
        let m = monitor(&[("AI_MONITOR_LATENCY", "false")]);
        m.update(ProviderId::OpenAi, |h| h.latency_ms = Some(900));
        m.mark_success(ProviderId::OpenAi, Some(42));
        assert_eq!(raw(&m, ProviderId::OpenAi).latency_ms, None);
    }

    #[test]
    fn test_recovery_window_steps_down_once() {
        let m = monitor(&[("AI_UNHEALTHY_THRESHOLD", "2"), ("AI_RECOVERY_WINDOW_MS", "1000")]);
        for _ in 0..3 {
            m.mark_failure(ProviderId::Google, "x");
        }
        assert_eq!(m.snapshot(ProviderId::Google).status, HealthStatus::Unhealthy);

        m.update(ProviderId::Google, |h| {
            h.last_checked = Utc::now() - chrono::Duration::milliseconds(1_500);
        });
        let h = m.snapshot(ProviderId::Google);
        assert_eq!(h.status, HealthStatus::Degraded);
        assert_eq!(h.consecutive_failures, 2);

        // A second read does not decrement again.
        let h = m.snapshot(ProviderId::Google);
        assert_eq!(h.status, HealthStatus::Degraded);
        assert_eq!(h.consecutive_failures, 2);
    }

    #[test]
    fn test_recovery_window_not_elapsed() {
        let m = monitor(&[("AI_UNHEALTHY_THRESHOLD", "1")]);
        m.mark_failure(ProviderId::Google, "x");
        assert_eq!(m.snapshot(ProviderId::Google).status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_snapshot_all_covers_every_provider() {
        let m = monitor(&[]);
        let all = m.snapshot_all();
        assert_eq!(all.len(), ProviderId::ALL.len());
        assert!(all.iter().all(|h| h.status == HealthStatus::Healthy));
    }

    #[test]
    fn test_reset_all() {
        let m = monitor(&[]);
        m.mark_failure(ProviderId::OpenAi, "x");
        m.reset_all();
        assert_eq!(m.snapshot(ProviderId::OpenAi).consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_probe_success_records_latency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(header("Authorization", "Bearer sk-probe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let base = format!("{}/v1", server.uri());
        let m = monitor(&[("OPENAI_API_KEY", "sk-probe"), ("OPENAI_BASE_URL", &base)]);
        let h = m.check_provider(ProviderId::OpenAi).await;
        assert_eq!(h.status, HealthStatus::Healthy);
        assert!(h.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_probe_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let m = monitor(&[("OPENAI_API_KEY", "k"), ("OPENAI_BASE_URL", &server.uri())]);
        let h = m.check_provider(ProviderId::OpenAi).await;
        assert_eq!(h.status, HealthStatus::Degraded);
        assert_eq!(h.last_error.as_deref(), Some("Health check failed with status 500"));
    }

    #[tokio::test]
    async fn test_probe_timeout_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let m = monitor(&[
            ("OPENAI_API_KEY", "k"),
            ("OPENAI_BASE_URL", &server.uri()),
            ("AI_OPENAI_TIMEOUT_MS", "50"),
        ]);
        let h = m.check_provider(ProviderId::OpenAi).await;
        assert_eq!(
            h.last_error.as_deref(),
            Some("AI provider health check timed out after 50ms")
        );
    }

    #[tokio::test]
    async fn test_sweep_marks_disabled_providers_degraded() {
        let m = monitor(&[]);
        assert!(m.run_sweep().await);
        let h = raw(&m, ProviderId::Anthropic);
        assert_eq!(h.status, HealthStatus::Degraded);
        assert_eq!(h.last_error.as_deref(), Some("provider not enabled"));
    }

    #[tokio::test]
    async fn test_check_disabled_provider_keeps_stored_degraded_state() {
        let m = monitor(&[]);
        let returned = m.check_provider(ProviderId::Gateway).await;
        assert_eq!(returned.status, HealthStatus::Degraded);
        assert_eq!(raw(&m, ProviderId::Gateway).status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_sweep_single_flight() {
        let m = monitor(&[]);
        m.sweeping.store(true, Ordering::Release);
        assert!(!m.run_sweep().await);
        m.sweeping.store(false, Ordering::Release);
        assert!(m.run_sweep().await);
        assert!(!m.sweep_in_progress());
    }

    #[tokio::test]
    async fn test_sweep_skipped_when_monitoring_disabled() {
        let m = monitor(&[("AI_MONITORING_ENABLED", "false")]);
        assert!(!m.run_sweep().await);
        assert!(!m.start());
        assert!(!m.is_scheduled());
    }

    #[tokio::test]
    async fn test_scheduler_runs_immediately_and_stops() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let m = monitor(&[("OPENAI_API_KEY", "k"), ("OPENAI_BASE_URL", &server.uri())]);
        assert!(m.start());
        assert!(m.is_scheduled());

        for _ in 0..50 {
            if raw_opt(&m, ProviderId::Google).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(raw(&m, ProviderId::OpenAi).latency_ms.is_some());

        m.stop();
        assert!(!m.is_scheduled());
    }

    fn raw_opt(monitor: &HealthMonitor, id: ProviderId) -> Option<ProviderHealth> {
        monitor.lock_states().get(&id).cloned()
    }

    #[test]
    fn test_start_without_runtime() {
        let m = monitor(&[]);
        assert!(!m.start());
    }

    #[test]
    fn test_start_records_request_until_stopped() {
        let m = monitor(&[("AI_MONITORING_ENABLED", "false")]);
        assert!(!m.is_requested());
        assert!(!m.start());
        assert!(m.is_requested());
        m.stop();
        assert!(!m.is_requested());
    }
}
