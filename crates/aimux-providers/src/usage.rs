//! Usage emitter: sampled delivery of per-call usage events.

use std::collections::BTreeMap;

use tracing::trace;

use aimux_core::config::AnalyticsConfig;
use aimux_core::listeners::{ListenerSet, Subscription};
use aimux_core::types::{Annotation, UsageEvent};

/// Fans usage events out to subscribers, honouring analytics settings.
#[derive(Debug)]
pub struct UsageEmitter {
    listeners: ListenerSet<UsageEvent>,
}

impl Default for UsageEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageEmitter {
    pub fn new() -> Self {
        UsageEmitter {
            listeners: ListenerSet::new("usage"),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&UsageEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Drop every usage listener.
    pub fn clear(&self) {
        self.listeners.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver `event` unless analytics is off or the sample excludes it.
    /// Returns whether the event was delivered.
    pub fn emit(&self, analytics: &AnalyticsConfig, mut event: UsageEvent) -> bool {
        if !should_sample(analytics) {
            trace!(provider = %event.metrics.provider, "usage event sampled out");
            return false;
        }
        event.metrics.annotations.insert(
            "event".to_string(),
            Annotation::Text(analytics.event_name.clone()),
        );
        self.listeners.emit(&event);
        true
    }
}

fn should_sample(analytics: &AnalyticsConfig) -> bool {
    if !analytics.enabled {
        return false;
    }
    if analytics.sample_rate >= 1.0 {
        return true;
    }
    rand::random::<f64>() < analytics.sample_rate
}

/// Keep only scalar caller metadata as usage annotations.
pub fn annotations_from(
    metadata: &BTreeMap<String, serde_json::Value>,
) -> BTreeMap<String, Annotation> {
    metadata
        .iter()
        .filter_map(|(key, value)| {
            let annotation = match value {
                serde_json::Value::String(s) => Annotation::Text(s.clone()),
                serde_json::Value::Number(n) => Annotation::Number(n.as_f64()?),
                serde_json::Value::Bool(b) => Annotation::Flag(*b),
                _ => return None,
            };
            Some((key.clone(), annotation))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aimux_core::types::{Operation, ProviderId, UsageMetrics};
    use std::sync::{Arc, Mutex};

    fn event() -> UsageEvent {
        UsageEvent {
            metrics: UsageMetrics {
                provider: ProviderId::OpenAi,
                model: "gpt-4.1-mini".into(),
                success: true,
                prompt_tokens: Some(1),
                completion_tokens: Some(2),
                total_tokens: Some(3),
                duration_ms: 5,
                timestamp: chrono::Utc::now(),
                error_code: None,
                error_message: None,
                annotations: BTreeMap::new(),
            },
            operation: Operation::Generate,
            prompt_length: 4,
            response_length: 4,
        }
    }

    fn collect(emitter: &UsageEmitter) -> (Arc<Mutex<Vec<UsageEvent>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = emitter.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        (seen, sub)
    }

    #[test]
    fn test_emit_adds_event_annotation() {
        let emitter = UsageEmitter::new();
        let (seen, _sub) = collect(&emitter);
        assert!(emitter.emit(&AnalyticsConfig::default(), event()));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].metrics.annotations.get("event"),
            Some(&Annotation::Text("ai.usage".into()))
        );
    }

    #[test]
    fn test_disabled_analytics_skips() {
        let emitter = UsageEmitter::new();
        let (seen, _sub) = collect(&emitter);
        let analytics = AnalyticsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!emitter.emit(&analytics, event()));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_zero_sample_rate_never_emits() {
        let emitter = UsageEmitter::new();
        let (seen, _sub) = collect(&emitter);
        let analytics = AnalyticsConfig {
            sample_rate: 0.0,
            ..Default::default()
        };
        for _ in 0..50 {
            emitter.emit(&analytics, event());
        }
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_clear_and_unsubscribe() {
        let emitter = UsageEmitter::new();
        let (_seen, sub) = collect(&emitter);
        let (_seen2, _sub2) = collect(&emitter);
        assert_eq!(emitter.listener_count(), 2);
        sub.unsubscribe();
        assert_eq!(emitter.listener_count(), 1);
        emitter.clear();
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_annotations_keep_scalars_only() {
        let mut meta = BTreeMap::new();
        meta.insert("tenant".to_string(), serde_json::json!("acme"));
        meta.insert("attempt".to_string(), serde_json::json!(2));
        meta.insert("cached".to_string(), serde_json::json!(false));
        meta.insert("nested".to_string(), serde_json::json!({"a": 1}));
        let annotations = annotations_from(&meta);
        assert_eq!(annotations.len(), 3);
        assert_eq!(annotations["attempt"], Annotation::Number(2.0));
        assert!(!annotations.contains_key("nested"));
    }
}
