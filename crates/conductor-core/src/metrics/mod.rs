//! In-process gauges with alert thresholds.
//!
//! Rule conditions with `source: metrics` read through [`MetricsSource`];
//! [`MetricsRegistry`] is the default implementation. Exporting to an
//! external monitoring system is out of scope.

use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;

use conductor_types::config::MetricsConfig;
use conductor_types::event::AutomationEvent;

use crate::event::EventBus;

/// Samples kept per gauge for [`MetricsRegistry::recent`].
const SAMPLE_WINDOW: usize = 100;

/// External gauge lookup.
pub trait MetricsSource: Send + Sync {
    fn gauge(&self, name: &str) -> Option<f64>;
}

pub struct MetricsRegistry {
    gauges: DashMap<String, f64>,
    samples: DashMap<String, Mutex<VecDeque<f64>>>,
    thresholds: DashMap<String, f64>,
    events: Option<EventBus>,
}

impl MetricsRegistry {
    pub fn new(config: &MetricsConfig) -> Self {
        let thresholds = DashMap::new();
        for (name, value) in &config.thresholds {
            thresholds.insert(name.clone(), *value);
        }
        Self {
            gauges: DashMap::new(),
            samples: DashMap::new(),
            thresholds,
            events: None,
        }
    }

    /// Publish `threshold_alert` events on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn record_gauge(&self, name: &str, value: f64) {
        self.gauges.insert(name.to_string(), value);

        let window = self
            .samples
            .entry(name.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(SAMPLE_WINDOW)));
        let mut window = window.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if window.len() == SAMPLE_WINDOW {
            window.pop_front();
        }
        window.push_back(value);
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).map(|v| *v)
    }

    pub fn set_threshold(&self, name: &str, value: f64) {
        self.thresholds.insert(name.to_string(), value);
    }

    /// Up to `n` most recent samples for `name`, oldest first.
    pub fn recent(&self, name: &str, n: usize) -> Vec<f64> {
        let Some(window) = self.samples.get(name) else {
            return Vec::new();
        };
        let window = window.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let skip = window.len().saturating_sub(n);
        window.iter().skip(skip).copied().collect()
    }

    /// Messages for every gauge above its threshold, sorted by gauge name.
    pub fn check_thresholds(&self) -> Vec<String> {
        let mut breached: Vec<(String, f64, f64)> = self
            .thresholds
            .iter()
            .filter_map(|t| {
                let value = self.gauge(t.key())?;
                (value > *t.value()).then(|| (t.key().clone(), value, *t.value()))
            })
            .collect();
        breached.sort_by(|a, b| a.0.cmp(&b.0));

        let alerts: Vec<String> = breached
            .into_iter()
            .map(|(name, value, limit)| format!("{name} at {value:.1} exceeds threshold {limit:.1}"))
            .collect();

        if !alerts.is_empty() {
            tracing::warn!(count = alerts.len(), "metric thresholds exceeded");
            if let Some(bus) = &self.events {
                bus.publish(AutomationEvent::ThresholdAlert {
                    alerts: alerts.clone(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }
        alerts
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(&MetricsConfig::default())
    }
}

impl MetricsSource for MetricsRegistry {
    fn gauge(&self, name: &str) -> Option<f64> {
        MetricsRegistry::gauge(self, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauges_keep_latest_value_and_bounded_history() {
        let metrics = MetricsRegistry::default();
        assert_eq!(metrics.gauge("cpu_percent"), None);

        for v in 0..150 {
            metrics.record_gauge("cpu_percent", v as f64);
        }
        assert_eq!(metrics.gauge("cpu_percent"), Some(149.0));
        assert_eq!(metrics.recent("cpu_percent", 3), vec![147.0, 148.0, 149.0]);
        assert_eq!(metrics.recent("cpu_percent", 1000).len(), SAMPLE_WINDOW);
        assert!(metrics.recent("unknown", 3).is_empty());
    }

    #[tokio::test]
    async fn threshold_breach_publishes_one_alert() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let mut config = MetricsConfig::default();
        config.thresholds.insert("cpu_percent".into(), 90.0);
        let metrics = MetricsRegistry::new(&config).with_events(bus);
        metrics.set_threshold("memory_percent", 80.0);

        metrics.record_gauge("cpu_percent", 50.0);
        assert!(metrics.check_thresholds().is_empty());
        assert!(rx.try_recv().is_err());

        metrics.record_gauge("cpu_percent", 95.0);
        metrics.record_gauge("memory_percent", 85.0);
        let alerts = metrics.check_thresholds();
        assert_eq!(alerts.len(), 2);
        assert!(alerts[0].starts_with("cpu_percent at 95.0"));

        match rx.recv().await.unwrap() {
            AutomationEvent::ThresholdAlert { alerts, .. } => assert_eq!(alerts.len(), 2),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}
