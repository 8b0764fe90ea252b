//! Metric sink contract and in-memory implementation, exposing two
//! series: `monitor_messages_received_total{interface,host,message}`
//! and `monitor_default_route_expiration_seconds{interface,router}`.

use std::collections::HashMap;
use std::sync::Mutex;

/// Where the Monitor and Advertiser report counts and gauges. Kept as a
/// trait so a production binary can swap in a real Prometheus registry
/// without touching the state machines.
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &'static str, labels: &[(&'static str, String)]);
    fn set_gauge(&self, name: &'static str, labels: &[(&'static str, String)], value: f64);
    fn delete_gauge(&self, name: &'static str, labels: &[(&'static str, String)]);
}

fn label_key(name: &'static str, labels: &[(&'static str, String)]) -> String {
    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let mut key = String::from(name);
    for (k, v) in sorted {
        key.push('|');
        key.push_str(k);
        key.push('=');
        key.push_str(&v);
    }
    key
}

/// A concurrent-safe in-memory sink, useful in tests and as the default
/// when no external metrics backend is configured.
#[derive(Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, f64>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_value(&self, name: &'static str, labels: &[(&'static str, String)]) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(&label_key(name, labels))
            .copied()
            .unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &'static str, labels: &[(&'static str, String)]) -> Option<f64> {
        self.gauges.lock().unwrap().get(&label_key(name, labels)).copied()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment_counter(&self, name: &'static str, labels: &[(&'static str, String)]) {
        let mut counters = self.counters.lock().unwrap();
        *counters.entry(label_key(name, labels)).or_insert(0) += 1;
    }

    fn set_gauge(&self, name: &'static str, labels: &[(&'static str, String)], value: f64) {
        self.gauges.lock().unwrap().insert(label_key(name, labels), value);
    }

    fn delete_gauge(&self, name: &'static str, labels: &[(&'static str, String)]) {
        self.gauges.lock().unwrap().remove(&label_key(name, labels));
    }
}

pub const MESSAGES_RECEIVED_TOTAL: &str = "monitor_messages_received_total";
pub const DEFAULT_ROUTE_EXPIRATION_SECONDS: &str = "monitor_default_route_expiration_seconds";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_per_label_set() {
        let sink = InMemoryMetrics::new();
        sink.increment_counter(
            MESSAGES_RECEIVED_TOTAL,
            &[
                ("interface", "eth0".to_string()),
                ("host", "fe80::1".to_string()),
                ("message", "router advertisement".to_string()),
            ],
        );
        sink.increment_counter(
            MESSAGES_RECEIVED_TOTAL,
            &[
                ("interface", "eth0".to_string()),
                ("host", "fe80::1".to_string()),
                ("message", "router advertisement".to_string()),
            ],
        );
        sink.increment_counter(
            MESSAGES_RECEIVED_TOTAL,
            &[
                ("interface", "eth0".to_string()),
                ("host", "fe80::2".to_string()),
                ("message", "router advertisement".to_string()),
            ],
        );

        assert_eq!(
            sink.counter_value(
                MESSAGES_RECEIVED_TOTAL,
                &[
                    ("interface", "eth0".to_string()),
                    ("host", "fe80::1".to_string()),
                    ("message", "router advertisement".to_string()),
                ],
            ),
            2
        );
        assert_eq!(
            sink.counter_value(
                MESSAGES_RECEIVED_TOTAL,
                &[
                    ("interface", "eth0".to_string()),
                    ("host", "fe80::2".to_string()),
                    ("message", "router advertisement".to_string()),
                ],
            ),
            1
        );
    }

    #[test]
    fn gauge_delete_removes_series() {
        let sink = InMemoryMetrics::new();
        let labels = [("interface", "eth0".to_string()), ("router", "fe80::1".to_string())];
        sink.set_gauge(DEFAULT_ROUTE_EXPIRATION_SECONDS, &labels, 1800.0);
        assert_eq!(sink.gauge_value(DEFAULT_ROUTE_EXPIRATION_SECONDS, &labels), Some(1800.0));
        sink.delete_gauge(DEFAULT_ROUTE_EXPIRATION_SECONDS, &labels);
        assert_eq!(sink.gauge_value(DEFAULT_ROUTE_EXPIRATION_SECONDS, &labels), None);
    }
}
