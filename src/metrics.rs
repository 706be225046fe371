// src/metrics.rs
// Prometheus-compatible counters for the gateway, persisted in the KV store
// and exported in text format from /metrics.

use crate::store::KeyValueStore;

const METRICS_PREFIX: &str = "metrics:";

#[derive(Debug, Clone, Copy)]
pub enum MetricName {
    RequestsTotal,
    ForwardedTotal,
    BlockedTotal,
    MaliciousTotal,
    MalformedTotal,
    ClassifierFailuresTotal,
    AnalyticsReadsTotal,
}

const ALL_METRICS: [MetricName; 7] = [
    MetricName::RequestsTotal,
    MetricName::ForwardedTotal,
    MetricName::BlockedTotal,
    MetricName::MaliciousTotal,
    MetricName::MalformedTotal,
    MetricName::ClassifierFailuresTotal,
    MetricName::AnalyticsReadsTotal,
];

impl MetricName {
    fn as_str(&self) -> &'static str {
        match self {
            MetricName::RequestsTotal => "gate_requests_total",
            MetricName::ForwardedTotal => "gate_forwarded_total",
            MetricName::BlockedTotal => "gate_blocked_total",
            MetricName::MaliciousTotal => "gate_malicious_total",
            MetricName::MalformedTotal => "gate_malformed_total",
            MetricName::ClassifierFailuresTotal => "gate_classifier_failures_total",
            MetricName::AnalyticsReadsTotal => "gate_analytics_reads_total",
        }
    }
}

fn metric_key(metric: MetricName) -> String {
    format!("{}{}", METRICS_PREFIX, metric.as_str())
}

fn read_counter<S: KeyValueStore>(store: &S, metric: MetricName) -> u64 {
    store
        .get(&metric_key(metric))
        .ok()
        .flatten()
        .and_then(|v| String::from_utf8(v).ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Increment a counter. Metric writes are best-effort; a failed write is
/// logged and otherwise ignored.
pub fn increment<S: KeyValueStore>(store: &S, metric: MetricName) {
    let key = metric_key(metric);
    let next = read_counter(store, metric).saturating_add(1);
    if store.set(&key, next.to_string().as_bytes()).is_err() {
        eprintln!("[metrics] failed to persist counter {}", key);
    }
}

/// Render all counters in Prometheus text exposition format.
pub fn render<S: KeyValueStore>(store: &S) -> String {
    let mut out = String::new();
    for metric in ALL_METRICS {
        let name = metric.as_str();
        out.push_str(&format!("# TYPE {} counter\n", name));
        out.push_str(&format!("{} {}\n", name, read_counter(store, metric)));
    }
    out
}
