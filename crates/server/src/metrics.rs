//! Application metrics for Prometheus monitoring.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder. Call once at startup, before
/// any metrics are recorded. Returns `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }
    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();
    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!("corpusq_requests_total", "Total number of API requests");
    describe_histogram!("corpusq_request_duration_seconds", "Duration of API requests in seconds");

    describe_counter!("corpusq_iterations_total", "Iterations submitted, by mode (quota|full)");
    describe_counter!("corpusq_cache_hits_total", "Lease-by-lookup cache hits, by job kind");
    describe_counter!("corpusq_cache_misses_total", "Lease-by-lookup cache misses, by job kind");
    describe_histogram!("corpusq_aggregation_duration_seconds", "Time spent in the result aggregator");
    describe_gauge!("corpusq_live_connections", "Open websocket connections");
}

/// Render current metrics in Prometheus text format. `None` if not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_request(endpoint: &str, status: &str, duration: Duration) {
    counter!("corpusq_requests_total", "endpoint" => endpoint.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!("corpusq_request_duration_seconds", "endpoint" => endpoint.to_string())
        .record(duration.as_secs_f64());
}

/// Record an iteration's submission (spec.md §4.4).
pub fn record_iteration(mode: &str) {
    counter!("corpusq_iterations_total", "mode" => mode.to_string()).increment(1);
}

/// Record a lease-by-lookup outcome (spec.md §4.1).
pub fn record_cache_lookup(job_kind: &str, hit: bool) {
    if hit {
        counter!("corpusq_cache_hits_total", "job_kind" => job_kind.to_string()).increment(1);
    } else {
        counter!("corpusq_cache_misses_total", "job_kind" => job_kind.to_string()).increment(1);
    }
}

pub fn record_aggregation(duration: Duration) {
    histogram!("corpusq_aggregation_duration_seconds").record(duration.as_secs_f64());
}

pub fn set_live_connections(count: u64) {
    gauge!("corpusq_live_connections").set(count as f64);
}

/// Helper for timing request handlers.
pub struct RequestTimer {
    endpoint: String,
    start: Instant,
}

impl RequestTimer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), start: Instant::now() }
    }

    pub fn finish_ok(self) {
        record_request(&self.endpoint, "200", self.start.elapsed());
    }

    pub fn finish(self, status: &str) {
        record_request(&self.endpoint, status, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_timer_does_not_panic() {
        let timer = RequestTimer::new("test_endpoint");
        std::thread::sleep(Duration::from_millis(1));
        timer.finish_ok();
    }

    #[test]
    fn render_metrics_before_init_is_none_or_some() {
        let _ = render_metrics();
    }
}
