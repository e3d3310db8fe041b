//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all QAForge metrics
pub const METRICS_PREFIX: &str = "qaforge";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms for cached answers, P99 < 150ms
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms - P50 target
    0.075,  // 75ms
    0.100,  // 100ms
    0.150,  // 150ms - P99 target
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for completion latency (model calls are slow)
pub const COMPLETION_BUCKETS: &[f64] = &[
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    20.00,  // 20s
    30.00,  // 30s
    60.00,  // 60s - request timeout
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Resolution metrics
    describe_counter!(
        format!("{}_resolutions_total", METRICS_PREFIX),
        Unit::Count,
        "Total resolved questions by answer source"
    );

    describe_histogram!(
        format!("{}_resolution_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Question resolution latency in seconds"
    );

    // Completion metrics
    describe_counter!(
        format!("{}_completion_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total completion API requests"
    );

    describe_histogram!(
        format!("{}_completion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Completion API latency in seconds"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    // Collaborator metrics
    describe_counter!(
        format!("{}_history_append_failures_total", METRICS_PREFIX),
        Unit::Count,
        "History records that could not be stored"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record a finished resolution
pub fn record_resolution(duration_secs: f64, source: &str, multi_turn: bool) {
    let mode = if multi_turn { "multi_turn" } else { "single_turn" };

    counter!(
        format!("{}_resolutions_total", METRICS_PREFIX),
        "source" => source.to_string(),
        "mode" => mode
    )
    .increment(1);

    histogram!(
        format!("{}_resolution_duration_seconds", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .record(duration_secs);
}

/// Helper to record completion metrics
pub fn record_completion(duration_secs: f64, model: &str, streaming: bool, success: bool) {
    let status = if success { "success" } else { "error" };
    let kind = if streaming { "stream" } else { "sync" };

    counter!(
        format!("{}_completion_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "kind" => kind,
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_completion_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string(),
            "kind" => kind
        )
        .record(duration_secs);
    }
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

/// Helper to record a dropped history record
pub fn record_history_failure() {
    counter!(format!("{}_history_append_failures_total", METRICS_PREFIX)).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        // Verify buckets are sorted and contain SLO targets
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }

        assert!(LATENCY_BUCKETS.contains(&0.050));
        assert!(LATENCY_BUCKETS.contains(&0.150));
    }

    #[test]
    fn test_completion_buckets_cover_timeout() {
        assert_eq!(COMPLETION_BUCKETS.last().copied(), Some(60.0));
    }

    #[test]
    fn test_request_metrics() {
        let metrics = RequestMetrics::start("POST", "/qa/ask");
        std::thread::sleep(std::time::Duration::from_millis(10));
        metrics.finish(200);
        // Just verify it runs without panic
    }
}
