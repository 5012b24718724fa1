//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all PropForge metrics
pub const METRICS_PREFIX: &str = "propforge";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 100ms, P99 < 1s (bounded by the per-source timeout)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms - P50 target
    0.250,  // 250ms
    0.500,  // 500ms
    0.800,  // 800ms - default source timeout
    1.000,  // 1s - P99 target
    2.500,  // 2.5s
    5.000,  // 5s
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

    // Pipeline metrics
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Queries handled, by primary intent and outcome"
    );

    describe_histogram!(
        format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end handle_query latency in seconds"
    );

    describe_counter!(
        format!("{}_analysis_degraded_total", METRICS_PREFIX),
        Unit::Count,
        "Queries where no intent rule matched"
    );

    describe_histogram!(
        format!("{}_context_items", METRICS_PREFIX),
        Unit::Count,
        "Ranked context items handed to the prompt"
    );

    describe_counter!(
        format!("{}_context_less_total", METRICS_PREFIX),
        Unit::Count,
        "Prompts built without any retrieved context"
    );

    // Source metrics
    describe_counter!(
        format!("{}_source_lookups_total", METRICS_PREFIX),
        Unit::Count,
        "Per-source lookups, by source and outcome"
    );

    describe_histogram!(
        format!("{}_source_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Per-source lookup latency in seconds"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    // Session metrics
    describe_gauge!(
        format!("{}_sessions_active", METRICS_PREFIX),
        Unit::Count,
        "Sessions currently held in memory"
    );

    describe_counter!(
        format!("{}_sessions_evicted_total", METRICS_PREFIX),
        Unit::Count,
        "Sessions evicted after the idle TTL"
    );

    describe_counter!(
        format!("{}_memory_resets_total", METRICS_PREFIX),
        Unit::Count,
        "Sessions reset after failing integrity checks"
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

/// Helper to record one handled query
pub fn record_query(duration_secs: f64, intent: &str, outcome: &str, context_items: usize) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "intent" => intent.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
        "intent" => intent.to_string()
    )
    .record(duration_secs);

    histogram!(format!("{}_context_items", METRICS_PREFIX)).record(context_items as f64);

    if context_items == 0 {
        counter!(format!("{}_context_less_total", METRICS_PREFIX)).increment(1);
    }
}

/// Helper to record a query that fell back to the general intent
pub fn record_analysis_degraded() {
    counter!(format!("{}_analysis_degraded_total", METRICS_PREFIX)).increment(1);
}

/// Helper to record one source lookup (`ok`, `timeout`, `error`)
pub fn record_source_lookup(source_id: &str, kind: &str, outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_source_lookups_total", METRICS_PREFIX),
        "source" => source_id.to_string(),
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_source_duration_seconds", METRICS_PREFIX),
        "source" => source_id.to_string()
    )
    .record(duration_secs);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

pub fn set_active_sessions(count: usize) {
    gauge!(format!("{}_sessions_active", METRICS_PREFIX)).set(count as f64);
}

pub fn record_sessions_evicted(count: u64) {
    counter!(format!("{}_sessions_evicted_total", METRICS_PREFIX)).increment(count);
}

pub fn record_memory_reset() {
    counter!(format!("{}_memory_resets_total", METRICS_PREFIX)).increment(1);
}
