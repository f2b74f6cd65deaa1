//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the retrieval cycle
//! and standardized naming conventions.

use metrics::{
    counter, describe_counter, describe_histogram, histogram, Unit,
};
use std::time::Instant;

/// Metrics prefix for all BRAG metrics
pub const METRICS_PREFIX: &str = "brag";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Buckets for embedding latency
pub const EMBEDDING_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
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

    // Retrieval metrics
    describe_counter!(
        format!("{}_retrievals_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of retrieval cycles"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Retrieval latency (embedding + primary + supplementary query) in seconds"
    );

    describe_histogram!(
        format!("{}_retrieved_chunks", METRICS_PREFIX),
        Unit::Count,
        "Chunks returned per retrieval cycle"
    );

    describe_counter!(
        format!("{}_supplementary_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Supplementary single-document queries issued"
    );

    describe_counter!(
        format!("{}_neighbor_fetches_total", METRICS_PREFIX),
        Unit::Count,
        "Batched neighbor fetch calls"
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

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API errors"
    );

    // Answer metrics
    describe_counter!(
        format!("{}_answers_total", METRICS_PREFIX),
        Unit::Count,
        "Answers returned, by outcome (stream, no_context, failure)"
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

/// Helper to record retrieval metrics
pub fn record_retrieval(duration_secs: f64, top_k: usize, chunk_count: usize, supplemented: bool) {
    counter!(
        format!("{}_retrievals_total", METRICS_PREFIX),
        "top_k" => top_k.to_string()
    )
    .increment(1);

    histogram!(format!("{}_retrieval_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    histogram!(format!("{}_retrieved_chunks", METRICS_PREFIX)).record(chunk_count as f64);

    if supplemented {
        counter!(format!("{}_supplementary_queries_total", METRICS_PREFIX)).increment(1);
    }
}

/// Helper to record a batched neighbor fetch
pub fn record_neighbor_fetch(found: usize, requested: usize) {
    let outcome = if found == requested { "complete" } else { "partial" };

    counter!(
        format!("{}_neighbor_fetches_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string(),
        "batch" => if batch_size > 1 { "multi" } else { "single" }
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record how a question was answered
pub fn record_answer(outcome: &'static str) {
    counter!(
        format!("{}_answers_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}
