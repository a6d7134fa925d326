//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Inquest metrics
pub const METRICS_PREFIX: &str = "inquest";

/// SLO-aligned histogram buckets for pipeline latency (in seconds)
pub const PIPELINE_BUCKETS: &[f64] = &[
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    20.00, // 20s
];

/// Buckets for individual external calls (retrieval / generation)
pub const EXTERNAL_CALL_BUCKETS: &[f64] = &[
    0.010, // 10ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_pipeline_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total pipeline invocations, labeled by path taken"
    );

    describe_histogram!(
        format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end pipeline latency in seconds"
    );

    describe_counter!(
        format!("{}_pipeline_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Reasoning-to-standard fallback transitions, labeled by reason"
    );

    describe_counter!(
        format!("{}_pipeline_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Terminal pipeline failures, labeled by reason"
    );

    describe_counter!(
        format!("{}_reasoning_steps_total", METRICS_PREFIX),
        Unit::Count,
        "Reasoning steps executed, labeled by outcome"
    );

    describe_histogram!(
        format!("{}_step_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Per-step latency in seconds"
    );

    describe_counter!(
        format!("{}_retrieval_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total retriever calls"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Retriever call latency in seconds"
    );

    describe_counter!(
        format!("{}_generation_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total generator calls"
    );

    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Generator call latency in seconds"
    );

    describe_counter!(
        format!("{}_generation_tokens_total", METRICS_PREFIX),
        Unit::Count,
        "Total tokens reported by the generator"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record pipeline invocation metrics
pub struct PipelineMetrics {
    start: Instant,
    path: &'static str,
}

impl PipelineMetrics {
    /// Start tracking an invocation
    pub fn start(path: &'static str) -> Self {
        Self {
            start: Instant::now(),
            path,
        }
    }

    /// Record invocation completion
    pub fn finish(self, degraded: bool) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_pipeline_requests_total", METRICS_PREFIX),
            "path" => self.path,
            "degraded" => if degraded { "true" } else { "false" }
        )
        .increment(1);

        histogram!(
            format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
            "path" => self.path
        )
        .record(duration);
    }
}

/// Record a fallback transition
pub fn record_fallback(reason: &'static str) {
    counter!(
        format!("{}_pipeline_fallbacks_total", METRICS_PREFIX),
        "reason" => reason
    )
    .increment(1);
}

/// Record a terminal failure
pub fn record_failure(reason: &'static str) {
    counter!(
        format!("{}_pipeline_failures_total", METRICS_PREFIX),
        "reason" => reason
    )
    .increment(1);
}

/// Record a completed reasoning step
pub fn record_step(outcome: &'static str, duration_secs: f64) {
    counter!(
        format!("{}_reasoning_steps_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(format!("{}_step_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Record one retriever call
pub fn record_retrieval(duration_secs: f64, ok: bool) {
    counter!(
        format!("{}_retrieval_requests_total", METRICS_PREFIX),
        "status" => if ok { "ok" } else { "error" }
    )
    .increment(1);

    histogram!(format!("{}_retrieval_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Record one generator call
pub fn record_generation(duration_secs: f64, ok: bool, tokens: usize) {
    counter!(
        format!("{}_generation_requests_total", METRICS_PREFIX),
        "status" => if ok { "ok" } else { "error" }
    )
    .increment(1);

    histogram!(format!("{}_generation_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    if tokens > 0 {
        counter!(format!("{}_generation_tokens_total", METRICS_PREFIX)).increment(tokens as u64);
    }
}
