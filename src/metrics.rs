//! # Global Metrics Registry
//!
//! All Prometheus metrics for the service are defined and registered here so
//! the observability surface has a single point of reference. Exposition is
//! served from the HTTP router at `GET /metrics`.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

/// Metrics for the quote pipeline and its collaborators.
#[derive(Clone)]
pub struct QuoterMetrics {
    pub quotes_issued: &'static IntCounterVec,
    pub requests_rejected: &'static IntCounterVec,
    pub nonces_allocated: &'static IntCounterVec,
    pub http_request_duration_ms: &'static HistogramVec,
    pub upstream_latency_ms: &'static HistogramVec,
}

impl QuoterMetrics {
    pub fn global() -> &'static Self {
        static INSTANCE: Lazy<QuoterMetrics> = Lazy::new(|| QuoterMetrics {
            quotes_issued: &QUOTES_ISSUED,
            requests_rejected: &REQUESTS_REJECTED,
            nonces_allocated: &NONCES_ALLOCATED,
            http_request_duration_ms: &HTTP_REQUEST_DURATION_MS,
            upstream_latency_ms: &UPSTREAM_LATENCY_MS,
        });
        &INSTANCE
    }
}

impl std::fmt::Debug for QuoterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoterMetrics").finish()
    }
}

pub static QUOTES_ISSUED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "quoter_quotes_issued_total",
        "Number of firm quotes signed and persisted.",
        &["chain"]
    )
    .expect("Failed to register quoter_quotes_issued_total")
});

pub static REQUESTS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "quoter_requests_rejected_total",
        "Requests rejected at any pipeline stage, labeled by wire code.",
        &["code"]
    )
    .expect("Failed to register quoter_requests_rejected_total")
});

pub static NONCES_ALLOCATED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "quoter_nonces_allocated_total",
        "Nonces handed out per chain, including ones later burned.",
        &["chain"]
    )
    .expect("Failed to register quoter_nonces_allocated_total")
});

pub static HTTP_REQUEST_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "quoter_http_request_duration_ms",
        "End-to-end latency of HTTP requests.",
        &["path", "status"]
    )
    .expect("Failed to register quoter_http_request_duration_ms")
});

pub static UPSTREAM_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "quoter_upstream_latency_ms",
        "Latency of calls to the pricing and strategy services.",
        &["service"]
    )
    .expect("Failed to register quoter_upstream_latency_ms")
});

/// Render the default registry in Prometheus text exposition format.
pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}
