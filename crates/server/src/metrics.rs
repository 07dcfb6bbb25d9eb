//! Prometheus metrics for the Pigment server.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it. It
//! exposes aggregate counts only; no blob hashes or transform strings.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pigment_requests_total",
            "Image requests by response status",
        ),
        &["status"],
    )
    .expect("metric creation failed")
});

// Cache metrics
pub static CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("pigment_cache_hits_total", "Requests served from the cache")
        .expect("metric creation failed")
});

pub static CACHE_MISSES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pigment_cache_misses_total",
        "Requests that had to be rendered",
    )
    .expect("metric creation failed")
});

pub static CACHE_EVICTIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pigment_cache_evictions_total",
        "Cache entries evicted to make room",
    )
    .expect("metric creation failed")
});

pub static CACHE_WRITE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pigment_cache_write_failures_total",
        "Rendered images that could not be stored in the cache",
    )
    .expect("metric creation failed")
});

pub static TRANSFORM_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "pigment_transform_duration_seconds",
            "Time spent in the image backend",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
/// Safe to call more than once.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(REQUESTS_TOTAL.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_HITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_MISSES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_EVICTIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_WRITE_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TRANSFORM_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// Handler for the `/metrics` endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count a finished image request.
pub fn record_request(status: StatusCode) {
    REQUESTS_TOTAL
        .with_label_values(&[status.as_str()])
        .inc();
}
