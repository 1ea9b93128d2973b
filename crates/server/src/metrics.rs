//! Prometheus metrics for the cache node.
//!
//! Exposed at `/_internal/api/metrics` when `server.metrics_enabled` is set.
//! The endpoint sits behind the same network authorization as every other
//! internal route.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{self, Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Local cache metrics
pub static CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "peercache_cache_hits_total",
        "Downloads served directly from the local cache",
    )
    .expect("metric creation failed")
});

pub static CACHE_MISSES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "peercache_cache_misses_total",
        "Downloads that were not present in the local cache",
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "peercache_bytes_uploaded_total",
        "Bytes stored through the upload endpoint",
    )
    .expect("metric creation failed")
});

// Peer metrics
pub static PEER_FETCHES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "peercache_peer_fetches_total",
            "Peer fetch attempts by peer label and outcome",
        ),
        &["peer", "outcome"],
    )
    .expect("metric creation failed")
});

pub static ACTIVE_DOWNLOAD_JOBS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "peercache_active_download_jobs",
        "Peer download jobs currently in flight",
    )
    .expect("metric creation failed")
});

// Access metrics
pub static AUTH_DENIALS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "peercache_auth_denials_total",
        "Requests rejected by network authorization",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build several routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(CACHE_HITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_MISSES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PEER_FETCHES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ACTIVE_DOWNLOAD_JOBS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(AUTH_DENIALS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /_internal/api/metrics - Prometheus metrics endpoint.
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

/// Record the outcome of a fetch attempt against one peer.
pub fn record_peer_fetch(peer: &str, outcome: &str) {
    PEER_FETCHES.with_label_values(&[peer, outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_peer_fetch_labels() {
        register_metrics();
        record_peer_fetch("dc-b", "success");
        let value = PEER_FETCHES.with_label_values(&["dc-b", "success"]).get();
        assert!(value >= 1);
    }
}
