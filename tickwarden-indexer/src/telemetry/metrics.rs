//! Prometheus Metrics Definitions
//!
//! Process-wide counters for claims, flushes and gap activity, labelled by
//! consumer class. Exposed over `GET /metrics` when an address is configured.

use std::net::SocketAddr;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use tickwarden_core::ClaimOutcome;
use tokio::sync::watch;

use super::TelemetryError;
use crate::constants::FLUSH_RECORD_BUCKETS;

/// Global metrics instance - initialized once on first use
pub static METRICS: Lazy<Result<TickwardenMetrics, TelemetryError>> =
    Lazy::new(TickwardenMetrics::new);

/// The registered metrics, or `None` if registration failed.
pub fn metrics() -> Option<&'static TickwardenMetrics> {
    METRICS.as_ref().ok()
}

/// Container for all tickwarden metrics.
#[derive(Clone)]
pub struct TickwardenMetrics {
    /// Claim attempts - labels: consumer_class, outcome
    pub claims_total: CounterVec,

    /// Retryable store/discovery failures - labels: consumer_class, operation
    pub store_errors_total: CounterVec,

    /// Buffer flushes - labels: consumer_class, status
    pub flushes_total: CounterVec,

    /// Records per flush - labels: consumer_class
    pub flush_records: HistogramVec,

    /// Gap rows recorded - labels: consumer_class
    pub gaps_detected_total: CounterVec,

    /// Gaps fully closed by a split - labels: consumer_class
    pub gaps_closed_total: CounterVec,

    /// Gaps promoted to permanent by this process - labels: consumer_class
    pub gaps_permanent_total: CounterVec,

    /// Pending gaps as observed by this process - labels: consumer_class
    pub pending_gaps: GaugeVec,
}

fn registration(metric: &'static str) -> impl Fn(prometheus::Error) -> TelemetryError {
    move |e| TelemetryError::Registration {
        metric,
        reason: e.to_string(),
    }
}

impl TickwardenMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> Result<Self, TelemetryError> {
        Ok(Self {
            claims_total: register_counter_vec!(
                "tickwarden_claims_total",
                "Total claim attempts by outcome",
                &["consumer_class", "outcome"]
            )
            .map_err(registration("claims_total"))?,

            store_errors_total: register_counter_vec!(
                "tickwarden_store_errors_total",
                "Total retryable coordination failures",
                &["consumer_class", "operation"]
            )
            .map_err(registration("store_errors_total"))?,

            flushes_total: register_counter_vec!(
                "tickwarden_flushes_total",
                "Total buffer flushes by status",
                &["consumer_class", "status"]
            )
            .map_err(registration("flushes_total"))?,

            flush_records: register_histogram_vec!(
                "tickwarden_flush_records",
                "Records handed to downstream processing per flush",
                &["consumer_class"],
                FLUSH_RECORD_BUCKETS.to_vec()
            )
            .map_err(registration("flush_records"))?,

            gaps_detected_total: register_counter_vec!(
                "tickwarden_gaps_detected_total",
                "Total gap rows recorded",
                &["consumer_class"]
            )
            .map_err(registration("gaps_detected_total"))?,

            gaps_closed_total: register_counter_vec!(
                "tickwarden_gaps_closed_total",
                "Total gaps fully closed",
                &["consumer_class"]
            )
            .map_err(registration("gaps_closed_total"))?,

            gaps_permanent_total: register_counter_vec!(
                "tickwarden_gaps_permanent_total",
                "Total gaps promoted to permanent",
                &["consumer_class"]
            )
            .map_err(registration("gaps_permanent_total"))?,

            pending_gaps: register_gauge_vec!(
                "tickwarden_pending_gaps",
                "Pending gaps as observed by this process",
                &["consumer_class"]
            )
            .map_err(registration("pending_gaps"))?,
        })
    }

    /// Record a claim attempt.
    pub fn record_claim(&self, consumer_class: &str, outcome: ClaimOutcome) {
        self.claims_total
            .with_label_values(&[consumer_class, outcome.as_label()])
            .inc();
    }

    /// Record a retryable failure.
    pub fn record_store_error(&self, consumer_class: &str, operation: &str) {
        self.store_errors_total
            .with_label_values(&[consumer_class, operation])
            .inc();
    }

    /// Record a flush.
    pub fn record_flush(&self, consumer_class: &str, success: bool, records: usize) {
        let status = if success { "success" } else { "failure" };
        self.flushes_total
            .with_label_values(&[consumer_class, status])
            .inc();
        self.flush_records
            .with_label_values(&[consumer_class])
            .observe(records as f64);
    }

    /// Record a newly recorded gap.
    pub fn gap_detected(&self, consumer_class: &str) {
        self.gaps_detected_total
            .with_label_values(&[consumer_class])
            .inc();
        self.pending_gaps.with_label_values(&[consumer_class]).inc();
    }

    /// Record a split; `successors` pending gaps replaced one.
    pub fn gap_split(&self, consumer_class: &str, successors: usize) {
        if successors == 0 {
            self.gaps_closed_total
                .with_label_values(&[consumer_class])
                .inc();
        }
        self.pending_gaps
            .with_label_values(&[consumer_class])
            .add(successors as f64 - 1.0);
    }

    /// Record a promotion to permanent.
    pub fn gap_permanent(&self, consumer_class: &str) {
        self.gaps_permanent_total
            .with_label_values(&[consumer_class])
            .inc();
        self.pending_gaps.with_label_values(&[consumer_class]).dec();
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Router exposing `/metrics` and `/health`.
pub fn metrics_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
}

/// Serve the metrics router until `shutdown` flips to `true`.
pub async fn serve_metrics(
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TelemetryError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| TelemetryError::Server(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!(%addr, "Serving metrics");

    axum::serve(listener, metrics_router())
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| TelemetryError::Server(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e))?;
        assert!(!metrics.claims_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_record_claim_and_flush() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e))?;
        metrics.record_claim("metrics_test", ClaimOutcome::Claimed);
        metrics.record_claim("metrics_test", ClaimOutcome::AlreadyClaimed);
        metrics.record_flush("metrics_test", true, 500);

        let claimed = metrics
            .claims_total
            .with_label_values(&["metrics_test", "claimed"])
            .get();
        assert!(claimed >= 1.0);
        Ok(())
    }

    #[test]
    fn test_pending_gap_gauge_tracks_splits() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e))?;
        let class = "gauge_test";
        metrics.gap_detected(class);
        metrics.gap_split(class, 2);
        metrics.gap_split(class, 0);
        metrics.gap_permanent(class);

        let pending = metrics.pending_gaps.with_label_values(&[class]).get();
        assert_eq!(pending, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_metrics_handler_returns_ok() {
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
