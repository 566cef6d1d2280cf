//! Tickwarden Telemetry - Observability Infrastructure
//!
//! Structured logging through `tracing-subscriber` and Prometheus metrics
//! with an optional scrape endpoint.

pub mod metrics;
pub mod tracer;

pub use metrics::{metrics, metrics_handler, serve_metrics, TickwardenMetrics, METRICS};
pub use tracer::{init_tracing, LogFormat, TelemetryConfig};

use thiserror::Error;

/// Errors raised while setting up logging or metrics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Failed to init subscriber: {0}")]
    Subscriber(String),

    #[error("Failed to register {metric}: {reason}")]
    Registration { metric: &'static str, reason: String },

    #[error("Invalid {field} '{value}': {reason}")]
    InvalidConfig {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Metrics server error: {0}")]
    Server(String),
}
