//! Tracing Subscriber Initialization
//!
//! JSON output for production log shipping, pretty output for local runs.
//! The filter comes from `RUST_LOG` when set.

use std::net::SocketAddr;
use std::str::FromStr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::TelemetryError;
use crate::constants::DEFAULT_LOG_FILTER;

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(TelemetryError::InvalidConfig {
                field: "log_format",
                value: other.to_string(),
                reason: "expected 'json' or 'pretty'".to_string(),
            }),
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Log line format
    pub log_format: LogFormat,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Address for the `/metrics` endpoint; disabled when `None`
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            default_filter: DEFAULT_LOG_FILTER.to_string(),
            metrics_addr: None,
        }
    }
}

impl TelemetryConfig {
    /// Read `TICKWARDEN_LOG_FORMAT` and `TICKWARDEN_METRICS_ADDR`.
    pub fn from_env() -> Result<Self, TelemetryError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, TelemetryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(format) = lookup("TICKWARDEN_LOG_FORMAT") {
            config.log_format = format.parse()?;
        }

        if let Some(addr) = lookup("TICKWARDEN_METRICS_ADDR").filter(|s| !s.is_empty()) {
            let parsed = addr
                .parse::<SocketAddr>()
                .map_err(|e| TelemetryError::InvalidConfig {
                    field: "metrics_addr",
                    value: addr.clone(),
                    reason: e.to_string(),
                })?;
            config.metrics_addr = Some(parsed);
        }

        Ok(config)
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup, before any worker is spawned.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };
    result.map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    tracing::info!(
        log_format = ?config.log_format,
        metrics_addr = ?config.metrics_addr,
        "Telemetry initialized"
    );

    Ok(())
}
