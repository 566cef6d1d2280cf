//! Coordinator configuration

use crate::{ConfigError, CoordError, CoordResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Default number of batches requested per discovery page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Default number of records handed to the indexer per flush
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 1000;

/// Default idle time before a partially filled buffer is flushed (5 seconds)
pub const DEFAULT_BUFFER_IDLE_FLUSH_MS: u64 = 5_000;

/// Default sleep after an empty discovery page (1 second)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default age after which a pending gap is declared permanent (10 minutes)
pub const DEFAULT_GAP_TIMEOUT_SECS: u64 = 600;

/// Default sleep after a retryable store or discovery error (1 second)
pub const DEFAULT_ERROR_BACKOFF_MS: u64 = 1_000;

static CONSUMER_CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("Invalid consumer class regex"));

// ============================================================================
// CONFIG
// ============================================================================

/// Per-worker coordination settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Logical worker type; claims and gaps are tracked per class.
    pub consumer_class: String,
    /// Prefix under which batch files are listed.
    pub path_prefix: String,
    /// Batches requested per discovery page.
    pub page_size: usize,
    /// Records per flush.
    pub insert_batch_size: usize,
    /// Flush a non-empty buffer once nothing was added for this long.
    pub buffer_idle_flush: Duration,
    /// Sleep after an empty discovery page.
    pub poll_interval: Duration,
    /// Age after which a pending gap becomes permanent.
    pub gap_timeout: Duration,
    /// Sleep after a retryable error.
    pub error_backoff: Duration,
}

impl CoordinatorConfig {
    /// Build a configuration with default tuning for the given consumer class.
    pub fn new(consumer_class: impl Into<String>) -> Self {
        Self {
            consumer_class: consumer_class.into(),
            path_prefix: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            buffer_idle_flush: Duration::from_millis(DEFAULT_BUFFER_IDLE_FLUSH_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            gap_timeout: Duration::from_secs(DEFAULT_GAP_TIMEOUT_SECS),
            error_backoff: Duration::from_millis(DEFAULT_ERROR_BACKOFF_MS),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - consumer_class is non-empty and made of `[A-Za-z0-9_.-]`
    /// - page_size and insert_batch_size > 0
    /// - all durations are positive
    pub fn validate(&self) -> CoordResult<()> {
        if self.consumer_class.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "consumer_class".to_string(),
            }
            .into());
        }

        if !CONSUMER_CLASS_RE.is_match(&self.consumer_class) {
            return Err(invalid(
                "consumer_class",
                &self.consumer_class,
                "consumer_class may only contain letters, digits, '_', '.' and '-'",
            ));
        }

        if self.page_size == 0 {
            return Err(invalid("page_size", "0", "page_size must be greater than 0"));
        }

        if self.insert_batch_size == 0 {
            return Err(invalid(
                "insert_batch_size",
                "0",
                "insert_batch_size must be greater than 0",
            ));
        }

        for (field, value) in [
            ("buffer_idle_flush", self.buffer_idle_flush),
            ("poll_interval", self.poll_interval),
            ("gap_timeout", self.gap_timeout),
            ("error_backoff", self.error_backoff),
        ] {
            if value.is_zero() {
                return Err(invalid(
                    field,
                    &format!("{:?}", value),
                    &format!("{} must be positive", field),
                ));
            }
        }

        Ok(())
    }

    /// Create from environment variables.
    ///
    /// Environment variables:
    /// - `TICKWARDEN_CONSUMER_CLASS`: consumer class (required)
    /// - `TICKWARDEN_PATH_PREFIX`: discovery prefix (default: "")
    /// - `TICKWARDEN_PAGE_SIZE`: discovery page size (default: 100)
    /// - `TICKWARDEN_INSERT_BATCH_SIZE`: records per flush (default: 1000)
    /// - `TICKWARDEN_BUFFER_IDLE_FLUSH_MS`: idle flush delay (default: 5000)
    /// - `TICKWARDEN_POLL_INTERVAL_MS`: empty-page sleep (default: 1000)
    /// - `TICKWARDEN_GAP_TIMEOUT_SECS`: gap timeout (default: 600)
    /// - `TICKWARDEN_ERROR_BACKOFF_MS`: retry backoff (default: 1000)
    ///
    /// Unparseable values are configuration errors rather than silent defaults.
    pub fn from_env() -> CoordResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`CoordinatorConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> CoordResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let consumer_class =
            lookup("TICKWARDEN_CONSUMER_CLASS").ok_or_else(|| ConfigError::MissingRequired {
                field: "TICKWARDEN_CONSUMER_CLASS".to_string(),
            })?;

        let config = Self {
            consumer_class,
            path_prefix: lookup("TICKWARDEN_PATH_PREFIX").unwrap_or_default(),
            page_size: parse_or(&lookup, "TICKWARDEN_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            insert_batch_size: parse_or(
                &lookup,
                "TICKWARDEN_INSERT_BATCH_SIZE",
                DEFAULT_INSERT_BATCH_SIZE,
            )?,
            buffer_idle_flush: Duration::from_millis(parse_or(
                &lookup,
                "TICKWARDEN_BUFFER_IDLE_FLUSH_MS",
                DEFAULT_BUFFER_IDLE_FLUSH_MS,
            )?),
            poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "TICKWARDEN_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )?),
            gap_timeout: Duration::from_secs(parse_or(
                &lookup,
                "TICKWARDEN_GAP_TIMEOUT_SECS",
                DEFAULT_GAP_TIMEOUT_SECS,
            )?),
            error_backoff: Duration::from_millis(parse_or(
                &lookup,
                "TICKWARDEN_ERROR_BACKOFF_MS",
                DEFAULT_ERROR_BACKOFF_MS,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str) -> CoordResult<Self> {
        let file: CoordinatorConfigFile =
            toml::from_str(contents).map_err(|e| ConfigError::Parse {
                reason: e.to_string(),
            })?;
        let config = Self::from(file);
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> CoordResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }
}

/// On-disk TOML layout. Durations carry their unit in the key name.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CoordinatorConfigFile {
    consumer_class: String,
    #[serde(default)]
    path_prefix: String,
    #[serde(default = "default_page_size")]
    page_size: usize,
    #[serde(default = "default_insert_batch_size")]
    insert_batch_size: usize,
    #[serde(default = "default_buffer_idle_flush_ms")]
    buffer_idle_flush_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
    #[serde(default = "default_gap_timeout_secs")]
    gap_timeout_secs: u64,
    #[serde(default = "default_error_backoff_ms")]
    error_backoff_ms: u64,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}
fn default_insert_batch_size() -> usize {
    DEFAULT_INSERT_BATCH_SIZE
}
fn default_buffer_idle_flush_ms() -> u64 {
    DEFAULT_BUFFER_IDLE_FLUSH_MS
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_gap_timeout_secs() -> u64 {
    DEFAULT_GAP_TIMEOUT_SECS
}
fn default_error_backoff_ms() -> u64 {
    DEFAULT_ERROR_BACKOFF_MS
}

impl From<CoordinatorConfigFile> for CoordinatorConfig {
    fn from(file: CoordinatorConfigFile) -> Self {
        Self {
            consumer_class: file.consumer_class,
            path_prefix: file.path_prefix,
            page_size: file.page_size,
            insert_batch_size: file.insert_batch_size,
            buffer_idle_flush: Duration::from_millis(file.buffer_idle_flush_ms),
            poll_interval: Duration::from_millis(file.poll_interval_ms),
            gap_timeout: Duration::from_secs(file.gap_timeout_secs),
            error_backoff: Duration::from_millis(file.error_backoff_ms),
        }
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> CoordError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> CoordResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| invalid(key, &raw, "expected a non-negative integer")),
    }
}

// =============================================================================
// TESTS
// =============================================================================
