//! Error types for tickwarden operations

use std::fmt;
use thiserror::Error;

/// Kind of persisted entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Claim,
    Gap,
    RunMetadata,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Claim => "claim",
            EntityKind::Gap => "gap",
            EntityKind::RunMetadata => "run metadata",
        };
        f.write_str(name)
    }
}

/// Storage layer errors.
///
/// Claim uniqueness conflicts are deliberately absent: they are reported as
/// `ClaimOutcome::AlreadyClaimed`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity} with key {key}")]
    NotFound { entity: EntityKind, key: String },

    #[error("Insert failed for {entity}: {reason}")]
    InsertFailed { entity: EntityKind, reason: String },

    #[error("Update failed for {entity} with key {key}: {reason}")]
    UpdateFailed {
        entity: EntityKind,
        key: String,
        reason: String,
    },

    #[error("Query {operation} failed: {reason}")]
    QueryFailed { operation: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Invalid {entity} row: {reason}")]
    InvalidRow { entity: EntityKind, reason: String },
}

/// Configuration errors. Always fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {reason}")]
    Parse { reason: String },
}

/// Errors raised by the batch discovery port.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Listing batches under '{prefix}' failed: {reason}")]
    ListFailed { prefix: String, reason: String },

    #[error("Reading batch {batch_id} failed: {reason}")]
    ReadFailed { batch_id: String, reason: String },

    #[error("Invalid batch name '{name}': {reason}")]
    InvalidBatchName { name: String, reason: String },
}

/// Errors raised while turning a batch into downstream rows.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("Failed to decode batch {batch_id}: {reason}")]
    Decode { batch_id: String, reason: String },

    #[error("Downstream processing failed: {reason}")]
    Downstream { reason: String },
}

impl ProcessingError {
    /// Reason string recorded on claims marked failed because of this error.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Master error type for all tickwarden errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),
}

impl CoordError {
    /// Transient failure that is safe to retry on the same batch or gap.
    ///
    /// Never true for claim contention, which is not an error at all.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoordError::Storage(err) => matches!(
                err,
                StorageError::InsertFailed { .. }
                    | StorageError::UpdateFailed { .. }
                    | StorageError::QueryFailed { .. }
                    | StorageError::TransactionFailed { .. }
                    | StorageError::ConnectionFailed { .. }
            ),
            CoordError::Discovery(err) => matches!(
                err,
                DiscoveryError::ListFailed { .. } | DiscoveryError::ReadFailed { .. }
            ),
            CoordError::Config(_) | CoordError::Processing(_) => false,
        }
    }

    /// Failure that must stop the worker.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoordError::Config(_) | CoordError::Storage(StorageError::PoolClosed)
        )
    }

    /// Short label used for metrics and structured logs.
    pub fn category(&self) -> &'static str {
        match self {
            CoordError::Storage(_) => "storage",
            CoordError::Config(_) => "config",
            CoordError::Discovery(_) => "discovery",
            CoordError::Processing(_) => "processing",
        }
    }
}

/// Result type alias for tickwarden operations.
pub type CoordResult<T> = Result<T, CoordError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            entity: EntityKind::Claim,
            key: "trades/batch-1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("claim"));
        assert!(msg.contains("trades/batch-1"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "insert_batch_size".to_string(),
            value: "0".to_string(),
            reason: "must be greater than 0".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("insert_batch_size"));
        assert!(msg.contains("must be greater than 0"));
    }

    #[test]
    fn test_transient_store_errors_are_retryable() {
        let err = CoordError::from(StorageError::ConnectionFailed {
            reason: "timeout".to_string(),
        });
        assert!(err.is_retryable());
        assert!(!err.is_fatal());

        let err = CoordError::from(StorageError::QueryFailed {
            operation: "try_claim".to_string(),
            reason: "reset".to_string(),
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_found_is_not_retryable() {
        let err = CoordError::from(StorageError::NotFound {
            entity: EntityKind::Claim,
            key: "x".to_string(),
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_config_and_closed_pool_are_fatal() {
        let config = CoordError::from(ConfigError::MissingRequired {
            field: "consumer_class".to_string(),
        });
        assert!(config.is_fatal());
        assert!(CoordError::from(StorageError::PoolClosed).is_fatal());
    }

    #[test]
    fn test_processing_errors_neither_retryable_nor_fatal() {
        let err = CoordError::from(ProcessingError::Downstream {
            reason: "insert rejected".to_string(),
        });
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
        assert_eq!(err.category(), "processing");
    }

    #[test]
    fn test_coord_error_from_variants() {
        assert!(matches!(
            CoordError::from(StorageError::LockPoisoned),
            CoordError::Storage(_)
        ));
        assert!(matches!(
            CoordError::from(DiscoveryError::ListFailed {
                prefix: String::new(),
                reason: "io".to_string()
            }),
            CoordError::Discovery(_)
        ));
        assert!(matches!(
            CoordError::from(ProcessingError::Decode {
                batch_id: "b".to_string(),
                reason: "bad json".to_string()
            }),
            CoordError::Processing(_)
        ));
    }
}
