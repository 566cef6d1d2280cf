//! Constants for the tickwarden indexer
//!
//! Defaults for the PostgreSQL connection, the binary's worker pool and the
//! telemetry endpoint. Coordination tuning defaults live in
//! `tickwarden_core::config`.

// ============================================================================
// DATABASE
// ============================================================================

/// Default PostgreSQL host
pub const DEFAULT_DB_HOST: &str = "localhost";

/// Default PostgreSQL port
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Default database name
pub const DEFAULT_DB_NAME: &str = "tickwarden";

/// Default database user
pub const DEFAULT_DB_USER: &str = "postgres";

/// Default maximum pool size
pub const DEFAULT_DB_POOL_SIZE: usize = 16;

/// Default connection timeout in seconds
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;

/// Claim table name
pub const CLAIMS_TABLE: &str = "batch_claims";

/// Gap table name
pub const GAPS_TABLE: &str = "tick_gaps";

/// Suffix appended to the consumer class to name the reference indexer's table
pub const TICKS_TABLE_SUFFIX: &str = "_ticks";

// ============================================================================
// WORKERS
// ============================================================================

/// Default number of scheduling loops per process
pub const DEFAULT_WORKERS: usize = 1;

/// Default directory scanned for batch files
pub const DEFAULT_BATCH_DIR: &str = "./batches";

/// Reads of a claimed batch before it is marked failed
pub const FETCH_ATTEMPTS: u32 = 3;

// ============================================================================
// TELEMETRY
// ============================================================================

/// Default `EnvFilter` directive when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "tickwarden_indexer=debug,tickwarden_storage=info,info";

/// Flush size histogram buckets (records)
pub const FLUSH_RECORD_BUCKETS: &[f64] = &[
    1.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];
