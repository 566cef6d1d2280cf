//! Database Connection Pool Module
//!
//! PostgreSQL implementation of the coordination store using
//! deadpool-postgres. Mutual exclusion relies entirely on the database:
//!
//! - claims are `INSERT ... ON CONFLICT DO NOTHING` on `(consumer_class, batch_id)`
//! - completion and permanence are conditional `UPDATE`s on the current status
//! - gap splits lock the gap row with `SELECT ... FOR UPDATE` inside a
//!   transaction, then delete it and insert the successors
//! - gap detection holds a per-class advisory transaction lock while it
//!   subtracts existing gaps and inserts the remainder

use crate::constants::{
    CLAIMS_TABLE, DEFAULT_DB_HOST, DEFAULT_DB_NAME, DEFAULT_DB_POOL_SIZE, DEFAULT_DB_PORT,
    DEFAULT_DB_TIMEOUT_SECS, DEFAULT_DB_USER, GAPS_TABLE,
};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime};
use std::time::Duration;
use tickwarden_core::{
    split_gap, subtract_covered, BatchDescriptor, ClaimCounts, ClaimOutcome, ClaimRecord,
    ClaimStatus, ConfigError, CoordError, CoordResult, EntityKind, GapRecord, GapSplit,
    GapStatus, StorageError, Tick, TickRange, Timestamp,
};
use tickwarden_storage::{ClaimStore, CoordinationStore, GapStore};
use tokio_postgres::{NoTls, Row};

const COORDINATION_SCHEMA_SQL: &str = include_str!("../migrations/V1__coordination.sql");

const CLAIM_COLUMNS: &str =
    "consumer_class, batch_id, tick_start, tick_end, status, failure_reason, claimed_at, completed_at";

const GAP_COLUMNS: &str = "consumer_class, gap_start, gap_end, first_detected, status";

// ============================================================================
// ERROR CONVERSION
// ============================================================================

/// Convert a `tokio_postgres::Error` raised by `operation` into a store error.
pub(crate) fn pg_error(operation: &'static str) -> impl Fn(tokio_postgres::Error) -> CoordError {
    move |err| {
        tracing::error!(operation, error = ?err, "Database error");
        if err.is_closed() {
            StorageError::ConnectionFailed {
                reason: err.to_string(),
            }
            .into()
        } else {
            StorageError::QueryFailed {
                operation: operation.to_string(),
                reason: err.to_string(),
            }
            .into()
        }
    }
}

/// Convert a pool checkout failure into a store error.
pub(crate) fn pool_error(err: PoolError) -> CoordError {
    tracing::error!(error = ?err, "Connection pool error");
    match err {
        PoolError::Closed => StorageError::PoolClosed.into(),
        other => StorageError::ConnectionFailed {
            reason: other.to_string(),
        }
        .into(),
    }
}

fn invalid_row(entity: EntityKind) -> impl Fn(tokio_postgres::Error) -> CoordError {
    move |err| {
        StorageError::InvalidRow {
            entity,
            reason: err.to_string(),
        }
        .into()
    }
}

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Run namespace; applied as `search_path` on every connection
    pub schema: Option<String>,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection and checkout timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            dbname: DEFAULT_DB_NAME.to_string(),
            user: DEFAULT_DB_USER.to_string(),
            password: "".to_string(),
            schema: None,
            max_size: DEFAULT_DB_POOL_SIZE,
            timeout: Duration::from_secs(DEFAULT_DB_TIMEOUT_SECS),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// - `TICKWARDEN_DB_HOST`, `TICKWARDEN_DB_PORT`, `TICKWARDEN_DB_NAME`
    /// - `TICKWARDEN_DB_USER`, `TICKWARDEN_DB_PASSWORD`
    /// - `TICKWARDEN_DB_SCHEMA`: run namespace (optional)
    /// - `TICKWARDEN_DB_POOL_SIZE`, `TICKWARDEN_DB_TIMEOUT` (seconds)
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("TICKWARDEN_DB_HOST")
                .unwrap_or_else(|_| DEFAULT_DB_HOST.to_string()),
            port: std::env::var("TICKWARDEN_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DB_PORT),
            dbname: std::env::var("TICKWARDEN_DB_NAME")
                .unwrap_or_else(|_| DEFAULT_DB_NAME.to_string()),
            user: std::env::var("TICKWARDEN_DB_USER")
                .unwrap_or_else(|_| DEFAULT_DB_USER.to_string()),
            password: std::env::var("TICKWARDEN_DB_PASSWORD").unwrap_or_default(),
            schema: std::env::var("TICKWARDEN_DB_SCHEMA")
                .ok()
                .filter(|s| !s.is_empty()),
            max_size: std::env::var("TICKWARDEN_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DB_POOL_SIZE),
            timeout: Duration::from_secs(
                std::env::var("TICKWARDEN_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DB_TIMEOUT_SECS),
            ),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CoordResult<()> {
        if self.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_size".to_string(),
                value: "0".to_string(),
                reason: "pool size must be greater than 0".to_string(),
            }
            .into());
        }

        if let Some(schema) = &self.schema {
            if !is_plain_identifier(schema) {
                return Err(ConfigError::InvalidValue {
                    field: "schema".to_string(),
                    value: schema.clone(),
                    reason: "schema must be a plain SQL identifier".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> CoordResult<Pool> {
        self.validate()?;

        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(self.timeout);
        cfg.options = self
            .schema
            .as_ref()
            .map(|schema| format!("-c search_path={}", schema));

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ConfigError::InvalidValue {
                field: "database".to_string(),
                value: format!("{}:{}/{}", self.host, self.port, self.dbname),
                reason: format!("Failed to create pool: {}", e),
            })?;

        Ok(pool)
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub(crate) fn is_plain_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

// ============================================================================
// DATABASE CLIENT WRAPPER
// ============================================================================

/// Database client that wraps a connection pool and implements the
/// coordination store.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
    schema: Option<String>,
}

impl DbClient {
    /// Create a new database client with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool, schema: None }
    }

    /// Create a new database client from configuration.
    pub fn from_config(config: &DbConfig) -> CoordResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Get a connection from the pool.
    pub async fn get_conn(&self) -> CoordResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_error)
    }

    /// Create the run namespace (if configured) and the coordination tables.
    pub async fn ensure_schema(&self) -> CoordResult<()> {
        let conn = self.get_conn().await?;

        if let Some(schema) = &self.schema {
            conn.batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", schema))
                .await
                .map_err(pg_error("create_schema"))?;
        }

        conn.batch_execute(COORDINATION_SCHEMA_SQL)
            .await
            .map_err(pg_error("ensure_schema"))?;

        tracing::info!(schema = ?self.schema, "Coordination schema ready");
        Ok(())
    }

    /// Report whether a terminal-status update hit zero rows because the row
    /// was already terminal or because it does not exist.
    async fn claim_exists(&self, consumer_class: &str, batch_id: &str) -> CoordResult<bool> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT 1 FROM {} WHERE consumer_class = $1 AND batch_id = $2",
                    CLAIMS_TABLE
                ),
                &[&consumer_class, &batch_id],
            )
            .await
            .map_err(pg_error("claim_exists"))?;
        Ok(row.is_some())
    }

    async fn finish_claim(
        &self,
        consumer_class: &str,
        batch_id: &str,
        status: ClaimStatus,
        reason: Option<&str>,
    ) -> CoordResult<bool> {
        let conn = self.get_conn().await?;
        let now = Utc::now();
        let updated = conn
            .execute(
                &format!(
                    "UPDATE {} SET status = $3, completed_at = $4, failure_reason = $5 \
                     WHERE consumer_class = $1 AND batch_id = $2 AND status = 'claimed'",
                    CLAIMS_TABLE
                ),
                &[&consumer_class, &batch_id, &status.as_db_str(), &now, &reason],
            )
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, batch_id, "Claim status update failed");
                CoordError::from(StorageError::UpdateFailed {
                    entity: EntityKind::Claim,
                    key: batch_id.to_string(),
                    reason: e.to_string(),
                })
            })?;
        drop(conn);

        if updated == 1 {
            return Ok(true);
        }

        if self.claim_exists(consumer_class, batch_id).await? {
            tracing::debug!(consumer_class, batch_id, %status, "Claim already terminal, skipping");
            Ok(false)
        } else {
            Err(StorageError::NotFound {
                entity: EntityKind::Claim,
                key: format!("{}/{}", consumer_class, batch_id),
            }
            .into())
        }
    }
}

fn claim_from_row(row: &Row) -> CoordResult<ClaimRecord> {
    let parse = invalid_row(EntityKind::Claim);
    let status: String = row.try_get(4).map_err(&parse)?;
    Ok(ClaimRecord {
        consumer_class: row.try_get(0).map_err(&parse)?,
        batch_id: row.try_get(1).map_err(&parse)?,
        tick_start: row.try_get(2).map_err(&parse)?,
        tick_end: row.try_get(3).map_err(&parse)?,
        status: ClaimStatus::from_db_str(&status).map_err(|e| StorageError::InvalidRow {
            entity: EntityKind::Claim,
            reason: e.to_string(),
        })?,
        failure_reason: row.try_get(5).map_err(&parse)?,
        claimed_at: row.try_get(6).map_err(&parse)?,
        completed_at: row.try_get(7).map_err(&parse)?,
    })
}

fn gap_from_row(row: &Row) -> CoordResult<GapRecord> {
    let parse = invalid_row(EntityKind::Gap);
    let status: String = row.try_get(4).map_err(&parse)?;
    Ok(GapRecord {
        consumer_class: row.try_get(0).map_err(&parse)?,
        gap_start: row.try_get(1).map_err(&parse)?,
        gap_end: row.try_get(2).map_err(&parse)?,
        first_detected: row.try_get(3).map_err(&parse)?,
        status: GapStatus::from_db_str(&status).map_err(|e| StorageError::InvalidRow {
            entity: EntityKind::Gap,
            reason: e.to_string(),
        })?,
    })
}

// ============================================================================
// CLAIM OPERATIONS
// ============================================================================

#[async_trait]
impl ClaimStore for DbClient {
    async fn try_claim(
        &self,
        consumer_class: &str,
        batch: &BatchDescriptor,
    ) -> CoordResult<ClaimOutcome> {
        let conn = self.get_conn().await?;
        let now = Utc::now();
        let inserted = conn
            .execute(
                &format!(
                    "INSERT INTO {} (consumer_class, batch_id, tick_start, tick_end, status, claimed_at) \
                     VALUES ($1, $2, $3, $4, 'claimed', $5) \
                     ON CONFLICT (consumer_class, batch_id) DO NOTHING",
                    CLAIMS_TABLE
                ),
                &[&consumer_class, &batch.id, &batch.tick_start, &batch.tick_end, &now],
            )
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, batch_id = %batch.id, "Claim insert failed");
                CoordError::from(StorageError::InsertFailed {
                    entity: EntityKind::Claim,
                    reason: e.to_string(),
                })
            })?;

        Ok(if inserted == 1 {
            ClaimOutcome::Claimed
        } else {
            ClaimOutcome::AlreadyClaimed
        })
    }

    async fn mark_completed(&self, consumer_class: &str, batch_id: &str) -> CoordResult<bool> {
        self.finish_claim(consumer_class, batch_id, ClaimStatus::Completed, None)
            .await
    }

    async fn mark_failed(
        &self,
        consumer_class: &str,
        batch_id: &str,
        reason: &str,
    ) -> CoordResult<bool> {
        self.finish_claim(consumer_class, batch_id, ClaimStatus::Failed, Some(reason))
            .await
    }

    async fn max_completed_end(&self, consumer_class: &str) -> CoordResult<Option<Tick>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "SELECT MAX(tick_end) FROM {} WHERE consumer_class = $1 AND status = 'completed'",
                    CLAIMS_TABLE
                ),
                &[&consumer_class],
            )
            .await
            .map_err(pg_error("max_completed_end"))?;
        row.try_get(0).map_err(invalid_row(EntityKind::Claim))
    }

    async fn claims_in_range(
        &self,
        consumer_class: &str,
        range: TickRange,
    ) -> CoordResult<Vec<ClaimRecord>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM {} \
                     WHERE consumer_class = $1 AND tick_start < $3 AND tick_end >= $2 \
                     ORDER BY tick_start",
                    CLAIM_COLUMNS, CLAIMS_TABLE
                ),
                &[&consumer_class, &range.start, &range.end],
            )
            .await
            .map_err(pg_error("claims_in_range"))?;
        rows.iter().map(claim_from_row).collect()
    }

    async fn claim_get(
        &self,
        consumer_class: &str,
        batch_id: &str,
    ) -> CoordResult<Option<ClaimRecord>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM {} WHERE consumer_class = $1 AND batch_id = $2",
                    CLAIM_COLUMNS, CLAIMS_TABLE
                ),
                &[&consumer_class, &batch_id],
            )
            .await
            .map_err(pg_error("claim_get"))?;
        row.as_ref().map(claim_from_row).transpose()
    }

    async fn claim_counts(&self, consumer_class: &str) -> CoordResult<ClaimCounts> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT status, COUNT(*) FROM {} WHERE consumer_class = $1 GROUP BY status",
                    CLAIMS_TABLE
                ),
                &[&consumer_class],
            )
            .await
            .map_err(pg_error("claim_counts"))?;

        let parse = invalid_row(EntityKind::Claim);
        let mut counts = ClaimCounts::default();
        for row in &rows {
            let status: String = row.try_get(0).map_err(&parse)?;
            let count: i64 = row.try_get(1).map_err(&parse)?;
            let count = count.max(0) as u64;
            match ClaimStatus::from_db_str(&status) {
                Ok(ClaimStatus::Claimed) => counts.claimed = count,
                Ok(ClaimStatus::Completed) => counts.completed = count,
                Ok(ClaimStatus::Failed) => counts.failed = count,
                Err(e) => {
                    return Err(StorageError::InvalidRow {
                        entity: EntityKind::Claim,
                        reason: e.to_string(),
                    }
                    .into())
                }
            }
        }
        Ok(counts)
    }
}

// ============================================================================
// GAP OPERATIONS
// ============================================================================

#[async_trait]
impl GapStore for DbClient {
    async fn record_gap(
        &self,
        consumer_class: &str,
        range: TickRange,
        detected_at: Timestamp,
    ) -> CoordResult<bool> {
        if range.is_empty() {
            return Err(StorageError::InvalidRow {
                entity: EntityKind::Gap,
                reason: format!("empty gap {}", range),
            }
            .into());
        }

        let conn = self.get_conn().await?;
        let inserted = conn
            .execute(
                &format!(
                    "INSERT INTO {} (consumer_class, gap_start, gap_end, first_detected, status) \
                     VALUES ($1, $2, $3, $4, 'pending') \
                     ON CONFLICT (consumer_class, gap_start) DO NOTHING",
                    GAPS_TABLE
                ),
                &[&consumer_class, &range.start, &range.end, &detected_at],
            )
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, gap = %range, "Gap insert failed");
                CoordError::from(StorageError::InsertFailed {
                    entity: EntityKind::Gap,
                    reason: e.to_string(),
                })
            })?;
        Ok(inserted == 1)
    }

    async fn record_uncovered(
        &self,
        consumer_class: &str,
        candidate: TickRange,
        covered: &[TickRange],
        detected_at: Timestamp,
    ) -> CoordResult<Vec<TickRange>> {
        let mut conn = self.get_conn().await?;
        let tx_failed = |e: tokio_postgres::Error| {
            tracing::error!(error = ?e, candidate = %candidate, "Gap detection transaction failed");
            CoordError::from(StorageError::TransactionFailed {
                reason: e.to_string(),
            })
        };

        let tx = conn.transaction().await.map_err(tx_failed)?;

        // Serialises gap detection per class until commit.
        tx.execute(
            "SELECT pg_advisory_xact_lock(hashtext('tick_gaps:' || $1::text))",
            &[&consumer_class],
        )
        .await
        .map_err(tx_failed)?;

        let rows = tx
            .query(
                &format!(
                    "SELECT {} FROM {} \
                     WHERE consumer_class = $1 AND gap_start < $3 AND gap_end > $2",
                    GAP_COLUMNS, GAPS_TABLE
                ),
                &[&consumer_class, &candidate.start, &candidate.end],
            )
            .await
            .map_err(tx_failed)?;

        let mut taken = rows
            .iter()
            .map(|row| gap_from_row(row).map(|gap| gap.range()))
            .collect::<CoordResult<Vec<TickRange>>>()?;
        taken.extend_from_slice(covered);

        let mut inserted = Vec::new();
        for missing in subtract_covered(candidate, &taken) {
            let count = tx
                .execute(
                    &format!(
                        "INSERT INTO {} (consumer_class, gap_start, gap_end, first_detected, status) \
                         VALUES ($1, $2, $3, $4, 'pending') \
                         ON CONFLICT (consumer_class, gap_start) DO NOTHING",
                        GAPS_TABLE
                    ),
                    &[&consumer_class, &missing.start, &missing.end, &detected_at],
                )
                .await
                .map_err(tx_failed)?;
            if count == 1 {
                inserted.push(missing);
            }
        }

        tx.commit().await.map_err(tx_failed)?;
        Ok(inserted)
    }

    async fn oldest_pending_gap(&self, consumer_class: &str) -> CoordResult<Option<GapRecord>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM {} WHERE consumer_class = $1 AND status = 'pending' \
                     ORDER BY gap_start LIMIT 1",
                    GAP_COLUMNS, GAPS_TABLE
                ),
                &[&consumer_class],
            )
            .await
            .map_err(pg_error("oldest_pending_gap"))?;
        row.as_ref().map(gap_from_row).transpose()
    }

    async fn gaps_in_range(
        &self,
        consumer_class: &str,
        range: TickRange,
    ) -> CoordResult<Vec<GapRecord>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM {} \
                     WHERE consumer_class = $1 AND gap_start < $3 AND gap_end > $2 \
                     ORDER BY gap_start",
                    GAP_COLUMNS, GAPS_TABLE
                ),
                &[&consumer_class, &range.start, &range.end],
            )
            .await
            .map_err(pg_error("gaps_in_range"))?;
        rows.iter().map(gap_from_row).collect()
    }

    async fn split_gap(
        &self,
        consumer_class: &str,
        original_gap_start: Tick,
        found: TickRange,
    ) -> CoordResult<Option<GapSplit>> {
        let mut conn = self.get_conn().await?;
        let tx_failed = |e: tokio_postgres::Error| {
            tracing::error!(error = ?e, original_gap_start, "Gap split transaction failed");
            CoordError::from(StorageError::TransactionFailed {
                reason: e.to_string(),
            })
        };

        let tx = conn.transaction().await.map_err(tx_failed)?;

        let locked = tx
            .query_opt(
                &format!(
                    "SELECT {} FROM {} WHERE consumer_class = $1 AND gap_start = $2 FOR UPDATE",
                    GAP_COLUMNS, GAPS_TABLE
                ),
                &[&consumer_class, &original_gap_start],
            )
            .await
            .map_err(tx_failed)?;

        let Some(row) = locked else {
            tx.rollback().await.map_err(tx_failed)?;
            return Ok(None);
        };
        let original = gap_from_row(&row)?;
        let split = split_gap(original.range(), found);

        tx.execute(
            &format!(
                "DELETE FROM {} WHERE consumer_class = $1 AND gap_start = $2",
                GAPS_TABLE
            ),
            &[&consumer_class, &original_gap_start],
        )
        .await
        .map_err(tx_failed)?;

        for successor in split.successors() {
            tx.execute(
                &format!(
                    "INSERT INTO {} (consumer_class, gap_start, gap_end, first_detected, status) \
                     VALUES ($1, $2, $3, $4, $5)",
                    GAPS_TABLE
                ),
                &[
                    &consumer_class,
                    &successor.start,
                    &successor.end,
                    &original.first_detected,
                    &original.status.as_db_str(),
                ],
            )
            .await
            .map_err(tx_failed)?;
        }

        tx.commit().await.map_err(tx_failed)?;
        Ok(Some(split))
    }

    async fn mark_permanent(&self, consumer_class: &str, gap_start: Tick) -> CoordResult<bool> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                &format!(
                    "UPDATE {} SET status = 'permanent' \
                     WHERE consumer_class = $1 AND gap_start = $2 AND status = 'pending'",
                    GAPS_TABLE
                ),
                &[&consumer_class, &gap_start],
            )
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, gap_start, "Gap status update failed");
                CoordError::from(StorageError::UpdateFailed {
                    entity: EntityKind::Gap,
                    key: gap_start.to_string(),
                    reason: e.to_string(),
                })
            })?;
        Ok(updated == 1)
    }

    async fn list_gaps(&self, consumer_class: &str) -> CoordResult<Vec<GapRecord>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM {} WHERE consumer_class = $1 ORDER BY gap_start",
                    GAP_COLUMNS, GAPS_TABLE
                ),
                &[&consumer_class],
            )
            .await
            .map_err(pg_error("list_gaps"))?;
        rows.iter().map(gap_from_row).collect()
    }
}

#[async_trait]
impl CoordinationStore for DbClient {
    async fn release_idle_connections(&self) {
        let _ = self.pool.retain(|_, _| false);
        tracing::trace!(pool_size = self.pool_size(), "Released idle connections");
    }

    async fn health_check(&self) -> CoordResult<bool> {
        let conn = self.get_conn().await?;
        conn.query_one("SELECT 1", &[])
            .await
            .map_err(pg_error("health_check"))?;
        Ok(true)
    }
}

// ============================================================================
// TESTS
// ============================================================================
