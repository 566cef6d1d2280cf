//! Run metadata lookup.
//!
//! The producer writes a single `run_metadata` row into the run namespace.
//! Only the sampling interval is read here; bootstrapping that table is the
//! producer's job.

use crate::db::{pg_error, DbClient};
use async_trait::async_trait;
use tickwarden_core::{CoordResult, EntityKind, StorageError};
use tickwarden_storage::SamplingIntervalProvider;
use tokio_postgres::error::SqlState;

/// Reads `run_metadata.sampling_interval` from the configured namespace.
#[derive(Clone)]
pub struct PgSamplingIntervalProvider {
    db: DbClient,
}

impl PgSamplingIntervalProvider {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SamplingIntervalProvider for PgSamplingIntervalProvider {
    async fn sampling_interval(&self) -> CoordResult<Option<i64>> {
        let conn = self.db.get_conn().await?;
        let row = match conn
            .query_opt("SELECT sampling_interval FROM run_metadata LIMIT 1", &[])
            .await
        {
            Ok(row) => row,
            // Producer has not created the metadata table yet.
            Err(e) if e.code() == Some(&SqlState::UNDEFINED_TABLE) => return Ok(None),
            Err(e) => return Err(pg_error("sampling_interval")(e)),
        };

        match row {
            Some(row) => row.try_get::<_, Option<i64>>(0).map_err(|e| {
                StorageError::InvalidRow {
                    entity: EntityKind::RunMetadata,
                    reason: e.to_string(),
                }
                .into()
            }),
            None => Ok(None),
        }
    }
}
