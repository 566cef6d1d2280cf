//! The owning indexer: how batch bytes become records and where flushed
//! records go.

use crate::constants::TICKS_TABLE_SUFFIX;
use crate::db::DbClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tickwarden_core::{BatchDescriptor, CoordResult, ProcessingError, Tick};

/// Consumer-specific decode and processing callbacks.
///
/// One implementation exists per consumer class. The scheduling loop calls
/// [`Indexer::decode`] right after a successful claim and
/// [`Indexer::process`] whenever the tick buffer flushes.
#[async_trait]
pub trait Indexer: Send + Sync + 'static {
    type Record: Send + Sync + 'static;

    /// Consumer class whose claims and gaps this indexer owns.
    fn consumer_class(&self) -> &str;

    /// Parse the raw contents of a claimed batch.
    fn decode(
        &self,
        batch: &BatchDescriptor,
        contents: &[u8],
    ) -> Result<Vec<Self::Record>, ProcessingError>;

    /// Durably hand records to the downstream sink.
    ///
    /// Returning `Ok` is what allows the contributing batches to be marked
    /// completed.
    async fn process(&self, records: &[Self::Record]) -> Result<(), ProcessingError>;
}

// ============================================================================
// JSON LINES INDEXER
// ============================================================================

/// One decoded line of a batch file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRow {
    pub tick: Tick,
    pub payload: JsonValue,
}

/// Parse `{"tick": <i64>, ...}` objects, one per non-blank line.
pub fn decode_json_lines(
    batch: &BatchDescriptor,
    contents: &[u8],
) -> Result<Vec<TickRow>, ProcessingError> {
    let decode_error = |reason: String| ProcessingError::Decode {
        batch_id: batch.id.clone(),
        reason,
    };

    let text = std::str::from_utf8(contents).map_err(|e| decode_error(e.to_string()))?;

    let mut rows = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let payload: JsonValue = serde_json::from_str(line)
            .map_err(|e| decode_error(format!("line {}: {}", idx + 1, e)))?;
        let tick = payload
            .get("tick")
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| decode_error(format!("line {}: missing integer 'tick'", idx + 1)))?;
        rows.push(TickRow { tick, payload });
    }
    Ok(rows)
}

/// Reference indexer: inserts every tick into `<consumer_class>_ticks`.
#[derive(Clone)]
pub struct JsonLinesTickIndexer {
    consumer_class: String,
    table: String,
    db: DbClient,
}

impl JsonLinesTickIndexer {
    pub fn new(consumer_class: impl Into<String>, db: DbClient) -> Self {
        let consumer_class = consumer_class.into();
        let table = ticks_table_for(&consumer_class);
        Self {
            consumer_class,
            table,
            db,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the destination table if needed.
    pub async fn ensure_table(&self) -> CoordResult<()> {
        let conn = self.db.get_conn().await?;
        conn.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (tick BIGINT NOT NULL, payload JSONB NOT NULL)",
            self.table
        ))
        .await
        .map_err(crate::db::pg_error("ensure_ticks_table"))?;
        Ok(())
    }
}

/// Destination table for a consumer class; characters outside
/// `[A-Za-z0-9_]` become `_`.
pub fn ticks_table_for(consumer_class: &str) -> String {
    let base: String = consumer_class
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{}{}", base, TICKS_TABLE_SUFFIX)
}

#[async_trait]
impl Indexer for JsonLinesTickIndexer {
    type Record = TickRow;

    fn consumer_class(&self) -> &str {
        &self.consumer_class
    }

    fn decode(
        &self,
        batch: &BatchDescriptor,
        contents: &[u8],
    ) -> Result<Vec<TickRow>, ProcessingError> {
        decode_json_lines(batch, contents)
    }

    async fn process(&self, records: &[TickRow]) -> Result<(), ProcessingError> {
        let downstream = |reason: String| ProcessingError::Downstream { reason };

        let conn = self
            .db
            .get_conn()
            .await
            .map_err(|e| downstream(e.to_string()))?;

        let ticks: Vec<i64> = records.iter().map(|r| r.tick).collect();
        let payloads: Vec<JsonValue> = records.iter().map(|r| r.payload.clone()).collect();

        conn.execute(
            &format!(
                "INSERT INTO \"{}\" (tick, payload) \
                 SELECT * FROM unnest($1::BIGINT[], $2::JSONB[])",
                self.table
            ),
            &[&ticks, &payloads],
        )
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, table = %self.table, "Tick insert failed");
            downstream(e.to_string())
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> BatchDescriptor {
        BatchDescriptor::new("batch_a", 0, 20)
    }

    #[test]
    fn test_decode_json_lines() {
        let contents = b"{\"tick\":0,\"price\":1.5}\n\n{\"tick\":10}\n{\"tick\":20}\n";
        let rows = decode_json_lines(&batch(), contents).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].tick, 0);
        assert_eq!(rows[0].payload["price"], 1.5);
        assert_eq!(rows[2].tick, 20);
    }

    #[test]
    fn test_decode_reports_line_number() {
        let contents = b"{\"tick\":0}\n{\"price\":2}\n";
        let err = decode_json_lines(&batch(), contents).unwrap_err();
        match err {
            ProcessingError::Decode { batch_id, reason } => {
                assert_eq!(batch_id, "batch_a");
                assert!(reason.starts_with("line 2"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_json_lines(&batch(), b"not json\n").is_err());
        assert!(decode_json_lines(&batch(), &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_ticks_table_for() {
        assert_eq!(ticks_table_for("trades"), "trades_ticks");
        assert_eq!(ticks_table_for("Order-Book.v2"), "order_book_v2_ticks");
    }
}
