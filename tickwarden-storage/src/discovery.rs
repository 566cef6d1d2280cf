//! Batch discovery port.
//!
//! A [`BatchSource`] pages through the batch files available for a run in
//! lexicographic id order. Because batch names are zero-padded, id order is
//! tick order.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tickwarden_core::{BatchDescriptor, CoordResult, DiscoveryError, TickRange};
use tokio::sync::RwLock;

/// Parameters for one `list_batches` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListBatchesRequest {
    /// Only batches whose id starts with this prefix are listed.
    pub prefix: String,
    /// Opaque cursor from a previous page; `None` starts from the beginning.
    pub continuation: Option<String>,
    pub page_size: usize,
    /// Restrict to batches whose tick range intersects this half-open range.
    pub tick_filter: Option<TickRange>,
    /// Spacing between ticks, needed to turn inclusive batch ends into
    /// half-open ranges when `tick_filter` is set.
    pub sampling_interval: i64,
}

impl ListBatchesRequest {
    pub fn new(prefix: impl Into<String>, page_size: usize, sampling_interval: i64) -> Self {
        Self {
            prefix: prefix.into(),
            continuation: None,
            page_size,
            tick_filter: None,
            sampling_interval,
        }
    }

    pub fn with_continuation(mut self, continuation: Option<String>) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn with_tick_filter(mut self, range: TickRange) -> Self {
        self.tick_filter = Some(range);
        self
    }

    /// Whether a batch passes the prefix, cursor and tick filters.
    pub fn accepts(&self, batch: &BatchDescriptor) -> bool {
        if !batch.id.starts_with(&self.prefix) {
            return false;
        }
        if let Some(cursor) = &self.continuation {
            if batch.id.as_str() <= cursor.as_str() {
                return false;
            }
        }
        match &self.tick_filter {
            Some(range) => batch.intersects(range, self.sampling_interval),
            None => true,
        }
    }
}

/// One page of discovered batches, ascending by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPage {
    pub batches: Vec<BatchDescriptor>,
    /// Cursor for the next page; `None` when the listing is exhausted.
    pub next_continuation: Option<String>,
}

impl BatchPage {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Build a page from an ordered, already-filtered iterator.
    pub fn collect_from<I>(mut batches: I, page_size: usize) -> Self
    where
        I: Iterator<Item = BatchDescriptor>,
    {
        let page: Vec<BatchDescriptor> = batches.by_ref().take(page_size.max(1)).collect();
        let has_more = batches.next().is_some();
        let next_continuation = if has_more {
            page.last().map(|b| b.id.clone())
        } else {
            None
        };
        Self {
            batches: page,
            next_continuation,
        }
    }
}

/// Source of batch files.
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// List one page of batches matching the request.
    async fn list_batches(&self, request: &ListBatchesRequest) -> CoordResult<BatchPage>;

    /// Read the raw contents of a batch.
    async fn fetch(&self, batch: &BatchDescriptor) -> CoordResult<Vec<u8>>;
}

// ============================================================================
// IN-MEMORY SOURCE
// ============================================================================

/// Batch source backed by a map, for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBatchSource {
    batches: Arc<RwLock<BTreeMap<String, (BatchDescriptor, Vec<u8>)>>>,
}

impl InMemoryBatchSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a batch visible to subsequent listings.
    pub async fn publish(&self, batch: BatchDescriptor, contents: Vec<u8>) {
        let mut batches = self.batches.write().await;
        batches.insert(batch.id.clone(), (batch, contents));
    }

    /// Remove a batch (simulates late deletion upstream).
    pub async fn withdraw(&self, batch_id: &str) -> bool {
        self.batches.write().await.remove(batch_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.batches.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.batches.read().await.is_empty()
    }
}

#[async_trait]
impl BatchSource for InMemoryBatchSource {
    async fn list_batches(&self, request: &ListBatchesRequest) -> CoordResult<BatchPage> {
        let batches = self.batches.read().await;
        let matching = batches
            .values()
            .map(|(batch, _)| batch)
            .filter(|batch| request.accepts(batch))
            .cloned();
        Ok(BatchPage::collect_from(matching, request.page_size))
    }

    async fn fetch(&self, batch: &BatchDescriptor) -> CoordResult<Vec<u8>> {
        let batches = self.batches.read().await;
        batches
            .get(&batch.id)
            .map(|(_, contents)| contents.clone())
            .ok_or_else(|| {
                DiscoveryError::ReadFailed {
                    batch_id: batch.id.clone(),
                    reason: "batch not found".to_string(),
                }
                .into()
            })
    }
}
