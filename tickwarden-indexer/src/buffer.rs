//! Tick buffer: accumulates decoded records across claimed batches and
//! hands them to the indexer in chunks of exactly `insert_batch_size`.
//!
//! A batch is marked completed at the flush that carries its last record.
//! If that status update fails transiently the batch id is kept and the
//! update is retried on the next `add_records`, `check_idle_timeout` or
//! `flush`. If a flush fails, every batch that still has unflushed records
//! is marked failed and the buffer is emptied.

use crate::indexer::Indexer;
use crate::stats::WorkerStats;
use crate::telemetry::metrics;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tickwarden_core::{CoordError, CoordResult};
use tickwarden_storage::CoordinationStore;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Why a flush happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Idle,
    Explicit,
}

impl FlushTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Idle => "idle",
            FlushTrigger::Explicit => "explicit",
        }
    }
}

/// A claimed batch whose records are not all flushed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingBatch {
    batch_id: String,
    /// Records of this batch not yet handed to the indexer.
    remaining: usize,
    /// All of this batch's records have entered the buffer.
    fully_added: bool,
}

pub struct TickBuffer<I: Indexer> {
    indexer: Arc<I>,
    store: Arc<dyn CoordinationStore>,
    consumer_class: String,
    insert_batch_size: usize,
    idle_flush: Duration,
    records: Vec<I::Record>,
    pending: VecDeque<PendingBatch>,
    /// Fully flushed batches whose completion update has not succeeded yet.
    unacknowledged: Vec<String>,
    last_added: Option<Instant>,
    stats: Arc<WorkerStats>,
}

impl<I: Indexer> TickBuffer<I> {
    pub fn new(
        indexer: Arc<I>,
        store: Arc<dyn CoordinationStore>,
        insert_batch_size: usize,
        idle_flush: Duration,
        stats: Arc<WorkerStats>,
    ) -> Self {
        let consumer_class = indexer.consumer_class().to_string();
        Self {
            indexer,
            store,
            consumer_class,
            insert_batch_size: insert_batch_size.max(1),
            idle_flush,
            records: Vec::with_capacity(insert_batch_size.max(1)),
            pending: VecDeque::new(),
            unacknowledged: Vec::new(),
            last_added: None,
            stats,
        }
    }

    /// Buffered records not yet flushed.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Batches awaiting completion, oldest first.
    pub fn pending_batches(&self) -> Vec<&str> {
        self.pending.iter().map(|p| p.batch_id.as_str()).collect()
    }

    /// Flushed batches still waiting for a successful completion update.
    pub fn unacknowledged_batches(&self) -> &[String] {
        &self.unacknowledged
    }

    /// Append a claimed batch's records, flushing every time the buffer
    /// reaches `insert_batch_size`. Returns the number of flushes performed.
    pub async fn add_records(
        &mut self,
        batch_id: &str,
        records: Vec<I::Record>,
    ) -> CoordResult<usize> {
        self.last_added = Some(Instant::now());
        WorkerStats::add(&self.stats.records_buffered, records.len() as u64);
        self.pending.push_back(PendingBatch {
            batch_id: batch_id.to_string(),
            remaining: records.len(),
            fully_added: false,
        });

        let mut incoming = records.into_iter();
        let mut flushes = 0;
        loop {
            let room = self.insert_batch_size.saturating_sub(self.records.len());
            self.records.extend(incoming.by_ref().take(room));
            let exhausted = incoming.len() == 0;
            if let Some(current) = self.pending.back_mut() {
                current.fully_added = exhausted;
            }

            if self.records.len() < self.insert_batch_size {
                break;
            }
            self.flush_buffer(FlushTrigger::Size).await?;
            flushes += 1;
            if exhausted {
                break;
            }
        }

        // Batches with nothing left in flight (e.g. empty files) complete now.
        let done = if self.records.is_empty() {
            self.settle(0)
        } else {
            Vec::new()
        };
        if !done.is_empty() || !self.unacknowledged.is_empty() {
            self.complete_batches(done).await?;
        }

        Ok(flushes)
    }

    /// Flush a non-empty buffer that has not been added to for longer than
    /// the idle window. Returns whether a flush happened.
    pub async fn check_idle_timeout(&mut self) -> CoordResult<bool> {
        if !self.unacknowledged.is_empty() {
            self.complete_batches(Vec::new()).await?;
        }
        let idle = match self.last_added {
            Some(at) => at.elapsed() >= self.idle_flush,
            None => false,
        };
        if self.records.is_empty() || !idle {
            return Ok(false);
        }
        self.flush_buffer(FlushTrigger::Idle).await?;
        Ok(true)
    }

    /// Drain everything that is buffered.
    pub async fn flush(&mut self) -> CoordResult<usize> {
        let flushed = self.flush_buffer(FlushTrigger::Explicit).await?;
        let done = self.settle(0);
        self.complete_batches(done).await?;
        Ok(flushed)
    }

    async fn flush_buffer(&mut self, trigger: FlushTrigger) -> CoordResult<usize> {
        if self.records.is_empty() {
            return Ok(0);
        }

        let records = std::mem::take(&mut self.records);
        let count = records.len();
        let class = self.consumer_class.as_str();

        let result = self.indexer.process(&records).await;
        match result {
            Ok(()) => {
                WorkerStats::incr(&self.stats.flushes);
                if let Some(m) = metrics() {
                    m.record_flush(class, true, count);
                }
                let done = self.settle(count);
                debug!(
                    consumer_class = %self.consumer_class,
                    records = count,
                    trigger = trigger.as_str(),
                    completed = done.len(),
                    "Flushed buffer"
                );
                self.complete_batches(done).await?;
                Ok(count)
            }
            Err(err) => {
                if let Some(m) = metrics() {
                    m.record_flush(class, false, count);
                }
                let reason = err.reason();
                let failed: Vec<String> = self.pending.drain(..).map(|p| p.batch_id).collect();
                error!(
                    consumer_class = %self.consumer_class,
                    records = count,
                    trigger = trigger.as_str(),
                    batches = failed.len(),
                    error = %reason,
                    "Flush failed; marking contributing batches failed"
                );
                for batch_id in &failed {
                    self.fail_batch(batch_id, &reason).await;
                }
                Err(err.into())
            }
        }
    }

    /// Attribute `flushed` records to pending batches in FIFO order and pop
    /// every batch that is now fully flushed.
    fn settle(&mut self, mut flushed: usize) -> Vec<String> {
        let mut done = Vec::new();
        while let Some(front) = self.pending.front_mut() {
            let taken = front.remaining.min(flushed);
            front.remaining -= taken;
            flushed -= taken;
            if front.remaining > 0 || !front.fully_added {
                break;
            }
            if let Some(batch) = self.pending.pop_front() {
                done.push(batch.batch_id);
            }
        }
        done
    }

    /// Mark `batch_ids`, plus any earlier unacknowledged ones, completed.
    /// Ids whose update failed transiently are kept for the next attempt.
    async fn complete_batches(&mut self, batch_ids: Vec<String>) -> CoordResult<()> {
        let mut ids = std::mem::take(&mut self.unacknowledged);
        ids.extend(batch_ids);

        let mut first_error: Option<CoordError> = None;
        for batch_id in ids {
            let result = self
                .store
                .mark_completed(&self.consumer_class, &batch_id)
                .await;
            match result {
                Ok(true) => WorkerStats::incr(&self.stats.batches_completed),
                Ok(false) => {
                    debug!(batch_id = %batch_id, "Batch already terminal; completion skipped")
                }
                Err(e) => {
                    error!(
                        consumer_class = %self.consumer_class,
                        batch_id = %batch_id,
                        error = %e,
                        "Failed to mark batch completed"
                    );
                    if e.is_retryable() {
                        self.unacknowledged.push(batch_id);
                    }
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn fail_batch(&self, batch_id: &str, reason: &str) {
        match self
            .store
            .mark_failed(&self.consumer_class, batch_id, reason)
            .await
        {
            Ok(true) => WorkerStats::incr(&self.stats.batches_failed),
            Ok(false) => debug!(batch_id, "Batch already terminal; failure skipped"),
            Err(e) => warn!(
                consumer_class = %self.consumer_class,
                batch_id,
                error = %e,
                "Failed to mark batch failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tickwarden_core::{BatchDescriptor, ClaimStatus, ProcessingError};
    use tickwarden_storage::{ClaimStore, InMemoryCoordinationStore};

    const CLASS: &str = "trades";

    #[derive(Default)]
    struct ChunkRecorder {
        chunks: Mutex<Vec<usize>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Indexer for ChunkRecorder {
        type Record = u32;

        fn consumer_class(&self) -> &str {
            CLASS
        }

        fn decode(&self, _: &BatchDescriptor, _: &[u8]) -> Result<Vec<u32>, ProcessingError> {
            Ok(Vec::new())
        }

        async fn process(&self, records: &[u32]) -> Result<(), ProcessingError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ProcessingError::Downstream {
                    reason: "sink unavailable".to_string(),
                });
            }
            self.chunks.lock().unwrap().push(records.len());
            Ok(())
        }
    }

    struct Harness {
        store: InMemoryCoordinationStore,
        indexer: Arc<ChunkRecorder>,
        buffer: TickBuffer<ChunkRecorder>,
    }

    fn harness(insert_batch_size: usize) -> Harness {
        let store = InMemoryCoordinationStore::new();
        let indexer = Arc::new(ChunkRecorder::default());
        let buffer = TickBuffer::new(
            indexer.clone(),
            Arc::new(store.clone()),
            insert_batch_size,
            Duration::from_secs(5),
            Arc::new(WorkerStats::new()),
        );
        Harness {
            store,
            indexer,
            buffer,
        }
    }

    async fn claim(store: &InMemoryCoordinationStore, n: i64) -> String {
        let batch = BatchDescriptor::new(format!("batch-{}", n), n * 1000, n * 1000 + 990);
        store.try_claim(CLASS, &batch).await.unwrap();
        batch.id
    }

    async fn status(store: &InMemoryCoordinationStore, id: &str) -> ClaimStatus {
        store.claim_get(CLASS, id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_two_batches_flush_four_times_at_500() {
        let mut h = harness(500);
        for n in 0..2 {
            let id = claim(&h.store, n).await;
            h.buffer.add_records(&id, vec![0; 1000]).await.unwrap();
        }
        assert_eq!(*h.indexer.chunks.lock().unwrap(), vec![500, 500, 500, 500]);
        assert!(h.buffer.is_empty());
        assert!(h.buffer.pending_batches().is_empty());
        assert_eq!(h.store.claim_counts(CLASS).await.unwrap().completed, 2);
    }

    #[tokio::test]
    async fn test_ten_batches_flush_twice_at_5000() {
        let mut h = harness(5000);
        for n in 0..10 {
            let id = claim(&h.store, n).await;
            h.buffer.add_records(&id, vec![0; 1000]).await.unwrap();
        }
        assert_eq!(*h.indexer.chunks.lock().unwrap(), vec![5000, 5000]);
        assert_eq!(h.store.claim_counts(CLASS).await.unwrap().completed, 10);
    }

    #[tokio::test]
    async fn test_straddling_batch_completes_on_last_record() {
        let mut h = harness(1500);
        let first = claim(&h.store, 0).await;
        let second = claim(&h.store, 1).await;

        assert_eq!(h.buffer.add_records(&first, vec![0; 1000]).await.unwrap(), 0);
        assert_eq!(status(&h.store, &first).await, ClaimStatus::Claimed);

        assert_eq!(h.buffer.add_records(&second, vec![0; 1000]).await.unwrap(), 1);
        assert_eq!(status(&h.store, &first).await, ClaimStatus::Completed);
        assert_eq!(status(&h.store, &second).await, ClaimStatus::Claimed);
        assert_eq!(h.buffer.len(), 500);

        assert_eq!(h.buffer.flush().await.unwrap(), 500);
        assert_eq!(status(&h.store, &second).await, ClaimStatus::Completed);
    }

    #[tokio::test]
    async fn test_empty_batch_completes_immediately_when_idle() {
        let mut h = harness(10);
        let id = claim(&h.store, 0).await;
        h.buffer.add_records(&id, Vec::new()).await.unwrap();
        assert_eq!(status(&h.store, &id).await, ClaimStatus::Completed);
        assert!(h.indexer.chunks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_flush_marks_all_pending_failed() {
        let mut h = harness(1500);
        let first = claim(&h.store, 0).await;
        let second = claim(&h.store, 1).await;
        h.buffer.add_records(&first, vec![0; 1000]).await.unwrap();

        h.indexer.fail.store(true, Ordering::SeqCst);
        let err = h.buffer.add_records(&second, vec![0; 1000]).await.unwrap_err();
        assert!(matches!(err, CoordError::Processing(_)));

        assert_eq!(status(&h.store, &first).await, ClaimStatus::Failed);
        assert_eq!(status(&h.store, &second).await, ClaimStatus::Failed);
        let claim = h.store.claim_get(CLASS, &first).await.unwrap().unwrap();
        assert!(claim.failure_reason.unwrap().contains("sink unavailable"));

        assert!(h.buffer.is_empty());
        assert!(h.buffer.pending_batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_flushes_partial_buffer() {
        let mut h = harness(1000);
        let id = claim(&h.store, 0).await;
        h.buffer.add_records(&id, vec![0; 10]).await.unwrap();

        assert!(!h.buffer.check_idle_timeout().await.unwrap());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(h.buffer.check_idle_timeout().await.unwrap());

        assert_eq!(*h.indexer.chunks.lock().unwrap(), vec![10]);
        assert_eq!(status(&h.store, &id).await, ClaimStatus::Completed);
        assert!(!h.buffer.check_idle_timeout().await.unwrap());
    }
}
