//! End-to-end scheduling scenarios against the in-memory store.
//!
//! Every test runs on a paused clock so that poll intervals, flush delays and
//! error backoffs advance instantly once all workers are waiting.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tickwarden_indexer::indexer::decode_json_lines;
use tickwarden_indexer::{SchedulingLoop, TickBuffer, WorkerStats, WorkerStatsSnapshot};
use tickwarden_storage::{BatchSource, ClaimStore, CoordinationStore, GapStore};
use tickwarden_test_utils::assertions::{assert_all_claims, assert_fatal};
use tickwarden_test_utils::fixtures::{
    contiguous_batches, fast_config, jsonl_contents, publish_batches,
};
use tickwarden_test_utils::*;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const INTERVAL: i64 = 10;

struct Fleet {
    shutdown: watch::Sender<bool>,
    workers: Vec<(Arc<WorkerStats>, JoinHandle<CoordResult<WorkerStatsSnapshot>>)>,
}

impl Fleet {
    fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            workers: Vec::new(),
        }
    }

    fn spawn(
        &mut self,
        config: CoordinatorConfig,
        store: Arc<dyn CoordinationStore>,
        source: Arc<dyn BatchSource>,
        indexer: Arc<RecordingIndexer>,
    ) {
        let worker = SchedulingLoop::new(
            config,
            INTERVAL,
            store,
            source,
            indexer,
            self.shutdown.subscribe(),
        )
        .unwrap();
        let stats = worker.stats();
        self.workers.push((stats, tokio::spawn(worker.run())));
    }

    fn stats(&self) -> Vec<WorkerStatsSnapshot> {
        self.workers.iter().map(|(s, _)| s.snapshot()).collect()
    }

    async fn stop(self) -> Vec<CoordResult<WorkerStatsSnapshot>> {
        let _ = self.shutdown.send(true);
        let mut results = Vec::new();
        for (_, handle) in self.workers {
            results.push(handle.await.unwrap());
        }
        results
    }
}

/// Poll `check` every 100ms of (paused) time until it holds.
async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..600 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached within 60s of test time");
}

async fn completed(store: &InMemoryCoordinationStore, class: &str) -> u64 {
    store.claim_counts(class).await.unwrap().completed
}

// ============================================================================
// COMPETING CONSUMERS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_competing_workers_claim_each_batch_once() {
    let store = &InMemoryCoordinationStore::new();
    let source = InMemoryBatchSource::new();
    let batches = contiguous_batches(0, 50, 100, INTERVAL);
    publish_batches(&source, &batches, INTERVAL).await;

    let mut config = fast_config("trades");
    config.insert_batch_size = 100;

    let mut fleet = Fleet::new();
    let mut indexers = Vec::new();
    for _ in 0..3 {
        let indexer =
            Arc::new(RecordingIndexer::new("trades").with_delay(Duration::from_millis(10)));
        fleet.spawn(
            config.clone(),
            Arc::new(store.clone()),
            Arc::new(source.clone()),
            indexer.clone(),
        );
        indexers.push(indexer);
    }

    wait_until(|| async move { completed(store, "trades").await == 50 }).await;
    let results = fleet.stop().await;

    let claimed: Vec<u64> = results
        .iter()
        .map(|r| r.as_ref().unwrap().batches_claimed)
        .collect();
    assert_eq!(claimed.iter().sum::<u64>(), 50);
    assert!(claimed.iter().all(|&n| n > 0), "idle worker: {:?}", claimed);

    let per_worker: Vec<HashSet<Tick>> = indexers
        .iter()
        .map(|indexer| indexer.ticks().into_iter().collect())
        .collect();
    for (i, ticks) in per_worker.iter().enumerate() {
        assert!(!ticks.is_empty(), "worker {} processed nothing", i);
        for other in &per_worker[i + 1..] {
            assert!(ticks.is_disjoint(other));
        }
    }
    assert_eq!(per_worker.iter().map(HashSet::len).sum::<usize>(), 5000);

    assert!(store.list_gaps("trades").await.unwrap().is_empty());
    assert_all_claims(store, "trades", &batches, ClaimStatus::Completed).await;
}

#[tokio::test(start_paused = true)]
async fn test_consumer_classes_are_independent() {
    let store = &InMemoryCoordinationStore::new();
    let source = InMemoryBatchSource::new();
    let batches = contiguous_batches(0, 10, 100, INTERVAL);
    publish_batches(&source, &batches, INTERVAL).await;

    let trades = Arc::new(RecordingIndexer::new("trades"));
    let quotes = Arc::new(RecordingIndexer::new("quotes"));

    let mut fleet = Fleet::new();
    for (class, indexer) in [("trades", &trades), ("quotes", &quotes)] {
        let mut config = fast_config(class);
        config.insert_batch_size = 100;
        fleet.spawn(
            config,
            Arc::new(store.clone()),
            Arc::new(source.clone()),
            indexer.clone(),
        );
    }

    wait_until(|| async move {
        completed(store, "trades").await == 10 && completed(store, "quotes").await == 10
    })
    .await;
    fleet.stop().await;

    assert_eq!(trades.ticks().len(), 1000);
    assert_eq!(quotes.ticks().len(), 1000);
}

// ============================================================================
// GAP RECOVERY
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_late_batch_fills_recorded_gap() {
    let store = &InMemoryCoordinationStore::new();
    let source = InMemoryBatchSource::new();
    let batches = contiguous_batches(0, 4, 100, INTERVAL);
    publish_batches(
        &source,
        &[batches[0].clone(), batches[1].clone(), batches[3].clone()],
        INTERVAL,
    )
    .await;

    let indexer = Arc::new(RecordingIndexer::new("trades"));
    let mut config = fast_config("trades");
    config.insert_batch_size = 100;

    let mut fleet = Fleet::new();
    fleet.spawn(
        config,
        Arc::new(store.clone()),
        Arc::new(source.clone()),
        indexer.clone(),
    );

    wait_until(|| async move { completed(store, "trades").await == 3 }).await;
    let gaps = store.list_gaps("trades").await.unwrap();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].range(), TickRange::new(2000, 3000));
    assert_eq!(gaps[0].status, GapStatus::Pending);

    publish_batches(&source, &batches[2..3], INTERVAL).await;
    wait_until(|| async move { completed(store, "trades").await == 4 }).await;
    let stats = fleet.stats();
    fleet.stop().await;

    assert!(store.list_gaps("trades").await.unwrap().is_empty());
    assert_eq!(stats[0].gaps_recorded, 1);
    assert!(stats[0].gaps_split >= 1);

    let mut ticks = indexer.ticks();
    ticks.sort_unstable();
    let expected: Vec<i64> = (0..400).map(|i| i * INTERVAL).collect();
    assert_eq!(ticks, expected);
}

#[tokio::test(start_paused = true)]
async fn test_stale_gap_is_reported_permanent_once() {
    let store = &InMemoryCoordinationStore::new();
    let source = InMemoryBatchSource::new();
    store
        .record_gap(
            "trades",
            TickRange::new(0, 1000),
            chrono::Utc::now() - chrono::Duration::hours(2),
        )
        .await
        .unwrap();

    let indexer = Arc::new(RecordingIndexer::new("trades"));
    let mut fleet = Fleet::new();
    for _ in 0..2 {
        fleet.spawn(
            fast_config("trades"),
            Arc::new(store.clone()),
            Arc::new(source.clone()),
            indexer.clone(),
        );
    }

    wait_until(|| async move {
        store.list_gaps("trades").await.unwrap()[0].status == GapStatus::Permanent
    })
    .await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let results = fleet.stop().await;

    let reported: u64 = results
        .iter()
        .map(|r| r.as_ref().unwrap().gaps_permanent)
        .sum();
    assert_eq!(reported, 1);
    assert!(store.oldest_pending_gap("trades").await.unwrap().is_none());
}

// ============================================================================
// BUFFERING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_flushes_are_exact_chunks_across_batches() {
    let store = &InMemoryCoordinationStore::new();
    let source = InMemoryBatchSource::new();
    let batches = contiguous_batches(0, 2, 1000, 1);
    publish_batches(&source, &batches, 1).await;

    let indexer = Arc::new(RecordingIndexer::new("trades"));
    let mut config = fast_config("trades");
    config.insert_batch_size = 500;

    let worker = SchedulingLoop::new(
        config,
        1,
        Arc::new(store.clone()),
        Arc::new(source.clone()),
        indexer.clone(),
        watch::channel(false).1,
    )
    .unwrap();
    let handle = tokio::spawn(worker.run());

    wait_until(|| async move { completed(store, "trades").await == 2 }).await;
    handle.abort();

    assert_eq!(indexer.chunk_sizes(), vec![500, 500, 500, 500]);
}

#[tokio::test(start_paused = true)]
async fn test_idle_buffer_is_flushed_after_timeout() {
    let store = &InMemoryCoordinationStore::new();
    let source = InMemoryBatchSource::new();
    let batches = contiguous_batches(0, 1, 100, INTERVAL);
    publish_batches(&source, &batches, INTERVAL).await;

    let indexer = Arc::new(RecordingIndexer::new("trades"));
    let mut fleet = Fleet::new();
    fleet.spawn(
        fast_config("trades"),
        Arc::new(store.clone()),
        Arc::new(source.clone()),
        indexer.clone(),
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_all_claims(store, "trades", &batches, ClaimStatus::Claimed).await;

    wait_until(|| async move { completed(store, "trades").await == 1 }).await;
    fleet.stop().await;
    assert_eq!(indexer.chunk_sizes(), vec![100]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_flush_marks_batches_failed_and_continues() {
    let store = &InMemoryCoordinationStore::new();
    let source = InMemoryBatchSource::new();
    let batches = contiguous_batches(0, 3, 100, INTERVAL);
    publish_batches(&source, &batches[..1], INTERVAL).await;

    let indexer = Arc::new(RecordingIndexer::new("trades"));
    indexer.set_failing(true);
    let mut config = fast_config("trades");
    config.insert_batch_size = 100;

    let mut fleet = Fleet::new();
    fleet.spawn(
        config,
        Arc::new(store.clone()),
        Arc::new(source.clone()),
        indexer.clone(),
    );

    wait_until(|| async move { store.claim_counts("trades").await.unwrap().failed == 1 }).await;

    indexer.set_failing(false);
    publish_batches(&source, &batches[1..], INTERVAL).await;
    wait_until(|| async move { completed(store, "trades").await == 2 }).await;
    fleet.stop().await;

    assert_all_claims(store, "trades", &batches[..1], ClaimStatus::Failed).await;
    assert_all_claims(store, "trades", &batches[1..], ClaimStatus::Completed).await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_completion_update_is_retried() {
    let store = Arc::new(FlakyStore::new(InMemoryCoordinationStore::new()));
    let indexer = Arc::new(RecordingIndexer::new("trades"));
    let mut buffer = TickBuffer::new(
        indexer.clone(),
        store.clone(),
        100,
        Duration::from_secs(5),
        Arc::new(WorkerStats::new()),
    );

    let batches = contiguous_batches(0, 1, 100, INTERVAL);
    let batch = &batches[0];
    store.try_claim("trades", batch).await.unwrap();
    let rows = decode_json_lines(batch, &jsonl_contents(batch, INTERVAL)).unwrap();

    store.fail_next_completions(1);
    let err = buffer.add_records(&batch.id, rows).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(indexer.chunk_sizes(), vec![100]);
    assert_eq!(buffer.unacknowledged_batches().to_vec(), vec![batch.id.clone()]);
    assert_all_claims(store.inner(), "trades", &batches, ClaimStatus::Claimed).await;

    // Nothing buffered, so no idle flush; the pending completion still lands.
    assert!(!buffer.check_idle_timeout().await.unwrap());
    assert!(buffer.unacknowledged_batches().is_empty());
    assert_all_claims(store.inner(), "trades", &batches, ClaimStatus::Completed).await;
    assert_eq!(indexer.chunk_sizes(), vec![100]);
}

#[tokio::test(start_paused = true)]
async fn test_loop_recovers_from_failed_completion_update() {
    let store = &Arc::new(FlakyStore::new(InMemoryCoordinationStore::new()));
    let source = InMemoryBatchSource::new();
    let batches = contiguous_batches(0, 3, 100, INTERVAL);
    publish_batches(&source, &batches, INTERVAL).await;
    store.fail_next_completions(1);

    let indexer = Arc::new(RecordingIndexer::new("trades"));
    let mut config = fast_config("trades");
    config.insert_batch_size = 100;

    let mut fleet = Fleet::new();
    fleet.spawn(config, store.clone(), Arc::new(source.clone()), indexer.clone());

    wait_until(|| async move { completed(store.inner(), "trades").await == 3 }).await;
    let results = fleet.stop().await;

    let stats = results[0].as_ref().unwrap();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.batches_completed, 3);
    assert_eq!(indexer.chunk_sizes(), vec![100, 100, 100]);
    assert_all_claims(store.inner(), "trades", &batches, ClaimStatus::Completed).await;
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_claim_failures_are_retried() {
    let store = &Arc::new(FlakyStore::new(InMemoryCoordinationStore::new()));
    let source = InMemoryBatchSource::new();
    let batches = contiguous_batches(0, 5, 100, INTERVAL);
    publish_batches(&source, &batches, INTERVAL).await;
    store.fail_next_claims(3);

    let indexer = Arc::new(RecordingIndexer::new("trades"));
    let mut config = fast_config("trades");
    config.insert_batch_size = 100;

    let mut fleet = Fleet::new();
    fleet.spawn(config, store.clone(), Arc::new(source.clone()), indexer.clone());

    wait_until(|| async move {
        completed(store.inner(), "trades").await == 5 && store.releases() >= 1
    })
    .await;
    let results = fleet.stop().await;

    let stats = results[0].as_ref().unwrap();
    assert_eq!(stats.errors, 3);
    assert_eq!(stats.batches_claimed, 5);
    assert!(store.inner().list_gaps("trades").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_closed_pool_stops_the_loop() {
    let store = &Arc::new(FlakyStore::new(InMemoryCoordinationStore::new()));
    let source = InMemoryBatchSource::new();
    publish_batches(&source, &contiguous_batches(0, 2, 100, INTERVAL), INTERVAL).await;
    store.close();

    let worker = SchedulingLoop::new(
        fast_config("trades"),
        INTERVAL,
        store.clone(),
        Arc::new(source.clone()),
        Arc::new(RecordingIndexer::new("trades")),
        watch::channel(false).1,
    )
    .unwrap();

    let result = worker.run().await;
    assert_fatal(&result);
}
