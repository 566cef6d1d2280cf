//! Tickwarden Indexer - Batch Coordination and Gap Recovery Engine
//!
//! Workers of the same consumer class share a PostgreSQL claim/gap store and
//! nothing else. Each worker runs a [`SchedulingLoop`]:
//!
//! 1. fill the oldest pending gap, if a batch for it has arrived
//! 2. otherwise page through newly discovered batches, recording gaps
//!    against the completed high-water mark
//!
//! Claimed batches are decoded by the owning [`Indexer`], accumulated in a
//! [`TickBuffer`] and handed to [`Indexer::process`] in fixed-size chunks.
//! A batch is marked completed once its last record has been flushed.

pub mod buffer;
pub mod constants;
pub mod db;
pub mod gap_tracker;
pub mod indexer;
pub mod jobs;
pub mod metadata;
pub mod stats;
pub mod telemetry;

pub use buffer::TickBuffer;
pub use db::{DbClient, DbConfig};
pub use gap_tracker::GapTracker;
pub use indexer::{Indexer, JsonLinesTickIndexer, TickRow};
pub use jobs::{Iteration, SchedulingLoop};
pub use metadata::PgSamplingIntervalProvider;
pub use stats::{WorkerStats, WorkerStatsSnapshot};

pub use tickwarden_core::{CoordError, CoordResult, CoordinatorConfig};
