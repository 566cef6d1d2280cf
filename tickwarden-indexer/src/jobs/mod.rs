//! Background Jobs for the tickwarden indexer
//!
//! - `scheduler`: the per-worker two-phase scheduling loop
//!
//! # Usage
//!
//! ```ignore
//! use tickwarden_indexer::jobs::SchedulingLoop;
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let worker = SchedulingLoop::new(config, interval, store, source, indexer, shutdown_rx)?;
//! let handle = tokio::spawn(worker.run());
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let stats = handle.await??;
//! ```

pub mod scheduler;

pub use scheduler::{Iteration, SchedulingLoop};
