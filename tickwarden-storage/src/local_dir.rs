//! Batch source over a local directory tree.
//!
//! A batch id is the file path relative to the root, using `/` separators.
//! The request prefix selects a directory (everything up to the last `/`)
//! and then filters file names inside it.

use crate::discovery::{BatchPage, BatchSource, ListBatchesRequest};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tickwarden_core::{parse_batch_name, BatchDescriptor, CoordResult, DiscoveryError};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LocalDirBatchSource {
    root: PathBuf,
}

impl LocalDirBatchSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All parseable batches under the prefix directory, sorted by id.
    async fn scan(&self, prefix: &str) -> CoordResult<Vec<BatchDescriptor>> {
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..=idx],
            None => "",
        };
        let dir = self.root.join(dir_part);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DiscoveryError::ListFailed {
                    prefix: prefix.to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        };

        let list_failed = |e: std::io::Error| DiscoveryError::ListFailed {
            prefix: prefix.to_string(),
            reason: e.to_string(),
        };

        let mut batches = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(list_failed)? {
            let file_type = entry.file_type().await.map_err(list_failed)?;
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let id = format!("{}{}", dir_part, name);
            if !id.starts_with(prefix) {
                continue;
            }
            match parse_batch_name(&id) {
                Ok(batch) => batches.push(batch),
                Err(e) => debug!(file = %id, error = %e, "Skipping non-batch file"),
            }
        }

        batches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(batches)
    }
}

#[async_trait]
impl BatchSource for LocalDirBatchSource {
    async fn list_batches(&self, request: &ListBatchesRequest) -> CoordResult<BatchPage> {
        let batches = self.scan(&request.prefix).await?;
        let matching = batches.into_iter().filter(|batch| request.accepts(batch));
        Ok(BatchPage::collect_from(matching, request.page_size))
    }

    async fn fetch(&self, batch: &BatchDescriptor) -> CoordResult<Vec<u8>> {
        tokio::fs::read(self.root.join(&batch.id))
            .await
            .map_err(|e| {
                DiscoveryError::ReadFailed {
                    batch_id: batch.id.clone(),
                    reason: e.to_string(),
                }
                .into()
            })
    }
}
