//! Sampling interval lookup.

use async_trait::async_trait;
use tickwarden_core::CoordResult;

/// Supplies the spacing between consecutive ticks of the current run.
///
/// `Ok(None)` means the run has not published its metadata yet; callers
/// treat that as "not ready" and retry later.
#[async_trait]
pub trait SamplingIntervalProvider: Send + Sync {
    async fn sampling_interval(&self) -> CoordResult<Option<i64>>;
}

/// A provider that always returns the same interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSamplingInterval(pub i64);

#[async_trait]
impl SamplingIntervalProvider for FixedSamplingInterval {
    async fn sampling_interval(&self) -> CoordResult<Option<i64>> {
        Ok(Some(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_interval() {
        let provider = FixedSamplingInterval(10);
        assert_eq!(provider.sampling_interval().await.unwrap(), Some(10));
    }
}
