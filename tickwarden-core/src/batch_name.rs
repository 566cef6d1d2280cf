//! Batch file naming scheme.
//!
//! Names look like `batch_0000000000000001000_0000000000000001990.jsonl`.
//! Both ticks are inclusive and zero-padded to 19 digits so that
//! lexicographic order matches tick order.

use crate::{BatchDescriptor, DiscoveryError, Tick};
use once_cell::sync::Lazy;
use regex::Regex;

pub const BATCH_FILE_PREFIX: &str = "batch_";
pub const BATCH_FILE_EXTENSION: &str = "jsonl";

static BATCH_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^batch_(\d{19})_(\d{19})\.jsonl$").expect("Invalid batch name regex")
});

/// File name for a batch covering `[tick_start, tick_end]` (inclusive).
pub fn format_batch_name(tick_start: Tick, tick_end: Tick) -> String {
    format!(
        "{}{:019}_{:019}.{}",
        BATCH_FILE_PREFIX, tick_start, tick_end, BATCH_FILE_EXTENSION
    )
}

/// Parse a batch identifier into a descriptor.
///
/// The identifier may carry a path prefix (`run-7/batch_..._....jsonl`); only
/// the final path segment is matched, and the full identifier is kept as `id`.
pub fn parse_batch_name(id: &str) -> Result<BatchDescriptor, DiscoveryError> {
    let file_name = id.rsplit('/').next().unwrap_or(id);
    let invalid = |reason: &str| DiscoveryError::InvalidBatchName {
        name: id.to_string(),
        reason: reason.to_string(),
    };

    let captures = BATCH_NAME_RE
        .captures(file_name)
        .ok_or_else(|| invalid("does not match batch_<start>_<end>.jsonl"))?;

    let tick_start: Tick = captures[1]
        .parse()
        .map_err(|_| invalid("start tick out of range"))?;
    let tick_end: Tick = captures[2]
        .parse()
        .map_err(|_| invalid("end tick out of range"))?;

    if tick_end < tick_start {
        return Err(invalid("end tick precedes start tick"));
    }

    Ok(BatchDescriptor::new(id, tick_start, tick_end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_is_zero_padded() {
        assert_eq!(
            format_batch_name(1000, 1990),
            "batch_0000000000000001000_0000000000000001990.jsonl"
        );
    }

    #[test]
    fn test_parse_plain_name() {
        let batch = parse_batch_name(&format_batch_name(0, 990)).unwrap();
        assert_eq!(batch.tick_start, 0);
        assert_eq!(batch.tick_end, 990);
    }

    #[test]
    fn test_parse_keeps_prefix_in_id() {
        let id = format!("run-7/{}", format_batch_name(2000, 2990));
        let batch = parse_batch_name(&id).unwrap();
        assert_eq!(batch.id, id);
        assert_eq!(batch.tick_start, 2000);
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        assert!(matches!(
            parse_batch_name("README.md"),
            Err(DiscoveryError::InvalidBatchName { .. })
        ));
        assert!(parse_batch_name("batch_12_34.jsonl").is_err());
    }

    #[test]
    fn test_parse_rejects_inverted_range() {
        let err = parse_batch_name(&format_batch_name(500, 100)).unwrap_err();
        assert!(err.to_string().contains("precedes"));
    }

    #[test]
    fn test_lexicographic_order_matches_tick_order() {
        let mut names = vec![
            format_batch_name(10_000, 10_990),
            format_batch_name(2000, 2990),
            format_batch_name(0, 990),
        ];
        names.sort();
        let starts: Vec<Tick> = names
            .iter()
            .map(|n| parse_batch_name(n).unwrap().tick_start)
            .collect();
        assert_eq!(starts, vec![0, 2000, 10_000]);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_name_codec_recovers_ticks(start in 0i64..i64::MAX / 2, len in 0i64..1_000_000) {
            let name = format_batch_name(start, start + len);
            let batch = parse_batch_name(&name).unwrap();
            prop_assert_eq!(batch.tick_start, start);
            prop_assert_eq!(batch.tick_end, start + len);
        }
    }
}
