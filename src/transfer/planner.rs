//! Byte range planning
//!
//! Turns an object size and the transfer settings into a strategy and an
//! ordered list of [`Part`]s. Planning is pure and deterministic: the same
//! inputs always give the same part list.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{TransferDirection, MAX_PARTS, MAX_PART_SIZE, MAX_SINGLE_PUT_SIZE};
use crate::error::{Result, TransferError};

/// Caller's choice of strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyOverride {
    /// Single request when the object fits in one chunk, split otherwise
    #[default]
    Auto,
    /// One request for the whole object
    ForceSingle,
    /// Multipart upload even for small objects
    ForceMultipart,
    /// Ranged download even for small objects
    ForceChunked,
}

/// Strategy a plan was built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    SingleShot,
    Multipart,
    Chunked,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::SingleShot => write!(f, "single-shot"),
            Strategy::Multipart => write!(f, "multipart"),
            Strategy::Chunked => write!(f, "chunked"),
        }
    }
}

/// Contiguous byte range of the object moved by one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Part {
    /// 0-based ordinal; index order equals byte order
    pub index: usize,
    /// Offset of the first byte
    pub start: u64,
    /// Number of bytes
    pub length: u64,
}

impl Part {
    /// Offset one past the last byte
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    /// Offset of the last byte, `None` for an empty part
    pub fn end_inclusive(&self) -> Option<u64> {
        self.length.checked_sub(1).map(|n| self.start + n)
    }

    /// 1-based number used by the multipart protocol
    pub fn part_number(&self) -> i32 {
        i32::try_from(self.index + 1).unwrap_or(i32::MAX)
    }

    /// HTTP `Range` header value
    pub fn range_header(&self) -> Option<String> {
        self.end_inclusive()
            .map(|end| format!("bytes={}-{}", self.start, end))
    }
}

/// Output of [`ByteRangePlanner::plan`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub strategy: Strategy,
    pub parts: Vec<Part>,
    pub object_size: u64,
    /// Workers worth starting for this plan
    pub concurrency: usize,
}

impl TransferPlan {
    pub fn is_single_shot(&self) -> bool {
        self.strategy == Strategy::SingleShot
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }
}

/// Splits objects into parts for one direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRangePlanner {
    direction: TransferDirection,
    chunk_size: u64,
    workers: usize,
    single_shot_limit: u64,
}

impl ByteRangePlanner {
    pub fn new(direction: TransferDirection, chunk_size: u64, workers: usize) -> Self {
        Self {
            direction,
            chunk_size,
            workers,
            single_shot_limit: super::DEFAULT_SINGLE_SHOT_LIMIT,
        }
    }

    /// Largest object a forced single-shot transfer may buffer in memory
    pub fn with_single_shot_limit(mut self, limit: u64) -> Self {
        self.single_shot_limit = limit;
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    fn validate(&self, strategy: StrategyOverride) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidConfiguration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_size > MAX_PART_SIZE {
            return Err(TransferError::InvalidConfiguration(format!(
                "chunk size {} exceeds the maximum part size {}",
                self.chunk_size, MAX_PART_SIZE
            )));
        }
        if self.workers == 0 {
            return Err(TransferError::InvalidConfiguration(
                "worker count must be at least 1".to_string(),
            ));
        }
        match (self.direction, strategy) {
            (TransferDirection::Upload, StrategyOverride::ForceChunked) => {
                Err(TransferError::InvalidConfiguration(
                    "forced chunked strategy only applies to downloads".to_string(),
                ))
            }
            (TransferDirection::Download, StrategyOverride::ForceMultipart) => {
                Err(TransferError::InvalidConfiguration(
                    "forced multipart strategy only applies to uploads".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Plan a transfer of `object_size` bytes
    pub fn plan(&self, object_size: u64, strategy: StrategyOverride) -> Result<TransferPlan> {
        self.validate(strategy)?;

        // No store handles a zero-length multipart part reliably.
        if object_size == 0 {
            return Ok(self.single_shot(0));
        }

        match strategy {
            StrategyOverride::ForceSingle => {
                self.check_single_shot(object_size)?;
                Ok(self.single_shot(object_size))
            }
            StrategyOverride::ForceMultipart | StrategyOverride::ForceChunked => {
                self.split(object_size)
            }
            StrategyOverride::Auto if object_size <= self.chunk_size => {
                Ok(self.single_shot(object_size))
            }
            StrategyOverride::Auto => self.split(object_size),
        }
    }

    fn check_single_shot(&self, object_size: u64) -> Result<()> {
        if self.direction == TransferDirection::Upload && object_size > MAX_SINGLE_PUT_SIZE {
            return Err(TransferError::InvalidConfiguration(format!(
                "object of {} bytes exceeds the single PUT limit of {} bytes",
                object_size, MAX_SINGLE_PUT_SIZE
            )));
        }
        if object_size > self.single_shot_limit {
            return Err(TransferError::InvalidConfiguration(format!(
                "single-shot {} of {} bytes exceeds the in-memory limit of {} bytes",
                self.direction.to_string().to_lowercase(),
                object_size,
                self.single_shot_limit
            )));
        }
        Ok(())
    }

    fn single_shot(&self, object_size: u64) -> TransferPlan {
        TransferPlan {
            strategy: Strategy::SingleShot,
            parts: vec![Part {
                index: 0,
                start: 0,
                length: object_size,
            }],
            object_size,
            concurrency: 1,
        }
    }

    fn split(&self, object_size: u64) -> Result<TransferPlan> {
        let count = object_size.div_ceil(self.chunk_size);
        if count > MAX_PARTS as u64 {
            return Err(TransferError::InvalidConfiguration(format!(
                "{} bytes at chunk size {} needs {} parts, the store allows {}",
                object_size, self.chunk_size, count, MAX_PARTS
            )));
        }

        let parts: Vec<Part> = (0..count)
            .map(|i| {
                let start = i * self.chunk_size;
                Part {
                    index: i as usize,
                    start,
                    length: self.chunk_size.min(object_size - start),
                }
            })
            .collect();

        let strategy = match self.direction {
            TransferDirection::Upload => Strategy::Multipart,
            TransferDirection::Download => Strategy::Chunked,
        };

        Ok(TransferPlan {
            strategy,
            concurrency: self.workers.min(parts.len()),
            parts,
            object_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{KIB, MIB};

    fn upload(chunk: u64) -> ByteRangePlanner {
        ByteRangePlanner::new(TransferDirection::Upload, chunk, 4)
    }

    fn download(chunk: u64) -> ByteRangePlanner {
        ByteRangePlanner::new(TransferDirection::Download, chunk, 4)
    }

    fn assert_covers(plan: &TransferPlan, size: u64) {
        let mut next = 0;
        for (i, part) in plan.parts.iter().enumerate() {
            assert_eq!(part.index, i);
            assert_eq!(part.start, next, "gap or overlap before part {}", i);
            next = part.end();
        }
        assert_eq!(next, size);
    }

    #[test]
    fn test_twelve_mib_in_five_mib_chunks() {
        let plan = upload(5 * MIB).plan(12 * MIB, StrategyOverride::Auto).unwrap();
        assert_eq!(plan.strategy, Strategy::Multipart);
        let lengths: Vec<u64> = plan.parts.iter().map(|p| p.length).collect();
        assert_eq!(lengths, vec![5 * MIB, 5 * MIB, 2 * MIB]);
        assert_eq!(plan.concurrency, 3);
        assert_covers(&plan, 12 * MIB);
    }

    #[test]
    fn test_small_object_is_single_shot() {
        let plan = upload(5 * MIB).plan(3 * MIB, StrategyOverride::Auto).unwrap();
        assert_eq!(plan.strategy, Strategy::SingleShot);
        assert_eq!(plan.parts, vec![Part { index: 0, start: 0, length: 3 * MIB }]);
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let plan = download(4).plan(12, StrategyOverride::Auto).unwrap();
        assert_eq!(plan.strategy, Strategy::Chunked);
        assert_eq!(plan.part_count(), 3);
        assert!(plan.parts.iter().all(|p| p.length == 4));
    }

    #[test]
    fn test_size_equal_to_chunk_is_single_shot() {
        let plan = upload(10).plan(10, StrategyOverride::Auto).unwrap();
        assert!(plan.is_single_shot());
    }

    #[test]
    fn test_zero_size_is_single_shot_for_every_override() {
        for (planner, strategy) in [
            (upload(5), StrategyOverride::Auto),
            (upload(5), StrategyOverride::ForceSingle),
            (upload(5), StrategyOverride::ForceMultipart),
            (download(5), StrategyOverride::ForceChunked),
            (download(5), StrategyOverride::ForceSingle),
        ] {
            let plan = planner.plan(0, strategy).unwrap();
            assert_eq!(plan.strategy, Strategy::SingleShot);
            assert_eq!(plan.parts, vec![Part { index: 0, start: 0, length: 0 }]);
            assert_eq!(plan.parts[0].end_inclusive(), None);
            assert_eq!(plan.parts[0].range_header(), None);
        }
    }

    #[test]
    fn test_force_chunked_small_object() {
        let plan = download(5 * MIB).plan(KIB, StrategyOverride::ForceChunked).unwrap();
        assert_eq!(plan.strategy, Strategy::Chunked);
        assert_eq!(plan.parts, vec![Part { index: 0, start: 0, length: KIB }]);
    }

    #[test]
    fn test_force_multipart_splits_small_object() {
        let plan = upload(400).plan(KIB, StrategyOverride::ForceMultipart).unwrap();
        assert_eq!(plan.strategy, Strategy::Multipart);
        let lengths: Vec<u64> = plan.parts.iter().map(|p| p.length).collect();
        assert_eq!(lengths, vec![400, 400, 224]);
    }

    #[test]
    fn test_force_single_large_object() {
        let plan = upload(5).plan(100, StrategyOverride::ForceSingle).unwrap();
        assert_eq!(plan.strategy, Strategy::SingleShot);
        assert_eq!(plan.parts[0].length, 100);
    }

    #[test]
    fn test_force_single_download_over_memory_limit_rejected() {
        let planner = download(5 * MIB).with_single_shot_limit(64 * MIB);
        let err = planner
            .plan(65 * MIB, StrategyOverride::ForceSingle)
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidConfiguration(_)));
        assert!(planner.plan(64 * MIB, StrategyOverride::ForceSingle).is_ok());
    }

    #[test]
    fn test_force_single_upload_over_put_limit_rejected() {
        let planner = upload(5 * MIB).with_single_shot_limit(u64::MAX);
        assert!(planner
            .plan(MAX_SINGLE_PUT_SIZE + 1, StrategyOverride::ForceSingle)
            .is_err());
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(upload(0).plan(10, StrategyOverride::Auto).is_err());
        assert!(ByteRangePlanner::new(TransferDirection::Upload, 5, 0)
            .plan(10, StrategyOverride::Auto)
            .is_err());
        assert!(upload(5).plan(10, StrategyOverride::ForceChunked).is_err());
        assert!(download(5).plan(10, StrategyOverride::ForceMultipart).is_err());
        assert!(upload(MAX_PART_SIZE + 1).plan(10, StrategyOverride::Auto).is_err());
    }

    #[test]
    fn test_part_limit() {
        let err = upload(1).plan(MAX_PARTS as u64 + 1, StrategyOverride::Auto).unwrap_err();
        assert!(err.to_string().contains("parts"));
        assert!(upload(1).plan(MAX_PARTS as u64, StrategyOverride::Auto).is_ok());
    }

    #[test]
    fn test_auto_plans_cover_object_exactly() {
        for size in [1u64, 2, 7, 99, 100, 101, 4095, 4096, 4097, 9_999] {
            for chunk in [1u64, 3, 64, 100, 4096] {
                let planner = download(chunk);
                let plan = planner.plan(size, StrategyOverride::Auto).unwrap();
                assert_covers(&plan, size);
                assert_eq!(plan, planner.plan(size, StrategyOverride::Auto).unwrap());
                if size > chunk {
                    assert_eq!(plan.part_count() as u64, size.div_ceil(chunk));
                    let (last, rest) = plan.parts.split_last().unwrap();
                    assert!(rest.iter().all(|p| p.length == chunk));
                    assert!(last.length > 0 && last.length <= chunk);
                }
            }
        }
    }

    #[test]
    fn test_part_ranges() {
        let part = Part { index: 2, start: 10 * MIB, length: 5 * MIB };
        assert_eq!(part.part_number(), 3);
        assert_eq!(part.end_inclusive(), Some(15 * MIB - 1));
        assert_eq!(
            part.range_header().unwrap(),
            format!("bytes={}-{}", 10 * MIB, 15 * MIB - 1)
        );
    }
}
