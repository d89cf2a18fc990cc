//! Partitioning of a query's result set into independently readable units.
//!
//! Rows are addressed by a 64-bit row id. A [`PlanAnalysis`] splits the whole
//! id space into contiguous [`Partition`]s, and each partition into
//! contiguous [`Bucket`]s. Ranges are inclusive on both ends so the last
//! bucket can reach `u64::MAX`.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod analyzer;
pub mod classify;

pub use analyzer::{PlanAnalyzer, MAX_BUCKETS_PER_PARTITION};

/// Inclusive row-id range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRange {
    /// First row id in the range.
    pub lower: u64,
    /// Last row id in the range.
    pub upper: u64,
}

impl RowRange {
    /// The whole row-id space.
    pub const FULL: RowRange = RowRange {
        lower: 0,
        upper: u64::MAX,
    };

    /// Range `lower..=upper`.
    pub fn new(lower: u64, upper: u64) -> Self {
        Self { lower, upper }
    }

    /// Whether `id` lies in the range.
    pub fn contains(&self, id: u64) -> bool {
        self.lower <= id && id <= self.upper
    }

    /// Number of ids in the range.
    pub fn width(&self) -> u128 {
        u128::from(self.upper) - u128::from(self.lower) + 1
    }

    /// Splits the range into `parts` contiguous sub-ranges of near-equal width.
    ///
    /// `parts` must be at least 1 and no larger than [`RowRange::width`].
    pub fn split(&self, parts: u64) -> Vec<RowRange> {
        let parts = u128::from(parts.max(1));
        let lower = u128::from(self.lower);
        let width = self.width();
        (0..parts)
            .map(|idx| {
                let start = lower + width * idx / parts;
                let end = lower + width * (idx + 1) / parts - 1;
                // Both bounds stay within the parent range, which fits in u64.
                RowRange::new(start as u64, end as u64)
            })
            .collect()
    }
}

impl fmt::Display for RowRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

/// Sub-range of a partition fetched with one remote request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Position within the owning partition.
    pub index: usize,
    /// Row ids covered by the bucket.
    pub range: RowRange,
}

/// Unit of parallel work handed to the host scheduler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Stable identifier (position in the plan analysis).
    pub id: usize,
    /// Buckets in read order.
    pub buckets: Vec<Bucket>,
}

impl Partition {
    /// Row ids covered by all buckets.
    pub fn range(&self) -> Option<RowRange> {
        let first = self.buckets.first()?;
        let last = self.buckets.last()?;
        Some(RowRange::new(first.range.lower, last.range.upper))
    }
}

/// How a query's result set is split across partitions and buckets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAnalysis {
    partitions: Vec<Partition>,
    estimated_rows: u64,
    batch_size: u64,
}

impl PlanAnalysis {
    /// Analysis of a query that matches no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Splits `range` into `partition_count` partitions of `buckets_per_partition`
    /// buckets each.
    pub fn split(
        range: RowRange,
        partition_count: u64,
        buckets_per_partition: u64,
        estimated_rows: u64,
        batch_size: u64,
    ) -> Self {
        let partitions = range
            .split(partition_count)
            .into_iter()
            .enumerate()
            .map(|(id, part)| Partition {
                id,
                buckets: part
                    .split(buckets_per_partition)
                    .into_iter()
                    .enumerate()
                    .map(|(index, range)| Bucket { index, range })
                    .collect(),
            })
            .collect();
        Self {
            partitions,
            estimated_rows,
            batch_size,
        }
    }

    /// Partitions in id order.
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Partition with the given id.
    pub fn partition(&self, id: usize) -> Option<&Partition> {
        self.partitions.get(id)
    }

    /// Whether the analysis has no partitions.
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Total number of buckets across partitions.
    pub fn bucket_count(&self) -> usize {
        self.partitions.iter().map(|p| p.buckets.len()).sum()
    }

    /// Row estimate returned by the cardinality estimate.
    pub fn estimated_rows(&self) -> u64 {
        self.estimated_rows
    }

    /// Batch size the buckets were sized for.
    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Checks that partitions and buckets are contiguous and cover the whole
    /// row-id space exactly once.
    pub fn covers_all_rows(&self) -> bool {
        if self.partitions.is_empty() {
            return true;
        }
        let mut next: Option<u64> = Some(0);
        for bucket in self.partitions.iter().flat_map(|p| p.buckets.iter()) {
            match next {
                Some(expected) if bucket.range.lower == expected => {}
                _ => return false,
            }
            if bucket.range.upper < bucket.range.lower {
                return false;
            }
            next = bucket.range.upper.checked_add(1);
        }
        next.is_none()
    }
}
