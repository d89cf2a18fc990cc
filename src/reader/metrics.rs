//! Per-partition read metrics.
//!
//! Readers accumulate metrics in memory and publish them once, on close.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

/// Metrics for one bucket fetch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BucketMetrics {
    /// Bucket index within the partition.
    pub bucket: usize,
    /// Rows decoded from the bucket.
    pub rows: u64,
    /// Time spent fetching and decoding.
    pub duration: Duration,
}

/// Cumulative metrics for one partition reader.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PartitionMetrics {
    /// Partition identifier.
    pub partition_id: usize,
    /// Completed bucket fetches, in read order.
    pub buckets: Vec<BucketMetrics>,
}

impl PartitionMetrics {
    /// Empty metrics for `partition_id`.
    pub fn new(partition_id: usize) -> Self {
        Self {
            partition_id,
            buckets: Vec::new(),
        }
    }

    /// Records a completed bucket fetch.
    pub fn record_bucket(&mut self, bucket: usize, rows: u64, duration: Duration) {
        self.buckets.push(BucketMetrics {
            bucket,
            rows,
            duration,
        });
    }

    /// Number of remote fetch requests that completed.
    pub fn total_requests(&self) -> u64 {
        self.buckets.len() as u64
    }

    /// Rows returned across all buckets.
    pub fn total_row_count(&self) -> u64 {
        self.buckets.iter().map(|b| b.rows).sum()
    }

    /// Time spent across all buckets.
    pub fn total_duration(&self) -> Duration {
        self.buckets.iter().map(|b| b.duration).sum()
    }

    /// Throughput over the time spent fetching.
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.total_duration().as_secs_f64();
        if secs > 0.0 {
            self.total_row_count() as f64 / secs
        } else {
            0.0
        }
    }

    /// Structured diagnostic record emitted at close.
    pub fn record(&self) -> serde_json::Value {
        json!({
            "partitionId": self.partition_id,
            "totalRequests": self.total_requests(),
            "totalRowCount": self.total_row_count(),
            "totalDuration": self.total_duration().as_millis() as u64,
            "rowsPerSecond": format!("{:.2}", self.rows_per_second()),
        })
    }
}

/// Receives each partition's final metrics when its reader closes.
pub trait MetricsSink: Send + Sync {
    /// Called exactly once per reader.
    fn record(&self, metrics: &PartitionMetrics);
}

impl<F> MetricsSink for F
where
    F: Fn(&PartitionMetrics) + Send + Sync,
{
    fn record(&self, metrics: &PartitionMetrics) {
        self(metrics)
    }
}

/// Sums row counts across every reader it is attached to.
#[derive(Debug, Default)]
pub struct TotalRowCounter {
    rows: AtomicU64,
    readers: AtomicU64,
}

impl TotalRowCounter {
    /// Counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows reported so far.
    pub fn total(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    /// Readers that reported.
    pub fn readers(&self) -> u64 {
        self.readers.load(Ordering::Relaxed)
    }
}

impl MetricsSink for TotalRowCounter {
    fn record(&self, metrics: &PartitionMetrics) {
        self.rows
            .fetch_add(metrics.total_row_count(), Ordering::Relaxed);
        self.readers.fetch_add(1, Ordering::Relaxed);
    }
}
