//! Reference host scheduler: a fixed pool of worker threads that reads each
//! partition as an independent task.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::plan::Partition;
use crate::reader::factory::ReaderFactory;
use crate::reader::Row;

/// Result of reading one partition.
#[derive(Debug)]
pub struct PartitionOutcome {
    /// Partition identifier.
    pub partition: usize,
    /// Attempts made, including the successful one.
    pub attempts: usize,
    /// Rows in bucket order, or the error of the last attempt.
    pub result: Result<Vec<Row>>,
}

/// Runs partition tasks on a worker pool with per-task retry.
#[derive(Clone, Copy, Debug)]
pub struct LocalScheduler {
    workers: usize,
    max_attempts: usize,
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        )
    }
}

impl LocalScheduler {
    /// Scheduler with `workers` threads and a single attempt per task.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            max_attempts: 1,
        }
    }

    /// Attempts per partition before its task fails.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Reads every partition; outcomes are returned in partition order.
    ///
    /// The factory is not touched when `partitions` is empty. A failing
    /// partition never affects its siblings. A metrics sink on the factory
    /// receives one record per partition, from its last attempt.
    pub fn run(&self, partitions: &[Partition], factory: &ReaderFactory) -> Vec<PartitionOutcome> {
        if partitions.is_empty() {
            return Vec::new();
        }
        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<PartitionOutcome>>> =
            Mutex::new(partitions.iter().map(|_| None).collect());
        let workers = self.workers.min(partitions.len());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    let Some(partition) = partitions.get(idx) else {
                        break;
                    };
                    let outcome = self.run_task(partition, factory);
                    slots.lock()[idx] = Some(outcome);
                });
            }
        });

        slots.into_inner().into_iter().flatten().collect()
    }

    /// Reads every partition and concatenates the rows in partition order,
    /// failing with the first partition error.
    pub fn collect_rows(&self, partitions: &[Partition], factory: &ReaderFactory) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for outcome in self.run(partitions, factory) {
            rows.extend(outcome.result?);
        }
        Ok(rows)
    }

    fn run_task(&self, partition: &Partition, factory: &ReaderFactory) -> PartitionOutcome {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut reader = factory.create_unobserved_reader(partition);
            let result = reader.by_ref().collect::<Result<Vec<Row>>>();
            reader.close();
            match result {
                Err(err) if err.is_retryable() && attempts < self.max_attempts => {
                    warn!(partition = partition.id, attempts, error = %err, "retrying partition");
                }
                result => {
                    // Only the final attempt reaches the sink.
                    if let Some(sink) = factory.sink() {
                        sink.record(reader.metrics());
                    }
                    debug!(
                        partition = partition.id,
                        attempts,
                        ok = result.is_ok(),
                        "partition task finished"
                    );
                    return PartitionOutcome {
                        partition: partition.id,
                        attempts,
                        result,
                    };
                }
            }
        }
    }
}
