use tracing::{debug, info, warn};

use crate::config::ReadOptions;
use crate::error::{ReadError, Result};
use crate::plan::classify::{classify_analysis_error, AnalysisFailure};
use crate::plan::{PlanAnalysis, RowRange};
use crate::query::QueryDefinition;
use crate::remote::RemoteEngine;

/// Upper bound on buckets in one partition.
pub const MAX_BUCKETS_PER_PARTITION: u64 = 100_000;

/// Splits a query's result set using one cardinality estimate.
pub struct PlanAnalyzer<'e> {
    engine: &'e mut dyn RemoteEngine,
}

impl<'e> PlanAnalyzer<'e> {
    /// Analyzer estimating through `engine`.
    pub fn new(engine: &'e mut dyn RemoteEngine) -> Self {
        Self { engine }
    }

    /// Produces the plan analysis for `query`.
    ///
    /// Both hints must be at least 1. The partition count actually used never
    /// exceeds the estimated row count, and each partition gets enough
    /// buckets that a bucket holds roughly `batch_size` rows.
    pub fn analyze(
        &mut self,
        query: &QueryDefinition,
        partition_count: usize,
        batch_size: u64,
    ) -> Result<PlanAnalysis> {
        validate_hints(partition_count, batch_size)?;

        let estimate = match self.engine.estimate_rows(query) {
            Ok(estimate) => estimate,
            Err(err) => {
                return match classify_analysis_error(&err) {
                    AnalysisFailure::NoRows => {
                        info!("No rows were found, so will not create any partitions.");
                        Ok(PlanAnalysis::empty())
                    }
                    AnalysisFailure::Fatal => Err(ReadError::PlanAnalysis {
                        query: query.render(),
                        cause: err.message().to_string(),
                        source: err,
                    }),
                };
            }
        };
        if estimate == 0 {
            info!("No rows were found, so will not create any partitions.");
            return Ok(PlanAnalysis::empty());
        }

        if query.has_limit() {
            debug!(estimate, "query has a limit; reading as a single bucket");
            return Ok(PlanAnalysis::split(RowRange::FULL, 1, 1, estimate, batch_size));
        }

        let partitions = (partition_count as u64).min(estimate).max(1);
        let rows_per_partition = estimate.div_ceil(partitions);
        let mut buckets = rows_per_partition.div_ceil(batch_size).max(1);
        if buckets > MAX_BUCKETS_PER_PARTITION {
            warn!(
                requested = buckets,
                cap = MAX_BUCKETS_PER_PARTITION,
                "capping buckets per partition; buckets will exceed the batch size"
            );
            buckets = MAX_BUCKETS_PER_PARTITION;
        }
        debug!(
            estimate,
            partitions,
            buckets_per_partition = buckets,
            batch_size,
            "partitioning plan"
        );
        Ok(PlanAnalysis::split(
            RowRange::FULL,
            partitions,
            buckets,
            estimate,
            batch_size,
        ))
    }
}

fn validate_hints(partition_count: usize, batch_size: u64) -> Result<()> {
    ReadOptions {
        num_partitions: partition_count,
        batch_size,
        query: None,
    }
    .validate()
}
