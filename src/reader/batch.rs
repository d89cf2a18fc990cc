use std::sync::Arc;

use tracing::info;

use crate::config::{ConnectionProperties, Options, ReadOptions};
use crate::error::{ReadError, Result};
use crate::plan::{Partition, PlanAnalysis, PlanAnalyzer};
use crate::query::{QueryDefinition, Schema};
use crate::reader::factory::ReaderFactory;
use crate::remote::Connector;

/// One opened read: the cached plan analysis plus everything a reader needs.
///
/// Opening a batch validates options, checks the connection, and runs the
/// plan analyzer exactly once. The analysis is shared read-only by every
/// reader the factory creates.
pub struct Batch {
    analysis: Arc<PlanAnalysis>,
    query: Arc<QueryDefinition>,
    schema: Arc<Schema>,
    connector: Arc<dyn Connector>,
    properties: Arc<ConnectionProperties>,
}

impl Batch {
    /// Connects, checks liveness, and analyzes `query`.
    pub fn open(
        connector: Arc<dyn Connector>,
        query: QueryDefinition,
        schema: Schema,
        properties: ConnectionProperties,
        options: &ReadOptions,
    ) -> Result<Self> {
        options.validate()?;

        let mut engine = connector
            .connect(&properties)
            .map_err(|err| ReadError::Connection {
                status_code: err.status_code().unwrap_or(0),
                message: err.message().to_string(),
            })?;
        let status = engine.check_connection();
        if !status.connected {
            return Err(ReadError::Connection {
                status_code: status.status_code,
                message: status.message,
            });
        }

        let analysis = PlanAnalyzer::new(&mut *engine).analyze(
            &query,
            options.num_partitions,
            options.batch_size,
        )?;
        drop(engine);

        info!(
            partitions = analysis.partitions().len(),
            buckets = analysis.bucket_count(),
            estimated_rows = analysis.estimated_rows(),
            "opened batch"
        );
        Ok(Self {
            analysis: Arc::new(analysis),
            query: Arc::new(query),
            schema: Arc::new(schema),
            connector,
            properties: Arc::new(properties),
        })
    }

    /// Opens a batch from a flat option map (`shardscan.*` keys).
    pub fn from_options(
        connector: Arc<dyn Connector>,
        options: &Options,
        schema: Schema,
    ) -> Result<Self> {
        let read = ReadOptions::from_options(options)?;
        let query = read.query_definition()?;
        let properties = ConnectionProperties::from_options(options)?;
        Self::open(connector, query, schema, properties, &read)
    }

    /// Partitions to schedule; empty when the query matches no rows.
    pub fn partitions(&self) -> &[Partition] {
        self.analysis.partitions()
    }

    /// Cached plan analysis.
    pub fn analysis(&self) -> &PlanAnalysis {
        &self.analysis
    }

    /// Query every reader fetches.
    pub fn query(&self) -> &QueryDefinition {
        &self.query
    }

    /// Factory producing one reader per partition.
    pub fn reader_factory(&self) -> ReaderFactory {
        ReaderFactory::new(
            Arc::clone(&self.analysis),
            Arc::clone(&self.query),
            Arc::clone(&self.schema),
            Arc::clone(&self.connector),
            Arc::clone(&self.properties),
        )
    }
}
