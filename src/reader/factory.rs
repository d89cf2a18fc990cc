use std::sync::Arc;

use crate::config::ConnectionProperties;
use crate::plan::{Partition, PlanAnalysis};
use crate::query::{QueryDefinition, Schema};
use crate::reader::decode::RowDecoder;
use crate::reader::metrics::MetricsSink;
use crate::reader::partition::PartitionReader;
use crate::remote::Connector;

/// Builds one [`PartitionReader`] per partition.
///
/// Holds only shared, read-only state; cloning is cheap and clones can be
/// handed to other worker threads.
#[derive(Clone)]
pub struct ReaderFactory {
    analysis: Arc<PlanAnalysis>,
    query: Arc<QueryDefinition>,
    schema: Arc<Schema>,
    connector: Arc<dyn Connector>,
    properties: Arc<ConnectionProperties>,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl ReaderFactory {
    pub(crate) fn new(
        analysis: Arc<PlanAnalysis>,
        query: Arc<QueryDefinition>,
        schema: Arc<Schema>,
        connector: Arc<dyn Connector>,
        properties: Arc<ConnectionProperties>,
    ) -> Self {
        Self {
            analysis,
            query,
            schema,
            connector,
            properties,
            sink: None,
        }
    }

    /// Attaches a sink that receives each reader's metrics on close.
    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Plan analysis the readers draw partitions from.
    pub fn analysis(&self) -> &PlanAnalysis {
        &self.analysis
    }

    /// Declared row schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// New reader for `partition`.
    pub fn create_reader(&self, partition: &Partition) -> PartitionReader {
        self.build_reader(partition, self.sink.clone())
    }

    /// Reader whose metrics are not published; the caller decides which
    /// attempt reaches the sink.
    pub(crate) fn create_unobserved_reader(&self, partition: &Partition) -> PartitionReader {
        self.build_reader(partition, None)
    }

    pub(crate) fn sink(&self) -> Option<&Arc<dyn MetricsSink>> {
        self.sink.as_ref()
    }

    fn build_reader(
        &self,
        partition: &Partition,
        sink: Option<Arc<dyn MetricsSink>>,
    ) -> PartitionReader {
        PartitionReader::new(
            partition.clone(),
            Arc::clone(&self.query),
            RowDecoder::new(Arc::clone(&self.schema)),
            Arc::clone(&self.connector),
            Arc::clone(&self.properties),
            sink,
        )
    }
}
