use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::config::ConnectionProperties;
use crate::error::{ReadError, Result};
use crate::plan::{Bucket, Partition};
use crate::query::QueryDefinition;
use crate::reader::decode::RowDecoder;
use crate::reader::metrics::{MetricsSink, PartitionMetrics};
use crate::reader::Row;
use crate::remote::{Connector, RemoteEngine};

/// Lifecycle of a [`PartitionReader`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    /// Current bucket drained (or none fetched yet).
    AwaitingBucket,
    /// A bucket request is in flight.
    FetchingBucket,
    /// Rows of the current bucket are being handed out.
    IteratingRows,
    /// Every bucket was read.
    Exhausted,
    /// Resources released; terminal.
    Closed,
}

/// Streams the rows of one partition, one bucket at a time.
///
/// The reader owns an exclusive connection, opened on the first fetch and
/// released by [`PartitionReader::close`] (also run on drop). Buckets are
/// fetched strictly in order; at most one bucket's rows are held in memory.
pub struct PartitionReader {
    partition: Partition,
    query: Arc<QueryDefinition>,
    decoder: RowDecoder,
    connector: Arc<dyn Connector>,
    properties: Arc<ConnectionProperties>,
    sink: Option<Arc<dyn MetricsSink>>,
    engine: Option<Box<dyn RemoteEngine>>,
    state: ReaderState,
    next_bucket: usize,
    rows: std::vec::IntoIter<Row>,
    current: Option<Row>,
    metrics: PartitionMetrics,
}

impl PartitionReader {
    pub(crate) fn new(
        partition: Partition,
        query: Arc<QueryDefinition>,
        decoder: RowDecoder,
        connector: Arc<dyn Connector>,
        properties: Arc<ConnectionProperties>,
        sink: Option<Arc<dyn MetricsSink>>,
    ) -> Self {
        let metrics = PartitionMetrics::new(partition.id);
        Self {
            partition,
            query,
            decoder,
            connector,
            properties,
            sink,
            engine: None,
            state: ReaderState::AwaitingBucket,
            next_bucket: 0,
            rows: Vec::new().into_iter(),
            current: None,
            metrics,
        }
    }

    /// Partition being read.
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Metrics accumulated so far.
    pub fn metrics(&self) -> &PartitionMetrics {
        &self.metrics
    }

    /// Moves to the next row, fetching buckets as needed.
    ///
    /// Returns `Ok(false)` once every bucket is exhausted. Empty buckets are
    /// skipped. A failed fetch leaves the bucket cursor in place, so calling
    /// `advance` again retries the same bucket.
    pub fn advance(&mut self) -> Result<bool> {
        loop {
            match self.state {
                ReaderState::Closed => return Err(ReadError::ReaderClosed(self.partition.id)),
                ReaderState::Exhausted => return Ok(false),
                _ => {}
            }
            if let Some(row) = self.rows.next() {
                self.current = Some(row);
                self.state = ReaderState::IteratingRows;
                return Ok(true);
            }
            let Some(bucket) = self.partition.buckets.get(self.next_bucket).copied() else {
                self.state = ReaderState::Exhausted;
                return Ok(false);
            };
            self.state = ReaderState::FetchingBucket;
            match self.fetch(bucket) {
                Ok(rows) => {
                    self.next_bucket += 1;
                    self.rows = rows.into_iter();
                    self.state = ReaderState::AwaitingBucket;
                }
                Err(err) => {
                    self.state = ReaderState::AwaitingBucket;
                    return Err(err);
                }
            }
        }
    }

    /// Most recently produced row.
    pub fn current(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    /// Publishes metrics and releases the connection. Idempotent.
    pub fn close(&mut self) {
        if self.state == ReaderState::Closed {
            return;
        }
        self.engine = None;
        self.rows = Vec::new().into_iter();
        self.state = ReaderState::Closed;
        let record = self.metrics.record();
        debug!(
            partition = self.partition.id,
            requests = self.metrics.total_requests(),
            rows = self.metrics.total_row_count(),
            %record,
            "partition reader closed"
        );
        if let Some(sink) = &self.sink {
            sink.record(&self.metrics);
        }
    }

    fn fetch(&mut self, bucket: Bucket) -> Result<Vec<Row>> {
        let partition = self.partition.id;
        let fetch_error = |source| ReadError::Fetch {
            partition,
            bucket: bucket.index,
            source,
        };
        let mut engine = match self.engine.take() {
            Some(engine) => engine,
            None => self.connector.connect(&self.properties).map_err(fetch_error)?,
        };
        let started = Instant::now();
        let query = self.query.bind_row_range(&bucket.range);
        let fetched = engine.fetch_rows(&query);
        self.engine = Some(engine);
        let payload = fetched.map_err(fetch_error)?;
        let rows = self.decoder.decode(&payload, partition)?;
        let elapsed = started.elapsed();
        trace!(
            partition,
            bucket = bucket.index,
            range = %bucket.range,
            rows = rows.len(),
            "fetched bucket"
        );
        self.metrics
            .record_bucket(bucket.index, rows.len() as u64, elapsed);
        Ok(rows)
    }
}

impl Iterator for PartitionReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(true) => self.current.clone().map(Ok),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl Drop for PartitionReader {
    fn drop(&mut self) {
        self.close();
    }
}
