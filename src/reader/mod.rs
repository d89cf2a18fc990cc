//! Batch coordination and per-partition row streaming.

use serde::Serialize;

use crate::query::{Schema, Value};

pub mod batch;
pub mod decode;
pub mod factory;
pub mod metrics;
pub mod partition;
pub mod scheduler;

pub use batch::Batch;
pub use decode::RowDecoder;
pub use factory::ReaderFactory;
pub use metrics::{BucketMetrics, MetricsSink, PartitionMetrics, TotalRowCounter};
pub use partition::{PartitionReader, ReaderState};
pub use scheduler::{LocalScheduler, PartitionOutcome};

/// One decoded record; values follow the declared schema's field order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Row with the given values.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Value at `idx`.
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Value of the field named `name` in `schema`.
    pub fn get_named<'r>(&'r self, schema: &Schema, name: &str) -> Option<&'r Value> {
        self.values.get(schema.index_of(name)?)
    }

    /// All values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consumes the row, returning its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// JSON object keyed by the schema's field names.
    pub fn to_json(&self, schema: &Schema) -> serde_json::Value {
        let map = schema
            .fields()
            .iter()
            .zip(&self.values)
            .map(|(field, value)| (field.name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}
