//! Partitioned, pushdown-aware row reader for remote analytical query engines.
//!
//! A read is planned once (`plan`), split into partitions of row-id buckets,
//! and each partition is streamed independently by a [`reader::PartitionReader`].
//! Filters are compiled into the remote operator tree (`query`) before any
//! partitioning work so the remote engine never ships rows the host would drop.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod plan;
pub mod query;
pub mod reader;
pub mod remote;

pub use error::{ReadError, Result};
pub use plan::{Bucket, Partition, PlanAnalysis, PlanAnalyzer};
pub use query::{Filter, PredicateCompiler, QueryDefinition, Schema, Value};
pub use reader::{Batch, PartitionReader, ReaderFactory, Row};
