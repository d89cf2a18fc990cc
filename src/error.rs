use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::query::errors::{CompileError, QueryError};
use crate::remote::RemoteError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReadError>;

/// Errors surfaced while planning or reading a partitioned query.
#[derive(Debug, Error)]
pub enum ReadError {
    /// A read option was missing, non-numeric, or out of range.
    #[error("{reason}")]
    Config {
        /// Option key as supplied by the caller.
        option: String,
        /// Human readable explanation naming the option.
        reason: String,
    },
    /// The remote engine was unreachable or rejected authentication.
    #[error("unable to connect to remote engine; status code: {status_code}; error message: {message}")]
    Connection {
        /// Status code reported by the connection check.
        status_code: u16,
        /// Error message reported by the connection check.
        message: String,
    },
    /// Plan analysis failed for a reason other than an empty result.
    #[error("unable to run query {query}; cause: {cause}")]
    PlanAnalysis {
        /// Rendered query that was being analyzed.
        query: String,
        /// Remote cause message.
        cause: String,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
    /// A bucket fetch failed.
    #[error("failed to fetch bucket {bucket} of partition {partition}: {source}")]
    Fetch {
        /// Partition identifier.
        partition: usize,
        /// Index of the bucket within the partition.
        bucket: usize,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
    /// A fetched payload could not be decoded against the declared schema.
    #[error("failed to decode rows for partition {partition}: {reason}")]
    Decode {
        /// Partition identifier.
        partition: usize,
        /// What went wrong.
        reason: String,
    },
    /// Predicate translation or compilation failed.
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// A plan document was malformed.
    #[error(transparent)]
    Query(#[from] QueryError),
    /// `advance()` was called on a reader that was already closed.
    #[error("partition reader {0} is closed")]
    ReaderClosed(usize),
    /// Reading a configuration or dataset file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A TOML configuration file could not be parsed.
    #[error("failed to parse config {path}: {source}")]
    Toml {
        /// File being parsed.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
}

impl ReadError {
    pub(crate) fn config(option: &str, reason: impl Into<String>) -> Self {
        ReadError::Config {
            option: option.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether a host scheduler may retry the failed task.
    ///
    /// Only per-bucket failures are transient; configuration, connectivity and
    /// analysis errors fail the whole read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReadError::Fetch { .. } | ReadError::Decode { .. })
    }
}
