//! Boundary to the remote analytical engine.
//!
//! The reader never talks to the network directly: a [`Connector`] opens
//! exclusive [`RemoteEngine`] connections, and everything the core needs from
//! the remote side goes through the three engine calls. Connections release
//! their resources when dropped.

use thiserror::Error;

use crate::config::ConnectionProperties;
use crate::query::QueryDefinition;

pub mod eval;
pub mod memory;

pub use memory::{EngineStats, MemoryConnector, MemoryEngine};

/// Failure reported by the remote engine or the transport below it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The engine answered with an error status.
    #[error("status code {status_code}: {message}")]
    Status {
        /// Remote status code.
        status_code: u16,
        /// Remote diagnostic text.
        message: String,
    },
    /// The engine could not be reached.
    #[error("transport error: {0}")]
    Transport(String),
    /// The engine rejected the supplied credentials.
    #[error("authentication rejected: {0}")]
    Unauthorized(String),
}

impl RemoteError {
    /// Remote diagnostic text without the status prefix.
    pub fn message(&self) -> &str {
        match self {
            RemoteError::Status { message, .. } => message,
            RemoteError::Transport(message) | RemoteError::Unauthorized(message) => message,
        }
    }

    /// Status code carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status_code, .. } => Some(*status_code),
            RemoteError::Unauthorized(_) => Some(401),
            RemoteError::Transport(_) => None,
        }
    }
}

/// Outcome of a liveness/auth check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Whether the engine accepted the connection.
    pub connected: bool,
    /// Status code reported by the check.
    pub status_code: u16,
    /// Message reported by the check.
    pub message: String,
}

impl ConnectionStatus {
    /// Successful check.
    pub fn ok() -> Self {
        Self {
            connected: true,
            status_code: 200,
            message: String::new(),
        }
    }

    /// Failed check with the given status.
    pub fn failed(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            connected: false,
            status_code,
            message: message.into(),
        }
    }
}

/// One exclusive connection to the remote engine.
pub trait RemoteEngine: Send {
    /// Liveness and authentication check.
    fn check_connection(&mut self) -> ConnectionStatus;

    /// Estimated number of rows `query` produces.
    fn estimate_rows(&mut self, query: &QueryDefinition) -> Result<u64, RemoteError>;

    /// Executes `query` (with its bound parameters) and returns the JSON row
    /// payload `{"columns": [...], "rows": [...]}`.
    fn fetch_rows(&mut self, query: &QueryDefinition) -> Result<String, RemoteError>;
}

/// Opens connections to a remote engine. Shared across worker threads.
pub trait Connector: Send + Sync {
    /// Opens a new exclusive connection.
    fn connect(&self, properties: &ConnectionProperties)
        -> Result<Box<dyn RemoteEngine>, RemoteError>;
}
