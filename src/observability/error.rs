//! Error types for the logging subsystem.

use std::path::PathBuf;

use thiserror::Error;

use crate::observability::record::Category;

/// Failure while constructing the structured logger.
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("service name must not be empty")]
    MissingServiceName,

    #[error("structured logger must be created inside a Tokio runtime")]
    NoRuntime,

    #[error("failed to prepare log directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure while persisting a record to its category file.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{category} writer queue is full")]
    QueueFull { category: Category },

    #[error("{category} sink is closed")]
    Closed { category: Category },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure while sampling process or system metrics.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("{call} failed: {source}")]
    Os {
        call: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}
