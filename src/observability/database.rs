//! Database operation instrumentation.
//!
//! A [`QueryTimer`] wraps one statement: start it before the query, then
//! call [`QueryTimer::finish`] with the affected row count or
//! [`QueryTimer::fail`] with the error. Connection lifecycle is recorded with
//! [`log_connect`] and [`log_disconnect`].

use std::error::Error as StdError;
use std::time::Instant;

use serde_json::{json, Value};

use crate::observability::logger::{ErrorDetails, RequestLogger};
use crate::observability::record::{DbOperation, Meta};
use crate::observability::Logger;

/// Either the process logger or a request-scoped one.
#[derive(Clone, Debug)]
pub enum DbLogger {
    Process(Logger),
    Request(RequestLogger),
}

impl DbLogger {
    fn log_database(&self, op: DbOperation, ms: u64, database: &str, query: Option<&str>, rows: Option<u64>) {
        match self {
            DbLogger::Process(logger) => logger.log_database(op, ms, database, query, rows),
            DbLogger::Request(logger) => logger.log_database(op, ms, database, query, rows),
        }
    }

    fn error(&self, message: &str, details: ErrorDetails, meta: Meta) {
        match self {
            DbLogger::Process(logger) => logger.error(message, details, Some(meta)),
            DbLogger::Request(logger) => logger.error(message, details, Some(meta)),
        }
    }
}

impl From<Logger> for DbLogger {
    fn from(logger: Logger) -> Self {
        DbLogger::Process(logger)
    }
}

impl From<RequestLogger> for DbLogger {
    fn from(logger: RequestLogger) -> Self {
        DbLogger::Request(logger)
    }
}

/// Times a single statement against `database`.
pub struct QueryTimer {
    logger: DbLogger,
    database: String,
    query: String,
    operation: DbOperation,
    started: Instant,
}

impl QueryTimer {
    pub fn start(logger: impl Into<DbLogger>, database: impl Into<String>, query: impl Into<String>) -> Self {
        let query = query.into();
        Self {
            logger: logger.into(),
            database: database.into(),
            operation: DbOperation::from_statement(&query),
            query,
            started: Instant::now(),
        }
    }

    pub fn operation(&self) -> DbOperation {
        self.operation
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Record the completed statement.
    pub fn finish(self, row_count: Option<u64>) {
        self.logger.log_database(
            self.operation,
            self.elapsed_ms(),
            &self.database,
            Some(&self.query),
            row_count,
        );
    }

    /// Record the failed statement as an error.
    pub fn fail(self, err: &(dyn StdError + 'static)) {
        let mut meta = Meta::new();
        meta.insert("query".to_string(), Value::String(self.query.clone()));
        meta.insert("database".to_string(), Value::String(self.database.clone()));
        meta.insert("queryTimeMs".to_string(), json!(self.elapsed_ms()));
        meta.insert("operation".to_string(), json!(self.operation));
        self.logger
            .error("Database query error", ErrorDetails::from_error(err), meta);
    }
}

pub fn log_connect(logger: &Logger, database: &str) {
    logger.log_database(DbOperation::Connect, 0, database, None, None);
}

pub fn log_disconnect(logger: &Logger, database: &str) {
    logger.log_database(DbOperation::Disconnect, 0, database, None, None);
}
