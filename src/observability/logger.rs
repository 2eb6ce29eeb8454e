//! Structured logger.
//!
//! # Data Flow
//! ```text
//! info / warn                     → console only
//! error / log_request /
//! log_response / log_database     → EventRouter → FileSink (category file)
//!                                              → console
//! SystemSampler (own timer)       → EventRouter → ...
//! log_domain_exception            → FileSink (exceptions) + console
//! ```
//!
//! # Lifecycle
//! Constructed once at startup inside a Tokio runtime: category directories
//! are created and sinks wired before `new` returns. [`Logger::close`] stops
//! the sampler, detaches every router subscriber and drains the file
//! writers; it is idempotent.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::{header, HeaderMap, Request};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::schema::LoggingConfig;
use crate::http::error::DomainException;
use crate::http::request::peer_ip;
use crate::lifecycle::Shutdown;
use crate::observability::console;
use crate::observability::error::{LoggerError, SinkError};
use crate::observability::metrics::{MetricsSource, ProcessMetrics, SystemSampler};
use crate::observability::record::{
    database_level, response_level, Category, DatabaseRecord, DbOperation,
    DomainExceptionRecord, ErrorRecord, EventKind, Level, LogRecord, Meta, Payload,
    RequestRecord, ResponseRecord, Scope, ServiceIdentity,
};
use crate::observability::router::EventRouter;
use crate::observability::sink::FileSink;

/// Error information carried into an error record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorDetails {
    pub message: String,
    pub stack: Option<String>,
    pub code: Option<String>,
}

impl ErrorDetails {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Message from `Display`, stack from the `source()` chain.
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        let mut stack = format!("{err}");
        let mut source = err.source();
        while let Some(cause) = source {
            stack.push_str(&format!("\n    caused by: {cause}"));
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            stack: Some(stack),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<&anyhow::Error> for ErrorDetails {
    fn from(err: &anyhow::Error) -> Self {
        // `{:?}` renders the cause chain and, when captured, the backtrace.
        Self {
            message: err.to_string(),
            stack: Some(format!("{err:?}")),
            code: None,
        }
    }
}

struct SamplerTask {
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

struct LoggerInner {
    identity: Arc<ServiceIdentity>,
    router: Arc<EventRouter>,
    files: FileSink,
    sampler: Mutex<Option<SamplerTask>>,
    closed: AtomicBool,
}

impl Drop for LoggerInner {
    fn drop(&mut self) {
        if let Some(task) = self.sampler.get_mut().take() {
            task.shutdown.trigger();
        }
    }
}

/// Structured logger handle. Cheap to clone; all clones share one pipeline.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    /// Build the logger with the operating system as metrics source.
    pub fn new(config: &LoggingConfig) -> Result<Self, LoggerError> {
        Self::with_metrics_source(config, Box::new(ProcessMetrics::new()))
    }

    pub fn with_metrics_source(
        config: &LoggingConfig,
        source: Box<dyn MetricsSource>,
    ) -> Result<Self, LoggerError> {
        if config.service_name.trim().is_empty() {
            return Err(LoggerError::MissingServiceName);
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(LoggerError::NoRuntime);
        }

        for category in Category::ALL {
            let path = config.logs_dir.join(category.as_str());
            std::fs::create_dir_all(&path)
                .map_err(|source| LoggerError::Directory { path, source })?;
        }

        let identity = Arc::new(ServiceIdentity::current(config.service_name.clone()));
        let files = FileSink::start(config, Utc::now());
        let router = Arc::new(EventRouter::new());

        for kind in EventKind::ALL {
            let sink = files.clone();
            router.subscribe(kind, move |record| persist(&sink, kind.category(), record));
            router.subscribe(kind, console::emit);
        }

        let sampler = config.sample_interval().map(|interval| {
            let shutdown = Shutdown::new();
            let handle = SystemSampler::new(router.clone(), identity.clone(), interval, source)
                .spawn(shutdown.subscribe());
            SamplerTask { shutdown, handle }
        });

        tracing::info!(
            service = %identity.name,
            logs_dir = %config.logs_dir.display(),
            sample_interval_ms = config.sample_interval_ms,
            "Structured logger started"
        );

        Ok(Self {
            inner: Arc::new(LoggerInner {
                identity,
                router,
                files,
                sampler: Mutex::new(sampler),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn service(&self) -> &str {
        &self.inner.identity.name
    }

    /// Router carrying every request, response, error, database and system
    /// record; collaborators may subscribe their own handlers.
    pub fn events(&self) -> &EventRouter {
        &self.inner.router
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Logger that stamps `correlation_id` (and optionally a user) on every
    /// record it produces.
    pub fn scoped(&self, correlation_id: impl Into<String>, user_id: Option<String>) -> RequestLogger {
        RequestLogger {
            logger: self.clone(),
            correlation_id: correlation_id.into(),
            user_id,
        }
    }

    pub fn info(&self, message: &str, meta: Option<Meta>) {
        self.console(Level::Info, Scope::default(), message, meta.as_ref());
    }

    pub fn warn(&self, message: &str, meta: Option<Meta>) {
        self.console(Level::Warn, Scope::default(), message, meta.as_ref());
    }

    /// Record an arbitrary runtime error in the error category.
    pub fn error(&self, message: &str, details: ErrorDetails, meta: Option<Meta>) {
        let correlation_id = meta.as_ref().and_then(context_correlation_id);
        self.error_scoped(
            Scope::correlated(correlation_id.as_deref()),
            message,
            details,
            meta,
        );
    }

    /// Record an inbound request.
    pub fn log_request<B>(&self, request: &Request<B>, body: Option<Value>, correlation_id: Option<&str>) {
        let headers = header_map(request.headers());
        let user_agent = headers.get(header::USER_AGENT.as_str()).cloned();
        let ip = peer_ip(request);
        let method = request.method().to_string();
        let url = request.uri().to_string();

        let record = LogRecord::new(
            &self.inner.identity,
            Level::Info,
            format!("{method} {url}"),
            Scope::correlated(correlation_id),
            Payload::Request(RequestRecord {
                method,
                url,
                headers,
                body,
                ip,
                user_agent,
            }),
        );
        self.inner.router.publish(EventKind::Request, &record);
    }

    /// Record a completed response. Statuses of 400 and above are emitted at
    /// warn level.
    pub fn log_response(
        &self,
        status_code: u16,
        response_time_ms: u64,
        headers: &HeaderMap,
        correlation_id: Option<&str>,
    ) {
        let content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let record = LogRecord::new(
            &self.inner.identity,
            response_level(status_code),
            format!("Response sent with status {status_code}"),
            Scope::correlated(correlation_id),
            Payload::Response(ResponseRecord {
                status_code,
                response_time_ms,
                headers: header_map(headers),
                content_length,
            }),
        );
        self.inner.router.publish(EventKind::Response, &record);
    }

    /// Record a database operation. Queries slower than the slow-query
    /// threshold are emitted at warn level.
    pub fn log_database(
        &self,
        operation: DbOperation,
        query_time_ms: u64,
        database: &str,
        query: Option<&str>,
        row_count: Option<u64>,
    ) {
        self.database_scoped(Scope::default(), operation, query_time_ms, database, query, row_count);
    }

    /// Record a classified failure in the exceptions category, with the
    /// exception's serialized fields merged into the record.
    pub fn log_domain_exception(&self, exception: &dyn DomainException, context: Option<Meta>) {
        let correlation_id = context.as_ref().and_then(context_correlation_id);
        let serialized = exception.to_json();
        let message = match serialized.get("message").and_then(|m| m.as_str()) {
            Some(message) => message.to_string(),
            None => exception.to_string(),
        };
        let record = LogRecord::new(
            &self.inner.identity,
            Level::Error,
            message,
            Scope::correlated(correlation_id.as_deref()),
            Payload::DomainException(DomainExceptionRecord::new(
                exception.status_code().as_u16(),
                serialized,
                context,
            )),
        );
        console::emit(&record);
        persist(&self.inner.files, Category::Exceptions, &record);
    }

    /// Stop the sampler, detach subscribers and drain the file writers.
    /// Later calls return immediately.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let sampler = self.inner.sampler.lock().take();
        if let Some(task) = sampler {
            task.shutdown.trigger();
            if let Err(e) = task.handle.await {
                tracing::error!(error = %e, "System sampler task failed");
            }
        }

        self.inner.router.clear();
        self.inner.files.close().await;
        tracing::info!(service = %self.inner.identity.name, "Structured logger closed");
    }

    fn console(&self, level: Level, scope: Scope<'_>, message: &str, meta: Option<&Meta>) {
        console::message(level, &self.inner.identity.name, scope.correlation_id, message, meta);
    }

    fn error_scoped(&self, scope: Scope<'_>, message: &str, details: ErrorDetails, meta: Option<Meta>) {
        let record = LogRecord::new(
            &self.inner.identity,
            Level::Error,
            message,
            scope,
            Payload::Error(ErrorRecord {
                error_message: details.message,
                stack: details.stack,
                error_code: details.code,
                context: meta,
            }),
        );
        self.inner.router.publish(EventKind::Error, &record);
    }

    fn database_scoped(
        &self,
        scope: Scope<'_>,
        operation: DbOperation,
        query_time_ms: u64,
        database: &str,
        query: Option<&str>,
        row_count: Option<u64>,
    ) {
        let record = LogRecord::new(
            &self.inner.identity,
            database_level(query_time_ms),
            format!("Database {operation} operation"),
            scope,
            Payload::Database(DatabaseRecord {
                operation,
                query_time_ms,
                database: database.to_string(),
                query: query.map(str::to_owned),
                row_count,
            }),
        );
        self.inner.router.publish(EventKind::Database, &record);
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("service", &self.inner.identity.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Logger bound to one request's correlation id.
#[derive(Clone, Debug)]
pub struct RequestLogger {
    logger: Logger,
    correlation_id: String,
    user_id: Option<String>,
}

impl RequestLogger {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Same scope, attributed to `user_id`.
    pub fn with_user(&self, user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..self.clone()
        }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn info(&self, message: &str, meta: Option<Meta>) {
        self.logger.console(Level::Info, self.scope(), message, meta.as_ref());
    }

    pub fn warn(&self, message: &str, meta: Option<Meta>) {
        self.logger.console(Level::Warn, self.scope(), message, meta.as_ref());
    }

    pub fn error(&self, message: &str, details: ErrorDetails, meta: Option<Meta>) {
        self.logger.error_scoped(self.scope(), message, details, meta);
    }

    pub fn log_database(
        &self,
        operation: DbOperation,
        query_time_ms: u64,
        database: &str,
        query: Option<&str>,
        row_count: Option<u64>,
    ) {
        self.logger
            .database_scoped(self.scope(), operation, query_time_ms, database, query, row_count);
    }

    fn scope(&self) -> Scope<'_> {
        Scope {
            correlation_id: Some(&self.correlation_id),
            user_id: self.user_id.as_deref(),
        }
    }
}

fn persist(files: &FileSink, category: Category, record: &LogRecord) {
    if let Err(e) = files.write(category, record.clone()) {
        match e {
            // Writes after close are expected while in-flight work winds down.
            SinkError::Closed { .. } => {
                tracing::debug!(category = %category, "Record discarded after sink close")
            }
            other => tracing::warn!(
                category = %category,
                error = %other,
                record = %serde_json::to_string(record).unwrap_or_default(),
                "Failed to queue log record"
            ),
        }
    }
}

fn context_correlation_id(meta: &Meta) -> Option<String> {
    meta.get("correlationId")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Flatten a header map into name → value, joining repeated headers.
pub(crate) fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "query failed")
        }
    }

    impl StdError for Outer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_error_details_walk_source_chain() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "connection reset"));
        let details = ErrorDetails::from_error(&err);
        assert_eq!(details.message, "query failed");
        let stack = details.stack.unwrap();
        assert!(stack.contains("caused by: connection reset"));
    }

    #[test]
    fn test_error_details_from_anyhow() {
        let err = anyhow::anyhow!("null reference").context("loading bank");
        let details = ErrorDetails::from(&err);
        assert_eq!(details.message, "loading bank");
        assert!(details.stack.unwrap().contains("null reference"));
    }

    #[test]
    fn test_header_map_joins_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        let map = header_map(&headers);
        assert_eq!(map["accept"], "text/html, application/json");
    }

    #[test]
    fn test_logger_requires_service_name_and_runtime() {
        let config = LoggingConfig::new("  ");
        assert!(matches!(Logger::new(&config), Err(LoggerError::MissingServiceName)));

        let dir = tempfile::tempdir().unwrap();
        let mut config = LoggingConfig::new("svc");
        config.logs_dir = dir.path().to_path_buf();
        assert!(matches!(Logger::new(&config), Err(LoggerError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_construction_prepares_category_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LoggingConfig::new("svc");
        config.logs_dir = dir.path().to_path_buf();
        config.sample_interval_ms = 0;

        let logger = Logger::new(&config).unwrap();
        for category in Category::ALL {
            assert!(dir.path().join(category.as_str()).is_dir());
        }
        assert_eq!(logger.events().subscriber_count(EventKind::Request), 2);

        logger.close().await;
        assert_eq!(logger.events().subscriber_count(EventKind::Request), 0);
    }
}
