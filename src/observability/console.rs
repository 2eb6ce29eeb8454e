//! Human-readable console emission of log records.
//!
//! Each record becomes one `tracing` event at the record's level, with the
//! fields an operator needs to scan a terminal. The full record is attached
//! as JSON for the production formatter.

use crate::observability::record::{Level, LogRecord, Meta, Payload, SLOW_QUERY_THRESHOLD_MS};

/// Console headline for a record.
pub fn headline(record: &LogRecord) -> &'static str {
    match &record.payload {
        Payload::Request(_) => "HTTP Request",
        Payload::Response(r) if r.status_code >= 400 => "HTTP Response Error",
        Payload::Response(_) => "HTTP Response",
        Payload::Error(_) => "Application Error",
        Payload::System(_) => "System Metrics",
        Payload::Database(d) if d.query_time_ms > SLOW_QUERY_THRESHOLD_MS => "Slow Database Query",
        Payload::Database(_) => "Database Operation",
        Payload::DomainException(_) => "Domain Exception",
    }
}

/// Emit `record` on the console at its level.
pub fn emit(record: &LogRecord) {
    let headline = headline(record);
    let service = record.envelope.service.as_str();
    let correlation_id = record.correlation_id().unwrap_or("-");
    let detail = serde_json::to_string(record).unwrap_or_default();

    macro_rules! event {
        ($level:ident) => {
            match &record.payload {
                Payload::Request(r) => tracing::$level!(
                    service, correlation_id, method = %r.method, url = %r.url, ip = %r.ip,
                    record = %detail, "{}", headline
                ),
                Payload::Response(r) => tracing::$level!(
                    service, correlation_id, status = r.status_code,
                    response_time_ms = r.response_time_ms, record = %detail, "{}", headline
                ),
                Payload::Error(r) => tracing::$level!(
                    service, correlation_id, error = %r.error_message,
                    summary = %record.envelope.message, record = %detail, "{}", headline
                ),
                Payload::System(r) => tracing::$level!(
                    service, uptime_seconds = r.uptime_seconds,
                    resident_bytes = r.memory_usage.resident_bytes,
                    load = ?r.load_average, record = %detail, "{}", headline
                ),
                Payload::Database(r) => tracing::$level!(
                    service, correlation_id, operation = %r.operation, database = %r.database,
                    query_time_ms = r.query_time_ms, record = %detail, "{}", headline
                ),
                Payload::DomainException(r) => tracing::$level!(
                    service, correlation_id, status = r.status_code,
                    record = %detail, "{}", headline
                ),
            }
        };
    }

    match record.console_level() {
        Level::Info => event!(info),
        Level::Warn => event!(warn),
        Level::Error => event!(error),
    }
}

/// Console-only message with optional metadata.
pub fn message(level: Level, service: &str, correlation_id: Option<&str>, message: &str, meta: Option<&Meta>) {
    let correlation_id = correlation_id.unwrap_or("-");
    let meta = meta
        .map(|m| serde_json::Value::Object(m.clone()).to_string())
        .unwrap_or_default();
    match level {
        Level::Info => tracing::info!(service, correlation_id, meta = %meta, "{}", message),
        Level::Warn => tracing::warn!(service, correlation_id, meta = %meta, "{}", message),
        Level::Error => tracing::error!(service, correlation_id, meta = %meta, "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::record::{
        DatabaseRecord, DbOperation, ResponseRecord, Scope, ServiceIdentity,
    };
    use std::collections::BTreeMap;

    fn record(level: Level, payload: Payload) -> LogRecord {
        let identity = ServiceIdentity {
            name: "svc".to_string(),
            hostname: None,
            pid: 1,
        };
        LogRecord::new(&identity, level, "m", Scope::default(), payload)
    }

    #[test]
    fn test_headlines() {
        let slow = record(
            Level::Warn,
            Payload::Database(DatabaseRecord {
                operation: DbOperation::Delete,
                query_time_ms: 1500,
                database: "banks".to_string(),
                query: None,
                row_count: None,
            }),
        );
        assert_eq!(headline(&slow), "Slow Database Query");

        let not_found = record(
            Level::Warn,
            Payload::Response(ResponseRecord {
                status_code: 404,
                response_time_ms: 1,
                headers: BTreeMap::new(),
                content_length: None,
            }),
        );
        assert_eq!(headline(&not_found), "HTTP Response Error");

        // Emission itself must not panic without a subscriber installed.
        emit(&slow);
        emit(&not_found);
    }
}
