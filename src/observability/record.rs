//! Log record data model.
//!
//! Every persisted line is a [`LogRecord`]: the common [`Envelope`] flattened
//! together with a payload tagged by `type`. Field names are camelCase on the
//! wire.
//!
//! # Design Decisions
//! - The envelope timestamp is stamped when the record is built and never
//!   touched again; records are immutable values after construction
//! - The envelope `level` is the level the console emission uses, so slow
//!   queries and error responses persist as `warn`
//! - A record maps to exactly one [`Category`]

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form structured metadata attached to console and error records.
pub type Meta = serde_json::Map<String, Value>;

/// Database queries slower than this are annotated as slow on the console.
pub const SLOW_QUERY_THRESHOLD_MS: u64 = 1000;

/// Severity of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        f.write_str(name)
    }
}

/// Event kinds carried by the event router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Request,
    Response,
    Error,
    Database,
    System,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Request,
        EventKind::Response,
        EventKind::Error,
        EventKind::Database,
        EventKind::System,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            EventKind::Request => 0,
            EventKind::Response => 1,
            EventKind::Error => 2,
            EventKind::Database => 3,
            EventKind::System => 4,
        }
    }

    /// Persistence destination for records of this kind.
    pub fn category(self) -> Category {
        match self {
            EventKind::Request => Category::Request,
            EventKind::Response => Category::Response,
            EventKind::Error => Category::Error,
            EventKind::Database => Category::Database,
            EventKind::System => Category::System,
        }
    }
}

/// Persistence destination. One directory per category under the logs root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Request,
    Response,
    Error,
    System,
    Database,
    Exceptions,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Request,
        Category::Response,
        Category::Error,
        Category::System,
        Category::Database,
        Category::Exceptions,
    ];

    /// Directory name, also used inside file names.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Request => "request",
            Category::Response => "response",
            Category::Error => "error",
            Category::System => "system",
            Category::Database => "database",
            Category::Exceptions => "exceptions",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the emitting process, shared by every record it produces.
#[derive(Debug, Clone)]
pub struct ServiceIdentity {
    pub name: String,
    pub hostname: Option<String>,
    pub pid: u32,
}

impl ServiceIdentity {
    pub fn current(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hostname: crate::observability::metrics::hostname(),
            pid: std::process::id(),
        }
    }
}

/// Request-scoped identifiers stamped on the envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope<'a> {
    pub correlation_id: Option<&'a str>,
    pub user_id: Option<&'a str>,
}

impl<'a> Scope<'a> {
    pub fn correlated(correlation_id: Option<&'a str>) -> Self {
        Self {
            correlation_id,
            user_id: None,
        }
    }
}

/// Fields shared by every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub status_code: u16,
    pub response_time_ms: u64,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Meta>,
}

/// CPU time consumed by the process, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuUsage {
    pub user_micros: u64,
    pub system_micros: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub resident_bytes: u64,
    pub peak_resident_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemRecord {
    pub cpu_usage: CpuUsage,
    pub memory_usage: MemoryUsage,
    pub uptime_seconds: f64,
    pub load_average: Vec<f64>,
    pub free_memory_bytes: u64,
    pub total_memory_bytes: u64,
}

/// Kind of database operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DbOperation {
    Select,
    Insert,
    Update,
    Delete,
    Connect,
    Disconnect,
}

impl DbOperation {
    /// Classify a statement by its leading keyword. Anything unrecognised is
    /// treated as a read.
    pub fn from_statement(statement: &str) -> Self {
        let keyword = statement
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        match keyword.as_str() {
            "INSERT" => DbOperation::Insert,
            "UPDATE" => DbOperation::Update,
            "DELETE" => DbOperation::Delete,
            _ => DbOperation::Select,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DbOperation::Select => "SELECT",
            DbOperation::Insert => "INSERT",
            DbOperation::Update => "UPDATE",
            DbOperation::Delete => "DELETE",
            DbOperation::Connect => "CONNECT",
            DbOperation::Disconnect => "DISCONNECT",
        }
    }
}

impl fmt::Display for DbOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRecord {
    pub operation: DbOperation,
    pub query_time_ms: u64,
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
}

/// Keys an exception's serialized form may not override.
const RESERVED_EXCEPTION_KEYS: &[&str] = &[
    "timestamp",
    "level",
    "message",
    "service",
    "hostname",
    "pid",
    "correlationId",
    "userId",
    "type",
    "statusCode",
    "context",
];

/// A classified failure as reported through the exceptions category. The
/// exception's own fields sit at the top level of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainExceptionRecord {
    pub status_code: u16,
    #[serde(flatten)]
    pub fields: Meta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Meta>,
}

impl DomainExceptionRecord {
    /// Merge an exception's serialized form into a record. Keys the record
    /// already owns are skipped; a representation that is not an object is
    /// kept under `exception`.
    pub fn new(status_code: u16, serialized: Value, context: Option<Meta>) -> Self {
        let fields = match serialized {
            Value::Object(map) => map
                .into_iter()
                .filter(|(key, _)| !RESERVED_EXCEPTION_KEYS.contains(&key.as_str()))
                .collect(),
            Value::Null => Meta::new(),
            other => {
                let mut fields = Meta::new();
                fields.insert("exception".to_string(), other);
                fields
            }
        };
        Self {
            status_code,
            fields,
            context,
        }
    }
}

/// Variant-specific part of a record, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Payload {
    Request(RequestRecord),
    Response(ResponseRecord),
    Error(ErrorRecord),
    System(SystemRecord),
    Database(DatabaseRecord),
    DomainException(DomainExceptionRecord),
}

/// One log record: envelope plus payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(flatten)]
    pub payload: Payload,
}

impl LogRecord {
    /// Build a record stamped with the current time.
    pub fn new(
        identity: &ServiceIdentity,
        level: Level,
        message: impl Into<String>,
        scope: Scope<'_>,
        payload: Payload,
    ) -> Self {
        Self {
            envelope: Envelope {
                timestamp: Utc::now(),
                level,
                message: message.into(),
                service: identity.name.clone(),
                hostname: identity.hostname.clone(),
                pid: identity.pid,
                correlation_id: scope.correlation_id.map(str::to_owned),
                user_id: scope.user_id.map(str::to_owned),
            },
            payload,
        }
    }

    /// Router kind, if this record travels through the event router.
    pub fn kind(&self) -> Option<EventKind> {
        match self.payload {
            Payload::Request(_) => Some(EventKind::Request),
            Payload::Response(_) => Some(EventKind::Response),
            Payload::Error(_) => Some(EventKind::Error),
            Payload::System(_) => Some(EventKind::System),
            Payload::Database(_) => Some(EventKind::Database),
            Payload::DomainException(_) => None,
        }
    }

    pub fn category(&self) -> Category {
        match self.kind() {
            Some(kind) => kind.category(),
            None => Category::Exceptions,
        }
    }

    /// Level used for the console emission of this record.
    pub fn console_level(&self) -> Level {
        self.envelope.level
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.envelope.correlation_id.as_deref()
    }
}

/// Console level for a response with the given status.
pub fn response_level(status_code: u16) -> Level {
    if status_code >= 400 {
        Level::Warn
    } else {
        Level::Info
    }
}

/// Console level for a database operation with the given duration.
pub fn database_level(query_time_ms: u64) -> Level {
    if query_time_ms > SLOW_QUERY_THRESHOLD_MS {
        Level::Warn
    } else {
        Level::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ServiceIdentity {
        ServiceIdentity {
            name: "core-banking".to_string(),
            hostname: Some("node-1".to_string()),
            pid: 42,
        }
    }

    #[test]
    fn test_statement_classification() {
        assert_eq!(DbOperation::from_statement("INSERT INTO banks VALUES ($1)"), DbOperation::Insert);
        assert_eq!(DbOperation::from_statement("  update banks set name = $1"), DbOperation::Update);
        assert_eq!(DbOperation::from_statement("DELETE FROM banks"), DbOperation::Delete);
        assert_eq!(DbOperation::from_statement("WITH x AS (SELECT 1) SELECT * FROM x"), DbOperation::Select);
        assert_eq!(DbOperation::from_statement(""), DbOperation::Select);
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(response_level(200), Level::Info);
        assert_eq!(response_level(399), Level::Info);
        assert_eq!(response_level(400), Level::Warn);
        assert_eq!(response_level(503), Level::Warn);

        assert_eq!(database_level(0), Level::Info);
        assert_eq!(database_level(1000), Level::Info);
        assert_eq!(database_level(1001), Level::Warn);
    }

    #[test]
    fn test_wire_format_is_camel_case_and_tagged() {
        let record = LogRecord::new(
            &identity(),
            Level::Warn,
            "Database DELETE operation",
            Scope::correlated(Some("abc")),
            Payload::Database(DatabaseRecord {
                operation: DbOperation::Delete,
                query_time_ms: 1500,
                database: "banks".to_string(),
                query: Some("DELETE FROM banks WHERE id = $1".to_string()),
                row_count: Some(1),
            }),
        );

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "database");
        assert_eq!(value["operation"], "DELETE");
        assert_eq!(value["queryTimeMs"], 1500);
        assert_eq!(value["rowCount"], 1);
        assert_eq!(value["correlationId"], "abc");
        assert_eq!(value["level"], "warn");
        assert_eq!(value["service"], "core-banking");
        assert!(value.get("userId").is_none());

        let parsed: LogRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.category(), Category::Database);
    }

    #[test]
    fn test_domain_exception_fields_are_merged() {
        let record = LogRecord::new(
            &identity(),
            Level::Error,
            "Bank 42 not found",
            Scope::correlated(Some("abc")),
            Payload::DomainException(DomainExceptionRecord::new(
                404,
                serde_json::json!({
                    "statusCode": 404,
                    "error": "NotFoundException",
                    "message": "Bank 42 not found",
                    "code": "NOT_FOUND",
                    "timestamp": "2020-01-01T00:00:00.000Z",
                }),
                None,
            )),
        );

        assert_eq!(record.kind(), None);
        assert_eq!(record.category(), Category::Exceptions);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "domain-exception");
        assert_eq!(value["statusCode"], 404);
        assert_eq!(value["error"], "NotFoundException");
        assert_eq!(value["code"], "NOT_FOUND");
        assert_eq!(value["message"], "Bank 42 not found");
        assert_ne!(value["timestamp"], "2020-01-01T00:00:00.000Z");
        assert!(value.get("exception").is_none());

        let parsed: LogRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }
}
