//! Request trail reconstruction.
//!
//! Reads every category directory under a logs root and collects the records
//! belonging to one correlation id, ordered by timestamp. Domain exception
//! records are matched on `context.correlationId` as well as the envelope.

use std::path::Path;

use serde_json::Value;

use crate::observability::record::{Category, LogRecord, Payload};
use crate::observability::sink::FILE_EXTENSION;

/// Lines that could not be read back as records.
#[derive(Debug, Default)]
pub struct TrailReport {
    pub records: Vec<LogRecord>,
    pub skipped_lines: usize,
}

/// Collect every persisted record for `correlation_id`.
pub fn collect_trail(logs_dir: &Path, correlation_id: &str) -> std::io::Result<TrailReport> {
    let mut report = TrailReport::default();

    for category in Category::ALL {
        let dir = logs_dir.join(category.as_str());
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let contents = std::fs::read_to_string(&path)?;
            for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<LogRecord>(line) {
                    Ok(record) if belongs_to(&record, correlation_id) => report.records.push(record),
                    Ok(_) => {}
                    Err(_) => report.skipped_lines += 1,
                }
            }
        }
    }

    report.records.sort_by_key(|r| r.envelope.timestamp);
    Ok(report)
}

fn belongs_to(record: &LogRecord, correlation_id: &str) -> bool {
    if record.correlation_id() == Some(correlation_id) {
        return true;
    }
    let context = match &record.payload {
        Payload::Error(e) => e.context.as_ref(),
        Payload::DomainException(e) => e.context.as_ref(),
        _ => None,
    };
    context
        .and_then(|c| c.get("correlationId"))
        .and_then(Value::as_str)
        == Some(correlation_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::record::{
        DomainExceptionRecord, ErrorRecord, Level, Meta, Scope, ServiceIdentity,
    };
    use serde_json::json;
    use std::io::Write;

    fn identity() -> ServiceIdentity {
        ServiceIdentity {
            name: "svc".to_string(),
            hostname: None,
            pid: 7,
        }
    }

    fn write_lines(dir: &Path, category: Category, lines: &[String]) {
        let dir = dir.join(category.as_str());
        std::fs::create_dir_all(&dir).unwrap();
        let mut file = std::fs::File::create(dir.join(format!("svc-{category}-2024-01-01.{FILE_EXTENSION}"))).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    #[test]
    fn test_trail_matches_envelope_and_context() {
        let dir = tempfile::tempdir().unwrap();
        let identity = identity();

        let error = LogRecord::new(
            &identity,
            Level::Error,
            "boom",
            Scope::correlated(Some("abc")),
            Payload::Error(ErrorRecord {
                error_message: "boom".to_string(),
                stack: None,
                error_code: None,
                context: None,
            }),
        );
        let mut context = Meta::new();
        context.insert("correlationId".to_string(), json!("abc"));
        let exception = LogRecord::new(
            &identity,
            Level::Error,
            "Domain Exception",
            Scope::default(),
            Payload::DomainException(DomainExceptionRecord::new(
                404,
                json!({ "statusCode": 404, "error": "NotFoundException" }),
                Some(context),
            )),
        );
        let other = LogRecord::new(
            &identity,
            Level::Error,
            "other",
            Scope::correlated(Some("zzz")),
            Payload::Error(ErrorRecord {
                error_message: "other".to_string(),
                stack: None,
                error_code: None,
                context: None,
            }),
        );

        write_lines(
            dir.path(),
            Category::Error,
            &[
                serde_json::to_string(&error).unwrap(),
                "not json".to_string(),
                serde_json::to_string(&other).unwrap(),
            ],
        );
        write_lines(dir.path(), Category::Exceptions, &[serde_json::to_string(&exception).unwrap()]);

        let report = collect_trail(dir.path(), "abc").unwrap();
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.skipped_lines, 1);
        assert!(report.records[0].envelope.timestamp <= report.records[1].envelope.timestamp);
    }

    #[test]
    fn test_missing_directories_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let report = collect_trail(dir.path(), "abc").unwrap();
        assert!(report.records.is_empty());
    }
}
