//! Logger construction, persistence, sampling and shutdown.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use request_telemetry::config::schema::Rotation;
use request_telemetry::observability::metrics::MetricsSource;
use request_telemetry::observability::record::{
    Category, CpuUsage, DbOperation, EventKind, LogRecord, MemoryUsage, Meta, SystemRecord,
};
use request_telemetry::observability::trail::collect_trail;
use request_telemetry::observability::{ErrorDetails, Logger, SampleError};

mod common;
use common::*;

#[tokio::test]
async fn test_slow_delete_is_persisted_at_warn() {
    let (dir, config) = test_config("core-banking");
    let logger = Logger::new(&config.logging).unwrap();

    logger.log_database(
        DbOperation::Delete,
        1500,
        "banks",
        Some("DELETE FROM banks WHERE id = $1"),
        Some(1),
    );
    logger.log_database(DbOperation::Select, 1000, "banks", None, Some(3));
    logger.close().await;

    let records = read_category(dir.path(), Category::Database);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["operation"], "DELETE");
    assert_eq!(records[0]["queryTimeMs"], 1500);
    assert_eq!(records[0]["level"], "warn");
    assert_eq!(records[0]["type"], "database");
    assert_eq!(records[1]["level"], "info");
}

struct Ticking {
    uptime: f64,
}

impl MetricsSource for Ticking {
    fn sample(&mut self) -> Result<SystemRecord, SampleError> {
        self.uptime += 0.02;
        Ok(SystemRecord {
            cpu_usage: CpuUsage::default(),
            memory_usage: MemoryUsage::default(),
            uptime_seconds: self.uptime,
            load_average: vec![0.1, 0.2, 0.3],
            free_memory_bytes: 512,
            total_memory_bytes: 1024,
        })
    }
}

#[tokio::test]
async fn test_sampler_persists_system_records_without_traffic() {
    let (dir, mut config) = test_config("core-banking");
    config.logging.sample_interval_ms = 20;
    let logger =
        Logger::with_metrics_source(&config.logging, Box::new(Ticking { uptime: 0.0 })).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    logger.close().await;

    let records = read_category(dir.path(), Category::System);
    assert!(records.len() >= 2, "got {} system records", records.len());
    let uptimes: Vec<f64> = records
        .iter()
        .map(|r| r["uptimeSeconds"].as_f64().unwrap())
        .collect();
    assert!(uptimes.windows(2).all(|w| w[0] < w[1]));
    assert!(records.iter().all(|r| r.get("correlationId").is_none()));
    assert_eq!(records[0]["message"], "System metrics collected");

    // Stopped: nothing more arrives after close.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(read_category(dir.path(), Category::System).len(), records.len());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_process_metrics_sampler_on_linux() {
    let (dir, mut config) = test_config("core-banking");
    config.logging.sample_interval_ms = 25;
    let logger = Logger::new(&config.logging).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    logger.close().await;

    let records = read_category(dir.path(), Category::System);
    assert!(records.len() >= 2);
    let first = records[0]["uptimeSeconds"].as_f64().unwrap();
    let last = records[records.len() - 1]["uptimeSeconds"].as_f64().unwrap();
    assert!(last > first);
    assert!(records[0]["totalMemoryBytes"].as_u64().unwrap() > 0);
    assert!(records[0]["pid"].as_u64().is_some());
}

#[tokio::test]
async fn test_close_is_idempotent_and_later_calls_are_ignored() {
    let (dir, config) = test_config("core-banking");
    let logger = Logger::new(&config.logging).unwrap();

    logger.error("before close", ErrorDetails::new("first"), None);
    logger.close().await;
    logger.close().await;
    assert!(logger.is_closed());

    logger.error("after close", ErrorDetails::new("second"), None);
    logger.log_database(DbOperation::Select, 1, "banks", None, None);

    let errors = read_category(dir.path(), Category::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["errorMessage"], "first");
    assert!(read_category(dir.path(), Category::Database).is_empty());
}

#[tokio::test]
async fn test_close_without_any_records_succeeds() {
    let (dir, config) = test_config("core-banking");
    let logger = Logger::new(&config.logging).unwrap();
    logger.close().await;

    for category in Category::ALL {
        assert!(dir.path().join(category.as_str()).is_dir());
        assert!(read_category(dir.path(), category).is_empty());
    }
}

#[tokio::test]
async fn test_persisted_record_reads_back_unchanged() {
    let (dir, config) = test_config("core-banking");
    let logger = Logger::new(&config.logging).unwrap();

    let seen = Arc::new(Mutex::new(Vec::<LogRecord>::new()));
    let sink = seen.clone();
    logger
        .events()
        .subscribe(EventKind::Error, move |r| sink.lock().push(r.clone()));

    let mut meta = Meta::new();
    meta.insert("account".to_string(), json!({ "iban": "DE89370400440532013000" }));
    logger
        .scoped("cid-7", Some("user-3".to_string()))
        .error("Transfer rejected", ErrorDetails::new("insufficient funds").with_code("E_FUNDS"), Some(meta));
    logger.close().await;

    let lines = read_category(dir.path(), Category::Error);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["service"], "core-banking");
    assert_eq!(lines[0]["userId"], "user-3");
    assert_eq!(lines[0]["context"]["account"]["iban"], "DE89370400440532013000");

    let parsed: LogRecord = serde_json::from_value(lines[0].clone()).unwrap();
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(parsed, seen[0]);
}

#[tokio::test]
async fn test_per_run_rotation_separates_restarts() {
    let (dir, mut config) = test_config("core-banking");
    config.logging.rotation = Rotation::PerRun;

    for run in 0..2 {
        let logger = Logger::new(&config.logging).unwrap();
        logger.error("run", ErrorDetails::new(format!("run {run}")), None);
        logger.close().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let files: Vec<_> = std::fs::read_dir(dir.path().join("error"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.starts_with("core-banking-error-") && f.ends_with(".ndjson")));
}

#[tokio::test]
async fn test_trail_collects_one_request_across_categories() {
    let (dir, config) = test_config("core-banking");
    let logger = Logger::new(&config.logging).unwrap();

    let scoped = logger.scoped("trail-1", None);
    scoped.log_database(DbOperation::Insert, 4, "banks", Some("INSERT INTO banks"), Some(1));
    scoped.error("Ledger out of sync", ErrorDetails::new("mismatch"), None);
    logger
        .scoped("trail-2", None)
        .error("unrelated", ErrorDetails::new("other"), None);
    logger.close().await;

    let report = collect_trail(dir.path(), "trail-1").unwrap();
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.records[0].category(), Category::Database);
    assert_eq!(report.records[1].category(), Category::Error);
    assert_eq!(report.skipped_lines, 0);
}
