//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::path::Path;

use axum::body::Body;
use axum::http::{Request, Response};
use serde_json::Value;
use tempfile::TempDir;

use request_telemetry::config::schema::ServiceConfig;
use request_telemetry::http::X_CORRELATION_ID;
use request_telemetry::observability::record::Category;

/// Configuration writing into a fresh temporary directory, sampler off.
pub fn test_config(service: &str) -> (TempDir, ServiceConfig) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServiceConfig::default();
    config.logging.service_name = service.to_string();
    config.logging.logs_dir = dir.path().to_path_buf();
    config.logging.sample_interval_ms = 0;
    config.listener.bind_address = "127.0.0.1:0".to_string();
    (dir, config)
}

/// Every record persisted for `category`, across all its files.
pub fn read_category(logs_dir: &Path, category: Category) -> Vec<Value> {
    let dir = logs_dir.join(category.as_str());
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };

    let mut records = Vec::new();
    for entry in entries {
        let path = entry.unwrap().path();
        let contents = std::fs::read_to_string(&path).unwrap();
        for line in contents.lines().filter(|l| !l.is_empty()) {
            records.push(serde_json::from_str(line).unwrap());
        }
    }
    records
}

pub fn with_correlation<'a>(records: &'a [Value], id: &str) -> Vec<&'a Value> {
    records
        .iter()
        .filter(|r| r["correlationId"] == id)
        .collect()
}

pub fn correlation_header(response: &Response<Body>) -> String {
    response
        .headers()
        .get(X_CORRELATION_ID)
        .expect("correlation header")
        .to_str()
        .unwrap()
        .to_string()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("content-length", body.len())
        .body(Body::from(body.to_string()))
        .unwrap()
}
