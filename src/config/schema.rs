//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Deployment mode; controls error detail and console format.
    pub environment: Environment,

    /// Structured logger settings.
    pub logging: LoggingConfig,

    /// Request/response logging settings for the HTTP middleware.
    pub http: HttpLoggingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:9999").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9999".to_string(),
        }
    }
}

/// Deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// When a new category file is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Rotation {
    /// One file per category per calendar day (UTC).
    #[default]
    Daily,
    /// One file per category per process run.
    PerRun,
}

/// What a category writer does with a record it failed to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum WriteFailurePolicy {
    /// Report the record on the console and discard it.
    #[default]
    Drop,
    /// Keep up to `max_pending` failed records and retry them before the
    /// next write. The oldest pending record is dropped when full.
    Retry { max_pending: usize },
}

/// Structured logger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Identifies the emitting process in every record. Required.
    pub service_name: String,

    /// Root directory holding one subdirectory per category.
    pub logs_dir: PathBuf,

    /// File rotation policy.
    pub rotation: Rotation,

    /// Bounded queue size per category writer. Records arriving while the
    /// queue is full are dropped with a console warning.
    pub queue_capacity: usize,

    /// Handling of records that could not be written.
    pub write_failure: WriteFailurePolicy,

    /// System sampling period in milliseconds (0 disables the sampler).
    pub sample_interval_ms: u64,

    /// Console filter when `RUST_LOG` is unset.
    pub console_level: String,
}

impl LoggingConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    pub fn sample_interval(&self) -> Option<Duration> {
        (self.sample_interval_ms > 0).then(|| Duration::from_millis(self.sample_interval_ms))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            logs_dir: PathBuf::from("./logs"),
            rotation: Rotation::Daily,
            queue_capacity: 1024,
            write_failure: WriteFailurePolicy::Drop,
            sample_interval_ms: 60_000,
            console_level: "info".to_string(),
        }
    }
}

/// HTTP request/response logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpLoggingConfig {
    /// Emit a request record for every non-excluded request.
    pub log_requests: bool,

    /// Emit a response record for every non-excluded completed request.
    pub log_responses: bool,

    /// Exact paths skipped for request/response logging.
    pub exclude_paths: Vec<String>,

    /// Largest request body captured into the request record.
    pub max_body_bytes: usize,
}

impl HttpLoggingConfig {
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_paths.iter().any(|p| p == path)
    }
}

impl Default for HttpLoggingConfig {
    fn default() -> Self {
        Self {
            log_requests: true,
            log_responses: true,
            exclude_paths: vec![
                "/health".to_string(),
                "/ping".to_string(),
                "/metrics".to_string(),
            ],
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout in seconds (0 disables).
    pub request_secs: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Option<Duration> {
        (self.request_secs > 0).then(|| Duration::from_secs(self.request_secs))
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [logging]
            service_name = "core-banking"
            "#,
        )
        .unwrap();

        assert_eq!(config.logging.service_name, "core-banking");
        assert_eq!(config.logging.logs_dir, PathBuf::from("./logs"));
        assert_eq!(config.logging.write_failure, WriteFailurePolicy::Drop);
        assert!(config.http.log_requests);
        assert!(config.http.is_excluded("/ping"));
        assert!(!config.http.is_excluded("/ping/"));
        assert_eq!(config.environment, Environment::Development);
    }

    #[test]
    fn test_full_toml() {
        let config: ServiceConfig = toml::from_str(
            r#"
            environment = "production"

            [listener]
            bind_address = "127.0.0.1:8080"

            [logging]
            service_name = "core-banking"
            logs_dir = "/var/log/core-banking"
            rotation = "per-run"
            sample_interval_ms = 0
            write_failure = { policy = "retry", max_pending = 16 }

            [http]
            log_responses = false
            exclude_paths = ["/live"]

            [timeouts]
            request_secs = 0
            "#,
        )
        .unwrap();

        assert!(config.environment.is_production());
        assert_eq!(config.logging.rotation, Rotation::PerRun);
        assert_eq!(config.logging.sample_interval(), None);
        assert_eq!(
            config.logging.write_failure,
            WriteFailurePolicy::Retry { max_pending: 16 }
        );
        assert!(!config.http.log_responses);
        assert!(config.http.is_excluded("/live"));
        assert!(!config.http.is_excluded("/health"));
        assert_eq!(config.timeouts.request(), None);
    }
}
