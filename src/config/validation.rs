//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and formats the pipeline depends on
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, including on reload

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{HttpLoggingConfig, ServiceConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("logging.service_name must not be empty")]
    MissingServiceName,

    #[error("logging.queue_capacity must be greater than zero")]
    ZeroQueueCapacity,

    #[error("http.exclude_paths entry {0:?} must start with '/'")]
    RelativeExcludePath(String),

    #[error("listener.bind_address {0:?} is not a socket address")]
    InvalidBindAddress(String),
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.logging.service_name.trim().is_empty() {
        errors.push(ValidationError::MissingServiceName);
    }
    if config.logging.queue_capacity == 0 {
        errors.push(ValidationError::ZeroQueueCapacity);
    }
    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    errors.extend(http_errors(&config.http));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn http_errors(http: &HttpLoggingConfig) -> impl Iterator<Item = ValidationError> + '_ {
    http.exclude_paths
        .iter()
        .filter(|p| !p.starts_with('/'))
        .map(|p| ValidationError::RelativeExcludePath(p.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let mut config = ServiceConfig::default();
        config.logging.service_name = "core-banking".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = ServiceConfig::default();
        config.logging.queue_capacity = 0;
        config.listener.bind_address = "localhost".to_string();
        config.http.exclude_paths = vec!["/health".to_string(), "ping".to_string()];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::MissingServiceName,
                ValidationError::ZeroQueueCapacity,
                ValidationError::InvalidBindAddress("localhost".to_string()),
                ValidationError::RelativeExcludePath("ping".to_string()),
            ]
        );
    }
}
