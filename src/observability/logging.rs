//! Console logging.
//!
//! # Responsibilities
//! - Install the process-wide `tracing` subscriber used as the console sink
//! - Pick the log filter from `RUST_LOG` or the configured console level
//!
//! # Design Decisions
//! - JSON format for production, human-readable format for development
//! - Initialization is idempotent; a second call leaves the first
//!   subscriber in place

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::{Environment, LoggingConfig};

/// Install the console subscriber. Returns `false` if one was already set.
pub fn init_console(config: &LoggingConfig, environment: Environment) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.console_level)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if environment.is_production() {
        registry
            .with(fmt::layer().json().with_current_span(false).with_target(false))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    result.is_ok()
}

fn default_directives(level: &str) -> String {
    format!("{level},tower_http=info,hyper=warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let config = LoggingConfig::new("svc");
        let first = init_console(&config, Environment::Development);
        assert!(!init_console(&config, Environment::Production));
        // The first call may lose to another test that initialized first.
        let _ = first;
    }

    #[test]
    fn test_default_directives_use_console_level() {
        assert!(default_directives("debug").starts_with("debug,"));
    }
}
