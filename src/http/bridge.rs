//! Translation of request failures into a logged record plus a client
//! response.
//!
//! # Responsibilities
//! - Classified failures: exceptions category, client gets the failure's own
//!   status and body
//! - Everything else: error category, client gets a generic 500
//!
//! # Design Decisions
//! - The bridge owns response writing for failed requests; callers pass the
//!   failure in and send back whatever it returns, so each failure is logged
//!   exactly once
//! - Internal error text reaches the client only outside production
//! - Handler panics carry the panic location and a backtrace, recorded by a
//!   panic hook on the panicking thread and picked up by [`Failure::from_panic`]

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::{Arc, Once};
use std::time::Duration;

use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::http::error::{generic_error_body, AppError, DomainException};
use crate::http::request::{RequestContext, X_CORRELATION_ID};
use crate::observability::{ErrorDetails, Logger};

thread_local! {
    static PANIC_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Install a panic hook that remembers where the last panic on each thread
/// happened. The previously installed hook still runs afterwards.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|l| l.to_string())
                .unwrap_or_else(|| "unknown location".to_string());
            let stack = format!("panicked at {location}\n{}", Backtrace::force_capture());
            let _ = PANIC_STACK.try_with(|slot| *slot.borrow_mut() = Some(stack));
            previous(info);
        }));
    });
}

/// A failed request, as seen by the request logging middleware.
#[derive(Debug)]
pub enum Failure {
    /// A handler returned an error.
    Raised(Arc<AppError>),
    /// A handler panicked.
    Panic {
        message: String,
        stack: Option<String>,
    },
    /// The request exceeded the configured timeout.
    Timeout(Duration),
}

impl Failure {
    /// Recover the panic message from a `catch_unwind` payload, and the stack
    /// recorded by [`install_panic_hook`] when it ran for this panic.
    ///
    /// Must be called on the thread that caught the panic.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        let stack = PANIC_STACK
            .try_with(|slot| slot.borrow_mut().take())
            .ok()
            .flatten();
        Failure::Panic { message, stack }
    }
}

#[derive(Clone, Debug)]
pub struct ExceptionBridge {
    logger: Logger,
    production: bool,
}

impl ExceptionBridge {
    pub fn new(logger: Logger, production: bool) -> Self {
        Self { logger, production }
    }

    /// Log `failure` and build the response for the client.
    pub fn handle(&self, failure: Failure, ctx: &RequestContext) -> Response {
        let mut response = match failure {
            Failure::Raised(err) => match &*err {
                AppError::Domain(exception) => self.classified(&**exception, ctx),
                AppError::Fault(e) => self.unclassified(ErrorDetails::from(e), ctx),
            },
            Failure::Panic { message, stack } => {
                let details = ErrorDetails {
                    stack,
                    ..ErrorDetails::new(message).with_code("PANIC")
                };
                self.unclassified(details, ctx)
            }
            Failure::Timeout(after) => {
                let details = ErrorDetails::new(format!(
                    "request timed out after {}ms",
                    after.as_millis()
                ))
                .with_code("TIMEOUT");
                self.unclassified(details, ctx)
            }
        };

        if let Ok(value) = HeaderValue::from_str(ctx.correlation_id.as_str()) {
            response.headers_mut().insert(X_CORRELATION_ID, value);
        }
        response
    }

    fn classified(&self, exception: &dyn DomainException, ctx: &RequestContext) -> Response {
        self.logger.log_domain_exception(exception, Some(ctx.to_meta()));

        let mut body = exception.to_json();
        if let Some(map) = body.as_object_mut() {
            map.insert(
                "correlationId".to_string(),
                Value::from(ctx.correlation_id.as_str()),
            );
            map.entry("timestamp").or_insert_with(|| {
                Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
            });
        }
        (exception.status_code(), Json(body)).into_response()
    }

    fn unclassified(&self, details: ErrorDetails, ctx: &RequestContext) -> Response {
        let detail = details.message.clone();
        self.logger.error(
            &format!("Unhandled error: {detail}"),
            details,
            Some(ctx.to_meta()),
        );

        let mut body = generic_error_body(Some(ctx.correlation_id.as_str()));
        if !self.production {
            if let Some(map) = body.as_object_mut() {
                map.insert("detail".to_string(), Value::from(detail));
            }
        }
        (axum::http::StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payload_message() {
        let payload = std::panic::catch_unwind(|| panic!("null bank")).unwrap_err();
        match Failure::from_panic(payload) {
            Failure::Panic { message, .. } => assert_eq!(message, "null bank"),
            other => panic!("unexpected {other:?}"),
        }

        let payload = std::panic::catch_unwind(|| panic!("bank {}", 7)).unwrap_err();
        match Failure::from_panic(payload) {
            Failure::Panic { message, .. } => assert_eq!(message, "bank 7"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_panic_stack_names_location() {
        install_panic_hook();
        install_panic_hook();

        let bank: Option<&str> = None;
        let payload = std::panic::catch_unwind(|| bank.expect("bank is undefined")).unwrap_err();
        let Failure::Panic { message, stack } = Failure::from_panic(payload) else {
            panic!("expected a panic failure");
        };
        assert_eq!(message, "bank is undefined");
        let stack = stack.unwrap();
        assert!(stack.starts_with("panicked at src/http/bridge.rs:"), "{stack}");

        // Taken once; an unrelated payload later finds no stale stack.
        let Failure::Panic { stack, .. } = Failure::from_panic(Box::new("again")) else {
            panic!("expected a panic failure");
        };
        assert!(stack.is_none());
    }
}
