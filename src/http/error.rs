//! Failure channels for request handling.
//!
//! Handlers return `Result<T, AppError>`. Expected, classified failures
//! travel as [`AppError::Domain`] and carry their own status and body;
//! anything else is an [`AppError::Fault`]. Neither variant logs: the
//! response is tagged with a [`RaisedFailure`] extension and the request
//! logging middleware hands it to the exception bridge, which is the single
//! place that logs it and writes the client response.

use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

/// A classified failure: known client-facing status plus a serializable
/// body.
pub trait DomainException: fmt::Display + fmt::Debug + Send + Sync + 'static {
    fn status_code(&self) -> StatusCode;
    fn to_json(&self) -> Value;
}

/// Kinds of [`ApiException`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    Domain,
    Validation,
    NotFound,
}

impl ExceptionKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            ExceptionKind::Domain => StatusCode::INTERNAL_SERVER_ERROR,
            ExceptionKind::Validation => StatusCode::BAD_REQUEST,
            ExceptionKind::NotFound => StatusCode::NOT_FOUND,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::Domain => "DomainException",
            ExceptionKind::Validation => "ValidationException",
            ExceptionKind::NotFound => "NotFoundException",
        }
    }

    pub fn default_code(self) -> &'static str {
        match self {
            ExceptionKind::Domain => "DOMAIN_ERROR",
            ExceptionKind::Validation => "VALIDATION_ERROR",
            ExceptionKind::NotFound => "NOT_FOUND",
        }
    }
}

/// General purpose classified failure.
#[derive(Debug, Clone)]
pub struct ApiException {
    pub kind: ExceptionKind,
    pub message: String,
    pub code: String,
    pub component: String,
    pub timestamp: DateTime<Utc>,
}

impl ApiException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: kind.default_code().to_string(),
            component: "Unknown".to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn domain(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Domain, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::NotFound, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }
}

impl fmt::Display for ApiException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

impl std::error::Error for ApiException {}

impl DomainException for ApiException {
    fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }

    fn to_json(&self) -> Value {
        json!({
            "statusCode": self.status_code().as_u16(),
            "error": self.kind.name(),
            "message": self.message,
            "code": self.code,
            "component": self.component,
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}

/// Error returned by request handlers.
#[derive(Debug)]
pub enum AppError {
    Domain(Arc<dyn DomainException>),
    Fault(anyhow::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Domain(e) => fmt::Display::fmt(e, f),
            AppError::Fault(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl<E: DomainException> From<E> for AppError {
    fn from(exception: E) -> Self {
        AppError::Domain(Arc::new(exception))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Fault(err)
    }
}

/// Response extension marking a failure raised by a handler.
#[derive(Clone, Debug)]
pub struct RaisedFailure(pub Arc<AppError>);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Fallback for routes mounted without the request logging layer; the
        // bridge replaces this response when the layer is present.
        let (status, body) = match &self {
            AppError::Domain(e) => (e.status_code(), e.to_json()),
            AppError::Fault(_) => (StatusCode::INTERNAL_SERVER_ERROR, generic_error_body(None)),
        };
        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(RaisedFailure(Arc::new(self)));
        response
    }
}

/// Body sent to clients for unclassified failures.
pub fn generic_error_body(correlation_id: Option<&str>) -> Value {
    let mut body = json!({
        "statusCode": 500,
        "error": "Internal Server Error",
        "message": "An unexpected error occurred",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    });
    if let (Some(id), Some(map)) = (correlation_id, body.as_object_mut()) {
        map.insert("correlationId".to_string(), Value::from(id));
    }
    body
}
