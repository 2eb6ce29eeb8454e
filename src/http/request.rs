//! Per-request identity.
//!
//! # Responsibilities
//! - Generate the correlation id (UUID v4) for every inbound request
//! - Capture the request context reported alongside failures
//! - Expose the correlation id and the request-scoped logger to handlers
//!   as extractors
//!
//! # Design Decisions
//! - The correlation id is always generated server-side; inbound
//!   `X-Correlation-ID` headers are not trusted
//! - The client ip comes from the peer address, never from forwarding
//!   headers

use std::fmt;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{header, request::Parts, HeaderName, Request, StatusCode};
use serde_json::Value;
use uuid::Uuid;

use crate::observability::{Meta, RequestLogger};

/// Response header carrying the correlation id.
pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

/// Identifier shared by every record produced for one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CorrelationId {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CorrelationId>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "request logging layer not installed"))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestLogger {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestLogger>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "request logging layer not installed"))
    }
}

/// What is known about a request when it fails.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: CorrelationId,
    pub method: String,
    pub url: String,
    pub user_agent: Option<String>,
    pub ip: String,
}

impl RequestContext {
    pub fn from_request<B>(request: &Request<B>, correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            method: request.method().to_string(),
            url: request.uri().to_string(),
            user_agent: request
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            ip: peer_ip(request),
        }
    }

    /// Context map attached to error and exception records.
    pub fn to_meta(&self) -> Meta {
        let mut meta = Meta::new();
        meta.insert("correlationId".to_string(), Value::from(self.correlation_id.as_str()));
        meta.insert("method".to_string(), Value::from(self.method.as_str()));
        meta.insert("url".to_string(), Value::from(self.url.as_str()));
        meta.insert(
            "userAgent".to_string(),
            self.user_agent.as_deref().map(Value::from).unwrap_or(Value::Null),
        );
        meta.insert("ip".to_string(), Value::from(self.ip.as_str()));
        meta
    }
}

/// Peer address of the connection, or `"unknown"`.
pub fn peer_ip<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
