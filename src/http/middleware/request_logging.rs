//! Request logging middleware.
//!
//! # Data Flow
//! ```text
//! Request
//!     → correlation id + start time
//!     → body capture (declared length ≤ max_body_bytes)
//!     → extensions: CorrelationId, RequestLogger
//!     → log_request (unless excluded)                    STARTED
//!     → handler (panic-catching, optional timeout)
//!         ok                → log_response (unless excluded)  COMPLETED
//!         RaisedFailure /
//!         panic / timeout   → ExceptionBridge               FAILED
//!         future dropped    → "Request aborted" error record  FAILED
//!     → X-Correlation-ID header on every response
//! ```
//!
//! # Design Decisions
//! - Exclusion is exact-path matching; failures on excluded paths are still
//!   reported
//! - Logging options are read once per request from an `ArcSwap`, so a
//!   config reload never tears a request in half

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::body::{self, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use futures_util::FutureExt;
use serde_json::Value;

use crate::config::schema::HttpLoggingConfig;
use crate::http::bridge::{install_panic_hook, ExceptionBridge, Failure};
use crate::http::error::{ApiException, AppError, RaisedFailure};
use crate::http::request::{CorrelationId, RequestContext, X_CORRELATION_ID};
use crate::observability::{ErrorDetails, Logger};

/// Shared state of the request logging middleware.
pub struct RequestLogging {
    logger: Logger,
    bridge: ExceptionBridge,
    options: ArcSwap<HttpLoggingConfig>,
    request_timeout: Option<Duration>,
}

impl RequestLogging {
    pub fn new(
        logger: Logger,
        options: HttpLoggingConfig,
        production: bool,
        request_timeout: Option<Duration>,
    ) -> Self {
        install_panic_hook();
        Self {
            bridge: ExceptionBridge::new(logger.clone(), production),
            logger,
            options: ArcSwap::from_pointee(options),
            request_timeout,
        }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn options(&self) -> Arc<HttpLoggingConfig> {
        self.options.load_full()
    }

    /// Swap in new logging options; requests already in flight keep theirs.
    pub fn apply(&self, options: HttpLoggingConfig) {
        self.options.store(Arc::new(options));
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Started,
    Completed,
    Failed,
}

/// Tracks one request through its lifecycle. Dropped while still
/// `Started` means the request future was cancelled.
struct Lifecycle {
    logger: Logger,
    ctx: RequestContext,
    phase: Phase,
}

impl Lifecycle {
    fn started(logger: &Logger, ctx: &RequestContext) -> Self {
        Self {
            logger: logger.clone(),
            ctx: ctx.clone(),
            phase: Phase::Started,
        }
    }

    fn finish(&mut self, phase: Phase) {
        debug_assert_eq!(self.phase, Phase::Started);
        self.phase = phase;
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if self.phase == Phase::Started {
            self.logger.error(
                "Request aborted before completion",
                ErrorDetails::new("request was cancelled before a response was produced")
                    .with_code("ABORTED"),
                Some(self.ctx.to_meta()),
            );
        }
    }
}

/// Middleware function; mount with `axum::middleware::from_fn_with_state`.
pub async fn request_logging(
    State(state): State<Arc<RequestLogging>>,
    request: Request,
    next: Next,
) -> Response {
    let correlation_id = CorrelationId::new();
    let started = Instant::now();
    let options = state.options.load_full();
    let excluded = options.is_excluded(request.uri().path());

    let (mut request, captured) = capture_body(request, options.max_body_bytes).await;
    let ctx = RequestContext::from_request(&request, correlation_id.clone());

    request.extensions_mut().insert(correlation_id.clone());
    request
        .extensions_mut()
        .insert(state.logger.scoped(correlation_id.as_str(), None));

    if !excluded && options.log_requests {
        let body = captured.as_ref().ok().cloned().flatten();
        state
            .logger
            .log_request(&request, body, Some(correlation_id.as_str()));
    }

    let mut lifecycle = Lifecycle::started(&state.logger, &ctx);

    if let Err(read_error) = captured {
        lifecycle.finish(Phase::Failed);
        let err = AppError::from(ApiException::validation(read_error).with_component("http"));
        return state.bridge.handle(Failure::Raised(Arc::new(err)), &ctx);
    }

    let outcome = dispatch(next, request, state.request_timeout).await;

    let raised = match &outcome {
        Ok(response) => response.extensions().get::<RaisedFailure>().cloned(),
        Err(_) => None,
    };

    match (outcome, raised) {
        (Ok(mut response), None) => {
            lifecycle.finish(Phase::Completed);
            set_correlation_header(&mut response, &correlation_id);
            if !excluded && options.log_responses {
                state.logger.log_response(
                    response.status().as_u16(),
                    started.elapsed().as_millis() as u64,
                    response.headers(),
                    Some(correlation_id.as_str()),
                );
            }
            response
        }
        (Ok(_), Some(RaisedFailure(err))) => {
            lifecycle.finish(Phase::Failed);
            state.bridge.handle(Failure::Raised(err), &ctx)
        }
        (Err(failure), _) => {
            lifecycle.finish(Phase::Failed);
            state.bridge.handle(failure, &ctx)
        }
    }
}

async fn dispatch(
    next: Next,
    request: Request,
    timeout: Option<Duration>,
) -> Result<Response, Failure> {
    let handler = AssertUnwindSafe(next.run(request)).catch_unwind();
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, handler).await {
            Ok(result) => result,
            Err(_) => return Err(Failure::Timeout(limit)),
        },
        None => handler.await,
    };
    result.map_err(Failure::from_panic)
}

/// Buffer the body when its declared length fits `max_bytes`. JSON bodies are
/// parsed, other UTF-8 bodies kept as text. A body that cannot be read is an
/// error; a body that is not captured is passed through untouched.
async fn capture_body(
    request: Request,
    max_bytes: usize,
) -> (Request, Result<Option<Value>, String>) {
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    match declared {
        Some(len) if len > 0 && len <= max_bytes => {}
        _ => return (request, Ok(None)),
    }

    let (parts, body) = request.into_parts();
    match body::to_bytes(body, max_bytes).await {
        Ok(bytes) => {
            let captured = serde_json::from_slice::<Value>(&bytes).ok().or_else(|| {
                std::str::from_utf8(&bytes)
                    .ok()
                    .map(|s| Value::String(s.to_string()))
            });
            (Request::from_parts(parts, Body::from(bytes)), Ok(captured))
        }
        Err(e) => (
            Request::from_parts(parts, Body::empty()),
            Err(format!("Failed to read request body: {e}")),
        ),
    }
}

fn set_correlation_header(response: &mut Response, id: &CorrelationId) {
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(X_CORRELATION_ID, value);
    }
}
