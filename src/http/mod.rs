//! HTTP integration of the logging pipeline.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, graceful shutdown, logger close)
//!     → middleware/request_logging.rs (correlation id, request/response records)
//!     → application routes (handlers return Result<_, AppError>)
//!     → bridge.rs on failure (exceptions or error record + client body)
//!     → Send to client with X-Correlation-ID
//! ```

pub mod bridge;
pub mod error;
pub mod middleware;
pub mod request;
pub mod server;

pub use bridge::{install_panic_hook, ExceptionBridge, Failure};
pub use error::{ApiException, AppError, DomainException, ExceptionKind};
pub use middleware::RequestLogging;
pub use request::{CorrelationId, RequestContext, X_CORRELATION_ID};
pub use server::HttpServer;
