//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP middleware / handlers / QueryTimer
//!     → Logger (logger.rs)
//!         → EventRouter (router.rs)  ── per-kind handlers, in order
//!             → FileSink (sink.rs)   ── one writer task per category
//!                 → {logs_dir}/{category}/{service}-{category}-{stamp}.ndjson
//!             → console (console.rs) ── tracing events
//!                 → subscriber installed by logging.rs
//!
//! SystemSampler (metrics.rs) ── every sample_interval_ms
//!     → EventRouter (system kind)
//!
//! trail.rs ── reads category files back by correlation id
//! ```
//!
//! # Design Decisions
//! - Records are immutable values built once with their timestamp
//! - File writes never block the caller; each category has a bounded queue
//! - Failures inside the pipeline are reported on the console and contained

pub mod console;
pub mod database;
pub mod error;
pub mod logger;
pub mod logging;
pub mod metrics;
pub mod record;
pub mod router;
pub mod sink;
pub mod trail;

pub use error::{LoggerError, SampleError, SinkError};
pub use logger::{ErrorDetails, Logger, RequestLogger};
pub use record::{Category, DbOperation, EventKind, Level, LogRecord, Meta};
pub use router::EventRouter;
