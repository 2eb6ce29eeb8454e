//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast to background tasks
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → stop accepting → drain in-flight requests
//!                    → Logger::close (sampler, subscribers, files)
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close logger, exit
//! - The logger closes only after the listener stops, so in-flight
//!   requests finish their own logging

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
