//! Observability for the buffer
//!
//! Structured JSON logs only:
//! - One log line = one event
//! - Deterministic key ordering
//! - Synchronous, no buffering

mod logger;

pub use logger::{Logger, Severity};
