//! shiplog - a durable, file-backed event buffer for log-shipping pipelines
//!
//! One writer appends checksummed records to an append-only data file;
//! independent named consumers read at their own pace and checkpoint their
//! progress; once every consumer has passed a point, the buffer reclaims
//! disk space by truncating consumed data from the front of the file.

pub mod atomic;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod event;
pub mod metadata;
pub mod observability;
pub mod preemit;
