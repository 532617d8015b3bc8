//! # Buffer Errors
//!
//! Error taxonomy:
//! - Framing problems (bad line, checksum mismatch) are never surfaced as
//!   errors; readers skip the line and keep going.
//! - Consistency problems (metadata disagrees with the data file) trigger a
//!   full rescan rather than an error.
//! - Contention is a value (`NextEvent::Busy`, `create_stream` returning
//!   `None`), not an error.
//! - Everything here is either a transactional failure surfaced after the
//!   component rolled back its partial state, or an internal fault the
//!   caller must resynchronize from.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for buffer operations
pub type BufferResult<T> = Result<T, BufferError>;

/// Buffer errors
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("metadata file unreadable: {0}")]
    MetadataCorrupt(String),

    #[error("metadata versions collide on {0}")]
    VersionCollision(String),

    #[error("consumer not registered: {0}")]
    UnknownConsumer(String),

    #[error("consumer already registered: {0}")]
    ConsumerExists(String),

    #[error("invalid consumer name: {0}")]
    InvalidConsumerName(String),

    #[error("attachment {id} could not be relocated: {source}")]
    AttachmentMissing {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("event payload must be a single line")]
    PayloadNotSingleLine,

    #[error("event stream is expired")]
    StreamExpired,

    #[error("failed to persist checkpoint for consumer {name}: {source}")]
    CheckpointPersist {
        name: String,
        #[source]
        source: Box<BufferError>,
    },
}

impl BufferError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BufferError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_carries_path() {
        let err = BufferError::io(
            "/data/buffer.log",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        let display = format!("{}", err);
        assert!(display.contains("/data/buffer.log"));
    }

    #[test]
    fn test_stream_expired_display() {
        let display = format!("{}", BufferError::StreamExpired);
        assert!(display.contains("expired"));
    }
}
