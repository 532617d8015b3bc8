//! Buffer configuration
//!
//! One immutable configuration value per buffer instance: the data
//! directory plus a small set of tunables. Every on-disk path the buffer
//! touches is derived from here, so components never construct paths on
//! their own.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default byte budget for one read-ahead refill from disk.
pub const DEFAULT_READ_CHUNK_BYTES: usize = 4096;

/// Default bound on read-lock acquisition, so a long-running truncation
/// cannot wedge consumers.
pub const DEFAULT_READ_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Immutable configuration for one buffer instance.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    data_dir: PathBuf,
    read_chunk_bytes: usize,
    read_lock_timeout: Duration,
}

impl BufferConfig {
    /// Create a configuration rooted at `data_dir` with default tunables.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            read_lock_timeout: DEFAULT_READ_LOCK_TIMEOUT,
        }
    }

    /// Override the read-ahead refill byte budget.
    pub fn with_read_chunk_bytes(mut self, bytes: usize) -> Self {
        self.read_chunk_bytes = bytes;
        self
    }

    /// Override the read-lock acquisition bound.
    pub fn with_read_lock_timeout(mut self, timeout: Duration) -> Self {
        self.read_lock_timeout = timeout;
        self
    }

    /// Root data directory for this buffer instance.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn read_chunk_bytes(&self) -> usize {
        self.read_chunk_bytes
    }

    pub fn read_lock_timeout(&self) -> Duration {
        self.read_lock_timeout
    }

    /// The append-only data file.
    pub fn data_path(&self) -> PathBuf {
        self.data_dir.join("buffer.log")
    }

    /// The versioned metadata mapping.
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("metadata.json")
    }

    /// The ordered consumer registry.
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("consumers.json")
    }

    /// A consumer's durable checkpoint.
    pub fn checkpoint_path(&self, consumer: &str) -> PathBuf {
        self.data_dir.join(format!("consumer_{}.json", consumer))
    }

    /// Directory holding relocated attachments, named `{seq}_{id}`.
    pub fn attachments_dir(&self) -> PathBuf {
        self.data_dir.join("attachments")
    }

    /// Directory holding per-producer pre-emit scratch files.
    pub fn preemit_dir(&self) -> PathBuf {
        self.data_dir.join("preemit")
    }

    /// A producer's pre-emit scratch file.
    pub fn preemit_path(&self, producer: &str) -> PathBuf {
        self.preemit_dir().join(format!("{}.log", producer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_derive_from_data_dir() {
        let cfg = BufferConfig::new("/data/buf");
        assert_eq!(cfg.data_path(), Path::new("/data/buf/buffer.log"));
        assert_eq!(cfg.metadata_path(), Path::new("/data/buf/metadata.json"));
        assert_eq!(cfg.registry_path(), Path::new("/data/buf/consumers.json"));
        assert_eq!(
            cfg.checkpoint_path("shipper"),
            Path::new("/data/buf/consumer_shipper.json")
        );
        assert_eq!(cfg.attachments_dir(), Path::new("/data/buf/attachments"));
        assert_eq!(
            cfg.preemit_path("station1"),
            Path::new("/data/buf/preemit/station1.log")
        );
    }

    #[test]
    fn test_default_tunables() {
        let cfg = BufferConfig::new("/data/buf");
        assert_eq!(cfg.read_chunk_bytes(), DEFAULT_READ_CHUNK_BYTES);
        assert_eq!(cfg.read_lock_timeout(), DEFAULT_READ_LOCK_TIMEOUT);
    }

    #[test]
    fn test_tunable_overrides() {
        let cfg = BufferConfig::new("/data/buf")
            .with_read_chunk_bytes(128)
            .with_read_lock_timeout(Duration::from_millis(50));
        assert_eq!(cfg.read_chunk_bytes(), 128);
        assert_eq!(cfg.read_lock_timeout(), Duration::from_millis(50));
    }
}
