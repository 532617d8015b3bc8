//! Pre-emit side store
//!
//! A per-producer append-only scratch file holding serialized events that
//! have been handed over for writing but not yet durably committed into
//! the main buffer. Nothing is removed from the scratch file until the
//! buffer has accepted the batch, so a crash mid-hand-off loses nothing:
//! the producer re-drains on restart.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::atomic::fsync_dir;
use crate::config::BufferConfig;
use crate::errors::{BufferError, BufferResult};

/// One producer's scratch file.
pub struct PreEmitStore {
    path: PathBuf,
}

impl PreEmitStore {
    /// Open (creating lazily) the scratch file for a producer identity.
    pub fn open(config: &BufferConfig, producer: &str) -> BufferResult<Self> {
        let dir = config.preemit_dir();
        fs::create_dir_all(&dir).map_err(|e| BufferError::io(&dir, e))?;
        Ok(Self {
            path: config.preemit_path(producer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append serialized events, one per line, durably.
    pub fn store_events(&self, payloads: &[String]) -> BufferResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| BufferError::io(&self.path, e))?;

        for payload in payloads {
            if payload.contains('\n') {
                return Err(BufferError::PayloadNotSingleLine);
            }
            file.write_all(payload.as_bytes())
                .map_err(|e| BufferError::io(&self.path, e))?;
            file.write_all(b"\n")
                .map_err(|e| BufferError::io(&self.path, e))?;
        }

        file.sync_all().map_err(|e| BufferError::io(&self.path, e))
    }

    /// Events currently pending hand-off, in arrival order.
    pub fn pending(&self) -> BufferResult<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).map_err(|e| BufferError::io(&self.path, e))?;
        let reader = BufReader::new(file);
        let mut payloads = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| BufferError::io(&self.path, e))?;
            if !line.is_empty() {
                payloads.push(line);
            }
        }
        Ok(payloads)
    }

    /// Hand the scratch file to `f` (typically feeding a produce batch)
    /// and empty it once `f` succeeds.
    ///
    /// On `Err` the scratch file is left intact, so the hand-off can be
    /// retried after a crash or a failed batch.
    pub fn drain_and_reset<T>(
        &self,
        f: impl FnOnce(&Path) -> BufferResult<T>,
    ) -> BufferResult<T> {
        let out = f(&self.path)?;
        self.reset()?;
        Ok(out)
    }

    /// Atomically empty the scratch file (remove + recreate).
    fn reset(&self) -> BufferResult<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| BufferError::io(&self.path, e))?;
        }
        let file = File::create(&self.path).map_err(|e| BufferError::io(&self.path, e))?;
        file.sync_all().map_err(|e| BufferError::io(&self.path, e))?;
        fsync_dir(self.path.parent().unwrap_or(Path::new(".")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> PreEmitStore {
        PreEmitStore::open(&BufferConfig::new(dir.path()), "station1").unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_store_then_pending() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.store_events(&strings(&["a", "b"])).unwrap();
        store.store_events(&strings(&["c"])).unwrap();

        assert_eq!(store.pending().unwrap(), strings(&["a", "b", "c"]));
    }

    #[test]
    fn test_pending_empty_before_first_store() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.pending().unwrap().is_empty());
        // Lazy creation: no file until the first store.
        assert!(!store.path().exists());
    }

    #[test]
    fn test_drain_and_reset_empties_on_success() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.store_events(&strings(&["a", "b"])).unwrap();

        let drained = store
            .drain_and_reset(|path| {
                Ok(fs::read_to_string(path).unwrap().lines().count())
            })
            .unwrap();

        assert_eq!(drained, 2);
        assert!(store.pending().unwrap().is_empty());
        assert!(store.path().exists());
    }

    #[test]
    fn test_drain_keeps_events_on_failure() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.store_events(&strings(&["a"])).unwrap();

        let result: BufferResult<()> = store.drain_and_reset(|_| {
            Err(BufferError::PayloadNotSingleLine)
        });

        assert!(result.is_err());
        assert_eq!(store.pending().unwrap(), strings(&["a"]));
    }

    #[test]
    fn test_multiline_payload_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(matches!(
            store.store_events(&strings(&["a\nb"])),
            Err(BufferError::PayloadNotSingleLine)
        ));
    }

    #[test]
    fn test_producers_are_isolated() {
        let dir = TempDir::new().unwrap();
        let config = BufferConfig::new(dir.path());
        let one = PreEmitStore::open(&config, "station1").unwrap();
        let two = PreEmitStore::open(&config, "station2").unwrap();

        one.store_events(&strings(&["from-one"])).unwrap();

        assert_eq!(one.pending().unwrap(), strings(&["from-one"]));
        assert!(two.pending().unwrap().is_empty());
    }
}
