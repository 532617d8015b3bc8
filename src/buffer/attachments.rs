//! Attachment relocation and garbage collection
//!
//! Attachments live in the buffer's private directory as
//! `{seq}_{attachment_id}`, where `{seq}` is the owning record's sequence
//! number. Relocation is a rename, never a copy: the producer's temporary
//! file is moved in. Once truncation advances `first_seq` past a record,
//! its attachments are garbage.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{BufferError, BufferResult};
use crate::observability::Logger;

/// Attachment directory operations for one buffer instance.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    dir: PathBuf,
    logger: Logger,
}

impl AttachmentStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            logger: Logger::new("attachments"),
        }
    }

    /// Ensure the attachment directory exists.
    pub fn ensure_dir(&self) -> BufferResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| BufferError::io(&self.dir, e))
    }

    /// Destination path for an attachment of record `seq`.
    pub fn path_for(&self, seq: u64, id: &str) -> PathBuf {
        self.dir.join(format!("{}_{}", seq, id))
    }

    /// Move (never copy) `src` into the attachment directory.
    pub fn relocate(&self, seq: u64, id: &str, src: &Path) -> BufferResult<PathBuf> {
        let dest = self.path_for(seq, id);
        fs::rename(src, &dest).map_err(|e| BufferError::AttachmentMissing {
            id: id.to_string(),
            source: e,
        })?;
        Ok(dest)
    }

    /// Delete every attachment whose sequence prefix is below `first_seq`.
    ///
    /// Called after truncation. Individual deletion failures are logged
    /// and skipped; they will be retried by the next collection.
    pub fn collect_garbage(&self, first_seq: u64) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(seq) = sequence_prefix(&name.to_string_lossy()) else {
                continue;
            };
            if seq >= first_seq {
                continue;
            }
            if let Err(e) = fs::remove_file(entry.path()) {
                self.logger.warn(
                    "ATTACHMENT_GC_FAILED",
                    &[
                        ("file", &name.to_string_lossy().to_string()),
                        ("error", &e.to_string()),
                    ],
                );
            }
        }
    }
}

/// The numeric `{seq}` prefix of an attachment file name.
fn sequence_prefix(name: &str) -> Option<u64> {
    name.split('_').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> AttachmentStore {
        let store = AttachmentStore::new(dir.path().join("attachments"));
        store.ensure_dir().unwrap();
        store
    }

    #[test]
    fn test_relocate_moves_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let src = dir.path().join("upload.bin");
        fs::write(&src, b"blob").unwrap();

        let dest = store.relocate(7, "fw_dump", &src).unwrap();

        assert!(!src.exists(), "relocation must move, not copy");
        assert_eq!(dest, store.path_for(7, "fw_dump"));
        assert_eq!(fs::read(&dest).unwrap(), b"blob");
    }

    #[test]
    fn test_relocate_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let result = store.relocate(1, "gone", &dir.path().join("nope.bin"));
        assert!(matches!(
            result,
            Err(BufferError::AttachmentMissing { .. })
        ));
    }

    #[test]
    fn test_gc_deletes_only_truncated_prefixes() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        for seq in 1..=5u64 {
            fs::write(store.path_for(seq, "a"), b"x").unwrap();
        }

        store.collect_garbage(3);

        assert!(!store.path_for(1, "a").exists());
        assert!(!store.path_for(2, "a").exists());
        assert!(store.path_for(3, "a").exists());
        assert!(store.path_for(4, "a").exists());
        assert!(store.path_for(5, "a").exists());
    }

    #[test]
    fn test_gc_ignores_unrelated_files() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let stray = dir.path().join("attachments/README");
        fs::write(&stray, b"keep").unwrap();

        store.collect_garbage(100);

        assert!(stray.exists());
    }

    #[test]
    fn test_sequence_prefix_parsing() {
        assert_eq!(sequence_prefix("12_dump.bin"), Some(12));
        assert_eq!(sequence_prefix("7_a_b_c"), Some(7));
        assert_eq!(sequence_prefix("nope"), None);
    }
}
