//! Atomic file replacement
//!
//! Every durable file the buffer owns (metadata, registry, checkpoints,
//! the truncated data file) is replaced through the same primitive: write
//! a temporary sibling, flush and fsync it, rename it over the target,
//! then fsync the parent directory so the rename itself is durable. A
//! failure at any step leaves the target untouched.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::errors::{BufferError, BufferResult};

/// Atomically replace `path` with `contents`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> BufferResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    if !parent.exists() {
        fs::create_dir_all(parent).map_err(|e| BufferError::io(parent, e))?;
    }

    let tmp_path = tmp_sibling(path);

    let result = (|| -> BufferResult<()> {
        let mut tmp = File::create(&tmp_path).map_err(|e| BufferError::io(&tmp_path, e))?;
        tmp.write_all(contents)
            .map_err(|e| BufferError::io(&tmp_path, e))?;
        tmp.sync_all().map_err(|e| BufferError::io(&tmp_path, e))?;

        fs::rename(&tmp_path, path).map_err(|e| BufferError::io(path, e))?;

        fsync_dir(parent)
    })();

    if result.is_err() {
        // Target untouched on failure; drop the sibling if it survived.
        let _ = fs::remove_file(&tmp_path);
    }

    result
}

/// fsync a directory so a rename or file creation inside it is durable.
pub fn fsync_dir(dir: &Path) -> BufferResult<()> {
    let handle = OpenOptions::new()
        .read(true)
        .open(dir)
        .map_err(|e| BufferError::io(dir, e))?;
    handle.sync_all().map_err(|e| BufferError::io(dir, e))
}

fn tmp_sibling(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metadata.json");

        write_atomic(&path, b"{}").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"{}");
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metadata.json");

        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn test_write_atomic_leaves_no_sibling() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metadata.json");

        write_atomic(&path, b"data").unwrap();

        let entries: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec!["metadata.json"]);
    }

    #[test]
    fn test_write_atomic_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/dir/file.json");

        write_atomic(&path, b"x").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"x");
    }
}
