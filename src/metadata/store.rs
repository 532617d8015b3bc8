//! Metadata persistence, restore, and rescan recovery

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::codec::{checksum_hex, parse_record};
use crate::config::BufferConfig;
use crate::errors::{BufferError, BufferResult};
use crate::observability::Logger;

/// Version string of an empty (or missing) data file.
pub const EMPTY_VERSION: &str = "00000000";

/// One epoch of the buffer window.
///
/// Positions are byte offsets against the conceptual infinite stream of
/// appended records, not the current file; the data file's byte 0 always
/// corresponds to `start_pos`, so the file offset of a position `p` is
/// `p - start_pos`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferMetadata {
    /// Sequence number of the first record still in the file
    pub first_seq: u64,
    /// Sequence number of the last record written
    pub last_seq: u64,
    /// Stream position of the file's first byte
    pub start_pos: u64,
    /// Stream position one past the file's last committed byte
    pub end_pos: u64,
    /// Checksum of the data file's first line
    pub version: String,
}

impl BufferMetadata {
    /// Metadata for a freshly created, empty buffer.
    pub fn fresh() -> Self {
        Self {
            first_seq: 1,
            last_seq: 0,
            start_pos: 0,
            end_pos: 0,
            version: EMPTY_VERSION.to_string(),
        }
    }

    /// Whether the buffer window currently holds no records.
    pub fn is_empty(&self) -> bool {
        self.start_pos == self.end_pos
    }

    /// Number of committed bytes readable in the data file.
    pub fn readable_bytes(&self) -> u64 {
        self.end_pos - self.start_pos
    }
}

/// Persists the version-keyed metadata map and rebuilds it from the data
/// file when it is missing or inconsistent.
pub struct MetadataStore {
    config: Arc<BufferConfig>,
    logger: Logger,
}

impl MetadataStore {
    pub fn new(config: Arc<BufferConfig>) -> Self {
        Self {
            config,
            logger: Logger::new("metadata"),
        }
    }

    fn metadata_path(&self) -> PathBuf {
        self.config.metadata_path()
    }

    /// Restore the metadata entry matching the data file on disk.
    ///
    /// - No metadata file and no data: a fresh zeroed entry is created
    ///   and persisted. A lost metadata file next to a non-empty data
    ///   file forces a full rescan instead.
    /// - Metadata present: the checksum of the data file's actual first
    ///   line selects the entry. A missing key, an unparseable metadata
    ///   file, or an entry claiming more bytes than the file holds all
    ///   force a full rescan.
    pub fn restore(&self) -> BufferResult<BufferMetadata> {
        let path = self.metadata_path();

        if !path.exists() {
            if self.data_file_size()? > 0 {
                self.logger.warn("METADATA_MISSING", &[]);
                return self.recover();
            }
            let meta = BufferMetadata::fresh();
            self.save(&meta, None)?;
            self.logger.info(
                "METADATA_CREATED",
                &[("data_dir", &self.config.data_dir().display().to_string())],
            );
            return Ok(meta);
        }

        let contents = fs::read_to_string(&path).map_err(|e| BufferError::io(&path, e))?;
        let map: BTreeMap<String, BufferMetadata> = match serde_json::from_str(&contents) {
            Ok(map) => map,
            Err(e) => {
                self.logger.warn(
                    "METADATA_UNPARSEABLE",
                    &[("error", &e.to_string())],
                );
                return self.recover();
            }
        };

        let file_size = self.data_file_size()?;
        let version = self.first_line_version()?;

        match map.get(&version) {
            Some(meta) if meta.readable_bytes() <= file_size => Ok(meta.clone()),
            Some(meta) => {
                self.logger.warn(
                    "METADATA_EXCEEDS_FILE",
                    &[
                        ("claimed_bytes", &meta.readable_bytes().to_string()),
                        ("file_size", &file_size.to_string()),
                    ],
                );
                self.recover()
            }
            None => {
                self.logger.warn("METADATA_VERSION_MISS", &[("version", &version)]);
                self.recover()
            }
        }
    }

    /// Rebuild metadata by scanning every line of the data file.
    ///
    /// The first successfully parsed line fixes `first_seq`/`start_pos`,
    /// the last fixes `last_seq`/`end_pos`. Positions rebase to physical
    /// file offsets; if garbage precedes the first valid record, the file
    /// is atomically rewritten without it so that byte 0 lines up with
    /// `start_pos` again. The result is persisted as the sole entry.
    pub fn recover(&self) -> BufferResult<BufferMetadata> {
        let data_path = self.config.data_path();
        let mut meta = BufferMetadata::fresh();

        if data_path.exists() {
            let file = File::open(&data_path).map_err(|e| BufferError::io(&data_path, e))?;
            let mut reader = BufReader::new(file);

            let mut offset = 0u64;
            let mut first: Option<(u64, u64)> = None;
            let mut last: Option<(u64, u64)> = None;
            let mut first_line: Option<Vec<u8>> = None;

            loop {
                let mut raw = Vec::new();
                let n = reader
                    .read_until(b'\n', &mut raw)
                    .map_err(|e| BufferError::io(&data_path, e))?;
                if n == 0 {
                    break;
                }
                if !raw.ends_with(b"\n") {
                    // Partial tail from an interrupted append; not committed.
                    break;
                }

                let parsed = std::str::from_utf8(&raw).ok().and_then(parse_record);
                match parsed {
                    Some((seq, _payload)) => {
                        if first.is_none() {
                            first = Some((seq, offset));
                            first_line = Some(raw.clone());
                        }
                        last = Some((seq, offset + n as u64));
                    }
                    None => {
                        self.logger.warn(
                            "RESCAN_LINE_SKIPPED",
                            &[("offset", &offset.to_string()), ("length", &n.to_string())],
                        );
                    }
                }
                offset += n as u64;
            }

            if let (Some((first_seq, first_off)), Some((last_seq, last_off))) = (first, last) {
                if first_off > 0 {
                    // Drop leading garbage so file offsets stay position-aligned.
                    self.logger.warn(
                        "RESCAN_DROPPED_PREFIX",
                        &[("bytes", &first_off.to_string())],
                    );
                    let contents =
                        fs::read(&data_path).map_err(|e| BufferError::io(&data_path, e))?;
                    write_atomic(&data_path, &contents[first_off as usize..])?;
                }
                meta = BufferMetadata {
                    first_seq,
                    last_seq,
                    start_pos: first_off,
                    end_pos: last_off,
                    version: version_of_line(&first_line.unwrap_or_default()),
                };
            }
        }

        self.save(&meta, None)?;
        self.logger.info(
            "METADATA_RECOVERED",
            &[
                ("first_seq", &meta.first_seq.to_string()),
                ("last_seq", &meta.last_seq.to_string()),
                ("end_pos", &meta.end_pos.to_string()),
            ],
        );
        Ok(meta)
    }

    /// Persist the metadata map.
    ///
    /// Writes `new` keyed by its version plus, when given, `old` keyed by
    /// its version. The dual-entry form is used across a truncation so a
    /// crash on either side of the data file replace still finds an entry
    /// matching the bytes on disk. The write is atomic.
    pub fn save(&self, new: &BufferMetadata, old: Option<&BufferMetadata>) -> BufferResult<()> {
        let mut map = BTreeMap::new();
        map.insert(new.version.clone(), new.clone());

        if let Some(old) = old {
            if old.version == new.version {
                return Err(BufferError::VersionCollision(new.version.clone()));
            }
            map.insert(old.version.clone(), old.clone());
        }

        let json = serde_json::to_string_pretty(&map)
            .map_err(|e| BufferError::MetadataCorrupt(e.to_string()))?;
        write_atomic(&self.metadata_path(), json.as_bytes())
    }

    /// Checksum of the data file's current physical first line, newline
    /// stripped; `EMPTY_VERSION` for an empty or missing file.
    pub fn first_line_version(&self) -> BufferResult<String> {
        let data_path = self.config.data_path();
        if !data_path.exists() {
            return Ok(EMPTY_VERSION.to_string());
        }

        let file = File::open(&data_path).map_err(|e| BufferError::io(&data_path, e))?;
        let mut reader = BufReader::new(file);
        let mut raw = Vec::new();
        reader
            .read_until(b'\n', &mut raw)
            .map_err(|e| BufferError::io(&data_path, e))?;

        Ok(version_of_line(&raw))
    }

    fn data_file_size(&self) -> BufferResult<u64> {
        let data_path = self.config.data_path();
        match fs::metadata(&data_path) {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(BufferError::io(&data_path, e)),
        }
    }
}

/// Version string for a raw first line (trailing newline ignored).
pub(crate) fn version_of_line(raw: &[u8]) -> String {
    let line = match raw.last() {
        Some(b'\n') => &raw[..raw.len() - 1],
        _ => raw,
    };
    if line.is_empty() {
        EMPTY_VERSION.to_string()
    } else {
        checksum_hex(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::format_record;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> MetadataStore {
        MetadataStore::new(Arc::new(BufferConfig::new(dir.path())))
    }

    fn write_records(dir: &TempDir, records: &[(u64, &str)]) -> u64 {
        let mut contents = String::new();
        for (seq, payload) in records {
            contents.push_str(&format_record(*seq, payload));
        }
        fs::write(dir.path().join("buffer.log"), &contents).unwrap();
        contents.len() as u64
    }

    #[test]
    fn test_restore_creates_fresh_metadata() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let meta = store.restore().unwrap();

        assert_eq!(meta, BufferMetadata::fresh());
        assert!(dir.path().join("metadata.json").exists());
    }

    #[test]
    fn test_restore_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write_records(&dir, &[(1, "a"), (2, "b")]);
        let store = store_in(&dir);

        let first = store.restore().unwrap();
        let second = store.restore().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_restore_matches_live_entry() {
        let dir = TempDir::new().unwrap();
        let total = write_records(&dir, &[(1, "a"), (2, "b"), (3, "c")]);
        let store = store_in(&dir);

        let version = store.first_line_version().unwrap();
        let meta = BufferMetadata {
            first_seq: 1,
            last_seq: 3,
            start_pos: 0,
            end_pos: total,
            version: version.clone(),
        };
        store.save(&meta, None).unwrap();

        assert_eq!(store.restore().unwrap(), meta);
    }

    #[test]
    fn test_restore_rescans_on_version_miss() {
        let dir = TempDir::new().unwrap();
        let total = write_records(&dir, &[(4, "x"), (5, "y")]);
        let store = store_in(&dir);

        // Metadata keyed by a version that no longer matches the file.
        let stale = BufferMetadata {
            first_seq: 1,
            last_seq: 2,
            start_pos: 0,
            end_pos: 10,
            version: "feedface".to_string(),
        };
        store.save(&stale, None).unwrap();

        let meta = store.restore().unwrap();
        assert_eq!(meta.first_seq, 4);
        assert_eq!(meta.last_seq, 5);
        assert_eq!(meta.start_pos, 0);
        assert_eq!(meta.end_pos, total);
    }

    #[test]
    fn test_restore_rescans_when_metadata_exceeds_file() {
        let dir = TempDir::new().unwrap();
        let total = write_records(&dir, &[(1, "a")]);
        let store = store_in(&dir);

        let version = store.first_line_version().unwrap();
        let oversized = BufferMetadata {
            first_seq: 1,
            last_seq: 9,
            start_pos: 0,
            end_pos: total + 500,
            version,
        };
        store.save(&oversized, None).unwrap();

        let meta = store.restore().unwrap();
        assert_eq!(meta.last_seq, 1);
        assert_eq!(meta.end_pos, total);
    }

    #[test]
    fn test_restore_finds_old_entry_after_interrupted_truncation() {
        let dir = TempDir::new().unwrap();
        let total = write_records(&dir, &[(1, "a"), (2, "b")]);
        let store = store_in(&dir);

        let live = BufferMetadata {
            first_seq: 1,
            last_seq: 2,
            start_pos: 0,
            end_pos: total,
            version: store.first_line_version().unwrap(),
        };
        // A truncation that never replaced the data file: the new entry
        // points at a version not on disk, the old entry still matches.
        let pending = BufferMetadata {
            first_seq: 2,
            last_seq: 2,
            start_pos: 30,
            end_pos: total,
            version: "0badf00d".to_string(),
        };
        store.save(&pending, Some(&live)).unwrap();

        assert_eq!(store.restore().unwrap(), live);
    }

    #[test]
    fn test_recover_skips_garbage_lines() {
        let dir = TempDir::new().unwrap();
        let mut contents = String::new();
        contents.push_str(&format_record(1, "good"));
        contents.push_str("this line is garbage\n");
        contents.push_str(&format_record(3, "also good"));
        fs::write(dir.path().join("buffer.log"), &contents).unwrap();

        let store = store_in(&dir);
        let meta = store.recover().unwrap();

        assert_eq!(meta.first_seq, 1);
        assert_eq!(meta.last_seq, 3);
        assert_eq!(meta.end_pos, contents.len() as u64);
    }

    #[test]
    fn test_recover_ignores_partial_tail() {
        let dir = TempDir::new().unwrap();
        let full = format_record(1, "committed");
        let partial = &format_record(2, "torn")[..10];
        fs::write(
            dir.path().join("buffer.log"),
            format!("{}{}", full, partial),
        )
        .unwrap();

        let store = store_in(&dir);
        let meta = store.recover().unwrap();

        assert_eq!(meta.last_seq, 1);
        assert_eq!(meta.end_pos, full.len() as u64);
    }

    #[test]
    fn test_recover_empty_file_yields_fresh() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("buffer.log"), "").unwrap();

        let store = store_in(&dir);
        assert_eq!(store.recover().unwrap(), BufferMetadata::fresh());
    }

    #[test]
    fn test_save_dual_entry_then_single() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let old = BufferMetadata {
            version: "aaaaaaaa".to_string(),
            ..BufferMetadata::fresh()
        };
        let new = BufferMetadata {
            first_seq: 5,
            last_seq: 9,
            start_pos: 100,
            end_pos: 200,
            version: "bbbbbbbb".to_string(),
        };

        store.save(&new, Some(&old)).unwrap();
        let contents = fs::read_to_string(dir.path().join("metadata.json")).unwrap();
        let map: BTreeMap<String, BufferMetadata> = serde_json::from_str(&contents).unwrap();
        assert_eq!(map.len(), 2);

        store.save(&new, None).unwrap();
        let contents = fs::read_to_string(dir.path().join("metadata.json")).unwrap();
        let map: BTreeMap<String, BufferMetadata> = serde_json::from_str(&contents).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["bbbbbbbb"], new);
    }

    #[test]
    fn test_save_rejects_version_collision() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let meta = BufferMetadata::fresh();

        let result = store.save(&meta, Some(&meta.clone()));
        assert!(matches!(result, Err(BufferError::VersionCollision(_))));
    }

    #[test]
    fn test_first_line_version_empty_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.first_line_version().unwrap(), EMPTY_VERSION);

        fs::write(dir.path().join("buffer.log"), "").unwrap();
        assert_eq!(store.first_line_version().unwrap(), EMPTY_VERSION);
    }

    #[test]
    fn test_restore_rescans_when_metadata_file_lost() {
        let dir = TempDir::new().unwrap();
        let total = write_records(&dir, &[(1, "a"), (2, "b")]);

        let store = store_in(&dir);
        let meta = store.restore().unwrap();
        assert_eq!(meta.first_seq, 1);
        assert_eq!(meta.last_seq, 2);
        assert_eq!(meta.end_pos, total);
    }

    #[test]
    fn test_restore_unparseable_metadata_rescans() {
        let dir = TempDir::new().unwrap();
        let total = write_records(&dir, &[(1, "a")]);
        fs::write(dir.path().join("metadata.json"), "not json").unwrap();

        let store = store_in(&dir);
        let meta = store.restore().unwrap();
        assert_eq!(meta.last_seq, 1);
        assert_eq!(meta.end_pos, total);
    }
}
