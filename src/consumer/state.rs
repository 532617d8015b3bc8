//! Consumer cursor state and checkpoint persistence

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::stream::EventStream;
use crate::atomic::write_atomic;
use crate::buffer::{HeldLock, Shared};
use crate::errors::{BufferError, BufferResult};
use crate::observability::Logger;

/// A consumer's durable checkpoint file contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Checkpoint {
    cur_seq: u64,
    cur_pos: u64,
}

/// The full cursor: durable committed progress plus in-flight progress
/// held only while a stream is open.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cursor {
    /// Sequence of the next unread record (committed).
    pub cur_seq: u64,
    /// Stream position of the committed cursor.
    pub cur_pos: u64,
    /// In-flight sequence, promoted by commit.
    pub new_seq: u64,
    /// In-flight position, promoted by commit.
    pub new_pos: u64,
}

/// One named consumer of the buffer.
pub struct Consumer {
    name: String,
    shared: Arc<Shared>,
    read_lock: HeldLock,
    stream_flag: HeldLock,
    cursor: Mutex<Cursor>,
    logger: Logger,
}

impl Consumer {
    /// Restore a consumer, clamping its checkpoint into the window the
    /// current metadata allows. An out-of-window checkpoint means the
    /// consumer was re-added after its unread data was truncated; that is
    /// corrected with a warning, not an error.
    pub(crate) fn open(shared: Arc<Shared>, name: &str) -> BufferResult<Self> {
        let logger = Logger::new("consumer");
        let meta = shared
            .metadata
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        let mut cur_seq = meta.first_seq;
        let mut cur_pos = meta.start_pos;

        let checkpoint_path = shared.config.checkpoint_path(name);
        if checkpoint_path.exists() {
            match Self::read_checkpoint(&checkpoint_path) {
                Ok(checkpoint) => {
                    cur_seq = checkpoint.cur_seq;
                    cur_pos = checkpoint.cur_pos;
                }
                Err(e) => {
                    logger.warn(
                        "CHECKPOINT_UNREADABLE",
                        &[("consumer", name), ("error", &e.to_string())],
                    );
                }
            }
        }

        let clamped_seq = cur_seq.clamp(meta.first_seq, meta.last_seq + 1);
        let clamped_pos = cur_pos.clamp(meta.start_pos, meta.end_pos);
        if clamped_seq != cur_seq || clamped_pos != cur_pos {
            logger.warn(
                "CHECKPOINT_CLAMPED",
                &[
                    ("consumer", name),
                    ("stored_seq", &cur_seq.to_string()),
                    ("stored_pos", &cur_pos.to_string()),
                    ("clamped_seq", &clamped_seq.to_string()),
                    ("clamped_pos", &clamped_pos.to_string()),
                ],
            );
        }

        Ok(Self {
            name: name.to_string(),
            shared,
            read_lock: HeldLock::new(),
            stream_flag: HeldLock::new(),
            cursor: Mutex::new(Cursor {
                cur_seq: clamped_seq,
                cur_pos: clamped_pos,
                new_seq: clamped_seq,
                new_pos: clamped_pos,
            }),
            logger,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The durable committed cursor `(cur_seq, cur_pos)`.
    pub fn committed(&self) -> (u64, u64) {
        let cursor = self.cursor.lock().unwrap_or_else(|p| p.into_inner());
        (cursor.cur_seq, cursor.cur_pos)
    }

    /// This consumer's read lock, taken by first-line-changing writers.
    pub(crate) fn read_lock(&self) -> &HeldLock {
        &self.read_lock
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn set_in_flight(&self, new_seq: u64, new_pos: u64) {
        let mut cursor = self.cursor.lock().unwrap_or_else(|p| p.into_inner());
        cursor.new_seq = new_seq;
        cursor.new_pos = new_pos;
    }

    /// Reset in-flight progress back to the committed cursor.
    pub(crate) fn reset_in_flight(&self) {
        let mut cursor = self.cursor.lock().unwrap_or_else(|p| p.into_inner());
        cursor.new_seq = cursor.cur_seq;
        cursor.new_pos = cursor.cur_pos;
    }

    /// Promote in-flight progress to the durable cursor and persist the
    /// checkpoint. The durable cursor never decreases.
    pub(crate) fn commit_in_flight(&self) -> BufferResult<()> {
        let promoted = {
            let mut cursor = self.cursor.lock().unwrap_or_else(|p| p.into_inner());
            cursor.cur_seq = cursor.cur_seq.max(cursor.new_seq);
            cursor.cur_pos = cursor.cur_pos.max(cursor.new_pos);
            cursor.new_seq = cursor.cur_seq;
            cursor.new_pos = cursor.cur_pos;
            Checkpoint {
                cur_seq: cursor.cur_seq,
                cur_pos: cursor.cur_pos,
            }
        };

        self.write_checkpoint(promoted)
            .map_err(|e| BufferError::CheckpointPersist {
                name: self.name.clone(),
                source: Box::new(e),
            })
    }

    /// Try to open a stream. `None` means one is already live; the call
    /// never blocks or queues.
    pub fn stream(self: &Arc<Self>) -> Option<EventStream> {
        let guard = self.stream_flag.try_acquire()?;
        Some(EventStream::new(Arc::clone(self), guard))
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.shared.config.checkpoint_path(&self.name)
    }

    fn read_checkpoint(path: &std::path::Path) -> BufferResult<Checkpoint> {
        let contents = fs::read_to_string(path).map_err(|e| BufferError::io(path, e))?;
        serde_json::from_str(&contents)
            .map_err(|e| BufferError::MetadataCorrupt(format!("checkpoint: {}", e)))
    }

    fn write_checkpoint(&self, checkpoint: Checkpoint) -> BufferResult<()> {
        let json = serde_json::to_string_pretty(&checkpoint)
            .map_err(|e| BufferError::MetadataCorrupt(e.to_string()))?;
        write_atomic(&self.checkpoint_path(), json.as_bytes())
    }
}
