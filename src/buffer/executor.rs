//! Write execution boundary
//!
//! The actual disk mutation of a produce batch is expressed as a
//! self-contained task: plain paths and values in, a receipt out, no live
//! references across the call. This keeps the boundary valid both for the
//! default in-process executor and for an implementation that ships the
//! task to a separate worker process.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

use super::attachments::AttachmentStore;
use crate::codec::format_record;
use crate::errors::{BufferError, BufferResult};
use crate::event::NewEvent;
use crate::observability::Logger;

/// A fully self-contained produce batch.
#[derive(Debug, Clone)]
pub struct WriteTask {
    /// The append-only data file.
    pub data_path: PathBuf,
    /// The buffer's attachment directory.
    pub attachments_dir: PathBuf,
    /// Committed length of the data file; writing starts here and
    /// rollback restores it.
    pub file_offset: u64,
    /// Sequence number the first event of the batch will receive.
    pub next_seq: u64,
    /// The batch.
    pub events: Vec<NewEvent>,
}

/// Outcome of a successfully executed write task.
#[derive(Debug, Clone)]
pub struct WriteReceipt {
    /// Sequence number of the last record written.
    pub last_seq: u64,
    /// Bytes appended to the data file.
    pub bytes_written: u64,
    /// The first line written, when the batch started an empty file (the
    /// buffer derives the new version from it).
    pub first_line: Option<String>,
}

/// Executes write tasks. Implementations may run in-process or hand the
/// task to a worker process; either way the call is synchronous and the
/// task carries everything it needs.
pub trait WriteExecutor: Send + Sync {
    fn execute(&self, task: WriteTask) -> BufferResult<WriteReceipt>;
}

/// Default executor: runs the move-and-write in the calling process.
#[derive(Debug, Default)]
pub struct SyncExecutor;

impl WriteExecutor for SyncExecutor {
    fn execute(&self, task: WriteTask) -> BufferResult<WriteReceipt> {
        move_and_write(&task)
    }
}

/// Relocate each event's attachments and append its record, in order.
///
/// On any failure mid-batch the data file is truncated back to the
/// task's `file_offset` and attachments already relocated by this batch
/// are best-effort deleted (failures logged, not raised) before the
/// error propagates. Nothing is ever left half-applied on disk.
pub fn move_and_write(task: &WriteTask) -> BufferResult<WriteReceipt> {
    let logger = Logger::new("writer");
    let attachments = AttachmentStore::new(task.attachments_dir.clone());
    attachments.ensure_dir()?;

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&task.data_path)
        .map_err(|e| BufferError::io(&task.data_path, e))?;

    let physical_len = file
        .metadata()
        .map_err(|e| BufferError::io(&task.data_path, e))?
        .len();
    if physical_len > task.file_offset {
        // Uncommitted tail from an interrupted batch; discard it before
        // appending.
        logger.warn(
            "UNCOMMITTED_TAIL_DROPPED",
            &[("bytes", &(physical_len - task.file_offset).to_string())],
        );
        file.set_len(task.file_offset)
            .map_err(|e| BufferError::io(&task.data_path, e))?;
    }

    let mut relocated: Vec<PathBuf> = Vec::new();
    let mut receipt = WriteReceipt {
        last_seq: task.next_seq.saturating_sub(1),
        bytes_written: 0,
        first_line: None,
    };

    let result = (|| -> BufferResult<()> {
        file.seek(SeekFrom::Start(task.file_offset))
            .map_err(|e| BufferError::io(&task.data_path, e))?;

        let mut seq = task.next_seq;
        for event in &task.events {
            if event.payload.contains('\n') {
                return Err(BufferError::PayloadNotSingleLine);
            }

            for (id, src) in &event.attachments {
                relocated.push(attachments.relocate(seq, id, src)?);
            }

            let line = format_record(seq, &event.payload);
            file.write_all(line.as_bytes())
                .map_err(|e| BufferError::io(&task.data_path, e))?;

            if task.file_offset == 0 && receipt.first_line.is_none() {
                receipt.first_line = Some(line.clone());
            }
            receipt.bytes_written += line.len() as u64;
            receipt.last_seq = seq;
            seq += 1;
        }

        file.sync_all()
            .map_err(|e| BufferError::io(&task.data_path, e))
    })();

    match result {
        Ok(()) => Ok(receipt),
        Err(e) => {
            // Roll the file back to its pre-batch length.
            if let Err(te) = file.set_len(task.file_offset) {
                logger.error(
                    "ROLLBACK_TRUNCATE_FAILED",
                    &[("error", &te.to_string())],
                );
            }
            // Undo this batch's relocations; best effort.
            for path in relocated {
                if let Err(de) = std::fs::remove_file(&path) {
                    logger.warn(
                        "ROLLBACK_ATTACHMENT_DELETE_FAILED",
                        &[
                            ("file", &path.display().to_string()),
                            ("error", &de.to_string()),
                        ],
                    );
                }
            }
            Err(e)
        }
    }
}
