//! Pull-based event stream with read-ahead
//!
//! A stream refills its read-ahead queue from disk in bounded chunks,
//! under a timeout-bounded read-lock acquisition so a concurrent
//! truncation can neither be starved nor cause the reader to hang. A
//! refill that cannot get the lock in time reports `Busy`; the caller
//! re-polls on its own schedule.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::sync::Arc;

use super::state::Consumer;
use crate::buffer::LockGuard;
use crate::codec::parse_record;
use crate::errors::{BufferError, BufferResult};
use crate::event::SequencedEvent;
use crate::observability::Logger;

/// Outcome of one `next()` poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextEvent {
    /// A record, in sequence order.
    Ready(SequencedEvent),
    /// Nothing committed beyond the cursor right now.
    Empty,
    /// The read lock could not be acquired in time (a truncation is in
    /// progress). Not an error; retry later.
    Busy,
}

struct Prefetched {
    seq: u64,
    /// Stream position one past this record's line, including any
    /// skipped garbage that preceded it.
    pos_after: u64,
    payload: String,
}

/// A consumer's single live read transaction.
///
/// Obtained from [`Consumer::stream`] (at most one per consumer at a
/// time). Progress made through `next()` stays in-flight until
/// `commit()`; `abort()` or dropping the stream discards it.
pub struct EventStream {
    consumer: Arc<Consumer>,
    stream_guard: Option<LockGuard>,
    read_ahead: VecDeque<Prefetched>,
    /// Absolute stream position the next refill reads from.
    fetch_pos: u64,
    closed: bool,
    logger: Logger,
}

enum Refill {
    Done,
    Busy,
}

impl EventStream {
    pub(crate) fn new(consumer: Arc<Consumer>, stream_guard: LockGuard) -> Self {
        consumer.reset_in_flight();
        let (_, cur_pos) = consumer.committed();
        Self {
            fetch_pos: cur_pos,
            consumer,
            stream_guard: Some(stream_guard),
            read_ahead: VecDeque::new(),
            closed: false,
            logger: Logger::new("stream"),
        }
    }

    /// Pull the next record.
    ///
    /// # Errors
    ///
    /// `BufferError::StreamExpired` once the stream has been committed or
    /// aborted.
    pub fn next(&mut self) -> BufferResult<NextEvent> {
        if self.closed {
            return Err(BufferError::StreamExpired);
        }

        while self.read_ahead.is_empty() {
            let before = self.fetch_pos;
            match self.refill()? {
                Refill::Busy => return Ok(NextEvent::Busy),
                Refill::Done => {}
            }
            if self.fetch_pos == before {
                break;
            }
        }

        match self.read_ahead.pop_front() {
            Some(record) => {
                self.consumer
                    .set_in_flight(record.seq + 1, record.pos_after);
                Ok(NextEvent::Ready(SequencedEvent {
                    seq: record.seq,
                    payload: record.payload,
                }))
            }
            None => Ok(NextEvent::Empty),
        }
    }

    /// Make the progress of this stream durable and close it.
    ///
    /// The stream lock is released even when persisting the checkpoint
    /// fails; the caller must then treat its progress as unknown and
    /// resynchronize from the durable checkpoint on the next stream.
    pub fn commit(&mut self) -> BufferResult<()> {
        if self.closed {
            return Err(BufferError::StreamExpired);
        }
        self.closed = true;
        self.read_ahead.clear();

        let result = self.consumer.commit_in_flight();
        if let Err(e) = &result {
            self.logger.error(
                "COMMIT_CHECKPOINT_FAILED",
                &[
                    ("consumer", self.consumer.name()),
                    ("error", &e.to_string()),
                ],
            );
        }
        self.stream_guard.take();
        result
    }

    /// Discard the progress of this stream and close it.
    ///
    /// Always safe to call, including on an already-closed stream.
    pub fn abort(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.consumer.reset_in_flight();
        self.read_ahead.clear();
        self.stream_guard.take();
    }

    fn refill(&mut self) -> BufferResult<Refill> {
        let shared = Arc::clone(self.consumer.shared());
        let timeout = shared.config.read_lock_timeout();

        let _read = match self.consumer.read_lock().acquire_timeout(timeout) {
            Some(guard) => guard,
            None => return Ok(Refill::Busy),
        };

        let meta = shared
            .metadata
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if self.fetch_pos >= meta.end_pos {
            return Ok(Refill::Done);
        }

        let data_path = shared.config.data_path();
        let file = File::open(&data_path).map_err(|e| BufferError::io(&data_path, e))?;
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(self.fetch_pos - meta.start_pos))
            .map_err(|e| BufferError::io(&data_path, e))?;

        let budget = shared.config.read_chunk_bytes() as u64;
        let mut consumed = 0u64;

        // Whole committed lines only; a torn tail past end_pos is not
        // ours to read.
        while self.fetch_pos < meta.end_pos && consumed < budget {
            let mut raw = Vec::new();
            let n = reader
                .read_until(b'\n', &mut raw)
                .map_err(|e| BufferError::io(&data_path, e))?;
            if n == 0 || !raw.ends_with(b"\n") {
                break;
            }
            if self.fetch_pos + n as u64 > meta.end_pos {
                break;
            }

            self.fetch_pos += n as u64;
            consumed += n as u64;

            match std::str::from_utf8(&raw).ok().and_then(parse_record) {
                Some((seq, payload)) => {
                    self.read_ahead.push_back(Prefetched {
                        seq,
                        pos_after: self.fetch_pos,
                        payload,
                    });
                }
                None => {
                    // Skipped bytes are folded into the next parsed
                    // record's pos_after.
                    self.logger.warn(
                        "LINE_SKIPPED",
                        &[
                            ("consumer", self.consumer.name()),
                            ("pos", &(self.fetch_pos - n as u64).to_string()),
                            ("length", &n.to_string()),
                        ],
                    );
                }
            }
        }

        Ok(Refill::Done)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.abort();
    }
}
