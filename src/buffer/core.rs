//! The buffer itself: produce, truncate, and the consumer registry

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use super::attachments::AttachmentStore;
use super::executor::{SyncExecutor, WriteExecutor, WriteTask};
use super::locks::HeldLock;
use crate::atomic::write_atomic;
use crate::config::BufferConfig;
use crate::consumer::{Consumer, EventStream};
use crate::errors::{BufferError, BufferResult};
use crate::event::NewEvent;
use crate::metadata::{version_of_line, BufferMetadata, MetadataStore};
use crate::observability::Logger;

/// State shared between the buffer and its consumers.
pub(crate) struct Shared {
    pub(crate) config: Arc<BufferConfig>,
    pub(crate) metadata: Mutex<BufferMetadata>,
    pub(crate) store: MetadataStore,
    pub(crate) write_lock: HeldLock,
    pub(crate) logger: Logger,
}

/// A durable, file-backed event buffer.
///
/// One `Buffer` owns one data directory. Producers call [`produce`];
/// consumers are registered by name, stream events through
/// [`create_stream`], and checkpoint their progress; [`truncate`]
/// reclaims space every consumer has passed.
///
/// [`produce`]: Buffer::produce
/// [`create_stream`]: Buffer::create_stream
/// [`truncate`]: Buffer::truncate
pub struct Buffer {
    shared: Arc<Shared>,
    consumers: Mutex<Vec<Arc<Consumer>>>,
    attachments: AttachmentStore,
    executor: Box<dyn WriteExecutor>,
}

impl Buffer {
    /// Open (or create) the buffer rooted at the configured data
    /// directory, restoring metadata and every registered consumer.
    pub fn open(config: BufferConfig) -> BufferResult<Self> {
        Self::open_with_executor(config, Box::new(SyncExecutor))
    }

    /// Open with a caller-supplied write executor.
    pub fn open_with_executor(
        config: BufferConfig,
        executor: Box<dyn WriteExecutor>,
    ) -> BufferResult<Self> {
        let config = Arc::new(config);

        fs::create_dir_all(config.data_dir())
            .map_err(|e| BufferError::io(config.data_dir(), e))?;

        let attachments = AttachmentStore::new(config.attachments_dir());
        attachments.ensure_dir()?;

        let store = MetadataStore::new(Arc::clone(&config));
        let metadata = store.restore()?;

        let logger = Logger::new("buffer");
        logger.info(
            "BUFFER_OPENED",
            &[
                ("data_dir", &config.data_dir().display().to_string()),
                ("first_seq", &metadata.first_seq.to_string()),
                ("last_seq", &metadata.last_seq.to_string()),
            ],
        );

        let shared = Arc::new(Shared {
            config,
            metadata: Mutex::new(metadata),
            store,
            write_lock: HeldLock::new(),
            logger,
        });

        let mut consumers = Vec::new();
        for name in Self::load_registry(&shared)? {
            consumers.push(Arc::new(Consumer::open(Arc::clone(&shared), &name)?));
        }

        Ok(Self {
            shared,
            consumers: Mutex::new(consumers),
            attachments,
            executor,
        })
    }

    /// Current metadata snapshot.
    pub fn metadata(&self) -> BufferMetadata {
        self.shared
            .metadata
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Append a batch of events to the buffer.
    ///
    /// Runs under the write lock. When the buffer is currently empty the
    /// batch will create a new first line (and hence a new version), so
    /// every consumer's read lock is additionally taken before the write.
    ///
    /// On failure the data file and attachment directory have already
    /// been rolled back to their pre-batch state; metadata is only
    /// persisted after the file mutation is known-complete.
    pub fn produce(&self, events: Vec<NewEvent>) -> BufferResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let batch_len = events.len();

        let _write = self.shared.write_lock.acquire();
        let meta = self.metadata();

        // An empty buffer means this batch writes the first line; no
        // consumer may observe the version change mid-flight.
        let mut read_guards = Vec::new();
        if meta.is_empty() {
            let consumers = self.consumers.lock().unwrap_or_else(|p| p.into_inner());
            for consumer in consumers.iter() {
                read_guards.push(consumer.read_lock().acquire());
            }
        }

        let task = WriteTask {
            data_path: self.shared.config.data_path(),
            attachments_dir: self.shared.config.attachments_dir(),
            file_offset: meta.readable_bytes(),
            next_seq: meta.last_seq + 1,
            events,
        };
        let receipt = self.executor.execute(task)?;

        let mut updated = meta;
        updated.last_seq = receipt.last_seq;
        updated.end_pos += receipt.bytes_written;
        if let Some(first_line) = &receipt.first_line {
            updated.version = version_of_line(first_line.as_bytes());
        }

        self.shared.store.save(&updated, None)?;
        *self
            .shared
            .metadata
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = updated.clone();

        self.shared.logger.info(
            "BATCH_PRODUCED",
            &[
                ("events", &batch_len.to_string()),
                ("last_seq", &updated.last_seq.to_string()),
            ],
        );
        Ok(())
    }

    /// Reclaim disk space consumed by every registered consumer.
    ///
    /// Computes the laggard cursor; if nothing can be reclaimed this is a
    /// no-op. Otherwise, under the write lock plus every consumer's read
    /// lock: persist dual metadata (old + new), atomically rewrite the
    /// data file keeping bytes from the laggard position onward, persist
    /// the new metadata alone, then collect attachment garbage. A crash
    /// before the file replace leaves the old entry live; a crash after
    /// leaves the new entry matching the new file.
    pub fn truncate(&self) -> BufferResult<()> {
        let _write = self.shared.write_lock.acquire();
        let meta = self.metadata();

        let consumers: Vec<Arc<Consumer>> = self
            .consumers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        let mut min_seq = meta.last_seq + 1;
        let mut min_pos = meta.end_pos;
        for consumer in &consumers {
            let (cur_seq, cur_pos) = consumer.committed();
            if cur_seq < min_seq {
                min_seq = cur_seq;
                min_pos = cur_pos;
            }
        }

        if min_seq == meta.first_seq {
            return Ok(());
        }

        let _read_guards: Vec<_> = consumers
            .iter()
            .map(|c| c.read_lock().acquire())
            .collect();

        // Bytes that survive the truncation.
        let data_path = self.shared.config.data_path();
        let keep_offset = min_pos - meta.start_pos;
        let mut kept = Vec::new();
        {
            let mut file =
                File::open(&data_path).map_err(|e| BufferError::io(&data_path, e))?;
            file.seek(SeekFrom::Start(keep_offset))
                .map_err(|e| BufferError::io(&data_path, e))?;
            file.read_to_end(&mut kept)
                .map_err(|e| BufferError::io(&data_path, e))?;
        }
        // Only committed bytes move to the new file.
        kept.truncate((meta.end_pos - min_pos) as usize);

        let new_meta = BufferMetadata {
            first_seq: min_seq,
            last_seq: meta.last_seq,
            start_pos: min_pos,
            end_pos: meta.end_pos,
            version: version_of_line(first_line_of(&kept)),
        };

        // Dual-entry save first: whichever data file a crash leaves on
        // disk, one entry will match it.
        self.shared.store.save(&new_meta, Some(&meta))?;
        write_atomic(&data_path, &kept)?;
        self.shared.store.save(&new_meta, None)?;

        *self
            .shared
            .metadata
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = new_meta.clone();

        self.attachments.collect_garbage(new_meta.first_seq);

        self.shared.logger.info(
            "BUFFER_TRUNCATED",
            &[
                ("first_seq", &new_meta.first_seq.to_string()),
                ("reclaimed_bytes", &keep_offset.to_string()),
            ],
        );
        Ok(())
    }

    /// Register a consumer, restoring its checkpoint if one exists.
    pub fn add_consumer(&self, name: &str) -> BufferResult<()> {
        validate_consumer_name(name)?;

        let mut consumers = self.consumers.lock().unwrap_or_else(|p| p.into_inner());
        if consumers.iter().any(|c| c.name() == name) {
            return Err(BufferError::ConsumerExists(name.to_string()));
        }

        consumers.push(Arc::new(Consumer::open(Arc::clone(&self.shared), name)?));
        self.persist_registry(&consumers)
    }

    /// Unregister a consumer. Soft deletion: its checkpoint file stays on
    /// disk, so re-adding the consumer later resumes from it.
    pub fn remove_consumer(&self, name: &str) -> BufferResult<()> {
        let mut consumers = self.consumers.lock().unwrap_or_else(|p| p.into_inner());
        let before = consumers.len();
        consumers.retain(|c| c.name() != name);
        if consumers.len() == before {
            return Err(BufferError::UnknownConsumer(name.to_string()));
        }
        self.persist_registry(&consumers)
    }

    /// Names of registered consumers, in registration order.
    pub fn consumer_names(&self) -> Vec<String> {
        self.consumers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// The registered consumer handle, if any.
    pub fn consumer(&self, name: &str) -> Option<Arc<Consumer>> {
        self.consumers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Open an event stream for a consumer.
    ///
    /// Non-blocking: `Ok(None)` means the consumer already has a live
    /// stream and the caller should retry later.
    pub fn create_stream(&self, name: &str) -> BufferResult<Option<EventStream>> {
        let consumer = self
            .consumer(name)
            .ok_or_else(|| BufferError::UnknownConsumer(name.to_string()))?;
        Ok(consumer.stream())
    }

    fn load_registry(shared: &Shared) -> BufferResult<Vec<String>> {
        let path = shared.config.registry_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&path).map_err(|e| BufferError::io(&path, e))?;
        serde_json::from_str(&contents).map_err(|e| {
            BufferError::MetadataCorrupt(format!("consumer registry: {}", e))
        })
    }

    fn persist_registry(&self, consumers: &[Arc<Consumer>]) -> BufferResult<()> {
        let names: Vec<&str> = consumers.iter().map(|c| c.name()).collect();
        let json = serde_json::to_string_pretty(&names)
            .map_err(|e| BufferError::MetadataCorrupt(e.to_string()))?;
        write_atomic(&self.shared.config.registry_path(), json.as_bytes())
    }
}

/// The first line of a byte buffer, newline excluded.
fn first_line_of(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b == b'\n') {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

fn validate_consumer_name(name: &str) -> BufferResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(BufferError::InvalidConsumerName(name.to_string()))
    }
}
