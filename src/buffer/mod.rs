//! Buffer core
//!
//! Owns the append-only data file, the metadata store, and the consumer
//! registry; exposes produce (append) and truncate (reclaim).
//!
//! # Locking Discipline
//!
//! - One write lock guards all mutations of the data file tail and of
//!   metadata.
//! - One read lock per consumer guards that consumer's cursor against a
//!   concurrent truncation.
//! - Any operation that can change the file's first line (an
//!   empty-to-nonempty produce, or any truncation) takes the write lock
//!   and then every consumer's read lock, in that order. Plain appends
//!   take only the write lock.

mod attachments;
mod core;
mod executor;
mod locks;

pub use attachments::AttachmentStore;
pub use self::core::Buffer;
pub(crate) use self::core::Shared;
pub use executor::{move_and_write, SyncExecutor, WriteExecutor, WriteReceipt, WriteTask};
pub use locks::{HeldLock, LockGuard};
