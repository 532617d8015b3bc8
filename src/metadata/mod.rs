//! Versioned buffer metadata
//!
//! The metadata file maps a version string (the checksum of the data
//! file's first line) to the buffer window for that epoch. During a
//! truncation transition the map holds two entries, old and new, so that
//! a crash at any point leaves one entry consistent with whichever data
//! file ended up on disk.
//!
//! # Invariants Enforced
//!
//! - `start_pos <= end_pos`
//! - `first_seq <= last_seq + 1`
//! - `end_pos - start_pos` never exceeds the physical data file size
//!   (violations force a full rescan)
//! - a live entry's version equals the checksum of the physical first line

mod store;

pub use store::{BufferMetadata, MetadataStore, EMPTY_VERSION};
pub(crate) use store::version_of_line;
