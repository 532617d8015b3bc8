//! Record codec for the buffer data file
//!
//! One event = one checksummed text line:
//!
//! ```text
//! [{seq}, {payload}, "{checksum}"]\n
//! ```
//!
//! # Design Principles
//!
//! - Writes always use the current checksum form
//! - Reads additionally accept a legacy checksum form kept for old data
//! - Parse failures are recoverable: the caller skips the line

mod checksum;
mod record;

pub use checksum::{checksum_hex, compute_checksum, legacy_checksum_hex, matches_either};
pub use record::{format_record, parse_record};
