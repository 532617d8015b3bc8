//! Line framing for buffer records
//!
//! The on-disk line format is exact, for compatibility with existing data
//! files:
//!
//! ```text
//! [{seq}, {payload}, "{checksum}"]\n
//! ```
//!
//! `{seq}` is a decimal integer, `{payload}` is the serialized event text
//! (opaque to the buffer, single line), and `{checksum}` is the CRC32 of
//! the string `"{seq}, {payload}"` as 8 lowercase hex digits.
//!
//! Parsing never fails hard: a malformed or corrupted line yields `None`
//! and the caller skips it.

use super::checksum::{checksum_hex, matches_either};

/// Length of the checksum suffix inside the brackets: `, "xxxxxxxx"`.
const CHECKSUM_SUFFIX_LEN: usize = 12;

/// Format one record as a data file line.
pub fn format_record(seq: u64, payload: &str) -> String {
    let data = format!("{}, {}", seq, payload);
    let checksum = checksum_hex(data.as_bytes());
    format!("[{}, \"{}\"]\n", data, checksum)
}

/// Parse one data file line back into `(seq, payload)`.
///
/// Accepts the current checksum rendering and the legacy one. Returns
/// `None` on any framing or checksum failure; the line is then treated
/// as garbage and skipped by the reader.
pub fn parse_record(line: &str) -> Option<(u64, String)> {
    let inner = line
        .strip_suffix('\n')
        .unwrap_or(line)
        .strip_prefix('[')?
        .strip_suffix(']')?;

    if inner.len() < CHECKSUM_SUFFIX_LEN {
        return None;
    }

    let (data, suffix) = inner.split_at(inner.len() - CHECKSUM_SUFFIX_LEN);
    let checksum = suffix.strip_prefix(", \"")?.strip_suffix('"')?;

    if !matches_either(data.as_bytes(), checksum) {
        return None;
    }

    let (seq_text, payload) = data.split_once(", ")?;
    let seq = seq_text.parse::<u64>().ok()?;

    Some((seq, payload.to_string()))
}
