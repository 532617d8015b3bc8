//! CRC32 checksum computation for buffer records
//!
//! Uses CRC32 (IEEE polynomial) for checksums.
//!
//! Two textual renderings exist:
//! - current: `crc32(data) & 0xFFFFFFFF`, 8 lowercase hex digits
//! - legacy: the same CRC32 read as a signed 32-bit value, negative
//!   results mapped through `value - 2^32` and then the absolute value,
//!   8 lowercase hex digits
//!
//! All writes use the current rendering; the legacy one is accepted on
//! read only, for data files written by older producers.

use crc32fast::Hasher;

/// Computes a CRC32 checksum over the provided data.
///
/// This function is deterministic: the same input always produces the
/// same output.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Current checksum rendering: 8 lowercase hex digits of the unsigned CRC.
pub fn checksum_hex(data: &[u8]) -> String {
    format!("{:08x}", compute_checksum(data))
}

/// Legacy checksum rendering.
///
/// Old producers computed the CRC as a signed 32-bit value and, when it
/// came out negative, hex-formatted its absolute value.
pub fn legacy_checksum_hex(data: &[u8]) -> String {
    let signed = compute_checksum(data) as i32;
    format!("{:08x}", (signed as i64).unsigned_abs())
}

/// Whether `hex` matches either the current or the legacy rendering of
/// the CRC of `data`.
pub fn matches_either(data: &[u8], hex: &str) -> bool {
    hex == checksum_hex(data) || hex == legacy_checksum_hex(data)
}
