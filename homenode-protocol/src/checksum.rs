//! Additive checksums
//!
//! Two flavours are used on the wire:
//!
//! - [`additive`]: the plain sum of the bytes modulo 256. Application
//!   messages carry it, and the transport's acknowledgement echoes it.
//! - [`frame_checksum`]: the two's complement of the additive sum, so that
//!   summing a frame's checked bytes together with its checksum gives zero.

/// Sum of all bytes modulo 256
pub fn additive(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Two's complement of the additive sum (`0xFF - sum + 1`)
pub fn frame_checksum(bytes: &[u8]) -> u8 {
    additive(bytes).wrapping_neg()
}
