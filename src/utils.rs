//! Little-endian field extraction and small helpers shared by every parser.
//!
//! Out-of-range offsets are programming errors: these functions panic instead
//! of returning a recoverable error, callers are expected to size their
//! windows before decoding.

use std::io;

use crate::device::BlockDevice;

/// Reads a specific sector from a block device into a buffer.
///
/// # Arguments
///
/// - `device`: The block device to read from.
/// - `sector`: The sector number to read.
/// - `sector_size`: The size in bytes of a sector.
/// - `buffer`: A mutable reference to a vector where the sector data will be stored.
///
/// The buffer will be resized to match the sector size.
///
/// # Errors
///
/// Returns an `io::Error` if the sector cannot be read.
pub fn read_sector<D: BlockDevice + ?Sized>(
    device: &mut D,
    sector: u64,
    sector_size: usize,
    buffer: &mut Vec<u8>,
) -> io::Result<()> {
    buffer.resize(sector_size, 0);

    device
        .read_at(sector_size as u64 * sector, buffer)
        .map_err(|err| io::Error::new(err.kind(), format!("Failed to read sector {sector}: {err}")))
}

/// Extracts a little-endian unsigned integer of `size` bytes (1 to 8).
///
/// # Panics
///
/// Panics if `size` is outside `1..=8` or if the slice does not contain enough
/// bytes starting from the offset.
pub fn uint_at(buffer: &[u8], offset: usize, size: usize) -> u64 {
    assert!((1..=8).contains(&size), "invalid integer width: {size}");

    buffer[offset..offset + size]
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, byte)| acc | (u64::from(*byte) << (i * 8)))
}

/// Extracts a 64-bit unsigned integer from a buffer at a given offset.
///
/// # Panics
///
/// Panics if the slice does not contain enough bytes starting from the offset.
pub fn u64_at(buffer: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(
        buffer[offset..offset + 8]
            .try_into()
            .expect("invalid slice"),
    )
}

/// Extracts a 32-bit unsigned integer from a buffer at a given offset.
///
/// # Panics
///
/// Panics if the slice does not contain enough bytes starting from the offset.
pub fn u32_at(buffer: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(
        buffer[offset..offset + 4]
            .try_into()
            .expect("invalid slice"),
    )
}

/// Extracts a 16-bit unsigned integer from a buffer at a given offset.
///
/// # Panics
///
/// Panics if the slice does not contain enough bytes starting from the offset.
pub fn u16_at(buffer: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(
        buffer[offset..offset + 2]
            .try_into()
            .expect("invalid slice"),
    )
}

/// Extracts a 8-bit unsigned integer from a buffer at a given offset.
///
/// # Panics
///
/// Panics if the offset is outside the slice.
pub fn u8_at(buffer: &[u8], offset: usize) -> u8 {
    buffer[offset]
}

/// Renders `size` bytes starting at `offset` as an uppercase hex string
/// without separators, e.g. `[0x55, 0xAA]` becomes `"55AA"`.
///
/// # Panics
///
/// Panics if the slice does not contain enough bytes starting from the offset.
pub fn hex_at(buffer: &[u8], offset: usize, size: usize) -> String {
    buffer[offset..offset + size]
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect()
}

/// Decodes a UTF-16LE byte run. Unpaired surrogates are replaced, padding
/// code units (`0x0000`, `0xFFFF`) are kept as-is.
pub fn utf16_at(buffer: &[u8], offset: usize, size: usize) -> String {
    let units: Vec<u16> = buffer[offset..offset + size]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    String::from_utf16_lossy(&units)
}

/// Decodes a single-byte character run, one char per byte.
pub fn ascii_at(buffer: &[u8], offset: usize, size: usize) -> String {
    buffer[offset..offset + size]
        .iter()
        .map(|byte| char::from(*byte))
        .collect()
}

/// Cuts a string at its first NUL character.
pub fn trim_nul(s: &str) -> &str {
    match s.find('\0') {
        Some(idx) => &s[..idx],
        None => s,
    }
}

/// Formats a byte count for display: "N bytes", "x.xx KB", "x.xx MB" or "x.xx GB".
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match size {
        s if s < KB => format!("{s} bytes"),
        s if s < MB => format!("{:.2} KB", s as f64 / KB as f64),
        s if s < GB => format!("{:.2} MB", s as f64 / MB as f64),
        s => format!("{:.2} GB", s as f64 / GB as f64),
    }
}
