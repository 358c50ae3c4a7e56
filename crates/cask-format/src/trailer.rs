//! Trailer descriptor
//!
//! Every container ends with a fixed 88-byte trailer that locates the TOC
//! relative to the container's own start, so the container can be appended
//! to an unrelated host file:
//!
//! ```text
//! ┌─────────────────────────┐  ← pkg_start = trailer_end - total_length
//! │  Payload                │  ← entry bytes, appended in TOC order
//! ├─────────────────────────┤  ← pkg_start + toc_offset
//! │  TOC                    │  ← fixed-struct records or a JSON mapping
//! ├─────────────────────────┤
//! │  Trailer (88 bytes)     │
//! └─────────────────────────┘  ← trailer_end
//! ```
//!
//! Layout, big-endian:
//!
//! ```text
//! offset  size  field
//! 0       8     magic
//! 8       4     total_length     u32
//! 12      4     toc_offset       u32
//! 16      4     toc_length       i32
//! 20      4     format_version   i32
//! 24      64    runtime_name     NUL-padded
//! ```

use crate::error::{ArchiveError, Result};
use crate::toc::TocFormat;

/// Magic bytes of a fixed-struct container trailer.
pub const FIXED_MAGIC: [u8; 8] = *b"CASK\x0c\x0b\x0a\x0e";

/// Magic bytes of a self-describing (mapping) container trailer.
pub const MAPPING_MAGIC: [u8; 8] = *b"CASKMAP\x0e";

/// Length of either magic.
pub const MAGIC_LEN: usize = 8;

/// Size of the trailer in bytes.
pub const TRAILER_SIZE: usize = 88;

/// Current container format version.
pub const FORMAT_VERSION: i32 = 1;

const RUNTIME_NAME_LEN: usize = 64;

/// Decoded trailer descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    /// Which TOC variant follows from the matched magic
    pub format: TocFormat,

    /// Length of the whole container, trailer included
    pub total_length: u32,

    /// Offset of the TOC from the container start
    pub toc_offset: u32,

    /// Length of the TOC in bytes
    pub toc_length: i32,

    /// Format version the writer declared
    pub format_version: i32,

    /// Identifies the runtime library the bundle was built for
    pub runtime_name: String,
}

impl Trailer {
    /// Raw magic for this trailer's format.
    pub fn magic(&self) -> [u8; MAGIC_LEN] {
        self.format.magic()
    }

    /// Encode into the fixed 88-byte layout.
    ///
    /// Runtime names longer than 63 bytes are truncated on a character
    /// boundary so the field always stays NUL-terminated.
    pub fn encode(&self) -> [u8; TRAILER_SIZE] {
        let mut buf = [0u8; TRAILER_SIZE];
        buf[0..8].copy_from_slice(&self.magic());
        buf[8..12].copy_from_slice(&self.total_length.to_be_bytes());
        buf[12..16].copy_from_slice(&self.toc_offset.to_be_bytes());
        buf[16..20].copy_from_slice(&self.toc_length.to_be_bytes());
        buf[20..24].copy_from_slice(&self.format_version.to_be_bytes());
        buf[24..].copy_from_slice(&encode_runtime_name(&self.runtime_name));
        buf
    }

    /// Decode and validate a trailer.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TRAILER_SIZE {
            return Err(ArchiveError::CorruptTrailer(format!(
                "need {} bytes, got {}",
                TRAILER_SIZE,
                bytes.len()
            )));
        }

        let format = TocFormat::from_magic(&bytes[0..8])
            .ok_or_else(|| ArchiveError::CorruptTrailer("unknown magic".to_string()))?;

        let runtime_name = decode_runtime_name(&bytes[24..TRAILER_SIZE])?;
        if runtime_name.is_empty() {
            return Err(ArchiveError::CorruptTrailer(
                "runtime name is empty".to_string(),
            ));
        }

        let toc_length = read_i32(bytes, 16);
        if toc_length < 0 {
            return Err(ArchiveError::CorruptTrailer(format!(
                "negative TOC length {}",
                toc_length
            )));
        }

        Ok(Self {
            format,
            total_length: read_u32(bytes, 8),
            toc_offset: read_u32(bytes, 12),
            toc_length,
            format_version: read_i32(bytes, 20),
            runtime_name,
        })
    }

    /// Compute the container start from the trailer's file offset and check
    /// that the TOC fits between the start and the trailer.
    pub fn pkg_start(&self, trailer_offset: u64) -> Result<u64> {
        let trailer_end = trailer_offset + TRAILER_SIZE as u64;
        let total = u64::from(self.total_length);
        if total < TRAILER_SIZE as u64 || total > trailer_end {
            return Err(ArchiveError::CorruptTrailer(format!(
                "total length {} does not fit before trailer end {}",
                total, trailer_end
            )));
        }

        let toc_end = u64::from(self.toc_offset) + self.toc_length as u64;
        if toc_end > total - TRAILER_SIZE as u64 {
            return Err(ArchiveError::CorruptTrailer(format!(
                "TOC range {}..{} overlaps the trailer (container length {})",
                self.toc_offset, toc_end, total
            )));
        }

        Ok(trailer_end - total)
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Encode a runtime name into the fixed-size, NUL-padded field.
pub fn encode_runtime_name(name: &str) -> [u8; RUNTIME_NAME_LEN] {
    let mut buf = [0u8; RUNTIME_NAME_LEN];
    let mut len = name.len().min(RUNTIME_NAME_LEN - 1); // keep a NUL terminator
    while !name.is_char_boundary(len) {
        len -= 1;
    }
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    buf
}

fn decode_runtime_name(field: &[u8]) -> Result<String> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end])
        .map(str::to_string)
        .map_err(|_| ArchiveError::CorruptTrailer("runtime name is not UTF-8".to_string()))
}
