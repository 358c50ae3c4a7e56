//! Fixed-struct TOC encoding
//!
//! Each record is a big-endian header followed by the NUL-terminated UTF-8
//! name, padded with NULs so the record length is a multiple of 16:
//!
//! ```text
//! offset  size  field
//! 0       4     record_length        i32
//! 4       4     data_offset          u32
//! 8       4     data_length          u32
//! 12      4     uncompressed_length  u32
//! 16      1     flags                u8
//! 17      1     type_code            u8
//! 18      n     name + NUL padding
//! ```

use super::{TocEntry, TypeCode};
use crate::error::{ArchiveError, Result};

/// Size of the record header preceding the name.
pub const ENTRY_HEADER_SIZE: usize = 18;

/// Records are padded to a multiple of this.
pub const RECORD_ALIGN: usize = 16;

/// Total on-disk length of the record for a name of `name_len` bytes.
pub fn record_length(name_len: usize) -> usize {
    let unpadded = ENTRY_HEADER_SIZE + name_len + 1; // at least one NUL
    unpadded.div_ceil(RECORD_ALIGN) * RECORD_ALIGN
}

/// Encode entries as consecutive records.
pub fn dump(entries: &[TocEntry]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(entries.len() * 64);

    for entry in entries {
        let name = entry.name.as_bytes();
        if name.contains(&0) {
            return Err(ArchiveError::invalid_entry(
                &entry.name,
                "name contains a NUL byte",
            ));
        }

        let len = record_length(name.len());
        let record_len = i32::try_from(len)
            .map_err(|_| ArchiveError::invalid_entry(&entry.name, "name is too long"))?;

        out.extend_from_slice(&record_len.to_be_bytes());
        out.extend_from_slice(&entry.data_offset.to_be_bytes());
        out.extend_from_slice(&entry.compressed_length.to_be_bytes());
        out.extend_from_slice(&entry.uncompressed_length.to_be_bytes());
        out.push(entry.flag_byte());
        out.push(entry.type_code.as_u8());
        out.extend_from_slice(name);
        out.resize(out.len() + len - ENTRY_HEADER_SIZE - name.len(), 0);
    }

    Ok(out)
}

/// Decode consecutive records.
pub fn load(bytes: &[u8]) -> Result<Vec<TocEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let available = bytes.len() - pos;
        if available < ENTRY_HEADER_SIZE {
            return Err(ArchiveError::TruncatedToc {
                at: pos,
                needed: ENTRY_HEADER_SIZE,
                available,
            });
        }

        let header = &bytes[pos..pos + ENTRY_HEADER_SIZE];
        let record_len = i32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        if record_len < ENTRY_HEADER_SIZE as i32 {
            return Err(ArchiveError::CorruptToc(format!(
                "record at byte {} declares length {}",
                pos, record_len
            )));
        }
        let record_len = record_len as usize;
        if record_len > available {
            return Err(ArchiveError::TruncatedToc {
                at: pos,
                needed: record_len,
                available,
            });
        }

        let raw_name = &bytes[pos + ENTRY_HEADER_SIZE..pos + record_len];
        let name_end = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
        let name = std::str::from_utf8(&raw_name[..name_end])
            .map_err(|_| {
                ArchiveError::CorruptToc(format!("record at byte {} has a non-UTF-8 name", pos))
            })?
            .to_string();

        let mut entry = TocEntry {
            name,
            data_offset: read_u32(header, 4),
            compressed_length: read_u32(header, 8),
            uncompressed_length: read_u32(header, 12),
            compressed: false,
            encrypted: false,
            type_code: TypeCode::from_u8(header[17]),
        };
        entry.set_flag_byte(header[16]);
        entries.push(entry);

        pos += record_len;
    }

    Ok(entries)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
