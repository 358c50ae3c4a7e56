//! zlib compression for entry payloads.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{ArchiveError, Result};

/// Default zlib level for entries.
pub const DEFAULT_LEVEL: u32 = 9;

// Upper bound on trusting a recorded size for preallocation.
const MAX_PREALLOC: usize = 64 * 1024 * 1024;

/// Compress `data` at `level` (clamped to 0..=9).
pub fn deflate(data: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2),
        Compression::new(level.min(9)),
    );
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inflate an entry's payload.
///
/// When `expected_len` is non-zero the output must have exactly that length.
pub fn inflate(name: &str, data: &[u8], expected_len: u32) -> Result<Vec<u8>> {
    let failed = |reason: String| ArchiveError::DecompressionFailed {
        name: name.to_string(),
        reason,
    };

    let mut out = Vec::with_capacity((expected_len as usize).min(MAX_PREALLOC));
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| failed(e.to_string()))?;

    if expected_len != 0 && out.len() != expected_len as usize {
        return Err(failed(format!(
            "inflated to {} bytes, expected {}",
            out.len(),
            expected_len
        )));
    }
    Ok(out)
}
