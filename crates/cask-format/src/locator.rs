//! Trailer locator
//!
//! Scans backward through a searchable region in fixed-size windows looking
//! for the last trailer magic. Successive windows overlap by `MAGIC_LEN - 1`
//! bytes so a magic straddling a window boundary is never missed.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{ArchiveError, Result};
use crate::toc::TocFormat;
use crate::trailer::MAGIC_LEN;

/// Default scan window size.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Where a trailer magic was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailerPosition {
    /// Absolute offset of the first magic byte
    pub offset: u64,

    /// Variant selected by the matched magic
    pub format: TocFormat,
}

/// Backward scanner for trailer magics.
#[derive(Debug, Clone, Copy)]
pub struct TrailerLocator {
    chunk_size: usize,
}

impl Default for TrailerLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TrailerLocator {
    /// Locator with the default 8 KiB window.
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Locator with a custom window size. Windows smaller than the magic
    /// cannot hold a match, so the size is raised to `MAGIC_LEN`.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(MAGIC_LEN),
        }
    }

    /// Window size in use.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Find the last trailer magic in `[search_start, search_start + search_length)`.
    ///
    /// With no explicit length the region runs to end-of-file.
    pub fn locate<R: Read + Seek>(
        &self,
        reader: &mut R,
        search_start: u64,
        search_length: Option<u64>,
    ) -> Result<TrailerPosition> {
        let search_end = match search_length {
            Some(length) => search_start
                .checked_add(length)
                .ok_or(ArchiveError::RangeOverflow {
                    start: search_start,
                    length,
                })?,
            None => reader.seek(SeekFrom::End(0))?,
        };
        let searched = search_end.saturating_sub(search_start);

        let overlap = (MAGIC_LEN - 1) as u64;
        let mut buf = vec![0u8; self.chunk_size];
        let mut window_end = search_end;

        while window_end.saturating_sub(search_start) >= MAGIC_LEN as u64 {
            let window_start = window_end
                .saturating_sub(self.chunk_size as u64)
                .max(search_start);
            let window = &mut buf[..(window_end - window_start) as usize];

            reader.seek(SeekFrom::Start(window_start))?;
            reader.read_exact(window)?;

            if let Some((pos, format)) = rfind_magic(window) {
                return Ok(TrailerPosition {
                    offset: window_start + pos as u64,
                    format,
                });
            }

            if window_start == search_start {
                break;
            }
            window_end = window_start + overlap;
        }

        Err(ArchiveError::NotAContainer { searched })
    }
}

/// Rightmost occurrence of any known magic in `window`.
fn rfind_magic(window: &[u8]) -> Option<(usize, TocFormat)> {
    if window.len() < MAGIC_LEN {
        return None;
    }
    (0..=window.len() - MAGIC_LEN)
        .rev()
        .find_map(|pos| TocFormat::from_magic(&window[pos..pos + MAGIC_LEN]).map(|f| (pos, f)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trailer::{FIXED_MAGIC, MAPPING_MAGIC};
    use std::io::Cursor;

    fn with_magic_at(len: usize, at: usize, magic: &[u8; 8]) -> Vec<u8> {
        let mut data: Vec<u8> = (0..len).map(|i| (i % 251) as u8 | 0x80).collect();
        data[at..at + MAGIC_LEN].copy_from_slice(magic);
        data
    }

    #[test]
    fn test_locate_at_end() {
        let data = with_magic_at(20_000, 20_000 - 88, &FIXED_MAGIC);
        let pos = TrailerLocator::new()
            .locate(&mut Cursor::new(&data), 0, None)
            .unwrap();
        assert_eq!(pos.offset, 20_000 - 88);
        assert_eq!(pos.format, TocFormat::FixedStruct);
    }

    #[test]
    fn test_locate_mapping_magic() {
        let data = with_magic_at(500, 100, &MAPPING_MAGIC);
        let pos = TrailerLocator::new()
            .locate(&mut Cursor::new(&data), 0, None)
            .unwrap();
        assert_eq!(pos.offset, 100);
        assert_eq!(pos.format, TocFormat::SelfDescribing);
    }

    #[test]
    fn test_locate_straddling_chunk_boundaries() {
        // Every chunk size from the magic length up, and every position,
        // including ones that straddle window boundaries.
        for chunk in MAGIC_LEN..=MAGIC_LEN + 9 {
            let locator = TrailerLocator::with_chunk_size(chunk);
            for at in 0..=40 {
                let data = with_magic_at(48, at, &FIXED_MAGIC);
                let pos = locator
                    .locate(&mut Cursor::new(&data), 0, None)
                    .unwrap_or_else(|e| panic!("chunk {chunk} at {at}: {e}"));
                assert_eq!(pos.offset, at as u64, "chunk {chunk}");
            }
        }
    }

    #[test]
    fn test_locate_prefers_last_occurrence() {
        let mut data = with_magic_at(30_000, 10, &FIXED_MAGIC);
        data[25_000..25_008].copy_from_slice(&FIXED_MAGIC);
        let pos = TrailerLocator::new()
            .locate(&mut Cursor::new(&data), 0, None)
            .unwrap();
        assert_eq!(pos.offset, 25_000);
    }

    #[test]
    fn test_locate_respects_explicit_range() {
        let mut data = with_magic_at(1000, 900, &FIXED_MAGIC);
        data[200..208].copy_from_slice(&FIXED_MAGIC);
        let pos = TrailerLocator::with_chunk_size(64)
            .locate(&mut Cursor::new(&data), 100, Some(400))
            .unwrap();
        assert_eq!(pos.offset, 200);
    }

    #[test]
    fn test_magic_cut_by_range_end_is_not_found() {
        let data = with_magic_at(1000, 496, &FIXED_MAGIC);
        let result = TrailerLocator::new().locate(&mut Cursor::new(&data), 0, Some(500));
        assert!(matches!(
            result,
            Err(ArchiveError::NotAContainer { searched: 500 })
        ));
    }

    #[test]
    fn test_no_magic() {
        let data = vec![0x11u8; 50_000];
        let result = TrailerLocator::new().locate(&mut Cursor::new(&data), 0, None);
        assert!(matches!(result, Err(ArchiveError::NotAContainer { .. })));
    }

    #[test]
    fn test_region_smaller_than_magic() {
        let data = vec![0u8; 5];
        let result = TrailerLocator::new().locate(&mut Cursor::new(&data), 0, None);
        assert!(matches!(result, Err(ArchiveError::NotAContainer { .. })));
    }

    #[test]
    fn test_overflowing_range_is_rejected() {
        let data = with_magic_at(1000, 900, &FIXED_MAGIC);
        let result =
            TrailerLocator::new().locate(&mut Cursor::new(&data), u64::MAX - 10, Some(100));
        assert!(matches!(
            result,
            Err(ArchiveError::RangeOverflow { length: 100, .. })
        ));
        assert!(result.unwrap_err().is_structural());
    }

    #[test]
    fn test_chunk_size_is_clamped() {
        assert_eq!(TrailerLocator::with_chunk_size(1).chunk_size(), MAGIC_LEN);
    }
}
