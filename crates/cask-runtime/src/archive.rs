//! Container reader
//!
//! Opening a container runs the whole structural pipeline once: locate the
//! trailer, decode it, derive the container start, load and index the TOC,
//! and settle the cipher. Any failure there aborts the open. After that the
//! archive is immutable and every read goes through a thread-scoped file
//! session, so one `Archive` can serve any number of threads at once.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use cask_format::compression;
use cask_format::{
    ArchiveError, Cipher, CipherKey, Result, Toc, TocEntry, TocFormat, Trailer, TrailerLocator,
    TrailerPosition, TypeCode, DEFAULT_CHUNK_SIZE, FORMAT_VERSION, KEY_ENTRY_NAME, TRAILER_SIZE,
};
use tracing::{debug, trace, warn};

use crate::session::FileSession;

/// Options applied when opening a container.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    embedded: Option<(u64, u64)>,
    key: Option<CipherKey>,
    chunk_size: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            embedded: None,
            key: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl OpenOptions {
    /// Default options: whole file, no explicit key, 8 KiB scan window.
    pub fn new() -> Self {
        Self::default()
    }

    /// The container occupies `[start, start + length)` of the file; the
    /// trailer must agree.
    pub fn embedded_at(mut self, start: u64, length: u64) -> Self {
        self.embedded = Some((start, length));
        self
    }

    /// Decrypt with a key derived from `secret`.
    pub fn key(mut self, secret: &[u8]) -> Self {
        self.key = Some(CipherKey::from_secret(secret));
        self
    }

    /// Decrypt with an already derived key.
    pub fn cipher_key(mut self, key: CipherKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Trailer scan window size.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

#[derive(Debug)]
enum Source {
    File(Arc<FileSession>),
    Memory(Arc<[u8]>),
}

impl Source {
    fn len(&self) -> Result<u64> {
        match self {
            Source::File(session) => Ok(session.enter()?.file_len()?),
            Source::Memory(bytes) => Ok(bytes.len() as u64),
        }
    }

    fn locate(
        &self,
        locator: &TrailerLocator,
        start: u64,
        length: u64,
    ) -> Result<TrailerPosition> {
        match self {
            Source::File(session) => locator.locate(&mut session.enter()?, start, Some(length)),
            Source::Memory(bytes) => {
                locator.locate(&mut Cursor::new(&bytes[..]), start, Some(length))
            }
        }
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        match self {
            Source::File(session) => Ok(session.enter()?.read_at(offset, len)?),
            Source::Memory(bytes) => {
                let range = usize::try_from(offset)
                    .ok()
                    .and_then(|start| Some(start..start.checked_add(len)?))
                    .filter(|range| range.end <= bytes.len())
                    .ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!("read of {len} bytes at {offset} is past the end of the buffer"),
                        )
                    })?;
                Ok(bytes[range].to_vec())
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Source::File(session) => session.path().display().to_string(),
            Source::Memory(bytes) => format!("<memory: {} bytes>", bytes.len()),
        }
    }
}

/// Bytes produced by the read pipeline for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// Whether the entry is a package
    pub is_package: bool,

    /// Decrypted and inflated payload
    pub data: Vec<u8>,
}

/// An opened, immutable container.
#[derive(Debug)]
pub struct Archive {
    source: Source,
    pkg_start: u64,
    trailer: Trailer,
    toc: Toc,
    cipher: Option<Cipher>,
    chunk_size: usize,
}

impl Archive {
    /// Open the container at the end of `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &OpenOptions::default())
    }

    /// Open a container with explicit options.
    pub fn open_with(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        let session = FileSession::new(path.as_ref());
        Self::load(Source::File(Arc::new(session)), options, None)
    }

    /// Open a container held in memory.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Result<Self> {
        Self::from_bytes_with(bytes, &OpenOptions::default())
    }

    /// Like [`Archive::from_bytes`] with explicit options.
    pub fn from_bytes_with(bytes: impl Into<Arc<[u8]>>, options: &OpenOptions) -> Result<Self> {
        Self::load(Source::Memory(bytes.into()), options, None)
    }

    fn load(source: Source, options: &OpenOptions, inherited: Option<&Cipher>) -> Result<Self> {
        let (search_start, search_length) = match options.embedded {
            Some(range) => range,
            None => (0, source.len()?),
        };

        let locator = TrailerLocator::with_chunk_size(options.chunk_size);
        let position = source.locate(&locator, search_start, search_length)?;
        if position.offset.saturating_add(TRAILER_SIZE as u64) > search_start + search_length {
            return Err(ArchiveError::CorruptTrailer(format!(
                "magic at {} leaves less than {} bytes before the end of the container",
                position.offset, TRAILER_SIZE
            )));
        }

        let trailer = Trailer::decode(&source.read_at(position.offset, TRAILER_SIZE)?)?;
        if trailer.format_version != FORMAT_VERSION {
            warn!(
                source = %source.describe(),
                version = trailer.format_version,
                expected = FORMAT_VERSION,
                "container has an unknown format version"
            );
        }

        let pkg_start = trailer.pkg_start(position.offset)?;
        if let Some((start, length)) = options.embedded {
            if pkg_start != start || u64::from(trailer.total_length) != length {
                return Err(ArchiveError::EmbeddingMismatch {
                    expected_start: start,
                    expected_length: length,
                    actual_start: pkg_start,
                    actual_length: u64::from(trailer.total_length),
                });
            }
        }

        let toc_bytes = source.read_at(
            pkg_start + u64::from(trailer.toc_offset),
            trailer.toc_length as usize,
        )?;
        let toc = Toc::new(trailer.format.load(&toc_bytes)?);
        check_payload_ranges(&toc, trailer.toc_offset)?;

        let mut archive = Self {
            source,
            pkg_start,
            trailer,
            toc,
            cipher: None,
            chunk_size: options.chunk_size,
        };
        archive.cipher = archive.resolve_cipher(options.key.as_ref(), inherited)?;

        debug!(
            source = %archive.source.describe(),
            pkg_start,
            entries = archive.toc.len(),
            format = ?archive.trailer.format,
            encrypted = archive.is_encrypted(),
            "container opened"
        );
        Ok(archive)
    }

    // Explicit key, then embedded key material, then the parent's cipher.
    fn resolve_cipher(
        &self,
        explicit: Option<&CipherKey>,
        inherited: Option<&Cipher>,
    ) -> Result<Option<Cipher>> {
        if let Some(key) = explicit {
            return Ok(Some(Cipher::new(key.clone())));
        }
        if let Some(entry) = self
            .toc
            .get(KEY_ENTRY_NAME)
            .filter(|entry| entry.type_code == TypeCode::KeyMaterial)
        {
            let secret = self.read_stored(entry)?;
            trace!(source = %self.source.describe(), "using embedded key material");
            return Ok(Some(Cipher::new(CipherKey::from_secret(&secret))));
        }
        Ok(inherited.cloned())
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&TocEntry> {
        self.toc.get(name)
    }

    /// Whether an entry named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.toc.contains(name)
    }

    /// Loaded table of contents.
    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    /// Entries in TOC order.
    pub fn entries(&self) -> impl Iterator<Item = &TocEntry> {
        self.toc.entries()
    }

    /// TOC encoding of this container.
    pub fn format(&self) -> TocFormat {
        self.trailer.format
    }

    /// Decoded trailer.
    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    /// Runtime library name recorded at build time.
    pub fn runtime_name(&self) -> &str {
        &self.trailer.runtime_name
    }

    /// Absolute offset of the container within its file or buffer.
    pub fn pkg_start(&self) -> u64 {
        self.pkg_start
    }

    /// Backing file, if the container was opened from disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            Source::File(session) => Some(session.path()),
            Source::Memory(_) => None,
        }
    }

    /// Whether key material is available for encrypted entries.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Runtime option flags in TOC order.
    pub fn runtime_options(&self) -> impl Iterator<Item = &str> {
        self.entries_of(TypeCode::RuntimeOption)
            .map(|entry| entry.name.as_str())
    }

    /// Entry-point scripts in TOC order.
    pub fn scripts(&self) -> impl Iterator<Item = &TocEntry> {
        self.entries_of(TypeCode::Script)
    }

    /// Nested containers in TOC order.
    pub fn nested_containers(&self) -> impl Iterator<Item = &TocEntry> {
        self.entries_of(TypeCode::NestedContainer)
    }

    fn entries_of(&self, type_code: TypeCode) -> impl Iterator<Item = &TocEntry> {
        self.toc
            .entries()
            .filter(move |entry| entry.type_code == type_code)
    }

    /// Run the read pipeline for `name`.
    pub fn extract(&self, name: &str) -> Result<Extracted> {
        let entry = self
            .toc
            .get(name)
            .ok_or_else(|| ArchiveError::NameNotFound(name.to_string()))?;
        self.extract_entry(entry)
    }

    /// Read, decrypt, then inflate one entry.
    pub fn extract_entry(&self, entry: &TocEntry) -> Result<Extracted> {
        let mut data = self.read_stored(entry)?;

        if entry.encrypted {
            let cipher = self
                .cipher
                .as_ref()
                .ok_or_else(|| ArchiveError::DecryptionUnavailable(entry.name.clone()))?;
            data = cipher.decrypt(&entry.name, &data)?;
        }
        if entry.compressed {
            data = compression::inflate(&entry.name, &data, entry.uncompressed_length)?;
        }

        trace!(
            name = %entry.name,
            stored = entry.compressed_length,
            len = data.len(),
            "entry extracted"
        );
        Ok(Extracted {
            is_package: entry.is_package(),
            data,
        })
    }

    /// Stored bytes of an entry, before decryption or decompression.
    pub fn read_stored(&self, entry: &TocEntry) -> Result<Vec<u8>> {
        self.source.read_at(
            self.pkg_start + u64::from(entry.data_offset),
            entry.compressed_length as usize,
        )
    }

    /// Open a nested container entry.
    ///
    /// Untransformed entries are read in place as a sub-range of this
    /// archive's source; compressed or encrypted ones are extracted to
    /// memory first. The nested archive falls back to this archive's cipher
    /// when it has no key of its own.
    pub fn open_nested(&self, name: &str) -> Result<Archive> {
        let entry = self
            .toc
            .get(name)
            .ok_or_else(|| ArchiveError::NameNotFound(name.to_string()))?;
        if entry.type_code != TypeCode::NestedContainer {
            return Err(ArchiveError::InvalidEntry {
                name: name.to_string(),
                reason: format!("entry has type {:?}, not a nested container", entry.type_code),
            });
        }

        let options = OpenOptions::new().chunk_size(self.chunk_size);
        let nested = if entry.compressed || entry.encrypted {
            let data = self.extract_entry(entry)?.data;
            let length = data.len() as u64;
            Self::load(
                Source::Memory(data.into()),
                &options.embedded_at(0, length),
                self.cipher.as_ref(),
            )?
        } else {
            let start = self.pkg_start + u64::from(entry.data_offset);
            let source = match &self.source {
                Source::File(session) => Source::File(Arc::clone(session)),
                Source::Memory(bytes) => Source::Memory(Arc::clone(bytes)),
            };
            Self::load(
                source,
                &options.embedded_at(start, u64::from(entry.compressed_length)),
                self.cipher.as_ref(),
            )?
        };

        debug!(name, pkg_start = nested.pkg_start, entries = nested.toc.len(), "nested container opened");
        Ok(nested)
    }

    /// Backing file path or buffer size, for diagnostics.
    pub fn describe(&self) -> String {
        self.source.describe()
    }
}

// Payloads live between the container start and the TOC.
fn check_payload_ranges(toc: &Toc, toc_offset: u32) -> Result<()> {
    for entry in toc.entries() {
        if entry.type_code.is_name_only() {
            if entry.compressed_length != 0 {
                return Err(ArchiveError::CorruptToc(format!(
                    "'{}' is a {:?} entry but claims {} payload bytes",
                    entry.name, entry.type_code, entry.compressed_length
                )));
            }
            continue;
        }
        let end = entry.data_offset.checked_add(entry.compressed_length);
        if end.map_or(true, |end| end > toc_offset) {
            return Err(ArchiveError::CorruptToc(format!(
                "'{}' payload at {} with length {} runs past the TOC at {}",
                entry.name, entry.data_offset, entry.compressed_length, toc_offset
            )));
        }
    }
    Ok(())
}
