//! Container writer
//!
//! Entries are appended to the payload in the order they are added, the TOC
//! accumulates in memory, and `finish` writes the TOC followed by the
//! trailer once the total length is known. All offsets are relative to the
//! position the writer was at when the builder was created, so a container
//! can be appended to any existing host file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::cipher::{Cipher, CipherKey};
use crate::compression::{self, DEFAULT_LEVEL};
use crate::error::{ArchiveError, Result};
use crate::toc::{TocEntry, TocFormat, TypeCode};
use crate::trailer::{Trailer, FORMAT_VERSION, MAGIC_LEN, TRAILER_SIZE};

/// Reserved name of the embedded key entry.
pub const KEY_ENTRY_NAME: &str = "__cask_key__";

/// File stem that marks a package init source.
pub const PACKAGE_INIT_STEM: &str = "__init__";

/// Runtime name written when none is configured.
pub const DEFAULT_RUNTIME_NAME: &str = "libcask";

/// Options fixed for the lifetime of one builder.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// TOC encoding to emit
    pub format: TocFormat,

    /// Runtime library name stored in the trailer (must be non-empty)
    pub runtime_name: String,

    /// Version stored in the trailer
    pub format_version: i32,

    /// zlib level for compressed entries
    pub compression_level: u32,

    /// Encrypt executable units with this key
    pub key: Option<CipherKey>,

    /// Store the key as a `k` entry so readers find it without configuration
    pub embed_key: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            format: TocFormat::FixedStruct,
            runtime_name: DEFAULT_RUNTIME_NAME.to_string(),
            format_version: FORMAT_VERSION,
            compression_level: DEFAULT_LEVEL,
            key: None,
            embed_key: false,
        }
    }
}

impl BuildOptions {
    /// Defaults with the given TOC format.
    pub fn new(format: TocFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    /// Set the runtime name.
    pub fn runtime_name(mut self, name: impl Into<String>) -> Self {
        self.runtime_name = name.into();
        self
    }

    /// Set the zlib level.
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Encrypt executable units with a key derived from `secret`.
    pub fn key(mut self, secret: &[u8]) -> Self {
        self.key = Some(CipherKey::from_secret(secret));
        self
    }

    /// Embed the key in the container.
    pub fn embed_key(mut self, embed: bool) -> Self {
        self.embed_key = embed;
        self
    }
}

/// Incremental container writer.
pub struct Builder<W: Write> {
    out: W,
    written: u64,
    options: BuildOptions,
    cipher: Option<Cipher>,
    entries: Vec<TocEntry>,
    names: FxHashSet<String>,
}

impl Builder<BufWriter<File>> {
    /// Create (or truncate) `path` and start a container at offset 0.
    pub fn begin(path: impl AsRef<Path>) -> Result<Self> {
        Self::begin_with(path, BuildOptions::default())
    }

    /// Like [`Builder::begin`] with explicit options.
    pub fn begin_with(path: impl AsRef<Path>, options: BuildOptions) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Self::new(BufWriter::new(file), options)
    }

    /// Start a container at the end of an existing host file.
    pub fn append(path: impl AsRef<Path>, options: BuildOptions) -> Result<Self> {
        let mut file = OpenOptions::new().write(true).open(path.as_ref())?;
        let host_len = file.seek(SeekFrom::End(0))?;
        debug!(path = %path.as_ref().display(), host_len, "appending container to host file");
        Self::new(BufWriter::new(file), options)
    }
}

impl<W: Write> Builder<W> {
    /// Start a container at the writer's current position.
    pub fn new(out: W, options: BuildOptions) -> Result<Self> {
        if options.runtime_name.is_empty() {
            return Err(ArchiveError::invalid_entry(
                "<trailer>",
                "runtime name must not be empty",
            ));
        }
        // The locator would stop at a magic inside the trailer's name field.
        if options
            .runtime_name
            .as_bytes()
            .windows(MAGIC_LEN)
            .any(|window| TocFormat::from_magic(window).is_some())
        {
            return Err(ArchiveError::invalid_entry(
                "<trailer>",
                "runtime name must not contain a trailer magic",
            ));
        }
        let cipher = options.key.clone().map(Cipher::new);
        Ok(Self {
            out,
            written: 0,
            options,
            cipher,
            entries: Vec::new(),
            names: FxHashSet::default(),
        })
    }

    /// Append one unit.
    ///
    /// Name-only types (namespace packages, runtime options) must carry no
    /// bytes. Nested containers must not be compressed. Executable units are
    /// encrypted when the builder has a key.
    pub fn add(
        &mut self,
        name: &str,
        type_code: TypeCode,
        data: &[u8],
        compress: bool,
    ) -> Result<()> {
        validate_name(name)?;
        if name == KEY_ENTRY_NAME || type_code == TypeCode::KeyMaterial {
            return Err(ArchiveError::invalid_entry(
                name,
                "key material is written by the builder itself",
            ));
        }
        if self.names.contains(name) {
            return Err(ArchiveError::DuplicateEntry(name.to_string()));
        }
        if type_code.is_name_only() && !data.is_empty() {
            return Err(ArchiveError::invalid_entry(
                name,
                "this entry type carries no data",
            ));
        }
        if type_code == TypeCode::NestedContainer && compress {
            return Err(ArchiveError::invalid_entry(
                name,
                "nested containers must not be compressed",
            ));
        }

        let compress = compress && !type_code.is_name_only();
        let mut stored = if compress {
            compression::deflate(data, self.options.compression_level)?
        } else {
            data.to_vec()
        };

        let encrypted = match &self.cipher {
            Some(cipher) if type_code.is_executable() => {
                stored = cipher.encrypt(&stored);
                true
            }
            _ => false,
        };

        self.write_entry(name, type_code, &stored, data.len(), compress, encrypted)
    }

    /// Read `source` from disk and append it.
    ///
    /// Executable units whose source file is a package init file are recorded
    /// as packages whatever type the caller passed.
    pub fn add_path(
        &mut self,
        name: &str,
        type_code: TypeCode,
        source: impl AsRef<Path>,
        compress: bool,
    ) -> Result<()> {
        let source = source.as_ref();
        let data = fs::read(source)?;
        let type_code = reclassify(type_code, source);
        self.add(name, type_code, &data, compress)
    }

    /// Append a runtime option flag.
    pub fn add_option(&mut self, option: &str) -> Result<()> {
        self.add(option, TypeCode::RuntimeOption, &[], false)
    }

    /// Append a complete inner container, stored as-is.
    pub fn add_container(&mut self, name: &str, container: &[u8]) -> Result<()> {
        self.add(name, TypeCode::NestedContainer, container, false)
    }

    /// Entries added so far, in order.
    pub fn entries(&self) -> &[TocEntry] {
        &self.entries
    }

    /// Write the TOC and trailer, flush, and hand back the writer.
    pub fn finish(mut self) -> Result<W> {
        if self.options.embed_key {
            if let Some(key) = self.options.key.clone() {
                let bytes = key.as_bytes().to_vec();
                self.write_entry(
                    KEY_ENTRY_NAME,
                    TypeCode::KeyMaterial,
                    &bytes,
                    bytes.len(),
                    false,
                    false,
                )?;
            }
        }

        let toc = self.options.format.dump(&self.entries)?;
        let toc_offset = to_u32("<toc>", self.written)?;
        let toc_length = i32::try_from(toc.len())
            .map_err(|_| ArchiveError::invalid_entry("<toc>", "TOC exceeds 2 GiB"))?;
        self.out.write_all(&toc)?;
        self.written += toc.len() as u64;

        let total_length = to_u32("<container>", self.written + TRAILER_SIZE as u64)?;
        let trailer = Trailer {
            format: self.options.format,
            total_length,
            toc_offset,
            toc_length,
            format_version: self.options.format_version,
            runtime_name: self.options.runtime_name.clone(),
        };
        self.out.write_all(&trailer.encode())?;
        self.out.flush()?;

        debug!(
            entries = self.entries.len(),
            total_length,
            format = ?self.options.format,
            encrypted = self.cipher.is_some(),
            "container written"
        );
        Ok(self.out)
    }

    fn write_entry(
        &mut self,
        name: &str,
        type_code: TypeCode,
        stored: &[u8],
        original_len: usize,
        compressed: bool,
        encrypted: bool,
    ) -> Result<()> {
        let entry = TocEntry {
            name: name.to_string(),
            data_offset: to_u32(name, self.written)?,
            compressed_length: to_u32(name, stored.len() as u64)?,
            uncompressed_length: to_u32(name, original_len as u64)?,
            compressed,
            encrypted,
            type_code,
        };
        to_u32(name, self.written + stored.len() as u64)?;

        self.out.write_all(stored)?;
        self.written += stored.len() as u64;

        trace!(
            name,
            type_code = ?type_code,
            stored = stored.len(),
            original = original_len,
            compressed,
            encrypted,
            "entry added"
        );
        self.names.insert(entry.name.clone());
        self.entries.push(entry);
        Ok(())
    }
}

/// Legacy rule: an executable unit built from a package init source file is
/// a package, whatever type code it was recorded with.
pub fn reclassify(type_code: TypeCode, source: &Path) -> TypeCode {
    let is_init = source
        .file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem == PACKAGE_INIT_STEM);

    if is_init && matches!(type_code, TypeCode::Module | TypeCode::Script) {
        debug!(source = %source.display(), from = ?type_code, "reclassified package init as package");
        TypeCode::Package
    } else {
        type_code
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ArchiveError::invalid_entry(name, "name is empty"));
    }
    if name.contains('/') || name.contains('\\') || name.contains(std::path::MAIN_SEPARATOR) {
        return Err(ArchiveError::invalid_entry(
            name,
            "name contains a path separator",
        ));
    }
    if name.contains('\0') {
        return Err(ArchiveError::invalid_entry(name, "name contains a NUL byte"));
    }
    Ok(())
}

fn to_u32(name: &str, value: u64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| ArchiveError::invalid_entry(name, "container exceeds the 4 GiB offset range"))
}
