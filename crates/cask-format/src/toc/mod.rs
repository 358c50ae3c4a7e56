//! Table of contents
//!
//! One [`TocEntry`] per bundled unit. Two on-disk encodings exist and are
//! never mixed within one container:
//! - **fixed**: padded binary records a native reader can walk
//! - **mapping**: a self-describing JSON object keyed by entry name

pub mod fixed;
pub mod mapping;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::trailer::{FIXED_MAGIC, MAGIC_LEN, MAPPING_MAGIC};

/// Kind of a bundled unit, stored as one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
pub enum TypeCode {
    /// Executable module (`m`)
    Module,
    /// Package init module (`M`)
    Package,
    /// Namespace package placeholder, no bytes (`N`)
    NamespacePackage,
    /// Executable run at startup (`s`)
    Script,
    /// Opaque data resource (`x`)
    Data,
    /// Native binary (`b`)
    Binary,
    /// Nested container (`z`)
    NestedContainer,
    /// Runtime option flag, name only (`o`)
    RuntimeOption,
    /// Embedded cipher key material (`k`)
    KeyMaterial,
    /// Code this version does not know, kept verbatim
    Other(u8),
}

impl TypeCode {
    /// Byte stored on disk.
    pub fn as_u8(self) -> u8 {
        match self {
            TypeCode::Module => b'm',
            TypeCode::Package => b'M',
            TypeCode::NamespacePackage => b'N',
            TypeCode::Script => b's',
            TypeCode::Data => b'x',
            TypeCode::Binary => b'b',
            TypeCode::NestedContainer => b'z',
            TypeCode::RuntimeOption => b'o',
            TypeCode::KeyMaterial => b'k',
            TypeCode::Other(b) => b,
        }
    }

    /// Parse a stored byte.
    pub fn from_u8(b: u8) -> Self {
        match b {
            b'm' => TypeCode::Module,
            b'M' => TypeCode::Package,
            b'N' => TypeCode::NamespacePackage,
            b's' => TypeCode::Script,
            b'x' => TypeCode::Data,
            b'b' => TypeCode::Binary,
            b'z' => TypeCode::NestedContainer,
            b'o' => TypeCode::RuntimeOption,
            b'k' => TypeCode::KeyMaterial,
            other => TypeCode::Other(other),
        }
    }

    /// Package init modules and namespace placeholders are packages.
    pub fn is_package(self) -> bool {
        matches!(self, TypeCode::Package | TypeCode::NamespacePackage)
    }

    /// Types whose bytes are a pre-compiled executable unit.
    pub fn is_executable(self) -> bool {
        matches!(self, TypeCode::Module | TypeCode::Package | TypeCode::Script)
    }

    /// Types a module finder may hand out.
    pub fn is_importable(self) -> bool {
        matches!(
            self,
            TypeCode::Module | TypeCode::Package | TypeCode::NamespacePackage
        )
    }

    /// Types that never carry payload bytes.
    pub fn is_name_only(self) -> bool {
        matches!(self, TypeCode::NamespacePackage | TypeCode::RuntimeOption)
    }
}

impl From<TypeCode> for u8 {
    fn from(code: TypeCode) -> Self {
        code.as_u8()
    }
}

impl From<u8> for TypeCode {
    fn from(b: u8) -> Self {
        TypeCode::from_u8(b)
    }
}

/// One TOC record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    /// Dotted hierarchical name, unique within the TOC
    pub name: String,

    /// Offset of the stored bytes from the container start
    pub data_offset: u32,

    /// Number of stored bytes (after compression and encryption)
    pub compressed_length: u32,

    /// Length of the original bytes, 0 when unknown
    pub uncompressed_length: u32,

    /// Stored bytes are zlib-compressed
    pub compressed: bool,

    /// Stored bytes are nonce-prefixed AES-CTR ciphertext
    pub encrypted: bool,

    /// Kind of unit
    pub type_code: TypeCode,
}

/// Flag byte bits shared by both encodings.
pub mod flags {
    /// Entry is compressed.
    pub const COMPRESSED: u8 = 0x01;
    /// Entry is encrypted.
    pub const ENCRYPTED: u8 = 0x02;
}

impl TocEntry {
    /// Whether the unit is a package.
    pub fn is_package(&self) -> bool {
        self.type_code.is_package()
    }

    /// Pack the compression and encryption bits.
    pub fn flag_byte(&self) -> u8 {
        let mut bits = 0;
        if self.compressed {
            bits |= flags::COMPRESSED;
        }
        if self.encrypted {
            bits |= flags::ENCRYPTED;
        }
        bits
    }

    /// Apply a flag byte.
    pub fn set_flag_byte(&mut self, bits: u8) {
        self.compressed = bits & flags::COMPRESSED != 0;
        self.encrypted = bits & flags::ENCRYPTED != 0;
    }
}

/// TOC encoding, selected by the trailer magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TocFormat {
    /// JSON mapping of name to `[type, offset, length, ...]`
    SelfDescribing,
    /// Padded fixed-size binary records
    FixedStruct,
}

impl TocFormat {
    /// Trailer magic announcing this format.
    pub fn magic(self) -> [u8; MAGIC_LEN] {
        match self {
            TocFormat::SelfDescribing => MAPPING_MAGIC,
            TocFormat::FixedStruct => FIXED_MAGIC,
        }
    }

    /// Format announced by `bytes`, if it is a known magic.
    pub fn from_magic(bytes: &[u8]) -> Option<Self> {
        if bytes == FIXED_MAGIC {
            Some(TocFormat::FixedStruct)
        } else if bytes == MAPPING_MAGIC {
            Some(TocFormat::SelfDescribing)
        } else {
            None
        }
    }

    /// Decode TOC bytes into entries, preserving order.
    pub fn load(self, bytes: &[u8]) -> Result<Vec<TocEntry>> {
        match self {
            TocFormat::SelfDescribing => mapping::load(bytes),
            TocFormat::FixedStruct => fixed::load(bytes),
        }
    }

    /// Encode entries into TOC bytes.
    pub fn dump(self, entries: &[TocEntry]) -> Result<Vec<u8>> {
        match self {
            TocFormat::SelfDescribing => mapping::dump(entries),
            TocFormat::FixedStruct => fixed::dump(entries),
        }
    }
}

/// Loaded, immutable TOC with a name index.
///
/// When a name repeats, lookups resolve to its first occurrence.
#[derive(Debug, Clone, Default)]
pub struct Toc {
    entries: Vec<TocEntry>,
    index: FxHashMap<String, usize>,
}

impl Toc {
    /// Index a list of entries.
    pub fn new(entries: Vec<TocEntry>) -> Self {
        let mut index = FxHashMap::default();
        index.reserve(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            index.entry(entry.name.clone()).or_insert(i);
        }
        Self { entries, index }
    }

    /// Position of `name` in TOC order.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Entry named `name`.
    pub fn get(&self, name: &str) -> Option<&TocEntry> {
        self.find(name).map(|i| &self.entries[i])
    }

    /// Whether `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Entries in TOC order.
    pub fn entries(&self) -> std::slice::Iter<'_, TocEntry> {
        self.entries.iter()
    }

    /// Entries whose name is `package` plus exactly one more dotted segment.
    /// An empty `package` selects top-level names.
    pub fn children<'a>(&'a self, package: &'a str) -> impl Iterator<Item = (&'a str, &'a TocEntry)> {
        self.entries.iter().filter_map(move |entry| {
            let tail = if package.is_empty() {
                entry.name.as_str()
            } else {
                entry.name.strip_prefix(package)?.strip_prefix('.')?
            };
            (!tail.is_empty() && !tail.contains('.')).then_some((tail, entry))
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the TOC is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
