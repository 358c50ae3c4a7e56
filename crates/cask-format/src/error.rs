//! Archive error types.

use thiserror::Error;

/// Errors raised while writing, opening, or reading a container.
///
/// Structural errors (`NotAContainer`, `CorruptTrailer`, `EmbeddingMismatch`,
/// `RangeOverflow`, `TruncatedToc`, `CorruptToc`, `TocEncoding`) abort opening the whole
/// container. The remaining read-side variants are scoped to one entry.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No trailer magic anywhere in the searched region
    #[error("not a cask container: no trailer magic in {searched} searched bytes")]
    NotAContainer { searched: u64 },

    /// Trailer magic matched but its fields are inconsistent
    #[error("corrupt trailer: {0}")]
    CorruptTrailer(String),

    /// The trailer disagrees with the range the container was opened as
    #[error(
        "embedded container mismatch: expected start {expected_start} length {expected_length}, \
         trailer claims start {actual_start} length {actual_length}"
    )]
    EmbeddingMismatch {
        expected_start: u64,
        expected_length: u64,
        actual_start: u64,
        actual_length: u64,
    },

    /// An explicit search range ends past the addressable file space
    #[error("search range starting at {start} with length {length} overflows")]
    RangeOverflow { start: u64, length: u64 },

    /// A TOC record extends past the declared TOC length
    #[error("truncated TOC: record at byte {at} needs {needed} bytes, {available} available")]
    TruncatedToc {
        at: usize,
        needed: usize,
        available: usize,
    },

    /// A TOC record is well-sized but its content is unusable
    #[error("corrupt TOC: {0}")]
    CorruptToc(String),

    /// The self-describing TOC failed to (de)serialize
    #[error("TOC mapping error: {0}")]
    TocEncoding(#[from] serde_json::Error),

    /// Direct lookup of an entry that is not in the TOC
    #[error("entry not found: {0}")]
    NameNotFound(String),

    /// Inflating an entry failed
    #[error("failed to decompress '{name}': {reason}")]
    DecompressionFailed { name: String, reason: String },

    /// An entry is encrypted but no key material was provisioned
    #[error("entry '{0}' is encrypted but no key material is available")]
    DecryptionUnavailable(String),

    /// An encrypted payload could not be decrypted
    #[error("failed to decrypt '{name}': {reason}")]
    DecryptionFailed { name: String, reason: String },

    /// Build-time rejection of an entry
    #[error("invalid entry '{name}': {reason}")]
    InvalidEntry { name: String, reason: String },

    /// Build-time rejection of a repeated name
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),
}

impl ArchiveError {
    /// Whether this error invalidates the whole container rather than one entry.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ArchiveError::NotAContainer { .. }
                | ArchiveError::CorruptTrailer(_)
                | ArchiveError::EmbeddingMismatch { .. }
                | ArchiveError::RangeOverflow { .. }
                | ArchiveError::TruncatedToc { .. }
                | ArchiveError::CorruptToc(_)
                | ArchiveError::TocEncoding(_)
        )
    }

    pub(crate) fn invalid_entry(name: &str, reason: impl Into<String>) -> Self {
        ArchiveError::InvalidEntry {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;
