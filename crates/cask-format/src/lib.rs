//! Cask container format
//!
//! A cask container packs many independently compiled units (modules,
//! packages, data resources, nested containers) into one seekable byte range
//! that may sit at the end of an unrelated host file:
//! - **trailer**: fixed 88-byte descriptor at the end of the container
//! - **locator**: backward scan for the trailer magic
//! - **toc**: table of contents in a fixed-struct or self-describing encoding
//! - **cipher** / **compression**: optional per-entry AES-CTR and zlib
//! - **builder**: build-time writer

pub mod builder;
pub mod cipher;
pub mod compression;
pub mod error;
pub mod locator;
pub mod toc;
pub mod trailer;

pub use builder::{
    reclassify, BuildOptions, Builder, DEFAULT_RUNTIME_NAME, KEY_ENTRY_NAME, PACKAGE_INIT_STEM,
};
pub use cipher::{Cipher, CipherKey, KEY_SIZE, NONCE_SIZE};
pub use error::{ArchiveError, Result};
pub use locator::{TrailerLocator, TrailerPosition, DEFAULT_CHUNK_SIZE};
pub use toc::{Toc, TocEntry, TocFormat, TypeCode};
pub use trailer::{
    Trailer, FIXED_MAGIC, FORMAT_VERSION, MAGIC_LEN, MAPPING_MAGIC, TRAILER_SIZE,
};
