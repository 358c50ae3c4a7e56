//! Cask runtime
//!
//! Reads cask containers at run time and serves their units to a host
//! module system:
//! - **session**: per-thread file handles with remembered positions
//! - **archive**: container open, read pipeline, nested containers
//! - **importer**: finder/loader protocol over an archive
//! - **resources**: read-only package resource traversal
//! - **bundle**: configuration-driven bootstrap

pub mod archive;
pub mod bundle;
pub mod config;
pub mod error;
pub mod host;
pub mod importer;
pub mod resources;
pub mod session;

pub use archive::{Archive, Extracted, OpenOptions};
pub use bundle::Bundle;
pub use config::{BundleConfig, ConfigError};
pub use error::{BoxError, Result, RuntimeError};
pub use host::{HostRuntime, OpaqueUnits};
pub use importer::{BundleImporter, FindOutcome, LoadedUnit, ModuleSpec, OriginLayout, UnitKind};
pub use resources::ResourceReader;
pub use session::{FileSession, SessionGuard};

pub use cask_format::{ArchiveError, TocEntry, TocFormat, TypeCode};
