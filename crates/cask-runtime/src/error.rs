//! Runtime error types.

use cask_format::ArchiveError;
use thiserror::Error;

use crate::config::ConfigError;

/// Error type produced by host runtimes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while resolving, loading, or executing bundled units.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Container format or read pipeline error
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The host could not deserialize an executable unit
    #[error("failed to unmarshal '{name}': {source}")]
    UnmarshalFailed {
        name: String,
        #[source]
        source: BoxError,
    },

    /// The host failed while executing a unit
    #[error("failed to execute '{name}': {source}")]
    ExecFailed {
        name: String,
        #[source]
        source: BoxError,
    },

    /// Invalid bundle configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RuntimeError {
    /// Whether this is a plain "no such entry", as opposed to a broken bundle.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::Archive(ArchiveError::NameNotFound(_)))
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
