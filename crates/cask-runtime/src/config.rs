//! Bundle configuration (cask.toml)
//!
//! Describes where the container lives, how synthesized origins are laid
//! out, and where key material comes from.
//!
//! ```toml
//! [container]
//! path = "app.bin"
//! offset = 1048576
//! length = 20480
//! module_container = "modules"
//!
//! [loader]
//! root = "/opt/app"
//!
//! [crypto]
//! key_file = "app.key"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use cask_format::{DEFAULT_CHUNK_SIZE, MAGIC_LEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::OpenOptions;
use crate::importer::{OriginLayout, DEFAULT_EXTENSION, DEFAULT_INIT_STEM};

/// Errors that can occur while loading a bundle configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config or key file
    #[error("Failed to read bundle config: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse bundle config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid bundle config: {0}")]
    Validation(String),
}

/// Bundle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleConfig {
    /// Container location
    pub container: ContainerConfig,

    /// Origin layout for the finder
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Key material
    #[serde(default)]
    pub crypto: CryptoConfig,
}

/// Where the container lives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerConfig {
    /// File holding the container
    pub path: PathBuf,

    /// Start of the container within the file (requires `length`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,

    /// Length of the container (requires `offset`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,

    /// Trailer scan window (default: 8192)
    #[serde(default = "default_scan_chunk_size")]
    pub scan_chunk_size: usize,

    /// Nested container entry that holds the importable modules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_container: Option<String>,
}

/// Synthesized origin layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoaderConfig {
    /// Directory origins are placed under (default: ".")
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Package origin file stem (default: "__init__")
    #[serde(default = "default_init_stem")]
    pub init_stem: String,

    /// Origin extension (default: "unit")
    #[serde(default = "default_extension")]
    pub extension: String,
}

/// Key material source
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CryptoConfig {
    /// Inline secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// File holding the secret; one trailing newline is ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
}

fn default_scan_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_init_stem() -> String {
    DEFAULT_INIT_STEM.to_string()
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            init_stem: default_init_stem(),
            extension: default_extension(),
        }
    }
}

impl BundleConfig {
    /// Configuration for a container occupying the end of `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            container: ContainerConfig {
                path: path.into(),
                offset: None,
                length: None,
                scan_chunk_size: DEFAULT_CHUNK_SIZE,
                module_container: None,
            },
            loader: LoaderConfig::default(),
            crypto: CryptoConfig::default(),
        }
    }

    /// Load from a file. Relative container and key paths are resolved
    /// against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;

        if let Some(base) = path.parent() {
            if config.container.path.is_relative() {
                config.container.path = base.join(&config.container.path);
            }
            if let Some(key_file) = &config.crypto.key_file {
                if key_file.is_relative() {
                    config.crypto.key_file = Some(base.join(key_file));
                }
            }
        }
        Ok(config)
    }

    /// Parse from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BundleConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let container = &self.container;
        if container.path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "container path cannot be empty".to_string(),
            ));
        }
        if container.offset.is_some() != container.length.is_some() {
            return Err(ConfigError::Validation(
                "container offset and length must be given together".to_string(),
            ));
        }
        if let (Some(offset), Some(length)) = (container.offset, container.length) {
            if offset.checked_add(length).is_none() {
                return Err(ConfigError::Validation(format!(
                    "container offset {} plus length {} overflows",
                    offset, length
                )));
            }
        }
        if container.scan_chunk_size < MAGIC_LEN {
            return Err(ConfigError::Validation(format!(
                "scan_chunk_size {} is smaller than the {}-byte magic",
                container.scan_chunk_size, MAGIC_LEN
            )));
        }
        if container
            .module_container
            .as_deref()
            .is_some_and(str::is_empty)
        {
            return Err(ConfigError::Validation(
                "module_container cannot be empty".to_string(),
            ));
        }

        if self.loader.init_stem.is_empty() || self.loader.extension.is_empty() {
            return Err(ConfigError::Validation(
                "loader init_stem and extension cannot be empty".to_string(),
            ));
        }

        match (&self.crypto.key, &self.crypto.key_file) {
            (Some(_), Some(_)) => Err(ConfigError::Validation(
                "crypto key and key_file are mutually exclusive".to_string(),
            )),
            (Some(key), None) if key.is_empty() => Err(ConfigError::Validation(
                "crypto key cannot be empty".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Secret bytes from `key` or `key_file`, if configured.
    pub fn key_material(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        if let Some(key) = &self.crypto.key {
            return Ok(Some(key.as_bytes().to_vec()));
        }
        let Some(key_file) = &self.crypto.key_file else {
            return Ok(None);
        };

        let mut secret = fs::read(key_file)?;
        if secret.last() == Some(&b'\n') {
            secret.pop();
            if secret.last() == Some(&b'\r') {
                secret.pop();
            }
        }
        if secret.is_empty() {
            return Err(ConfigError::Validation(format!(
                "key file {} is empty",
                key_file.display()
            )));
        }
        Ok(Some(secret))
    }

    /// Options for opening the outer container.
    pub fn open_options(&self) -> Result<OpenOptions, ConfigError> {
        let mut options = OpenOptions::new().chunk_size(self.container.scan_chunk_size);
        if let (Some(offset), Some(length)) = (self.container.offset, self.container.length) {
            options = options.embedded_at(offset, length);
        }
        if let Some(secret) = self.key_material()? {
            options = options.key(&secret);
        }
        Ok(options)
    }

    /// Origin layout for the finder.
    pub fn origin_layout(&self) -> OriginLayout {
        OriginLayout {
            root: self.loader.root.clone(),
            init_stem: self.loader.init_stem.clone(),
            extension: self.loader.extension.clone(),
        }
    }
}
