//! Reads kernel configuration and network files from disk.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers. Configs are validated before they are returned.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use quartz_core::config::{ConfigError, KernelConfig};
use quartz_core::network::{NetworkError, RedstoneNetwork};
use tracing::debug;

use crate::schema::NetworkData;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur while loading configuration or network files.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// The file parsed but describes an unusable configuration.
    #[error("invalid configuration in {file}: {source}")]
    Invalid {
        file: PathBuf,
        #[source]
        source: ConfigError,
    },

    /// The network file parsed but does not describe a valid network.
    #[error("invalid network in {file}: {source}")]
    Network {
        file: PathBuf,
        #[source]
        source: NetworkError,
    },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, ConfigLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(ConfigLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Look for `{base_name}.ron`, `.toml` or `.json` in `dir`.
///
/// Returns `Ok(None)` if none exists and `Err(ConflictingFormats)` if more
/// than one does.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, ConfigLoadError> {
    let mut found: Option<PathBuf> = None;
    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(ConfigLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }
    Ok(found)
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Deserialize `content` in `format`. `origin` only labels parse errors.
pub fn deserialize_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    origin: &Path,
) -> Result<T, ConfigLoadError> {
    let parse = |detail: String| ConfigLoadError::Parse {
        file: origin.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse(e.to_string())),
    }
}

/// Read a file and deserialize it according to its extension.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    deserialize_str(&content, format, path)
}

// ===========================================================================
// Kernel config
// ===========================================================================

/// Parse and validate a config held in memory.
pub fn parse_kernel_config(content: &str, format: Format) -> Result<KernelConfig, ConfigLoadError> {
    let origin = Path::new("<inline>");
    let config: KernelConfig = deserialize_str(content, format, origin)?;
    validated(config, origin)
}

/// Load and validate a config file, choosing the format by extension.
pub fn load_kernel_config(path: &Path) -> Result<KernelConfig, ConfigLoadError> {
    let config: KernelConfig = deserialize_file(path)?;
    debug!(file = %path.display(), wheel_size = config.scheduler.wheel_size, "loaded kernel config");
    validated(config, path)
}

/// Load `{base_name}.*` from `dir`, or the defaults if there is no such file.
pub fn load_kernel_config_from_dir(dir: &Path, base_name: &str) -> Result<KernelConfig, ConfigLoadError> {
    match find_data_file(dir, base_name)? {
        Some(path) => load_kernel_config(&path),
        None => Ok(KernelConfig::default()),
    }
}

// ===========================================================================
// Networks
// ===========================================================================

/// Load a network file and build it.
pub fn load_network(path: &Path) -> Result<RedstoneNetwork, ConfigLoadError> {
    let data: NetworkData = deserialize_file(path)?;
    let network = data.build().map_err(|source| ConfigLoadError::Network {
        file: path.to_path_buf(),
        source,
    })?;
    debug!(file = %path.display(), components = network.len(), "loaded network");
    Ok(network)
}

fn validated(config: KernelConfig, origin: &Path) -> Result<KernelConfig, ConfigLoadError> {
    config.validate().map_err(|source| ConfigLoadError::Invalid {
        file: origin.to_path_buf(),
        source,
    })?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
