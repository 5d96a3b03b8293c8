//! Configuration structures for the stego-bridge.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ModuleConfig`]: Location of the compiled guest module
//! - [`LoggingConfig`]: Tracing filter settings
//!
//! The guest module path is the one required piece of configuration. It can
//! come from the `STEGO_WASM_MODULE` environment variable, the command line,
//! or a config file; absence is a fatal startup condition raised before any
//! operation is served.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [module]
/// path = "./wasm_steganography.wasm"
///
/// [logging]
/// filter = "info,stego_bridge=debug"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Guest module location.
    #[serde(default)]
    pub module: ModuleConfig,

    /// Tracing configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// The configured guest module path, if any.
    pub fn module_path(&self) -> Option<&Path> {
        self.module.path.as_deref()
    }
}

/// Guest module location from the config file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModuleConfig {
    /// Path to the compiled guest module file.
    pub path: Option<PathBuf>,
}

/// Tracing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Tracing filter directive (same syntax as `RUST_LOG`).
    #[serde(default = "defaults::filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: defaults::filter(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub fn filter() -> String {
        "info".to_string()
    }
}
