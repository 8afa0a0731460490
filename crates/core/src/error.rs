//! Core error types

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for keymesh
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration file could not be parsed
    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Configuration could not be rendered back to TOML
    #[error("Failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Configuration values are out of range
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Logging subscriber could not be installed
    #[error("Logging init failed: {0}")]
    Logging(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
