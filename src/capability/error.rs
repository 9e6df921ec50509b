//! Capability engine error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for capability operations.
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Errors that can occur while discovering, loading or publishing capabilities.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Capability root could not be walked.
    #[error("Failed to scan {path}: {message}")]
    Scan { path: PathBuf, message: String },

    /// Manifest unreadable or malformed.
    #[error("Invalid manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    /// Record failed validation.
    #[error("Capability '{name}' failed validation: {}", errors.join("; "))]
    Validation { name: String, errors: Vec<String> },

    /// Entry module could not be loaded or initialized.
    #[error("Failed to activate capability '{name}': {message}")]
    Activation { name: String, message: String },

    /// Publishing to the catalog or a consumer document failed.
    #[error("Failed to register capability '{name}': {message}")]
    Registration { name: String, message: String },

    /// Capability is not known to the engine.
    #[error("Capability not found: {0}")]
    NotFound(String),

    /// Background monitor failure.
    #[error("Monitor error: {0}")]
    Monitor(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CapabilityError {
    /// Build a manifest error for the given file.
    pub fn manifest(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Manifest { path: path.into(), message: message.to_string() }
    }

    /// Build an activation error for the given capability.
    pub fn activation(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Activation { name: name.into(), message: message.to_string() }
    }

    /// Build a registration error for the given capability.
    pub fn registration(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Registration { name: name.into(), message: message.to_string() }
    }
}
