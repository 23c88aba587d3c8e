//! Error Handling Module
//!
//! Defines the error type shared by every pipeline stage.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the X-ray transfer-learning pipeline
#[derive(Error, Debug)]
pub enum XrayError {
    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Split directory layout is not usable (class count, names, empty split)
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Feature cache could not be read or is inconsistent
    #[error("Feature cache error at '{path}': {reason}")]
    FeatureCache { path: PathBuf, reason: String },

    /// Two tensors that must agree in shape do not
    #[error("Shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    /// Error building, saving or loading a Burn module
    #[error("Model error: {0}")]
    Model(String),

    /// Checkpoint missing or unreadable
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Error during the training loop
    #[error("Training error: {0}")]
    Training(String),

    /// Metrics cannot be computed from the given predictions
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

/// Convenience Result type for pipeline operations
pub type Result<T> = std::result::Result<T, XrayError>;

impl From<serde_json::Error> for XrayError {
    fn from(err: serde_json::Error) -> Self {
        XrayError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for XrayError {
    fn from(err: bincode::Error) -> Self {
        XrayError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for XrayError {
    fn from(err: toml::de::Error) -> Self {
        XrayError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for XrayError {
    fn from(err: toml::ser::Error) -> Self {
        XrayError::Serialization(err.to_string())
    }
}

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| XrayError::Dataset(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| XrayError::Dataset(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| XrayError::Dataset(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| XrayError::Dataset(f()))
    }
}
