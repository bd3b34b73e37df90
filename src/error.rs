//! Error types for the SchNet symmetry library

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Network error while downloading the dataset
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Download failed with HTTP status {status}: {url}")]
    HttpStatus { status: u16, url: String },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML parse error
    #[error("Config parse error: {0}")]
    TomlDeError(#[from] toml::de::Error),

    /// TOML write error
    #[error("Config write error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// Malformed or unsupported pickle stream
    #[error("Pickle decode error at byte {offset}: {message}")]
    PickleError { offset: usize, message: String },

    /// Array shapes do not line up
    #[error("Shape mismatch: {0}")]
    ShapeError(String),

    /// Model used in the wrong state (e.g. backward before forward)
    #[error("Model error: {0}")]
    ModelError(String),

    /// Drawing backend failed
    #[error("Plot error: {0}")]
    PlotError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Not enough samples for the requested operation
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
}

impl Error {
    /// Create a pickle error at the given byte offset
    pub fn pickle(offset: usize, message: impl Into<String>) -> Self {
        Error::PickleError {
            offset,
            message: message.into(),
        }
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::ShapeError(err.to_string())
    }
}
