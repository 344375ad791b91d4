//! Result and error types for Probecov.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for Probecov operations
pub type ProbecovResult<T> = Result<T, ProbecovError>;

/// Errors that can occur in Probecov
#[derive(Debug, Error)]
pub enum ProbecovError {
    /// File is not a readable module image or symbol file
    #[error("Bad image format in {path}: {reason}")]
    BadImageFormat {
        /// Offending file
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// Rewritten method body failed stack verification
    #[error("Stack imbalance in {method} at instruction {offset}: {message}")]
    StackImbalance {
        /// Method full name
        method: String,
        /// Instruction index where the problem was detected
        offset: usize,
        /// Error message
        message: String,
    },

    /// Coverage baseline could not be decoded or is inconsistent
    #[error("Invalid coverage baseline: {message}")]
    Baseline {
        /// Error message
        message: String,
    },

    /// Threshold outside of [0, 1]
    #[error("Invalid threshold {value}: expected a fraction between 0 and 1")]
    InvalidThreshold {
        /// Rejected value
        value: f64,
    },

    /// Hits file could not be parsed
    #[error("Malformed hits file {path}: {message}")]
    HitsFile {
        /// Offending file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Working directory for rewritten modules could not be created
    #[error("Cannot create working directory {path}: {source}")]
    TempDir {
        /// Directory path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary encoding error
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

impl ProbecovError {
    /// Create a bad image format error
    #[must_use]
    pub fn bad_image(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::BadImageFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a baseline error
    #[must_use]
    pub fn baseline(message: impl Into<String>) -> Self {
        Self::Baseline {
            message: message.into(),
        }
    }

    /// Create a hits file error
    #[must_use]
    pub fn hits_file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::HitsFile {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this error only affects the module it was raised for
    #[must_use]
    pub const fn is_soft(&self) -> bool {
        matches!(self, Self::BadImageFormat { .. })
    }
}
