//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Probecov library error
    #[error("{0}")]
    Probecov(#[from] probecov::ProbecovError),

    /// Total coverage is below the threshold
    #[error("Coverage {coverage:.2}% is below the threshold of {threshold:.2}%")]
    ThresholdFailed {
        /// Total line coverage, in percent
        coverage: f64,
        /// Required coverage, in percent
        threshold: f64,
    },
}

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error() {
        let err = CliError::config("No assemblies found");
        assert!(err.to_string().contains("Configuration"));
        assert!(err.to_string().contains("No assemblies found"));
    }

    #[test]
    fn test_invalid_argument_error() {
        let err = CliError::invalid_argument("bad arg");
        assert!(err.to_string().contains("Invalid argument"));
    }

    #[test]
    fn test_threshold_failed() {
        let err = CliError::ThresholdFailed {
            coverage: 77.777,
            threshold: 90.0,
        };
        assert_eq!(
            err.to_string(),
            "Coverage 77.78% is below the threshold of 90.00%"
        );
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let cli_err: CliError = io_err.into();
        assert!(cli_err.to_string().contains("I/O"));
    }

    #[test]
    fn test_probecov_error_from() {
        let err: CliError = probecov::ProbecovError::baseline("dangling method id 4").into();
        assert!(err.to_string().contains("dangling method id 4"));
    }
}
