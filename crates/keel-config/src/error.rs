// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration error types for keel-config.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors.
///
/// Covers every failure during configuration loading, placeholder
/// resolution, parsing and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to parse configuration content.
    #[error("Failed to parse config '{path}': {message}")]
    Parse {
        /// Path of the configuration file, or `<string>`.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Validation failed for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Required field is missing.
    #[error("Missing required field: {field}")]
    MissingField {
        /// The missing field name.
        field: String,
    },

    /// File I/O error.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// The path that does not exist.
        path: PathBuf,
    },

    /// Referenced environment variable is not set and has no default.
    #[error("Environment variable not found: {name}")]
    EnvVarNotFound {
        /// Variable name.
        name: String,
    },

    /// Environment variable has an unusable value.
    #[error("Invalid environment variable '{name}': {message}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// Error message.
        message: String,
    },

    /// A numeric value lies outside its allowed range.
    #[error("Value {value} for '{field}' is out of range [{min}, {max}]")]
    OutOfRange {
        /// Field name.
        field: String,
        /// Supplied value.
        value: String,
        /// Lower bound.
        min: String,
        /// Upper bound.
        max: String,
    },

    /// The file extension or format name is not supported.
    #[error("Unsupported configuration format: {format}")]
    UnsupportedFormat {
        /// The format or extension.
        format: String,
    },

    /// Serialization failure.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },
}

impl ConfigError {
    /// Creates a parse error.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates an environment variable not found error.
    pub fn env_var_not_found(name: impl Into<String>) -> Self {
        Self::EnvVarNotFound { name: name.into() }
    }

    /// Creates an invalid environment variable error.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an out of range error.
    pub fn out_of_range<T: std::fmt::Display>(
        field: impl Into<String>,
        value: T,
        min: T,
        max: T,
    ) -> Self {
        Self::OutOfRange {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    /// Creates an unsupported format error.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` for errors caused by the filesystem.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::FileNotFound { .. })
    }

    /// Returns a short error type name for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::Validation { .. } => "validation",
            Self::MissingField { .. } => "missing_field",
            Self::Io { .. } => "io",
            Self::FileNotFound { .. } => "file_not_found",
            Self::EnvVarNotFound { .. } => "env_var_not_found",
            Self::InvalidEnvVar { .. } => "invalid_env_var",
            Self::OutOfRange { .. } => "out_of_range",
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::Serialization { .. } => "serialization",
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::out_of_range("concurrency.worker_count", 0, 1, 256);
        assert_eq!(
            err.to_string(),
            "Value 0 for 'concurrency.worker_count' is out of range [1, 256]"
        );
        assert_eq!(err.error_type(), "out_of_range");
    }

    #[test]
    fn test_is_io_error() {
        assert!(ConfigError::file_not_found("/missing.yaml").is_io_error());
        assert!(!ConfigError::missing_field("endpoints").is_io_error());
    }
}
