// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the server runtime.

use std::path::PathBuf;

use keel_config::ConfigError;
use keel_core::{StatusCode, UaError};
use thiserror::Error;

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised while building, starting or running a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A runtime operation failed with a status code.
    #[error(transparent)]
    Ua(#[from] UaError),

    /// The configuration snapshot is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A transport listener failed to start.
    #[error("Listener '{listener}' failed to start: {source}")]
    ListenerStart {
        /// Listener name.
        listener: String,
        /// Underlying failure.
        #[source]
        source: UaError,
    },

    /// Populating the mandatory address space failed.
    #[error("Bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying failure.
        #[source]
        source: UaError,
    },

    /// Work was submitted after the queue stopped.
    #[error("Work queue is stopped")]
    WorkQueueStopped,

    /// A certificate or private key could not be read.
    #[error("Failed to load certificate '{path}': {source}")]
    CertificateLoad {
        /// Path of the certificate or key.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ServerError {
    /// Creates a listener-start error.
    pub fn listener_start(listener: impl Into<String>, source: UaError) -> Self {
        Self::ListenerStart {
            listener: listener.into(),
            source,
        }
    }

    /// Creates a bootstrap error.
    pub fn bootstrap(source: UaError) -> Self {
        Self::Bootstrap { source }
    }

    /// Creates a certificate-load error.
    pub fn certificate_load(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CertificateLoad {
            path: path.into(),
            source,
        }
    }

    /// The status code reported to OPC UA clients for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Ua(e) | Self::ListenerStart { source: e, .. } | Self::Bootstrap { source: e } => {
                e.status_code()
            }
            Self::Config(_) => StatusCode::BadInvalidArgument,
            Self::WorkQueueStopped => StatusCode::BadShutdown,
            Self::CertificateLoad { .. } => StatusCode::BadCertificateInvalid,
        }
    }
}

impl From<ServerError> for StatusCode {
    fn from(err: ServerError) -> Self {
        err.status_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        let err = ServerError::bootstrap(UaError::out_of_memory("namespace table"));
        assert_eq!(err.status_code(), StatusCode::BadOutOfMemory);
        assert_eq!(ServerError::WorkQueueStopped.status_code(), StatusCode::BadShutdown);

        let err: ServerError = UaError::not_found("callback", "7").into();
        assert_eq!(err.status_code(), StatusCode::BadNotFound);
    }

    #[test]
    fn test_display() {
        let err = ServerError::listener_start("tcp", UaError::internal("bind failed"));
        assert!(err.to_string().contains("tcp"));
    }
}
