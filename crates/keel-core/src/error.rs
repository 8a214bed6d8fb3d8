// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Status codes and the structured error type of the server core.
//!
//! Every failure the core reports maps onto one OPC UA status code from a
//! closed taxonomy. [`UaError`] carries the context a log line needs (ids,
//! limits, field names) while [`StatusCode`] is what goes back on the wire.
//!
//! # Error Categories
//!
//! ```text
//! UaError
//! ├── lookup        - NotFound, NodeIdUnknown, SessionIdInvalid, ...
//! ├── argument      - InvalidArgument, NodeIdInvalid, TypeMismatch, ...
//! ├── resource      - OutOfMemory, TooManySessions, TooManySubscriptions, ...
//! ├── security      - SecurityChecksFailed, SecurityPolicyRejected, ...
//! ├── timeout       - Timeout
//! └── internal      - Internal, Unexpected, Shutdown
//! ```
//!
//! # Examples
//!
//! ```
//! use keel_core::error::{StatusCode, UaError};
//!
//! let error = UaError::not_found("namespace", "urn:missing");
//! assert_eq!(error.status_code(), StatusCode::BadNotFound);
//! assert!(error.is_recoverable());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

// =============================================================================
// StatusCode
// =============================================================================

/// OPC UA status codes produced by the server core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// The operation succeeded.
    #[default]
    Good,
    /// An unexpected error occurred.
    BadUnexpectedError,
    /// An internal error occurred as a result of a programming or configuration error.
    BadInternalError,
    /// Not enough memory to complete the operation.
    BadOutOfMemory,
    /// The operation timed out.
    BadTimeout,
    /// The server is shutting down.
    BadShutdown,
    /// There was nothing to do because the request was empty.
    BadNothingToDo,
    /// The request could not be processed because it exceeded a limit.
    BadTooManyOperations,
    /// An error occurred verifying security.
    BadSecurityChecksFailed,
    /// The certificate provided as a parameter is not valid.
    BadCertificateInvalid,
    /// The specified secure channel is no longer valid.
    BadSecureChannelIdInvalid,
    /// The session id is not valid.
    BadSessionIdInvalid,
    /// The subscription id is not valid.
    BadSubscriptionIdInvalid,
    /// The syntax of the node id is not valid.
    BadNodeIdInvalid,
    /// The node id refers to a node that does not exist in the server address space.
    BadNodeIdUnknown,
    /// The attribute is not supported for the specified node.
    BadAttributeIdInvalid,
    /// The monitoring item id does not refer to a valid monitored item.
    BadMonitoredItemIdInvalid,
    /// The server has reached its maximum number of sessions.
    BadTooManySessions,
    /// The value supplied for the attribute is not of the same type as the attribute's value.
    BadTypeMismatch,
    /// The server has reached its maximum number of subscriptions.
    BadTooManySubscriptions,
    /// The requested node id is already used by another node.
    BadNodeIdExists,
    /// The security policy does not meet the requirements set by the server.
    BadSecurityPolicyRejected,
    /// The server has reached the maximum number of monitored items.
    BadTooManyMonitoredItems,
    /// The requested item was not found or a search operation ended without success.
    BadNotFound,
    /// One or more arguments are invalid.
    BadInvalidArgument,
    /// The operation could not be finished because all available connections are in use.
    BadMaxConnectionsReached,
    /// The node has references or subtypes and cannot be removed.
    BadReferencesNotAllowed,
}

impl StatusCode {
    /// Returns the numeric OPC UA status code.
    pub const fn code(&self) -> u32 {
        match self {
            Self::Good => 0x0000_0000,
            Self::BadUnexpectedError => 0x8001_0000,
            Self::BadInternalError => 0x8002_0000,
            Self::BadOutOfMemory => 0x8003_0000,
            Self::BadTimeout => 0x800A_0000,
            Self::BadShutdown => 0x800C_0000,
            Self::BadNothingToDo => 0x800F_0000,
            Self::BadTooManyOperations => 0x8010_0000,
            Self::BadSecurityChecksFailed => 0x8013_0000,
            Self::BadCertificateInvalid => 0x8012_0000,
            Self::BadSecureChannelIdInvalid => 0x8022_0000,
            Self::BadSessionIdInvalid => 0x8025_0000,
            Self::BadSubscriptionIdInvalid => 0x8028_0000,
            Self::BadNodeIdInvalid => 0x8033_0000,
            Self::BadNodeIdUnknown => 0x8034_0000,
            Self::BadAttributeIdInvalid => 0x8035_0000,
            Self::BadMonitoredItemIdInvalid => 0x8042_0000,
            Self::BadTooManySessions => 0x8056_0000,
            Self::BadTypeMismatch => 0x8074_0000,
            Self::BadTooManySubscriptions => 0x8077_0000,
            Self::BadNodeIdExists => 0x805E_0000,
            Self::BadSecurityPolicyRejected => 0x8055_0000,
            Self::BadTooManyMonitoredItems => 0x80DB_0000,
            Self::BadNotFound => 0x803E_0000,
            Self::BadInvalidArgument => 0x80AB_0000,
            Self::BadMaxConnectionsReached => 0x80B7_0000,
            Self::BadReferencesNotAllowed => 0x803B_0000,
        }
    }

    /// Returns the symbolic name used in logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::BadUnexpectedError => "BadUnexpectedError",
            Self::BadInternalError => "BadInternalError",
            Self::BadOutOfMemory => "BadOutOfMemory",
            Self::BadTimeout => "BadTimeout",
            Self::BadShutdown => "BadShutdown",
            Self::BadNothingToDo => "BadNothingToDo",
            Self::BadTooManyOperations => "BadTooManyOperations",
            Self::BadSecurityChecksFailed => "BadSecurityChecksFailed",
            Self::BadCertificateInvalid => "BadCertificateInvalid",
            Self::BadSecureChannelIdInvalid => "BadSecureChannelIdInvalid",
            Self::BadSessionIdInvalid => "BadSessionIdInvalid",
            Self::BadSubscriptionIdInvalid => "BadSubscriptionIdInvalid",
            Self::BadNodeIdInvalid => "BadNodeIdInvalid",
            Self::BadNodeIdUnknown => "BadNodeIdUnknown",
            Self::BadAttributeIdInvalid => "BadAttributeIdInvalid",
            Self::BadMonitoredItemIdInvalid => "BadMonitoredItemIdInvalid",
            Self::BadTooManySessions => "BadTooManySessions",
            Self::BadTypeMismatch => "BadTypeMismatch",
            Self::BadTooManySubscriptions => "BadTooManySubscriptions",
            Self::BadNodeIdExists => "BadNodeIdExists",
            Self::BadSecurityPolicyRejected => "BadSecurityPolicyRejected",
            Self::BadTooManyMonitoredItems => "BadTooManyMonitoredItems",
            Self::BadNotFound => "BadNotFound",
            Self::BadInvalidArgument => "BadInvalidArgument",
            Self::BadMaxConnectionsReached => "BadMaxConnectionsReached",
            Self::BadReferencesNotAllowed => "BadReferencesNotAllowed",
        }
    }

    /// Returns `true` for the good status.
    #[inline]
    pub const fn is_good(&self) -> bool {
        matches!(self, Self::Good)
    }

    /// Returns `true` if the severity bits mark this code as bad.
    #[inline]
    pub const fn is_bad(&self) -> bool {
        self.code() & 0x8000_0000 != 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.code())
    }
}

// =============================================================================
// UaError
// =============================================================================

/// Structured error of the server core.
///
/// Each variant maps to exactly one [`StatusCode`] through
/// [`UaError::status_code`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UaError {
    /// A lookup by name or id found nothing.
    #[error("{what} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up.
        what: &'static str,
        /// The id or name that was searched for.
        id: String,
    },

    /// An argument failed validation.
    #[error("Invalid argument '{field}': {message}")]
    InvalidArgument {
        /// Argument or field name.
        field: String,
        /// What was wrong with it.
        message: String,
    },

    /// An allocation could not be satisfied.
    #[error("Out of memory while {context}")]
    OutOfMemory {
        /// The operation that needed the memory.
        context: String,
    },

    /// An internal invariant was violated.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },

    /// An unexpected condition that has no better status.
    #[error("Unexpected error: {message}")]
    Unexpected {
        /// Description of the failure.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("Operation '{operation}' timed out")]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// Security verification failed.
    #[error("Security checks failed: {message}")]
    SecurityChecksFailed {
        /// Description of the failure.
        message: String,
    },

    /// The security policy is not offered by any endpoint.
    #[error("Security policy rejected: {policy}")]
    SecurityPolicyRejected {
        /// The rejected policy.
        policy: String,
    },

    /// A certificate could not be used.
    #[error("Invalid certificate: {message}")]
    CertificateInvalid {
        /// Description of the failure.
        message: String,
    },

    /// A node id could not be parsed or is not allowed here.
    #[error("Invalid node id '{node_id}': {reason}")]
    NodeIdInvalid {
        /// The offending node id text.
        node_id: String,
        /// Why it is invalid.
        reason: String,
    },

    /// The node does not exist in the nodestore.
    #[error("Unknown node: {node_id}")]
    NodeIdUnknown {
        /// The node id.
        node_id: String,
    },

    /// The node id is already taken.
    #[error("Node id already exists: {node_id}")]
    NodeIdExists {
        /// The node id.
        node_id: String,
    },

    /// The attribute is not defined for the node class.
    #[error("Attribute {attribute} is not valid for node {node_id}")]
    AttributeIdInvalid {
        /// The node id.
        node_id: String,
        /// The attribute name.
        attribute: String,
    },

    /// A value does not fit the declared type of its target.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The declared type or constraint.
        expected: String,
        /// What was supplied.
        actual: String,
    },

    /// The node cannot be removed while references depend on it.
    #[error("Node {node_id} still has subtypes or instances")]
    ReferencesNotAllowed {
        /// The node id.
        node_id: String,
    },

    /// The secure channel does not exist.
    #[error("Secure channel {channel_id} is not valid")]
    SecureChannelIdInvalid {
        /// The channel id.
        channel_id: u32,
    },

    /// The session does not exist, expired, or is not activated.
    #[error("Session is not valid: {session}")]
    SessionIdInvalid {
        /// The session id or token text.
        session: String,
    },

    /// The subscription does not exist.
    #[error("Subscription {subscription_id} is not valid")]
    SubscriptionIdInvalid {
        /// The subscription id.
        subscription_id: u32,
    },

    /// The monitored item does not exist.
    #[error("Monitored item {monitored_item_id} is not valid")]
    MonitoredItemIdInvalid {
        /// The monitored item id.
        monitored_item_id: u32,
    },

    /// The channel table is full.
    #[error("Maximum number of secure channels reached ({limit})")]
    TooManySecureChannels {
        /// Configured limit.
        limit: usize,
    },

    /// The session table is full.
    #[error("Maximum number of sessions reached ({limit})")]
    TooManySessions {
        /// Configured limit.
        limit: usize,
    },

    /// The session already owns the maximum number of subscriptions.
    #[error("Maximum number of subscriptions reached ({limit})")]
    TooManySubscriptions {
        /// Configured limit.
        limit: usize,
    },

    /// The subscription already owns the maximum number of monitored items.
    #[error("Maximum number of monitored items reached ({limit})")]
    TooManyMonitoredItems {
        /// Configured limit.
        limit: usize,
    },

    /// The request carried no work.
    #[error("Nothing to do: {message}")]
    NothingToDo {
        /// Description.
        message: String,
    },

    /// The server or component is shutting down.
    #[error("Shutting down: {component}")]
    Shutdown {
        /// The component that refused the work.
        component: String,
    },
}

impl UaError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a not-found error.
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { what, id: id.into() }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an out-of-memory error.
    pub fn out_of_memory(context: impl Into<String>) -> Self {
        Self::OutOfMemory {
            context: context.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an unexpected error.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates a security-check failure.
    pub fn security_checks_failed(message: impl Into<String>) -> Self {
        Self::SecurityChecksFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid node id error.
    pub fn node_id_invalid(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NodeIdInvalid {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unknown node error.
    pub fn node_id_unknown(node_id: impl fmt::Display) -> Self {
        Self::NodeIdUnknown {
            node_id: node_id.to_string(),
        }
    }

    /// Creates a node-exists error.
    pub fn node_id_exists(node_id: impl fmt::Display) -> Self {
        Self::NodeIdExists {
            node_id: node_id.to_string(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a session-invalid error.
    pub fn session_invalid(session: impl fmt::Display) -> Self {
        Self::SessionIdInvalid {
            session: session.to_string(),
        }
    }

    /// Creates a shutdown error.
    pub fn shutdown(component: impl Into<String>) -> Self {
        Self::Shutdown {
            component: component.into(),
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Returns the status code this error is reported as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::BadNotFound,
            Self::InvalidArgument { .. } => StatusCode::BadInvalidArgument,
            Self::OutOfMemory { .. } => StatusCode::BadOutOfMemory,
            Self::Internal { .. } => StatusCode::BadInternalError,
            Self::Unexpected { .. } => StatusCode::BadUnexpectedError,
            Self::Timeout { .. } => StatusCode::BadTimeout,
            Self::SecurityChecksFailed { .. } => StatusCode::BadSecurityChecksFailed,
            Self::SecurityPolicyRejected { .. } => StatusCode::BadSecurityPolicyRejected,
            Self::CertificateInvalid { .. } => StatusCode::BadCertificateInvalid,
            Self::NodeIdInvalid { .. } => StatusCode::BadNodeIdInvalid,
            Self::NodeIdUnknown { .. } => StatusCode::BadNodeIdUnknown,
            Self::NodeIdExists { .. } => StatusCode::BadNodeIdExists,
            Self::AttributeIdInvalid { .. } => StatusCode::BadAttributeIdInvalid,
            Self::TypeMismatch { .. } => StatusCode::BadTypeMismatch,
            Self::ReferencesNotAllowed { .. } => StatusCode::BadReferencesNotAllowed,
            Self::SecureChannelIdInvalid { .. } => StatusCode::BadSecureChannelIdInvalid,
            Self::SessionIdInvalid { .. } => StatusCode::BadSessionIdInvalid,
            Self::SubscriptionIdInvalid { .. } => StatusCode::BadSubscriptionIdInvalid,
            Self::MonitoredItemIdInvalid { .. } => StatusCode::BadMonitoredItemIdInvalid,
            Self::TooManySecureChannels { .. } => StatusCode::BadMaxConnectionsReached,
            Self::TooManySessions { .. } => StatusCode::BadTooManySessions,
            Self::TooManySubscriptions { .. } => StatusCode::BadTooManySubscriptions,
            Self::TooManyMonitoredItems { .. } => StatusCode::BadTooManyMonitoredItems,
            Self::NothingToDo { .. } => StatusCode::BadNothingToDo,
            Self::Shutdown { .. } => StatusCode::BadShutdown,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound { .. }
            | Self::NodeIdUnknown { .. }
            | Self::SecureChannelIdInvalid { .. }
            | Self::SessionIdInvalid { .. }
            | Self::SubscriptionIdInvalid { .. }
            | Self::MonitoredItemIdInvalid { .. } => "lookup",
            Self::InvalidArgument { .. }
            | Self::NodeIdInvalid { .. }
            | Self::NodeIdExists { .. }
            | Self::AttributeIdInvalid { .. }
            | Self::TypeMismatch { .. }
            | Self::ReferencesNotAllowed { .. }
            | Self::NothingToDo { .. } => "argument",
            Self::OutOfMemory { .. }
            | Self::TooManySecureChannels { .. }
            | Self::TooManySessions { .. }
            | Self::TooManySubscriptions { .. }
            | Self::TooManyMonitoredItems { .. } => "resource",
            Self::SecurityChecksFailed { .. }
            | Self::SecurityPolicyRejected { .. }
            | Self::CertificateInvalid { .. } => "security",
            Self::Timeout { .. } => "timeout",
            Self::Internal { .. } | Self::Unexpected { .. } | Self::Shutdown { .. } => "internal",
        }
    }

    /// Returns `true` if the server keeps running normally after this error.
    ///
    /// Only internal invariant violations and memory exhaustion are
    /// considered unrecoverable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Internal { .. } | Self::Unexpected { .. } | Self::OutOfMemory { .. }
        )
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::OutOfMemory { .. } | Self::Internal { .. } => ErrorSeverity::Critical,
            Self::Unexpected { .. } | Self::SecurityChecksFailed { .. } => ErrorSeverity::Error,
            Self::NotFound { .. } | Self::NothingToDo { .. } | Self::Shutdown { .. } => {
                ErrorSeverity::Info
            }
            _ => ErrorSeverity::Warning,
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let status = self.status_code();
        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                status_code = %status,
                category = self.category(),
                context = context,
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                status_code = %status,
                category = self.category(),
                context = context,
                "{self}"
            ),
            _ => tracing::debug!(
                status_code = %status,
                category = self.category(),
                context = context,
                "{self}"
            ),
        }
    }
}

impl From<UaError> for StatusCode {
    fn from(error: UaError) -> Self {
        error.status_code()
    }
}

/// Result alias for core operations.
pub type UaResult<T> = Result<T, UaError>;

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - the server state may be compromised.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_values() {
        assert_eq!(StatusCode::Good.code(), 0);
        assert_eq!(StatusCode::BadNotFound.code(), 0x803E_0000);
        assert_eq!(StatusCode::BadOutOfMemory.code(), 0x8003_0000);
        assert!(StatusCode::BadTimeout.is_bad());
        assert!(!StatusCode::Good.is_bad());
    }

    #[test]
    fn test_status_code_display() {
        let text = StatusCode::BadInvalidArgument.to_string();
        assert_eq!(text, "BadInvalidArgument (0x80AB0000)");
    }

    #[test]
    fn test_error_maps_to_status() {
        assert_eq!(
            UaError::invalid_argument("interval", "must be positive").status_code(),
            StatusCode::BadInvalidArgument
        );
        assert_eq!(
            UaError::TooManySessions { limit: 1 }.status_code(),
            StatusCode::BadTooManySessions
        );
        let status: StatusCode = UaError::timeout("publish").into();
        assert_eq!(status, StatusCode::BadTimeout);
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(UaError::not_found("callback", "7").is_recoverable());
        assert!(!UaError::out_of_memory("growing namespace table").is_recoverable());
        assert_eq!(
            UaError::internal("broken").severity(),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_error_display() {
        let error = UaError::not_found("namespace", "urn:x");
        assert_eq!(error.to_string(), "namespace not found: urn:x");
        assert_eq!(error.category(), "lookup");
    }
}
