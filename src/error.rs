//! Error types for the storage-ops control plane
//!
//! Every failure is a distinct variant so callers can branch on the outcome
//! by machine. Variants group into the [`ErrorKind`] taxonomy used by the
//! request layer to pick a transport status.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the control plane
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Registry / Dispatch Errors
    // =========================================================================
    #[error("Driver not found: {name}")]
    DriverNotFound { name: String },

    #[error("Driver already registered: {name}")]
    DriverAlreadyRegistered { name: String },

    // =========================================================================
    // Capability Errors
    // =========================================================================
    #[error("Operation {operation} is not supported by driver {driver}")]
    NotSupported { driver: String, operation: String },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No catalog price matches {component}: {detail}")]
    PriceNotFound { component: String, detail: String },

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{id}")]
    ResourceNotFound { kind: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Expected exactly one resource for correlation id {correlation_id}, found {matches}")]
    AmbiguousCorrelation { correlation_id: String, matches: usize },

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    #[error("Timeout after {elapsed:?} waiting for {action} (last state: {last_state})")]
    Timeout {
        action: String,
        last_state: String,
        elapsed: Duration,
    },

    #[error("Unexpected state '{state}' while waiting for {action}, expected one of {expected:?}")]
    UnexpectedState {
        action: String,
        state: String,
        expected: Vec<String>,
    },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend unavailable: {backend}: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Backend operation failed: {backend} - {operation}: {message}")]
    Backend {
        backend: String,
        operation: String,
        message: String,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Machine-readable classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No registered driver, or a resource that never became visible
    NotFound,
    /// The driver deliberately lacks the capability
    NotSupported,
    /// Malformed spec, unpriceable spec, or a foreign resource value
    InvalidArgument,
    /// The provisioning state machine exceeded its bound
    Timeout,
    /// Duplicate registration or an invariant violation
    Conflict,
    /// Vendor failure passed through for diagnostics
    Backend,
    /// Local failures (configuration, IO, parsing)
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotSupported => "not_supported",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Backend => "backend_error",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Shorthand for a capability the driver does not implement
    pub fn not_supported(driver: impl Into<String>, operation: impl Into<String>) -> Self {
        Error::NotSupported {
            driver: driver.into(),
            operation: operation.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DriverNotFound { .. } | Error::ResourceNotFound { .. } => ErrorKind::NotFound,

            Error::NotSupported { .. } => ErrorKind::NotSupported,

            Error::InvalidArgument(_) | Error::PriceNotFound { .. } => ErrorKind::InvalidArgument,

            Error::Timeout { .. } => ErrorKind::Timeout,

            Error::DriverAlreadyRegistered { .. }
            | Error::Conflict(_)
            | Error::AmbiguousCorrelation { .. } => ErrorKind::Conflict,

            Error::BackendUnavailable { .. }
            | Error::Backend { .. }
            | Error::UnexpectedState { .. } => ErrorKind::Backend,

            Error::Internal(_)
            | Error::Configuration(_)
            | Error::JsonParse(_)
            | Error::YamlParse(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is transient.
    ///
    /// Only transient errors are retried, and only by the provisioning
    /// state machine.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::BackendUnavailable { .. })
    }

    /// Check if this error is the normal "capability absent" outcome
    pub fn is_not_supported(&self) -> bool {
        self.kind() == ErrorKind::NotSupported
    }

    /// Check if this error is retryable by a caller
    pub fn is_retryable(&self) -> bool {
        self.is_transient() || matches!(self, Error::Timeout { .. })
    }
}

/// Result type alias for the control plane
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::DriverNotFound { name: "x".into() };
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = Error::not_supported("softlayer", "attach");
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        assert!(err.is_not_supported());

        let err = Error::PriceNotFound {
            component: "performance storage space".into(),
            detail: "capacity 5000".into(),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = Error::AmbiguousCorrelation {
            correlation_id: "42".into(),
            matches: 2,
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = Error::DriverAlreadyRegistered { name: "local".into() };
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_error_transient() {
        let transient = Error::BackendUnavailable {
            backend: "softlayer".into(),
            reason: "503".into(),
        };
        assert!(transient.is_transient());
        assert!(transient.is_retryable());

        let hard = Error::Backend {
            backend: "softlayer".into(),
            operation: "getObject".into(),
            message: "404 Not Found".into(),
        };
        assert!(!hard.is_transient());
        assert!(!hard.is_retryable());
        assert_eq!(hard.kind(), ErrorKind::Backend);
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ErrorKind::NotSupported.to_string(), "not_supported");
        assert_eq!(ErrorKind::Timeout.as_str(), "timeout");
    }
}
