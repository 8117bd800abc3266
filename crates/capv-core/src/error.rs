// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for CAPV resource handling
#[derive(Error, Debug, Diagnostic)]
pub enum CapvError {
    /// Invalid resource
    #[error("Invalid resource: {reason}")]
    #[diagnostic(code(capv::invalid_resource), help("{suggestion}"))]
    InvalidResource {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(capv::serialization_error),
        help("Ensure the resource format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unknown kind
    #[error("Unknown resource kind: {kind}")]
    #[diagnostic(
        code(capv::invalid_kind),
        help("Supported kinds: Cluster, MachineDeployment, VSphereMachine, VirtualMachineGroup")
    )]
    InvalidKind {
        #[allow(unused)]
        kind: String,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(capv::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CapvError>;

impl CapvError {
    /// Create an InvalidResource error
    pub fn invalid_resource(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InvalidKind error
    pub fn invalid_kind(kind: impl Into<String>) -> Self {
        Self::InvalidKind { kind: kind.into() }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CapvError {
    fn from(err: serde_json::Error) -> Self {
        CapvError::serialization_error(format!("JSON error: {}", err), Some(Box::new(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CapvError::invalid_kind("v1/Pod");
        assert_eq!(err.to_string(), "Unknown resource kind: v1/Pod");

        let err = CapvError::invalid_resource("missing name", "Set metadata.name");
        assert!(matches!(err, CapvError::InvalidResource { .. }));
    }

    #[test]
    fn test_from_json_error() {
        let err: CapvError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, CapvError::SerializationError { .. }));
    }
}
