// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use capv_client::ClientError;
use miette::Diagnostic;
use thiserror::Error;

/// Controller error type
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// VM name could not be derived from the naming template
    #[error("Failed to generate VM name for machine '{machine}': {message}")]
    #[diagnostic(
        code(controller::naming_failed),
        help("Check spec.namingStrategy.template; it may only reference machine.name and the trimSuffix/trunc helpers")
    )]
    NamingFailed { machine: String, message: String },

    /// Cluster topology or MachineDeployments are malformed
    #[error("Invalid topology for cluster {cluster}: {reason}")]
    #[diagnostic(
        code(controller::invalid_topology),
        help("Worker MachineDeployments need unique non-empty names and non-negative replicas")
    )]
    InvalidTopology { cluster: String, reason: String },

    /// Store error with the object it concerns
    #[error("Failed to {action} {object}")]
    #[diagnostic(code(controller::store_error))]
    Store {
        action: &'static str,
        object: String,
        #[source]
        #[diagnostic_source]
        source: ClientError,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(controller::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError { message: String },
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    /// Create a NamingFailed error
    pub fn naming_failed(machine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NamingFailed {
            machine: machine.into(),
            message: message.into(),
        }
    }

    /// Create an InvalidTopology error
    pub fn invalid_topology(cluster: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidTopology {
            cluster: cluster.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap a store error with the action and object it concerns
    pub fn store(action: &'static str, object: impl ToString, source: ClientError) -> Self {
        Self::Store {
            action,
            object: object.to_string(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether the underlying store reported a conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store { source, .. } if source.is_conflict())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_keeps_context() {
        let err = ControllerError::store(
            "update",
            "VirtualMachineGroup ns1/c1",
            ClientError::conflict("VirtualMachineGroup ns1/c1", "a", "b"),
        );
        assert!(err.is_conflict());
        assert_eq!(err.to_string(), "Failed to update VirtualMachineGroup ns1/c1");
    }

    #[test]
    fn test_non_store_errors_are_not_conflicts() {
        assert!(!ControllerError::invalid_topology("ns1/c1", "duplicate name md1").is_conflict());
        assert!(!ControllerError::naming_failed("m1", "undefined value").is_conflict());
    }
}
