// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use capv_core::CapvError;
use capv_storage::StorageError;
use miette::Diagnostic;
use thiserror::Error;

/// Resource store error type
#[derive(Error, Debug, Diagnostic)]
pub enum ClientError {
    /// Resource not found
    #[error("Resource not found: {resource_key}")]
    #[diagnostic(
        code(client::not_found),
        help("Verify the resource name, namespace, and kind are correct")
    )]
    NotFound { resource_key: String },

    /// Resource already exists
    #[error("Resource already exists: {resource_key}")]
    #[diagnostic(
        code(client::already_exists),
        help("Update the existing resource instead, or delete it first")
    )]
    AlreadyExists { resource_key: String },

    /// Optimistic lock failed
    #[error("Conflict on {resource_key}: expected resourceVersion {expected}, found {actual}")]
    #[diagnostic(
        code(client::conflict),
        help("The resource was modified concurrently. Re-read it and retry with the latest resourceVersion")
    )]
    Conflict {
        resource_key: String,
        expected: String,
        actual: String,
    },

    /// Stored data could not be decoded
    #[error("Failed to decode stored resource {resource_key}: {message}")]
    #[diagnostic(
        code(client::corrupt_object),
        help("The stored object does not match its kind. Delete and re-apply it")
    )]
    CorruptObject {
        resource_key: String,
        message: String,
    },

    /// Resource model error (validation, serialization, unknown kind)
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] CapvError),

    /// Storage backend error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Create a NotFound error
    pub fn not_found(resource_key: impl ToString) -> Self {
        Self::NotFound {
            resource_key: resource_key.to_string(),
        }
    }

    /// Create an AlreadyExists error
    pub fn already_exists(resource_key: impl ToString) -> Self {
        Self::AlreadyExists {
            resource_key: resource_key.to_string(),
        }
    }

    /// Create a Conflict error
    pub fn conflict(
        resource_key: impl ToString,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            resource_key: resource_key.to_string(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a CorruptObject error
    pub fn corrupt_object(resource_key: impl ToString, message: impl Into<String>) -> Self {
        Self::CorruptObject {
            resource_key: resource_key.to_string(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Conflict or AlreadyExists: a retry against fresh state may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::AlreadyExists { .. })
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Core(CapvError::from(err))
    }
}

impl From<capv_core::ResourceError> for ClientError {
    fn from(err: capv_core::ResourceError) -> Self {
        ClientError::Core(CapvError::from(err))
    }
}
