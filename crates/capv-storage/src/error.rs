// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Storage error type
#[derive(Error, Debug, Diagnostic)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {message}")]
    #[diagnostic(
        code(storage::database_error),
        help("Check that the data directory is accessible and the database is not opened by another process")
    )]
    DatabaseError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transaction error
    #[error("Transaction error: {message}")]
    #[diagnostic(
        code(storage::transaction_error),
        help("Ensure the transaction is not already committed or aborted")
    )]
    TransactionError { message: String },

    /// Malformed key found in the database
    #[error("Invalid storage key: {key}")]
    #[diagnostic(
        code(storage::invalid_key),
        help("Keys must have the form apiVersion/kind/namespace/name")
    )]
    InvalidKey { key: String },

    /// I/O error
    #[error("I/O error: {message}")]
    #[diagnostic(
        code(storage::io_error),
        help("Check filesystem permissions and available disk space")
    )]
    IoError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Create a DatabaseError
    pub fn database_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::DatabaseError {
            message: message.into(),
            source,
        }
    }

    /// Create a TransactionError
    pub fn transaction_error(message: impl Into<String>) -> Self {
        Self::TransactionError {
            message: message.into(),
        }
    }

    /// Create an InvalidKey error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    /// Create an IoError
    pub fn io_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::IoError {
            message: message.into(),
            source,
        }
    }
}

impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::database_error(format!("redb error: {}", err), Some(Box::new(err)))
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::database_error(format!("Failed to open database: {}", err), Some(Box::new(err)))
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::transaction_error(format!("Transaction error: {}", err))
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::database_error(format!("Storage error: {}", err), Some(Box::new(err)))
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::database_error(format!("Table error: {}", err), Some(Box::new(err)))
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::transaction_error(format!("Commit error: {}", err))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::io_error(format!("I/O error: {}", err), Some(Box::new(err)))
    }
}
