//! Error types for the replicated configuration store

use thiserror::Error;

/// Main error type for configuration store operations
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Key is not part of the default mapping supplied at construction
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Construction options are inconsistent
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Operation is not valid for the current state or role
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Write attempted against a read-only storage tier
    #[error("Storage tier is read-only")]
    ReadOnlyStorage,

    /// Error during storage operations
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error in the message transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// The authoritative context could not be reached within the retry budget
    #[error("Authoritative context unreachable")]
    AuthorityUnreachable,

    /// Initial load could not produce any snapshot
    #[error("Load failed: {0}")]
    LoadFailed(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using ConfigError
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::UnknownKey("theme".to_string());
        assert_eq!(format!("{}", err), "Unknown configuration key: theme");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ConfigError = io_err.into();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
