//! # Error Handling
//!
//! One error type for every KaguraDB operation.
//!
//! ## Design Principles
//!
//! 1. **Actionable**: every error names the collection, field or value
//!    that caused it
//! 2. **Total**: failures surface to the caller of the public operation;
//!    nothing is swallowed
//! 3. **Non-fatal**: no error terminates the process; the store stays
//!    usable after any failure

use thiserror::Error;

/// Result type alias for KaguraDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for KaguraDB
#[derive(Error, Debug)]
pub enum Error {
    // Catalog errors
    #[error("unknown collection: {name}")]
    UnknownCollection { name: String },

    #[error("collection already exists: {name}")]
    DuplicateCollection { name: String },

    #[error("no index on {collection}.{field}")]
    UnknownIndex { collection: String, field: String },

    #[error("index already exists on {collection}.{field}")]
    DuplicateIndex { collection: String, field: String },

    // Constraint errors
    #[error("duplicate key for unique index on {field}: {value}")]
    DuplicateKey { field: String, value: String },

    #[error("schema violation in {collection}.{field}: {message}")]
    SchemaViolation {
        collection: String,
        field: String,
        message: String,
    },

    // Query errors
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    // Resource errors
    #[error("memory ceiling exceeded: {requested} bytes requested, {limit} byte limit")]
    OutOfMemory { requested: usize, limit: usize },

    // Persistence errors
    #[error("snapshot error: {message}")]
    Snapshot { message: String },

    #[error("snapshot corruption detected: {details}")]
    Corruption { details: String },

    // System errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Check if the error is recoverable: the caller can retry or adjust
    /// the request without reopening the store.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Io { .. } => false,
            Error::Corruption { .. } => false,
            Error::Internal { .. } => false,
            _ => true,
        }
    }

    /// Stable error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::UnknownCollection { .. } => "UNKNOWN_COLLECTION",
            Error::DuplicateCollection { .. } => "DUPLICATE_COLLECTION",
            Error::UnknownIndex { .. } => "UNKNOWN_INDEX",
            Error::DuplicateIndex { .. } => "DUPLICATE_INDEX",
            Error::DuplicateKey { .. } => "DUPLICATE_KEY",
            Error::SchemaViolation { .. } => "SCHEMA_VIOLATION",
            Error::InvalidQuery { .. } => "INVALID_QUERY",
            Error::OutOfMemory { .. } => "OUT_OF_MEMORY",
            Error::Snapshot { .. } => "SNAPSHOT_ERROR",
            Error::Corruption { .. } => "CORRUPTION",
            Error::Io { .. } => "IO_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_recoverability() {
        let dup = Error::DuplicateKey {
            field: "email".into(),
            value: "\"a@b\"".into(),
        };
        assert_eq!(dup.error_code(), "DUPLICATE_KEY");
        assert!(dup.is_recoverable());

        let corrupt = Error::Corruption {
            details: "bad checksum".into(),
        };
        assert!(!corrupt.is_recoverable());
    }

    #[test]
    fn messages_carry_context() {
        let err = Error::UnknownCollection { name: "users".into() };
        assert!(err.to_string().contains("users"));
    }
}
