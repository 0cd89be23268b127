//! Error types for Riptide Core

use thiserror::Error;

/// Result type alias using Riptide Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Riptide engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from file or socket operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested record does not exist (e.g. absent store metadata)
    #[error("not found: {0}")]
    NotFound(String),

    /// Invariant violation or unparseable on-disk state
    #[error("internal error: {0}")]
    Internal(String),

    /// A bounded wait expired (e.g. waiting for a slave routine to yield)
    #[error("timeout: {0}")]
    Timeout(String),

    /// Operator precondition violated (e.g. attaching to a non-empty store)
    #[error("manual operation rejected: {0}")]
    Manual(String),

    /// The target is already occupied by a conflicting operation
    #[error("busy: {0}")]
    Busy(String),

    /// Binlog cursor ran past the end of the log
    #[error("binlog exhausted: {0}")]
    Exhausted(String),

    /// Catalog read/write errors
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Storage engine errors
    #[error("storage error: {0}")]
    Storage(String),

    /// Network transport errors
    #[error("network error: {0}")]
    Network(String),
}

impl Error {
    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a manual-precondition error
    pub fn manual(msg: impl Into<String>) -> Self {
        Self::Manual(msg.into())
    }

    /// Create a busy error
    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    /// Create an exhausted error
    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::Exhausted(msg.into())
    }

    /// Create a catalog error
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// True when the error is a missing-record lookup
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when the error is an exhausted binlog cursor
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::manual("store not empty");
        assert_eq!(e.to_string(), "manual operation rejected: store not empty");

        let e = Error::timeout("wait for store to yield");
        assert_eq!(e.to_string(), "timeout: wait for store to yield");
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }

    #[test]
    fn test_error_predicates() {
        assert!(Error::not_found("x").is_not_found());
        assert!(Error::exhausted("x").is_exhausted());
        assert!(!Error::internal("x").is_not_found());
    }
}
