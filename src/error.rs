//! Error types for the caching engine.

use crate::source::Capability;
use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the caching engine.
///
/// All cache operations return `Result<T>` where `Result` is defined as `std::result::Result<T, Error>`.
/// Different error variants represent different failure modes:
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The source does not implement the capability an operation needs.
    ///
    /// Raised by `create`, `update`, `delete_by_id`, `delete_all` and `find_all`
    /// before any cache store is touched. Never retried.
    CapabilityMissing(Capability),

    /// The operation context was cancelled.
    ///
    /// Nothing started by the cancelled operation is committed.
    Cancelled,

    /// The operation context deadline elapsed.
    Timeout(String),

    /// Cache repository storage error (entity store or hit store).
    ///
    /// Read paths never surface this error: they log it and fall back to the source.
    BackendError(String),

    /// Error reported by the source of record.
    ///
    /// Source implementations may use this variant for their own failures. Whatever
    /// variant a source returns is handed to the caller unchanged.
    SourceError(String),

    /// Transaction could not be started, committed or rolled back, or a finished
    /// transaction was used again.
    ///
    /// **Recovery:** the invalidation cascade is rolled back; the source mutation that
    /// preceded it stays committed, so the cache may serve stale data until the next write.
    TransactionError(String),

    /// A repository record does not exist.
    NotFound(String),

    /// Serialization failed when converting a value to cache bytes or a query key.
    SerializationError(String),

    /// Deserialization failed when converting cache bytes back to a value.
    ///
    /// **Recovery:** the cache entry should be dropped and recomputed.
    DeserializationError(String),

    /// Invalid cache entry: corrupted envelope or bad magic.
    InvalidCacheEntry(String),

    /// Schema version mismatch between code and cached data.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from cached entry)
        found: u32,
    },

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// True for errors that come from the operation context rather than a collaborator.
    pub fn is_context_error(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Timeout(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CapabilityMissing(capability) => {
                write!(f, "{}: not implemented by source", capability)
            }
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::SourceError(msg) => write!(f, "Source error: {}", msg),
            Error::TransactionError(msg) => write!(f, "Transaction error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => {
                write!(f, "Invalid cache entry: {}", msg)
            }
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_syntax() || e.is_eof() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::BackendError("disk full".to_string());
        assert_eq!(err.to_string(), "Backend error: disk full");
    }

    #[test]
    fn test_capability_missing_names_operation() {
        let err = Error::CapabilityMissing(Capability::DeleteByID);
        assert_eq!(err.to_string(), "DeleteByID: not implemented by source");
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_context_errors() {
        assert!(Error::Cancelled.is_context_error());
        assert!(Error::Timeout("deadline".to_string()).is_context_error());
        assert!(!Error::BackendError("x".to_string()).is_context_error());
    }
}
