//! Error types for store access.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to a document store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Network or transport error.
    #[error("transport error at {endpoint}: {message}")]
    Transport {
        /// Store endpoint the request was sent to.
        endpoint: String,
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The store answered with a non-success HTTP status.
    #[error("HTTP status {status} from {url}")]
    Status {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The store rejected a write because of an identifier/version conflict.
    #[error("version conflict for record {id}")]
    Conflict {
        /// Identifier of the rejected record.
        id: String,
    },

    /// The store response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A record field holds a value of the wrong shape.
    #[error("malformed field {field}: {value}")]
    MalformedField {
        /// Field name.
        field: String,
        /// Offending value, rendered as text.
        value: String,
    },

    /// A predicate string could not be parsed.
    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    /// A timestamp could not be parsed.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// An endpoint URL is not usable.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A collection name does not name a catalog collection.
    #[error("unknown collection '{0}' (expected datasets, files or aggregations)")]
    UnknownCollection(String),
}

impl StoreError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Transport { retryable, .. } => *retryable,
            StoreError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if the store could not be reached or did not answer usefully.
    ///
    /// Callers treat this class as "cannot determine" rather than as a data problem.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Transport { .. } | StoreError::Status { .. } | StoreError::Decode(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(StoreError::transport_retryable("http://a", "connection reset").is_retryable());
        assert!(!StoreError::transport_fatal("http://a", "bad certificate").is_retryable());
        assert!(StoreError::Status {
            url: "http://a/select".into(),
            status: 503
        }
        .is_retryable());
        assert!(StoreError::Status {
            url: "http://a/select".into(),
            status: 429
        }
        .is_retryable());
        assert!(!StoreError::Status {
            url: "http://a/select".into(),
            status: 400
        }
        .is_retryable());
        assert!(!StoreError::Conflict { id: "x".into() }.is_retryable());
    }

    #[test]
    fn unavailable_class() {
        assert!(StoreError::transport_fatal("http://a", "refused").is_unavailable());
        assert!(StoreError::Decode("truncated".into()).is_unavailable());
        assert!(!StoreError::InvalidPredicate("a".into()).is_unavailable());
    }

    #[test]
    fn error_display() {
        let err = StoreError::Conflict { id: "ds.v1".into() };
        assert_eq!(err.to_string(), "version conflict for record ds.v1");

        let err = StoreError::Status {
            url: "http://x/select".into(),
            status: 404,
        };
        assert!(err.to_string().contains("404"));
    }
}
