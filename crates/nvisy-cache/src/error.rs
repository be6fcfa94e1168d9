//! Error types and the translation of store failures into them.

use crate::KeyNamespace;
use crate::codec::CodecError;
use crate::store::{Status, StoreFailure};

/// Type alias for boxed dynamic errors that can be sent across threads.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for all cache operations in this crate.
///
/// This is a convenience type alias that defaults to using [`Error`] as the error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Unified error type for cache operations.
///
/// Absent values and negative results (an `add` on an existing key, a
/// compare-and-set with a stale token) are ordinary return values and never
/// show up here. Every variant that concerns a key carries the logical key the
/// caller used, never the prefixed key sent to the store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operation, or the transform loop's overall budget, ran out of time.
    #[error("Operation on key '{key}' timed out")]
    Timeout { key: String },

    /// The operation was aborted before completing, e.g. by client shutdown.
    #[error("Operation on key '{key}' was cancelled")]
    Cancelled { key: String },

    /// The store reported a status this crate does not recognize.
    #[error("Unhandled store status for key '{key}': {details}")]
    UnhandledStatus { key: String, details: String },

    /// A numeric mutation succeeded without carrying the resulting value.
    #[error("Store completed a numeric mutation on key '{key}' without a value")]
    IllegalCompleteStatus { key: String },

    /// The value codec failed to encode or decode a value.
    #[error("Codec error for key '{key}': {source}")]
    Codec {
        key: String,
        #[source]
        source: CodecError,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Store connection errors
    #[error("Store connection error: {0}")]
    Connection(#[source] BoxedError),
}

impl Error {
    /// Create a timeout error
    pub fn timeout(key: impl Into<String>) -> Self {
        Self::Timeout { key: key.into() }
    }

    /// Create a cancellation error
    pub fn cancelled(key: impl Into<String>) -> Self {
        Self::Cancelled { key: key.into() }
    }

    /// Create an unhandled status error
    pub fn unhandled_status(key: impl Into<String>, details: impl Into<String>) -> Self {
        Self::UnhandledStatus {
            key: key.into(),
            details: details.into(),
        }
    }

    /// Create an illegal complete status error
    pub fn illegal_complete_status(key: impl Into<String>) -> Self {
        Self::IllegalCompleteStatus { key: key.into() }
    }

    /// Create a codec error
    pub fn codec(key: impl Into<String>, source: CodecError) -> Self {
        Self::Codec {
            key: key.into(),
            source,
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns the logical key this error concerns, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Timeout { key }
            | Self::Cancelled { key }
            | Self::UnhandledStatus { key, .. }
            | Self::IllegalCompleteStatus { key }
            | Self::Codec { key, .. } => Some(key),
            Self::InvalidConfig { .. } | Self::Connection(_) => None,
        }
    }

    /// Returns `true` if retrying the same operation later may succeed.
    ///
    /// Only timeouts qualify. This crate never retries them on its own; the
    /// decision is left to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Get a user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            Error::Timeout { key } => {
                format!("Cache operation on '{key}' timed out. Please try again.")
            }
            Error::Cancelled { .. } => "Cache client is shutting down.".to_string(),
            Error::Codec { key, .. } => format!("Cached value for '{key}' has an invalid format."),
            Error::InvalidConfig { reason } => format!("Configuration error: {reason}"),
            Error::Connection(_) => {
                "Connection to the cache servers failed. Please check your connection.".to_string()
            }
            _ => "An unexpected cache error occurred.".to_string(),
        }
    }
}

impl StoreFailure {
    /// Translates this failure into a caller-visible [`Error`].
    ///
    /// The physical key is decoded back to its logical form first.
    pub fn into_error(self, namespace: &KeyNamespace) -> Error {
        let key = namespace.decode(&self.key).to_owned();
        match self.status {
            Status::TimedOut => Error::Timeout { key },
            Status::Cancelled => Error::Cancelled { key },
            Status::Unhandled(details) => Error::UnhandledStatus { key, details },
        }
    }
}
