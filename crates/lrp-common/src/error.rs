//! Error types for the LRP bridge
//!
//! Every failed call against the cluster is wrapped with a short, stable
//! prefix naming the operation ("failed to list statefulsets", "failed to
//! delete pod", ...) so callers and operators can grep for it. Nothing in
//! this crate retries; retry policy belongs to whoever called us.

use thiserror::Error;

/// HTTP status returned by the API server when an object is missing
const STATUS_NOT_FOUND: u16 = 404;

/// HTTP status returned by the API server on create/update conflicts
const STATUS_CONFLICT: u16 = 409;

/// Main error type for LRP operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested identity has no corresponding object
    #[error("{0}")]
    NotFound(String),

    /// More than one object carries the identity that should select exactly one
    #[error("{0}")]
    Ambiguous(String),

    /// The object already exists, or changed underneath an update
    #[error("{context}: {source}")]
    Conflict {
        /// Operation that failed (e.g. "failed to create statefulset")
        context: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// Remote call against the cluster failed
    #[error("{context}: {source}")]
    Kube {
        /// Operation that failed (e.g. "failed to list pods")
        context: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// Hashing an identity into a name suffix failed
    #[error("failed to hash {input}: {message}")]
    Hash {
        /// Value that was being hashed
        input: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The consumer side of the metrics channel has gone away
    #[error("metrics channel closed")]
    ChannelClosed,
}

impl Error {
    /// Wrap a remote failure with the operation that produced it.
    ///
    /// A 409 from the API server becomes [`Error::Conflict`]; everything else,
    /// including 404s on named deletes, stays a [`Error::Kube`] so the caller
    /// can distinguish "the LRP is gone" from "this sub-resource is gone".
    pub fn remote(context: impl Into<String>, source: kube::Error) -> Self {
        let context = context.into();
        if status_code(&source) == Some(STATUS_CONFLICT) {
            Self::Conflict { context, source }
        } else {
            Self::Kube { context, source }
        }
    }

    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an ambiguous-identity error with the given message
    pub fn ambiguous(msg: impl Into<String>) -> Self {
        Self::Ambiguous(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error means the requested identity does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether this error is an optimistic-concurrency or already-exists conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// HTTP status code carried by an API error, if any
pub fn status_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

/// Whether a kube error is the API server saying "no such object"
pub fn is_kube_not_found(err: &kube::Error) -> bool {
    status_code(err) == Some(STATUS_NOT_FOUND)
}

/// Whether a kube error is the API server saying "already exists" or "conflict"
pub fn is_kube_conflict(err: &kube::Error) -> bool {
    status_code(err) == Some(STATUS_CONFLICT)
}
