//! Error types for storage operations.
//!
//! [`StoreError`] is the single error type returned by every collection,
//! store, and ancestor-search method. Variants are specific enough that the
//! merge engine can tell a missing bundle from a broken disk without parsing
//! messages.

use thiserror::Error;

/// Errors returned by storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A requested bundle or resource was not found.
    #[error("not found: {message}")]
    NotFound {
        /// Human-readable description of what was missing.
        message: String,
    },

    /// A resource name cannot be stored (path separators, hidden names, ...).
    #[error("invalid resource name `{name}`: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A bundle identifier failed validation.
    #[error("invalid bundle id `{value}`: {reason}")]
    InvalidBundleId {
        /// The raw value that failed validation.
        value: String,
        /// Why validation failed.
        reason: String,
    },

    /// A write was attempted against a read-only collection.
    #[error("collection is read-only; cannot write `{name}`")]
    ReadOnly {
        /// The resource that could not be written.
        name: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A bundle manifest could not be encoded or decoded.
    #[error("manifest for bundle `{bundle}` is unreadable: {source}")]
    Manifest {
        /// The bundle whose manifest failed.
        bundle: String,
        /// The underlying serde error.
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Shorthand for a [`StoreError::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Returns `true` for [`StoreError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
