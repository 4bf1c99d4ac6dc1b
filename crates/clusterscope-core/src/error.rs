//! Common error types for clusterscope.
//!
//! This module provides errors raised while building canonical records,
//! shared by the discovery crate and downstream consumers.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while building canonical records.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An invalid service key was provided.
    #[error("invalid service key: {0}")]
    InvalidKey(#[from] crate::keys::KeyError),

    /// A package-manager release payload could not be decoded.
    #[error("release decode error: {0}")]
    ReleaseDecode(String),

    /// A required field was missing from a raw object.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}
