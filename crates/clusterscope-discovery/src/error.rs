//! Error types for the discovery crate.

use std::path::PathBuf;
use std::time::Duration;

use clusterscope_core::{CoreError, SkippedItem};
use thiserror::Error;

/// Errors that can occur during discovery.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The API server denied access to a resource kind.
    #[error("access forbidden to {kind}: {message}")]
    AccessForbidden {
        /// Resource kind being listed.
        kind: String,
        /// Message from the API server.
        message: String,
    },

    /// A later page of a listing failed; the listing was cut short.
    #[error("listing {kind} stopped early: {message}")]
    TransientFetch {
        /// Resource kind being listed.
        kind: String,
        /// Why the page could not be fetched.
        message: String,
    },

    /// The primary list call of a sub-phase failed outright.
    #[error("failed to list {kind}: {message}")]
    ListFailed {
        /// Resource kind being listed.
        kind: String,
        /// Why the list call failed.
        message: String,
    },

    /// A single object could not be converted.
    #[error("failed to parse {kind} {}: {reason}", name.as_deref().unwrap_or("<unnamed>"))]
    ItemParse {
        /// Resource kind of the object.
        kind: String,
        /// Object name, when readable.
        name: Option<String>,
        /// What was wrong with the object.
        reason: String,
    },

    /// The pass did not finish before the deadline.
    #[error("discovery pass timed out after {0:?}")]
    PassTimeout(Duration),

    /// The worker running the pass died without reporting a result.
    #[error("discovery worker crashed: {0}")]
    WorkerCrash(String),

    /// Any other failure raised during a pass.
    #[error("discovery pass failed: {0}")]
    PassFailure(String),

    /// A stack dump was requested while an earlier request is still pending.
    #[error("stack dump already requested at {}", .0.display())]
    StackDumpPending(PathBuf),

    /// The stack dump marker could not be created.
    #[error("diagnostics error: {0}")]
    Diagnostics(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Kubernetes client error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// Canonical record error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Metrics registration or encoding error.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl DiscoveryError {
    /// Check if a later pass may succeed where this one failed.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::TransientFetch { .. }
                | Self::ListFailed { .. }
                | Self::PassTimeout(_)
                | Self::WorkerCrash(_)
                | Self::PassFailure(_)
                | Self::KubeApi(_)
        )
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::AccessForbidden { .. } => 403,
            Self::Config(_) | Self::ItemParse { .. } => 400,
            Self::StackDumpPending(_) => 409,
            Self::PassTimeout(_) => 504,
            Self::WorkerCrash(_)
            | Self::PassFailure(_)
            | Self::Diagnostics(_)
            | Self::Core(_)
            | Self::Metrics(_) => 500,
            Self::TransientFetch { .. } | Self::ListFailed { .. } | Self::KubeApi(_) => 503,
        }
    }

    /// Build an item-level parse error.
    pub fn item(kind: impl Into<String>, name: Option<&str>, reason: impl Into<String>) -> Self {
        Self::ItemParse {
            kind: kind.into(),
            name: name.map(str::to_string),
            reason: reason.into(),
        }
    }

    /// Short label for this kind of error, used in metrics.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::AccessForbidden { .. } => "access_forbidden",
            Self::TransientFetch { .. } => "transient_fetch",
            Self::ListFailed { .. } => "list_failed",
            Self::ItemParse { .. } => "item_parse",
            Self::PassTimeout(_) => "pass_timeout",
            Self::WorkerCrash(_) => "worker_crash",
            Self::PassFailure(_) => "pass_failure",
            Self::StackDumpPending(_) => "stack_dump_pending",
            Self::Diagnostics(_) => "diagnostics",
            Self::Config(_) => "config",
            Self::KubeApi(_) => "kube_api",
            Self::Core(_) => "core",
            Self::Metrics(_) => "metrics",
        }
    }

    /// Convert an item-level or truncation error into a skip record.
    ///
    /// Returns `None` for errors that abort a pass instead of skipping.
    #[must_use]
    pub fn to_skipped(&self) -> Option<SkippedItem> {
        match self {
            Self::ItemParse { kind, name, reason } => Some(SkippedItem {
                kind: kind.clone(),
                name: name.clone(),
                reason: reason.clone(),
            }),
            Self::TransientFetch { kind, .. } => Some(SkippedItem {
                kind: kind.clone(),
                name: None,
                reason: self.to_string(),
            }),
            _ => None,
        }
    }
}

/// A specialized Result type for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_is_not_retriable() {
        let err = DiscoveryError::AccessForbidden {
            kind: "pods".to_string(),
            message: "pods is forbidden".to_string(),
        };
        assert!(!err.is_retriable());
        assert_eq!(err.http_status_code(), 403);
    }

    #[test]
    fn pass_errors_are_retriable() {
        assert!(DiscoveryError::PassTimeout(Duration::from_secs(1)).is_retriable());
        assert!(DiscoveryError::WorkerCrash("gone".to_string()).is_retriable());
        assert_eq!(
            DiscoveryError::PassTimeout(Duration::from_secs(1)).http_status_code(),
            504
        );
    }

    #[test]
    fn kind_labels() {
        assert_eq!(
            DiscoveryError::PassTimeout(Duration::from_secs(1)).kind_label(),
            "pass_timeout"
        );
        assert_eq!(
            DiscoveryError::item("pods", None, "bad").kind_label(),
            "item_parse"
        );
    }

    #[test]
    fn item_errors_become_skips() {
        let err = DiscoveryError::item("jobs", Some("nightly"), "missing spec");
        let skipped = err.to_skipped().unwrap();
        assert_eq!(skipped.kind, "jobs");
        assert_eq!(skipped.name.as_deref(), Some("nightly"));
        assert_eq!(skipped.reason, "missing spec");
        assert_eq!(err.to_string(), "failed to parse jobs nightly: missing spec");
    }

    #[test]
    fn structural_errors_do_not_become_skips() {
        let err = DiscoveryError::ListFailed {
            kind: "pods".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.to_skipped().is_none());
    }
}
