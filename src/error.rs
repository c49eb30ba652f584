//! Error types for graph operations.
//!
//! Messages for [`GraphError::NotFound`] and [`GraphError::CrossOrgAccessDenied`]
//! only ever carry identifiers supplied by the caller, never data owned by
//! another org.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while building or querying the memory graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The call carried no usable org identifier.
    #[error("org id is required")]
    MissingOrg,

    /// Unknown `foreign_id` (or node) within the caller's org.
    #[error("not found: {0}")]
    NotFound(String),

    /// A read or write would have crossed an org boundary.
    #[error("cross-org access denied for org {org_id}")]
    CrossOrgAccessDenied { org_id: String },

    /// One heuristic could not process one artifact.
    #[error("heuristic {heuristic} failed on {foreign_id}: {reason}")]
    HeuristicFailure {
        heuristic: &'static str,
        foreign_id: String,
        reason: String,
    },

    /// Narrator timed out, failed, or its circuit is open.
    #[error("narrator unavailable: {0}")]
    NarratorUnavailable(String),

    /// The internal latency budget ran out.
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// `depth`, `k`, window, or query text outside the allowed bounds.
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    /// Self-loop or otherwise unstorable edge.
    #[error("invalid edge: {0}")]
    InvalidEdge(String),

    /// Embedding service failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// SQLite error
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else (worker panics, poisoned locks).
    #[error("internal error: {0}")]
    Internal(String),
}

impl GraphError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedQuery(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingOrg => "missing_org",
            Self::NotFound(_) => "not_found",
            Self::CrossOrgAccessDenied { .. } => "cross_org_access_denied",
            Self::HeuristicFailure { .. } => "heuristic_failure",
            Self::NarratorUnavailable(_) => "narrator_unavailable",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::MalformedQuery(_) => "malformed_query",
            Self::InvalidEdge(_) => "invalid_edge",
            Self::Embedding(_) => "embedding_error",
            Self::Storage(_) => "storage_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the error should be surfaced to the caller as a bad request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MissingOrg | Self::NotFound(_) | Self::MalformedQuery(_)
        )
    }
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(GraphError::not_found("ENG-1").kind(), "not_found");
        assert_eq!(GraphError::malformed("depth").kind(), "malformed_query");
        assert_eq!(
            GraphError::CrossOrgAccessDenied { org_id: "a".into() }.kind(),
            "cross_org_access_denied"
        );
    }

    #[test]
    fn cross_org_message_names_only_caller_org() {
        let err = GraphError::CrossOrgAccessDenied {
            org_id: "org-a".into(),
        };
        assert_eq!(err.to_string(), "cross-org access denied for org org-a");
    }

    #[test]
    fn client_errors() {
        assert!(GraphError::MissingOrg.is_client_error());
        assert!(GraphError::malformed("k").is_client_error());
        assert!(!GraphError::internal("boom").is_client_error());
    }
}
