//! Error taxonomy for mapping, rewiring and planning.

use campaign_state::{CampaignId, RepoId, StorageError};
use thiserror::Error;

/// Errors produced by the reconciliation core.
///
/// `Clone` because memoized failures are handed to every reader of a
/// request-scoped computation.
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    /// Something the planner itself expected to find is missing.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// The caller cannot see the repository a spec targets.
    #[error("repository {repo_id} is not accessible")]
    RepoNotAccessible { repo_id: RepoId },

    /// Internal consistency check failed. Indicates a bug, never retried.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// An apply was pinned to a campaign that the spec does not resolve to.
    #[error("campaign spec resolves to campaign {actual:?}, expected {expected}")]
    CampaignMismatch {
        expected: CampaignId,
        actual: Option<CampaignId>,
    },

    /// Upstream store error, propagated unchanged.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ReconcileError {
    pub fn invariant(detail: impl Into<String>) -> Self {
        ReconcileError::InvariantViolation(detail.into())
    }

    /// True for both the planner's own not-found and a store not-found.
    pub fn is_not_found(&self) -> bool {
        match self {
            ReconcileError::NotFound { .. } => true,
            ReconcileError::Storage(err) => err.is_not_found(),
            _ => false,
        }
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, ReconcileError::InvariantViolation(_))
    }
}

/// Result type for reconciliation operations.
pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;
