use thiserror::Error;

use tierflow_core::{ItemId, WorkflowError};
use tierflow_db::RepositoryError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("item `{id}` was modified concurrently; retry against fresh state")]
    ConcurrentModification { id: ItemId },
    #[error("item `{id}` is not eligible for batch actions")]
    BatchNotAllowed { id: ItemId },
    #[error("item `{id}` not found")]
    NotFound { id: ItemId },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl EngineError {
    /// Stable machine-readable code; callers map these to distinct guidance
    /// (wrong approver vs already closed vs retry).
    pub fn code(&self) -> &'static str {
        match self {
            Self::Workflow(WorkflowError::NoMatchingRule { .. }) => "no_matching_rule",
            Self::Workflow(WorkflowError::Unauthorized { .. }) => "unauthorized",
            Self::Workflow(WorkflowError::InvalidTransition { .. }) => "invalid_transition",
            Self::Workflow(WorkflowError::UnknownRole { .. }) => "unknown_role",
            Self::Workflow(WorkflowError::NegativeAmount { .. }) => "negative_amount",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::BatchNotAllowed { .. } => "batch_not_allowed",
            Self::NotFound { .. } => "not_found",
            Self::Persistence(_) => "persistence",
        }
    }

    /// Whether the caller should simply retry against fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    pub(crate) fn from_repository(error: RepositoryError) -> Self {
        match error {
            RepositoryError::VersionConflict { id } => {
                Self::ConcurrentModification { id: ItemId(id) }
            }
            RepositoryError::NotFound { id } => Self::NotFound { id: ItemId(id) },
            other => Self::Persistence(other.to_string()),
        }
    }
}
