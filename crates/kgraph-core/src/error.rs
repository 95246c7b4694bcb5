//! Error types for the service facade.

use kgraph_index::IndexError;

use crate::queue::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The graph store cannot be reached. Retryable by the caller.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The request cannot be processed as given.
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("task queue error: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Index(IndexError),
}

impl ServiceError {
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<IndexError> for ServiceError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Unavailable(msg) => Self::Unavailable(msg),
            IndexError::InvalidWorkspace(_) => Self::Invalid(err.to_string()),
            other => Self::Index(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
