//! Error types for kgraph-index.

/// Errors that can occur while syncing or querying the code graph.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error on the workspace mirror.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Graph store query error.
    #[error("database error: {0}")]
    Sqlite(sqlx::Error),

    /// Schema migration failure.
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// The graph store cannot be reached. Retryable by the caller.
    #[error("graph store unavailable: {0}")]
    Unavailable(String),

    /// LLM provider error (embedding).
    #[error("LLM error: {0}")]
    Llm(#[from] kgraph_llm::LlmError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A vector does not match the dimensionality of its index.
    #[error("vector index {index} has {expected} dimensions, got {actual}")]
    DimensionMismatch {
        index: String,
        expected: usize,
        actual: usize,
    },

    /// No function in the requested scope carries an embedding.
    #[error("no functions with embeddings found in scope {scope:?}")]
    NoEmbeddings { scope: Option<String> },

    /// Workspace identifier that cannot be used as a mirror directory.
    #[error("invalid workspace id: {0:?}")]
    InvalidWorkspace(String),

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),

    /// Background task failure.
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// Whether the failure means the graph store is unreachable.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for IndexError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_) => Self::Unavailable(err.to_string()),
            // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN
            sqlx::Error::Database(ref db)
                if db
                    .code()
                    .is_some_and(|c| matches!(c.as_ref(), "5" | "6" | "14")) =>
            {
                Self::Unavailable(err.to_string())
            }
            other => Self::Sqlite(other),
        }
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
