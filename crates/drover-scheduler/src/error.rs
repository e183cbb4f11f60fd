//! Scheduler error types.

use drover_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The repository owner or caller lacks the required permission.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    LimitExceeded(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The build is in a status the requested transition does not accept.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("compile error: {0}")]
    Compile(String),

    #[error("{context}: {source}")]
    Db {
        context: String,
        #[source]
        source: DbError,
    },

    #[error(transparent)]
    Core(#[from] drover_core::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn is_not_found(&self) -> bool {
        match self {
            SchedulerError::NotFound(_) => true,
            SchedulerError::Db { source, .. } => source.is_not_found(),
            SchedulerError::Core(err) => err.is_not_found(),
            _ => false,
        }
    }

    /// Caller errors fail immediately; everything else may be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SchedulerError::Unauthorized(_)
                | SchedulerError::InvalidInput(_)
                | SchedulerError::LimitExceeded(_)
        )
    }
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// Attach context to row store failures.
pub trait DbContext<T> {
    fn context(self, context: impl FnOnce() -> String) -> SchedulerResult<T>;
}

impl<T> DbContext<T> for Result<T, DbError> {
    fn context(self, context: impl FnOnce() -> String) -> SchedulerResult<T> {
        self.map_err(|source| SchedulerError::Db {
            context: context(),
            source,
        })
    }
}
