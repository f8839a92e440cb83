use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrudError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Record '{key}' not found in collection '{collection}'")]
    NotFound { collection: String, key: String },

    #[error("Record '{key}' already exists in collection '{collection}'")]
    DuplicateKey { collection: String, key: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, CrudError>;

impl CrudError {
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Error types that can flow through the retry executor.
///
/// The executor needs two things from the caller's error type: a way to
/// carry its own failures (`From<CrudError>`) and a way to recognise the one
/// failure kind it retries.
pub trait RetryableError: From<CrudError> {
    fn is_concurrency_conflict(&self) -> bool;
}

impl RetryableError for CrudError {
    fn is_concurrency_conflict(&self) -> bool {
        CrudError::is_concurrency_conflict(self)
    }
}

impl<T> From<std::sync::PoisonError<T>> for CrudError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for CrudError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
