use thiserror::Error;

/// Failures of the chain-facing market reader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Chain unavailable: {0}")]
    Unavailable(String),

    #[error("Block {0} not found")]
    BlockNotFound(u64),
}

/// Failures of the snapshot store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("No snapshot stored for block {0}")]
    NotFound(u64),

    #[error("Stored row could not be decoded: {0}")]
    Decode(String),
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        // The driver's own message is only a category ("db error"); the cause is the source.
        if let Some(db) = e.as_db_error() {
            return StoreError::Unavailable(format!("{} (SQLSTATE {})", db, db.code().code()));
        }
        match std::error::Error::source(&e) {
            Some(source) => StoreError::Unavailable(format!("{}: {}", e, source)),
            None => StoreError::Unavailable(e.to_string()),
        }
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Failure of a single read -> transform -> store pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors that may succeed when the same operation is attempted again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ChainError {
    fn is_retryable(&self) -> bool {
        // A missing head block is usually provider propagation lag.
        true
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Chain(e) => e.is_retryable(),
            PipelineError::Store(e) => e.is_retryable(),
        }
    }
}
