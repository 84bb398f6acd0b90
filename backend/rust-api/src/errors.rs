use thiserror::Error;

/// Failures reported by the durable store, the answer cache and the question catalog.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed record: {0}")]
    Malformed(String),
}

/// Errors surfaced by the lesson attempt service.
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] validator::ValidationErrors),

    #[error("Page attempts not found for lesson attempt {0}")]
    PageAttemptsNotFound(i64),

    #[error("Page attempt {0} not found")]
    PageAttemptNotFound(i64),

    #[error("Page attempt {page_attempt_id} does not belong to page {page_id}")]
    PageMismatch { page_attempt_id: i64, page_id: i64 },

    #[error("Answer not found for page {0}")]
    AnswerNotFound(i64),

    #[error("Lesson attempt {0} not found")]
    LessonAttemptNotFound(i64),

    #[error("Permission denied for lesson attempt {0}")]
    PermissionDenied(i64),

    #[error("An open attempt for this lesson already exists")]
    AttemptConflict,

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Cache sync failed: {0}")]
    CacheSync(#[source] StoreError),

    #[error("Store failure: {0}")]
    Store(#[source] StoreError),

    #[error("Deadline exceeded")]
    Timeout,
}

impl From<StoreError> for AttemptError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(_) => AttemptError::AttemptConflict,
            StoreError::Transaction(message) => AttemptError::Transaction(message),
            other => AttemptError::Store(other),
        }
    }
}
