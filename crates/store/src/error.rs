use thiserror::Error;

/// Errors raised by the source and read stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The outbox payload could not be built.
    #[error("Event encoding error: {0}")]
    Event(#[from] events::DecodeError),

    /// A stored value does not fit the domain type.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// The store refused the operation (injected outage in tests).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Errors that may succeed when the same call is repeated later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Unavailable(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
