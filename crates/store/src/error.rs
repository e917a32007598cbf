use common::EventId;
use thiserror::Error;

/// Errors that can occur when interacting with the row store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A compare-and-swap write lost against a concurrent writer.
    /// The expected version did not match the stored version.
    #[error("version conflict on {entity} {id}: expected version {expected}, found {actual}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: common::Version,
        actual: common::Version,
    },

    /// A compare-and-swap write targeted a row that does not exist.
    #[error("{entity} {id} not found")]
    RowMissing { entity: &'static str, id: String },

    /// An insert expected the row to be absent, but it already exists.
    #[error("{entity} {id} already exists")]
    DuplicateRow { entity: &'static str, id: String },

    /// An event id collided with one already recorded (outbox insert or
    /// processed-event marker). For the processed-event ledger this is the
    /// signal that a concurrent duplicate delivery already won.
    #[error("duplicate event {0}")]
    DuplicateEvent(EventId),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True for errors a caller can clear by re-reading and retrying the
    /// whole read-validate-write sequence.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
