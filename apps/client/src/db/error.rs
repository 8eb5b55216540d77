//! Database error types.

use review_core::RepositoryError;
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("card not found: {0}")]
    CardNotFound(i64),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl From<DbError> for RepositoryError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::CardNotFound(card_id) => Self::NotFound(card_id),
            DbError::Sqlite(e) if is_busy(&e) => Self::Transient(format!("sqlite error: {}", e)),
            other => Self::Rejected {
                status: 500,
                message: other.to_string(),
            },
        }
    }
}

/// Lock contention from another connection to the same file.
fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}
