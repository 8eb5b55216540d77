//! Error types for review-core.

use thiserror::Error;

use crate::types::{CardId, Grade};

/// Errors reported by a card state repository.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("card {0} not found")]
    NotFound(CardId),

    #[error("card {0} was updated concurrently")]
    Conflict(CardId),

    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl RepositoryError {
    /// Whether the same request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors surfaced by a study session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error("card {card_id} changed elsewhere; grade it again")]
    Conflict { card_id: CardId },

    #[error("couldn't save {} for card {card_id}: {source}", .grade.as_str())]
    SaveFailed {
        card_id: CardId,
        grade: Grade,
        #[source]
        source: RepositoryError,
    },

    #[error("no pending grade to retry")]
    NothingToRetry,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result type alias using RepositoryError.
pub type Result<T> = std::result::Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(RepositoryError::Transient("timeout".to_string()).is_retryable());
        assert!(!RepositoryError::NotFound(1).is_retryable());
        assert!(!RepositoryError::Conflict(1).is_retryable());
        assert!(!RepositoryError::Rejected {
            status: 401,
            message: "no token".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn save_failed_display_names_grade() {
        let error = SessionError::SaveFailed {
            card_id: 3,
            grade: Grade::Hard,
            source: RepositoryError::Transient("connection reset".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "couldn't save hard for card 3: transient storage failure: connection reset"
        );
    }
}
