//! Selects and orders the cards for a study session.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::repository::CardStateRepository;
use crate::session::{QueuedCard, StudySession};
use crate::types::{CardState, DeckId};

/// Builds study sessions from a repository's due set.
pub struct SessionPlanner<R: ?Sized> {
    repository: Arc<R>,
    config: SessionConfig,
}

impl<R: CardStateRepository + ?Sized> SessionPlanner<R> {
    pub fn new(repository: Arc<R>, config: SessionConfig) -> Self {
        Self { repository, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Plan a session for `deck_id` with the cards due at `now`.
    ///
    /// An empty queue is a normal result, not an error.
    pub async fn plan_session(&self, deck_id: DeckId, now: DateTime<Utc>) -> Result<StudySession> {
        let due = self.repository.get_due_cards(deck_id, now).await?;
        let total_due = due.len();
        let ordered = order_due_cards(due, now, self.config.max_cards_per_session);

        if ordered.is_empty() {
            tracing::debug!(deck_id, "no cards due");
            return Ok(StudySession::new(deck_id, now, Vec::new()));
        }

        let mut flashcards: HashMap<_, _> = self
            .repository
            .get_deck_flashcards(deck_id)
            .await?
            .into_iter()
            .map(|f| (f.id, f))
            .collect();

        let cards: Vec<QueuedCard> = ordered
            .into_iter()
            .filter_map(|state| {
                let flashcard = flashcards.remove(&state.card_id);
                if flashcard.is_none() {
                    tracing::debug!(card_id = state.card_id, "due card has no flashcard, skipping");
                }
                flashcard.map(|flashcard| QueuedCard { flashcard, state })
            })
            .collect();

        tracing::info!(
            deck_id,
            queued = cards.len(),
            due = total_due,
            "planned study session"
        );

        Ok(StudySession::new(deck_id, now, cards))
    }
}

/// Most overdue first, ties by card id, capped at `max_cards`.
pub fn order_due_cards(
    mut states: Vec<CardState>,
    as_of: DateTime<Utc>,
    max_cards: usize,
) -> Vec<CardState> {
    states.retain(|s| s.is_due(as_of));
    states.sort_by(|a, b| a.due_at.cmp(&b.due_at).then(a.card_id.cmp(&b.card_id)));
    states.truncate(max_cards);
    states
}
