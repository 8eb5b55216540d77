//! Persistence contract for card review state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{RepositoryError, Result};
use crate::types::{CardId, CardState, DeckId, Flashcard};

/// Durable store of flashcards and their review state.
///
/// `card_id` is the unit of serialization: implementations must apply
/// [`resolve_write`] so concurrent writers never overwrite each other.
#[async_trait]
pub trait CardStateRepository: Send + Sync {
    /// All cards of the deck with `due_at <= as_of`, in no particular order.
    /// Never-reviewed cards are included with their default state.
    async fn get_due_cards(&self, deck_id: DeckId, as_of: DateTime<Utc>) -> Result<Vec<CardState>>;

    /// Flashcard content for a deck.
    async fn get_deck_flashcards(&self, deck_id: DeckId) -> Result<Vec<Flashcard>>;

    /// Current persisted state for a card.
    async fn get_card_state(&self, card_id: CardId) -> Result<CardState>;

    /// Idempotent upsert keyed by `card_id`.
    async fn save_card_state(&self, state: &CardState) -> Result<()>;
}

/// What a repository should do with an incoming state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Incoming state is the next revision; persist it.
    Apply,
    /// Incoming state is already stored; nothing to do.
    Unchanged,
}

/// Decide whether `incoming` may replace `stored`.
///
/// A missing row counts as revision 0. The next revision is applied, an exact
/// replay of the stored revision is accepted without change, and anything
/// else lost a race with another writer.
pub fn resolve_write(stored: Option<&CardState>, incoming: &CardState) -> Result<WriteOutcome> {
    let stored_revision = stored.map_or(0, |s| s.revision);

    if incoming.revision == stored_revision + 1 {
        return Ok(WriteOutcome::Apply);
    }

    match stored {
        Some(current) if current == incoming => Ok(WriteOutcome::Unchanged),
        _ => Err(RepositoryError::Conflict(incoming.card_id)),
    }
}

/// In-memory repository for tests and single-process hosts.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: Mutex<MemoryStore>,
}

#[derive(Debug, Default)]
struct MemoryStore {
    flashcards: HashMap<CardId, Flashcard>,
    states: HashMap<CardId, CardState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a flashcard.
    pub fn insert_flashcard(&self, flashcard: Flashcard) {
        self.lock().flashcards.insert(flashcard.id, flashcard);
    }

    /// Remove a flashcard together with its state.
    pub fn remove_flashcard(&self, card_id: CardId) -> Option<Flashcard> {
        let mut store = self.lock();
        store.states.remove(&card_id);
        store.flashcards.remove(&card_id)
    }

    /// Overwrite a state without revision checks.
    pub fn put_state(&self, state: CardState) {
        self.lock().states.insert(state.card_id, state);
    }

    /// Stored state, if the card has ever been saved.
    pub fn stored_state(&self, card_id: CardId) -> Option<CardState> {
        self.lock().states.get(&card_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStore> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MemoryStore {
    fn current_state(&self, card_id: CardId) -> Option<CardState> {
        let flashcard = self.flashcards.get(&card_id)?;
        Some(
            self.states
                .get(&card_id)
                .cloned()
                .unwrap_or_else(|| CardState::new(card_id, flashcard.created_at)),
        )
    }
}

#[async_trait]
impl CardStateRepository for MemoryRepository {
    async fn get_due_cards(&self, deck_id: DeckId, as_of: DateTime<Utc>) -> Result<Vec<CardState>> {
        let store = self.lock();
        Ok(store
            .flashcards
            .values()
            .filter(|f| f.deck_id == deck_id)
            .filter_map(|f| store.current_state(f.id))
            .filter(|s| s.is_due(as_of))
            .collect())
    }

    async fn get_deck_flashcards(&self, deck_id: DeckId) -> Result<Vec<Flashcard>> {
        let store = self.lock();
        let mut cards: Vec<Flashcard> = store
            .flashcards
            .values()
            .filter(|f| f.deck_id == deck_id)
            .cloned()
            .collect();
        cards.sort_by_key(|f| f.id);
        Ok(cards)
    }

    async fn get_card_state(&self, card_id: CardId) -> Result<CardState> {
        self.lock()
            .current_state(card_id)
            .ok_or(RepositoryError::NotFound(card_id))
    }

    async fn save_card_state(&self, state: &CardState) -> Result<()> {
        let mut store = self.lock();
        if !store.flashcards.contains_key(&state.card_id) {
            return Err(RepositoryError::NotFound(state.card_id));
        }

        match resolve_write(store.states.get(&state.card_id), state)? {
            WriteOutcome::Apply => {
                store.states.insert(state.card_id, state.clone());
            }
            WriteOutcome::Unchanged => {}
        }
        Ok(())
    }
}
