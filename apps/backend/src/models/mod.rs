//! Database models and API types

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// Re-export shared types from review-core
pub use review_core::types::{CardId, CardState, Deck, DeckId, Flashcard};

/// Fractional second digits PostgreSQL keeps for TIMESTAMPTZ.
const TIMESTAMP_PRECISION: u16 = 6;

// === Database Entity Types ===

/// Registered user
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub token: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Deck stored in PostgreSQL
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbDeck {
    pub id: i64,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbDeck {
    pub fn to_core(&self) -> Deck {
        Deck {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
        }
    }
}

/// Flashcard stored in PostgreSQL
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbFlashcard {
    pub id: i64,
    pub deck_id: i64,
    pub front: String,
    pub back: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbFlashcard {
    pub fn to_core(&self) -> Flashcard {
        Flashcard {
            id: self.id,
            deck_id: self.deck_id,
            front: self.front.clone(),
            back: self.back.clone(),
            created_at: self.created_at,
        }
    }
}

/// Card state row, or the synthesized default for a never-reviewed card
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbCardState {
    pub card_id: i64,
    pub ease_factor: f64,
    pub interval_days: i32,
    pub repetitions: i32,
    pub learning_step: i32,
    pub lapses: i32,
    pub due_at: DateTime<Utc>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub revision: i64,
}

impl DbCardState {
    /// Create from review-core CardState
    pub fn from_core(state: &CardState) -> Self {
        let state = normalize_precision(state);
        Self {
            card_id: state.card_id,
            ease_factor: state.ease_factor,
            interval_days: state.interval_days as i32,
            repetitions: state.repetitions as i32,
            learning_step: state.learning_step as i32,
            lapses: state.lapses as i32,
            due_at: state.due_at,
            last_reviewed_at: state.last_reviewed_at,
            revision: state.revision as i64,
        }
    }

    /// Convert to review-core CardState
    pub fn to_core(&self) -> CardState {
        CardState {
            card_id: self.card_id,
            ease_factor: self.ease_factor,
            interval_days: self.interval_days.max(0) as u32,
            repetitions: self.repetitions.max(0) as u32,
            learning_step: self.learning_step.max(0) as u32,
            lapses: self.lapses.max(0) as u32,
            due_at: self.due_at,
            last_reviewed_at: self.last_reviewed_at,
            revision: self.revision.max(0) as u64,
        }
    }
}

/// Truncate timestamps to what the database stores, so a replayed state
/// compares equal to the stored one.
pub fn normalize_precision(state: &CardState) -> CardState {
    CardState {
        due_at: state.due_at.trunc_subsecs(TIMESTAMP_PRECISION),
        last_reviewed_at: state
            .last_reviewed_at
            .map(|at| at.trunc_subsecs(TIMESTAMP_PRECISION)),
        ..state.clone()
    }
}

/// Deck with card counts
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeckSummary {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub card_count: i64,
    pub due_count: i64,
}

// === API Request/Response Types ===

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct UserStatsResponse {
    pub total_decks: i64,
    pub total_cards: i64,
    pub total_cards_studied: i64,
    pub total_lapses: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateDeckRequest {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateDeckRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeckListResponse {
    pub decks: Vec<DeckSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeckDetailResponse {
    #[serde(flatten)]
    pub deck: Deck,
    pub flashcards: Vec<Flashcard>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FlashcardListResponse {
    pub flashcards: Vec<Flashcard>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateFlashcardRequest {
    pub deck_id: i64,
    pub front: String,
    pub back: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateFlashcardRequest {
    pub front: Option<String>,
    pub back: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DueCardsQuery {
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DueCardsResponse {
    pub cards: Vec<CardState>,
}
