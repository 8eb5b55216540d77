//! Core types for the review engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Flashcard identifier, stable for the card's lifetime.
pub type CardId = i64;

/// Deck identifier.
pub type DeckId = i64;

/// Self-reported recall quality for a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Forgot,
    Hard,
    Good,
    Easy,
}

impl Grade {
    /// Convert to 4-point numeric value (1-4).
    pub fn to_value(self) -> u8 {
        match self {
            Self::Forgot => 1,
            Self::Hard => 2,
            Self::Good => 3,
            Self::Easy => 4,
        }
    }

    /// Create from 4-point numeric value.
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Forgot),
            2 => Some(Self::Hard),
            3 => Some(Self::Good),
            4 => Some(Self::Easy),
            _ => None,
        }
    }

    /// Map a 3-button answer (1-3) to a grade.
    /// Forgot (1) -> Forgot, Easy (2) -> Good, Very easy (3) -> Easy
    pub fn from_3point(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Forgot),
            2 => Some(Self::Good),
            3 => Some(Self::Easy),
            _ => None,
        }
    }

    /// Interpret a numeric button value under the given scale.
    pub fn from_scale(value: u8, scale: GradeScale) -> Option<Self> {
        match scale {
            GradeScale::FourPoint => Self::from_value(value),
            GradeScale::ThreePoint => Self::from_3point(value),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forgot => "forgot",
            Self::Hard => "hard",
            Self::Good => "good",
            Self::Easy => "easy",
        }
    }
}

/// Number of grading buttons the UI exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradeScale {
    #[serde(rename = "4point")]
    FourPoint,
    #[serde(rename = "3point")]
    ThreePoint,
}

impl Default for GradeScale {
    fn default() -> Self {
        Self::FourPoint
    }
}

/// Per-card memory model, one per (user, flashcard).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardState {
    pub card_id: CardId,
    pub ease_factor: f64,
    pub interval_days: u32,
    /// Consecutive successful reviews; 0 while learning.
    pub repetitions: u32,
    /// Learning steps completed while `repetitions == 0`.
    #[serde(default)]
    pub learning_step: u32,
    pub lapses: u32,
    pub due_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_reviewed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token. 0 until the first save.
    #[serde(default)]
    pub revision: u64,
}

impl CardState {
    /// Initial ease factor for a never-reviewed card.
    pub const INITIAL_EASE: f64 = 2.5;

    /// Never-reviewed state, due as soon as the card exists.
    pub fn new(card_id: CardId, created_at: DateTime<Utc>) -> Self {
        Self {
            card_id,
            ease_factor: Self::INITIAL_EASE,
            interval_days: 0,
            repetitions: 0,
            learning_step: 0,
            lapses: 0,
            due_at: created_at,
            last_reviewed_at: None,
            revision: 0,
        }
    }

    pub fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        self.due_at <= as_of
    }

    pub fn is_new(&self) -> bool {
        self.last_reviewed_at.is_none()
    }

    pub fn is_learning(&self) -> bool {
        self.repetitions == 0
    }
}

/// Flashcard content shown during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub id: CardId,
    pub deck_id: DeckId,
    pub front: String,
    pub back: String,
    pub created_at: DateTime<Utc>,
}

/// Deck of flashcards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deck {
    pub id: DeckId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
