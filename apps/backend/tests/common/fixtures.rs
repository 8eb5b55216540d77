//! Test fixtures and factory functions for request bodies.

use chrono::{DateTime, Utc};
use serde_json::json;

use review_core::{schedule, CardState, Grade};

/// Create a register request body.
pub fn register_request(name: Option<&str>) -> serde_json::Value {
    match name {
        Some(n) => json!({ "name": n }),
        None => json!({}),
    }
}

/// Create a deck request body.
pub fn create_deck_request(title: &str, description: Option<&str>) -> serde_json::Value {
    json!({ "title": title, "description": description })
}

/// Create a flashcard request body.
pub fn create_flashcard_request(deck_id: i64, front: &str, back: &str) -> serde_json::Value {
    json!({ "deck_id": deck_id, "front": front, "back": back })
}

/// State after grading a never-reviewed card created at `created_at`.
pub fn graded_state(
    card_id: i64,
    created_at: DateTime<Utc>,
    grade: Grade,
    now: DateTime<Utc>,
) -> CardState {
    schedule(&CardState::new(card_id, created_at), grade, now)
}
