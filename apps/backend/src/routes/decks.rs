//! Deck endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::models::*;
use crate::routes::auth::AuthenticatedUser;
use crate::AppState;

pub(crate) const MAX_TITLE_CHARS: usize = 255;
pub(crate) const MAX_DESCRIPTION_CHARS: usize = 500;

/// GET /api/decks
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<DeckListResponse>> {
    let decks = state.db.list_decks(auth.user_id, Utc::now()).await?;
    Ok(Json(DeckListResponse { decks }))
}

/// POST /api/decks
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateDeckRequest>,
) -> Result<(StatusCode, Json<Deck>)> {
    let title = required_text("title", &payload.title, MAX_TITLE_CHARS)?;
    if let Some(description) = payload.description.as_deref() {
        max_chars("description", description, MAX_DESCRIPTION_CHARS)?;
    }
    let deck = state
        .db
        .create_deck(auth.user_id, title, payload.description.as_deref())
        .await?;

    tracing::info!(deck_id = deck.id, "created deck");
    Ok((StatusCode::CREATED, Json(deck.to_core())))
}

/// GET /api/decks/:deck_id
pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(deck_id): Path<i64>,
) -> Result<Json<DeckDetailResponse>> {
    let deck = owned_deck(&state, auth.user_id, deck_id).await?;
    let flashcards = state.db.get_deck_flashcards(deck_id).await?;

    Ok(Json(DeckDetailResponse {
        deck: deck.to_core(),
        flashcards: flashcards.iter().map(DbFlashcard::to_core).collect(),
    }))
}

/// PUT /api/decks/:deck_id
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(deck_id): Path<i64>,
    Json(payload): Json<UpdateDeckRequest>,
) -> Result<Json<Deck>> {
    let title = payload
        .title
        .as_deref()
        .map(|t| required_text("title", t, MAX_TITLE_CHARS))
        .transpose()?;
    if let Some(description) = payload.description.as_deref() {
        max_chars("description", description, MAX_DESCRIPTION_CHARS)?;
    }

    let deck = state
        .db
        .update_deck(auth.user_id, deck_id, title, payload.description.as_deref())
        .await?
        .ok_or_else(|| deck_not_found(deck_id))?;

    Ok(Json(deck.to_core()))
}

/// DELETE /api/decks/:deck_id
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(deck_id): Path<i64>,
) -> Result<StatusCode> {
    if !state.db.delete_deck(auth.user_id, deck_id).await? {
        return Err(deck_not_found(deck_id));
    }

    tracing::info!(deck_id, "deleted deck");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/decks/:deck_id/flashcards
pub async fn flashcards(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(deck_id): Path<i64>,
) -> Result<Json<FlashcardListResponse>> {
    owned_deck(&state, auth.user_id, deck_id).await?;
    let flashcards = state.db.get_deck_flashcards(deck_id).await?;

    Ok(Json(FlashcardListResponse {
        flashcards: flashcards.iter().map(DbFlashcard::to_core).collect(),
    }))
}

/// GET /api/decks/:deck_id/due?as_of=
pub async fn due(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(deck_id): Path<i64>,
    Query(query): Query<DueCardsQuery>,
) -> Result<Json<DueCardsResponse>> {
    owned_deck(&state, auth.user_id, deck_id).await?;

    let as_of = query.as_of.unwrap_or_else(Utc::now);
    let cards = state.db.get_due_cards(auth.user_id, deck_id, as_of).await?;

    Ok(Json(DueCardsResponse { cards }))
}

pub(crate) async fn owned_deck(state: &AppState, user_id: Uuid, deck_id: i64) -> Result<DbDeck> {
    state
        .db
        .get_deck(user_id, deck_id)
        .await?
        .ok_or_else(|| deck_not_found(deck_id))
}

fn deck_not_found(deck_id: i64) -> ApiError {
    ApiError::NotFound(format!("deck {}", deck_id))
}

/// Trimmed text that must not be empty or longer than `max` characters.
pub(crate) fn required_text<'a>(field: &str, value: &'a str, max: usize) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
    }
    max_chars(field, trimmed, max)?;
    Ok(trimmed)
}

pub(crate) fn max_chars(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(ApiError::BadRequest(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_text_trims() {
        assert_eq!(required_text("title", "  Rust  ", 10).unwrap(), "Rust");
    }

    #[test]
    fn required_text_rejects_blank() {
        let err = required_text("front", "   ", 10).unwrap_err();
        assert_eq!(err.to_string(), "Bad request: front must not be empty");
    }

    #[test]
    fn length_limit_counts_characters() {
        let title = "é".repeat(MAX_TITLE_CHARS);
        assert!(required_text("title", &title, MAX_TITLE_CHARS).is_ok());

        let err = required_text("title", &format!("{}x", title), MAX_TITLE_CHARS).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Bad request: title must be at most 255 characters"
        );
        assert!(max_chars("description", &"d".repeat(501), MAX_DESCRIPTION_CHARS).is_err());
    }
}
