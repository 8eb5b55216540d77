//! Flashcard endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};

use crate::error::{ApiError, Result};
use crate::models::*;
use crate::routes::auth::AuthenticatedUser;
use crate::routes::decks::{owned_deck, required_text};
use crate::AppState;

pub(crate) const MAX_FRONT_CHARS: usize = 500;
pub(crate) const MAX_BACK_CHARS: usize = 1000;

/// POST /api/flashcards
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateFlashcardRequest>,
) -> Result<(StatusCode, Json<Flashcard>)> {
    let front = required_text("front", &payload.front, MAX_FRONT_CHARS)?;
    let back = required_text("back", &payload.back, MAX_BACK_CHARS)?;
    owned_deck(&state, auth.user_id, payload.deck_id).await?;

    let card = state
        .db
        .create_flashcard(payload.deck_id, front, back)
        .await?;

    tracing::info!(card_id = card.id, deck_id = card.deck_id, "created flashcard");
    Ok((StatusCode::CREATED, Json(card.to_core())))
}

/// GET /api/flashcards/:card_id
pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(card_id): Path<i64>,
) -> Result<Json<Flashcard>> {
    let card = state
        .db
        .get_flashcard(auth.user_id, card_id)
        .await?
        .ok_or_else(|| card_not_found(card_id))?;

    Ok(Json(card.to_core()))
}

/// PUT /api/flashcards/:card_id
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(card_id): Path<i64>,
    Json(payload): Json<UpdateFlashcardRequest>,
) -> Result<Json<Flashcard>> {
    let front = payload
        .front
        .as_deref()
        .map(|f| required_text("front", f, MAX_FRONT_CHARS))
        .transpose()?;
    let back = payload
        .back
        .as_deref()
        .map(|b| required_text("back", b, MAX_BACK_CHARS))
        .transpose()?;

    let card = state
        .db
        .update_flashcard(auth.user_id, card_id, front, back)
        .await?
        .ok_or_else(|| card_not_found(card_id))?;

    Ok(Json(card.to_core()))
}

/// DELETE /api/flashcards/:card_id
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(card_id): Path<i64>,
) -> Result<StatusCode> {
    if !state.db.delete_flashcard(auth.user_id, card_id).await? {
        return Err(card_not_found(card_id));
    }

    tracing::info!(card_id, "deleted flashcard");
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) fn card_not_found(card_id: i64) -> ApiError {
    ApiError::NotFound(format!("card {}", card_id))
}
