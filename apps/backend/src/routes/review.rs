//! Card state endpoints used by study sessions

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use review_core::Scheduler;

use crate::error::{ApiError, Result};
use crate::models::CardState;
use crate::routes::auth::AuthenticatedUser;
use crate::routes::flashcards::card_not_found;
use crate::AppState;

/// GET /api/cards/:card_id/state
pub async fn get_state(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(card_id): Path<i64>,
) -> Result<Json<CardState>> {
    let card_state = state
        .db
        .get_card_state(auth.user_id, card_id)
        .await?
        .ok_or_else(|| card_not_found(card_id))?;

    Ok(Json(card_state))
}

/// PUT /api/cards/:card_id/state
/// 204 when stored or already stored, 409 when another write won
pub async fn put_state(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(card_id): Path<i64>,
    Json(payload): Json<CardState>,
) -> Result<StatusCode> {
    if payload.card_id != card_id {
        return Err(ApiError::BadRequest(format!(
            "path card {} does not match body card {}",
            card_id, payload.card_id
        )));
    }
    validate_state(&payload)?;

    state.db.save_card_state(auth.user_id, &payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reject states the scheduler could never have produced.
fn validate_state(state: &CardState) -> Result<()> {
    let scheduler = Scheduler::default();
    let minimum_ease = scheduler.minimum_ease;

    if !state.ease_factor.is_finite() || state.ease_factor < minimum_ease {
        return Err(ApiError::BadRequest(format!(
            "ease_factor must be at least {}",
            minimum_ease
        )));
    }

    if state.interval_days > scheduler.maximum_interval_days {
        return Err(ApiError::BadRequest(format!(
            "interval_days must be at most {}",
            scheduler.maximum_interval_days
        )));
    }

    let limit = i32::MAX as u32;
    if [
        state.repetitions,
        state.learning_step,
        state.lapses,
    ]
    .iter()
    .any(|v| *v > limit)
    {
        return Err(ApiError::BadRequest("counter out of range".to_string()));
    }

    if state.revision == 0 || state.revision > i64::MAX as u64 {
        return Err(ApiError::BadRequest("revision must be positive".to_string()));
    }

    Ok(())
}
