//! PostgreSQL database operations

use chrono::{DateTime, Utc};
use review_core::{resolve_write, RepositoryError, WriteOutcome};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::models::*;

/// Card state columns with never-reviewed defaults. Expects `f` (flashcards),
/// `cs` (card_states) and the initial ease bound as `$1`.
const CARD_STATE_COLUMNS: &str = r#"
    f.id AS card_id,
    COALESCE(cs.ease_factor, $1) AS ease_factor,
    COALESCE(cs.interval_days, 0) AS interval_days,
    COALESCE(cs.repetitions, 0) AS repetitions,
    COALESCE(cs.learning_step, 0) AS learning_step,
    COALESCE(cs.lapses, 0) AS lapses,
    COALESCE(cs.due_at, f.created_at) AS due_at,
    cs.last_reviewed_at,
    COALESCE(cs.revision, 0) AS revision
"#;

/// Database wrapper with connection pool
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL and create connection pool
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ApiError::Migration(e.to_string()))?;
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // === User Repository ===

    /// Create a new user with generated token
    pub async fn create_user(&self, name: Option<&str>) -> Result<User> {
        let token = Uuid::new_v4().to_string();
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (token, name)
            VALUES ($1, $2)
            RETURNING id, token, name, created_at, last_seen_at
            "#,
        )
        .bind(&token)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    /// Get user by token
    pub async fn get_user_by_token(&self, token: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, token, name, created_at, last_seen_at
            FROM users
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Update user last_seen_at timestamp
    pub async fn update_last_seen(&self, user_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET last_seen_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Aggregate study statistics for a user
    pub async fn get_user_stats(&self, user_id: Uuid) -> Result<UserStatsResponse> {
        let stats = sqlx::query_as::<_, UserStatsResponse>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM decks WHERE user_id = $1) AS total_decks,
                COUNT(f.id) AS total_cards,
                COUNT(cs.card_id) FILTER (WHERE cs.last_reviewed_at IS NOT NULL) AS total_cards_studied,
                COALESCE(SUM(cs.lapses), 0)::BIGINT AS total_lapses
            FROM flashcards f
            JOIN decks d ON d.id = f.deck_id
            LEFT JOIN card_states cs ON cs.card_id = f.id
            WHERE d.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    // === Deck Repository ===

    /// List a user's decks with card and due counts
    pub async fn list_decks(&self, user_id: Uuid, as_of: DateTime<Utc>) -> Result<Vec<DeckSummary>> {
        let decks = sqlx::query_as::<_, DeckSummary>(
            r#"
            SELECT d.id, d.title, d.description, d.created_at,
                   COUNT(f.id) AS card_count,
                   COUNT(f.id) FILTER (WHERE COALESCE(cs.due_at, f.created_at) <= $2) AS due_count
            FROM decks d
            LEFT JOIN flashcards f ON f.deck_id = d.id
            LEFT JOIN card_states cs ON cs.card_id = f.id
            WHERE d.user_id = $1
            GROUP BY d.id
            ORDER BY d.created_at, d.id
            "#,
        )
        .bind(user_id)
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        Ok(decks)
    }

    pub async fn create_deck(
        &self,
        user_id: Uuid,
        title: &str,
        description: Option<&str>,
    ) -> Result<DbDeck> {
        let deck = sqlx::query_as::<_, DbDeck>(
            r#"
            INSERT INTO decks (user_id, title, description)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, title, description, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(title)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;

        Ok(deck)
    }

    /// Get deck by ID, scoped to its owner
    pub async fn get_deck(&self, user_id: Uuid, deck_id: i64) -> Result<Option<DbDeck>> {
        let deck = sqlx::query_as::<_, DbDeck>(
            r#"
            SELECT id, user_id, title, description, created_at, updated_at
            FROM decks
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(deck_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deck)
    }

    /// Partially update a deck; `None` fields keep their value
    pub async fn update_deck(
        &self,
        user_id: Uuid,
        deck_id: i64,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<DbDeck>> {
        let deck = sqlx::query_as::<_, DbDeck>(
            r#"
            UPDATE decks
            SET title = COALESCE($3, title),
                description = COALESCE($4, description),
                updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING id, user_id, title, description, created_at, updated_at
            "#,
        )
        .bind(deck_id)
        .bind(user_id)
        .bind(title)
        .bind(description)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deck)
    }

    /// Delete a deck with its flashcards and their states
    pub async fn delete_deck(&self, user_id: Uuid, deck_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM decks WHERE id = $1 AND user_id = $2")
            .bind(deck_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // === Flashcard Repository ===

    pub async fn get_deck_flashcards(&self, deck_id: i64) -> Result<Vec<DbFlashcard>> {
        let cards = sqlx::query_as::<_, DbFlashcard>(
            r#"
            SELECT id, deck_id, front, back, created_at, updated_at
            FROM flashcards
            WHERE deck_id = $1
            ORDER BY id
            "#,
        )
        .bind(deck_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(cards)
    }

    pub async fn create_flashcard(&self, deck_id: i64, front: &str, back: &str) -> Result<DbFlashcard> {
        let card = sqlx::query_as::<_, DbFlashcard>(
            r#"
            INSERT INTO flashcards (deck_id, front, back)
            VALUES ($1, $2, $3)
            RETURNING id, deck_id, front, back, created_at, updated_at
            "#,
        )
        .bind(deck_id)
        .bind(front)
        .bind(back)
        .fetch_one(&self.pool)
        .await?;

        Ok(card)
    }

    /// Get flashcard by ID, scoped to the owner of its deck
    pub async fn get_flashcard(&self, user_id: Uuid, card_id: i64) -> Result<Option<DbFlashcard>> {
        let card = sqlx::query_as::<_, DbFlashcard>(
            r#"
            SELECT f.id, f.deck_id, f.front, f.back, f.created_at, f.updated_at
            FROM flashcards f
            JOIN decks d ON d.id = f.deck_id
            WHERE f.id = $1 AND d.user_id = $2
            "#,
        )
        .bind(card_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(card)
    }

    pub async fn update_flashcard(
        &self,
        user_id: Uuid,
        card_id: i64,
        front: Option<&str>,
        back: Option<&str>,
    ) -> Result<Option<DbFlashcard>> {
        let card = sqlx::query_as::<_, DbFlashcard>(
            r#"
            UPDATE flashcards f
            SET front = COALESCE($3, f.front),
                back = COALESCE($4, f.back),
                updated_at = NOW()
            FROM decks d
            WHERE f.id = $1 AND d.id = f.deck_id AND d.user_id = $2
            RETURNING f.id, f.deck_id, f.front, f.back, f.created_at, f.updated_at
            "#,
        )
        .bind(card_id)
        .bind(user_id)
        .bind(front)
        .bind(back)
        .fetch_optional(&self.pool)
        .await?;

        Ok(card)
    }

    pub async fn delete_flashcard(&self, user_id: Uuid, card_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM flashcards f
            USING decks d
            WHERE f.id = $1 AND d.id = f.deck_id AND d.user_id = $2
            "#,
        )
        .bind(card_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // === Card State Repository ===

    /// Cards of a deck due at `as_of`, never-reviewed cards included
    pub async fn get_due_cards(
        &self,
        user_id: Uuid,
        deck_id: i64,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<CardState>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM flashcards f
            JOIN decks d ON d.id = f.deck_id
            LEFT JOIN card_states cs ON cs.card_id = f.id
            WHERE f.deck_id = $2 AND d.user_id = $3
              AND COALESCE(cs.due_at, f.created_at) <= $4
            ORDER BY COALESCE(cs.due_at, f.created_at), f.id
            "#,
            CARD_STATE_COLUMNS
        );

        let states = sqlx::query_as::<_, DbCardState>(&sql)
            .bind(CardState::INITIAL_EASE)
            .bind(deck_id)
            .bind(user_id)
            .bind(as_of)
            .fetch_all(&self.pool)
            .await?;

        Ok(states.iter().map(DbCardState::to_core).collect())
    }

    /// Current state of a card; synthesized if it was never reviewed
    pub async fn get_card_state(&self, user_id: Uuid, card_id: i64) -> Result<Option<CardState>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM flashcards f
            JOIN decks d ON d.id = f.deck_id
            LEFT JOIN card_states cs ON cs.card_id = f.id
            WHERE f.id = $2 AND d.user_id = $3
            "#,
            CARD_STATE_COLUMNS
        );

        let state = sqlx::query_as::<_, DbCardState>(&sql)
            .bind(CardState::INITIAL_EASE)
            .bind(card_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(state.as_ref().map(DbCardState::to_core))
    }

    /// Revision-checked upsert of a card state
    ///
    /// The flashcard row is locked for the whole transaction, so concurrent
    /// writers for one card are serialized even before its first review.
    pub async fn save_card_state(&self, user_id: Uuid, state: &CardState) -> Result<()> {
        let incoming = normalize_precision(state);
        let mut tx = self.pool.begin().await?;

        let owned: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT f.id
            FROM flashcards f
            JOIN decks d ON d.id = f.deck_id
            WHERE f.id = $1 AND d.user_id = $2
            FOR UPDATE OF f
            "#,
        )
        .bind(incoming.card_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        if owned.is_none() {
            return Err(RepositoryError::NotFound(incoming.card_id).into());
        }

        let stored = sqlx::query_as::<_, DbCardState>(
            r#"
            SELECT card_id, ease_factor, interval_days, repetitions, learning_step,
                   lapses, due_at, last_reviewed_at, revision
            FROM card_states
            WHERE card_id = $1
            "#,
        )
        .bind(incoming.card_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.to_core());

        if resolve_write(stored.as_ref(), &incoming)? == WriteOutcome::Unchanged {
            tx.commit().await?;
            tracing::debug!(card_id = incoming.card_id, "card state replay ignored");
            return Ok(());
        }

        let row = DbCardState::from_core(&incoming);
        let result = sqlx::query(
            r#"
            INSERT INTO card_states (card_id, ease_factor, interval_days, repetitions,
                                     learning_step, lapses, due_at, last_reviewed_at, revision)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (card_id) DO UPDATE SET
                ease_factor = EXCLUDED.ease_factor,
                interval_days = EXCLUDED.interval_days,
                repetitions = EXCLUDED.repetitions,
                learning_step = EXCLUDED.learning_step,
                lapses = EXCLUDED.lapses,
                due_at = EXCLUDED.due_at,
                last_reviewed_at = EXCLUDED.last_reviewed_at,
                revision = EXCLUDED.revision,
                updated_at = NOW()
            WHERE card_states.revision = EXCLUDED.revision - 1
            "#,
        )
        .bind(row.card_id)
        .bind(row.ease_factor)
        .bind(row.interval_days)
        .bind(row.repetitions)
        .bind(row.learning_step)
        .bind(row.lapses)
        .bind(row.due_at)
        .bind(row.last_reviewed_at)
        .bind(row.revision)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(incoming.card_id).into());
        }

        tx.commit().await?;
        tracing::debug!(
            card_id = incoming.card_id,
            revision = incoming.revision,
            "card state saved"
        );
        Ok(())
    }
}
