//! SQLite card state repository for offline study.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;

use review_core::{
    resolve_write, CardId, CardState, CardStateRepository, Deck, DeckId, Flashcard,
    RepositoryError, WriteOutcome,
};

use crate::db::error::DbError;
use crate::db::schema::{SCHEMA, SCHEMA_VERSION};

type Result<T> = std::result::Result<T, DbError>;

/// Card state with never-reviewed defaults; `?1` is the initial ease.
const STATE_SELECT: &str = "
    SELECT f.id,
           COALESCE(cs.ease_factor, ?1),
           COALESCE(cs.interval_days, 0),
           COALESCE(cs.repetitions, 0),
           COALESCE(cs.learning_step, 0),
           COALESCE(cs.lapses, 0),
           COALESCE(cs.due_at, f.created_at),
           cs.last_reviewed_at,
           COALESCE(cs.revision, 0)
    FROM flashcards f
    LEFT JOIN card_states cs ON cs.card_id = f.id";

const UPSERT_STATE: &str = "
    INSERT INTO card_states (card_id, ease_factor, interval_days, repetitions, learning_step,
                             lapses, due_at, last_reviewed_at, revision)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT(card_id) DO UPDATE SET
        ease_factor = excluded.ease_factor,
        interval_days = excluded.interval_days,
        repetitions = excluded.repetitions,
        learning_step = excluded.learning_step,
        lapses = excluded.lapses,
        due_at = excluded.due_at,
        last_reviewed_at = excluded.last_reviewed_at,
        revision = excluded.revision";

/// Deck statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeckStats {
    pub total_cards: usize,
    pub new_cards: usize,
    pub learning_cards: usize,
    pub review_cards: usize,
    pub due_cards: usize,
    pub total_lapses: u64,
    /// Mean ease of reviewed cards; the initial ease when none were reviewed.
    pub average_ease: f64,
}

/// SQLite implementation of [`CardStateRepository`].
///
/// A single connection behind a mutex serializes all writes. The async
/// trait methods run on tokio's blocking pool; the inherent methods block
/// the calling thread. Clones share the connection.
#[derive(Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open database at path, creating if necessary.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize(conn: &Connection) -> Result<()> {
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a deck and mirror its flashcards: cards missing from
    /// `flashcards` are removed together with their state.
    pub fn import_deck(&self, deck: &Deck, flashcards: &[Flashcard]) -> Result<usize> {
        if let Some(card) = flashcards.iter().find(|f| f.deck_id != deck.id) {
            return Err(DbError::InvalidData(format!(
                "flashcard {} belongs to deck {}, not {}",
                card.id, card.deck_id, deck.id
            )));
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO decks (id, title, description, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title, description = excluded.description",
            params![
                deck.id,
                deck.title,
                deck.description,
                format_timestamp(deck.created_at)
            ],
        )?;

        let existing: Vec<CardId> = {
            let mut stmt = tx.prepare("SELECT id FROM flashcards WHERE deck_id = ?1")?;
            let ids = stmt
                .query_map(params![deck.id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        for card in flashcards {
            tx.execute(
                "INSERT INTO flashcards (id, deck_id, front, back, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     deck_id = excluded.deck_id,
                     front = excluded.front,
                     back = excluded.back",
                params![
                    card.id,
                    card.deck_id,
                    card.front,
                    card.back,
                    format_timestamp(card.created_at)
                ],
            )?;
        }

        let incoming: HashSet<CardId> = flashcards.iter().map(|f| f.id).collect();
        let mut removed = 0;
        for id in existing.into_iter().filter(|id| !incoming.contains(id)) {
            removed += tx.execute("DELETE FROM flashcards WHERE id = ?1", params![id])?;
        }

        tx.commit()?;
        tracing::info!(
            deck_id = deck.id,
            imported = flashcards.len(),
            removed,
            "imported deck"
        );
        Ok(flashcards.len())
    }

    pub fn list_decks(&self) -> Result<Vec<Deck>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, title, description, created_at FROM decks ORDER BY id")?;

        let decks = stmt
            .query_map([], |row| {
                let created_at: String = row.get(3)?;
                Ok(Deck {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    created_at: parse_timestamp(3, &created_at)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(decks)
    }

    /// Delete a deck with its flashcards and their states.
    pub fn delete_deck(&self, deck_id: DeckId) -> Result<bool> {
        let count = self
            .conn()
            .execute("DELETE FROM decks WHERE id = ?1", params![deck_id])?;
        Ok(count > 0)
    }

    pub fn delete_flashcard(&self, card_id: CardId) -> Result<bool> {
        let count = self
            .conn()
            .execute("DELETE FROM flashcards WHERE id = ?1", params![card_id])?;
        Ok(count > 0)
    }

    /// Cache states fetched from the backend. A state replaces the local one
    /// only when its revision is newer; unknown cards are skipped.
    pub fn apply_remote_states(&self, states: &[CardState]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut applied = 0;

        for state in states {
            if !flashcard_exists(&tx, state.card_id)? {
                tracing::debug!(card_id = state.card_id, "remote state for unknown card skipped");
                continue;
            }
            let local_revision = stored_revision(&tx, state.card_id)?.unwrap_or(0);
            if state.revision > local_revision {
                write_state(&tx, state)?;
                applied += 1;
            }
        }

        tx.commit()?;
        Ok(applied)
    }

    /// Card counts and ease for one deck at `as_of`.
    pub fn deck_stats(&self, deck_id: DeckId, as_of: DateTime<Utc>) -> Result<DeckStats> {
        let states = self.deck_states(deck_id)?;

        let reviewed: Vec<&CardState> = states.iter().filter(|s| !s.is_new()).collect();
        let average_ease = if reviewed.is_empty() {
            CardState::INITIAL_EASE
        } else {
            reviewed.iter().map(|s| s.ease_factor).sum::<f64>() / reviewed.len() as f64
        };

        Ok(DeckStats {
            total_cards: states.len(),
            new_cards: states.len() - reviewed.len(),
            learning_cards: reviewed.iter().filter(|s| s.is_learning()).count(),
            review_cards: reviewed.iter().filter(|s| !s.is_learning()).count(),
            due_cards: states.iter().filter(|s| s.is_due(as_of)).count(),
            total_lapses: states.iter().map(|s| s.lapses as u64).sum(),
            average_ease,
        })
    }

    fn deck_states(&self, deck_id: DeckId) -> Result<Vec<CardState>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE f.deck_id = ?2 ORDER BY f.id", STATE_SELECT))?;
        let states = stmt
            .query_map(params![CardState::INITIAL_EASE, deck_id], row_to_state)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }

    fn due_states(&self, deck_id: DeckId, as_of: DateTime<Utc>) -> Result<Vec<CardState>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE f.deck_id = ?2 AND COALESCE(cs.due_at, f.created_at) <= ?3",
            STATE_SELECT
        ))?;
        let states = stmt
            .query_map(
                params![CardState::INITIAL_EASE, deck_id, format_timestamp(as_of)],
                row_to_state,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }

    fn flashcards(&self, deck_id: DeckId) -> Result<Vec<Flashcard>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, deck_id, front, back, created_at FROM flashcards WHERE deck_id = ?1 ORDER BY id",
        )?;
        let cards = stmt
            .query_map(params![deck_id], row_to_flashcard)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cards)
    }

    fn state(&self, card_id: CardId) -> Result<CardState> {
        self.conn()
            .query_row(
                &format!("{} WHERE f.id = ?2", STATE_SELECT),
                params![CardState::INITIAL_EASE, card_id],
                row_to_state,
            )
            .optional()?
            .ok_or(DbError::CardNotFound(card_id))
    }

    fn save_state(&self, state: &CardState) -> review_core::Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DbError::from)?;

        if !flashcard_exists(&tx, state.card_id)? {
            return Err(DbError::CardNotFound(state.card_id).into());
        }

        let stored = tx
            .query_row(
                &format!("{} WHERE f.id = ?2 AND cs.card_id IS NOT NULL", STATE_SELECT),
                params![CardState::INITIAL_EASE, state.card_id],
                row_to_state,
            )
            .optional()
            .map_err(DbError::from)?;

        if resolve_write(stored.as_ref(), state)? == WriteOutcome::Apply {
            write_state(&tx, state)?;
        }
        tx.commit().map_err(DbError::from)?;
        Ok(())
    }
}

#[async_trait]
impl CardStateRepository for SqliteRepository {
    async fn get_due_cards(
        &self,
        deck_id: DeckId,
        as_of: DateTime<Utc>,
    ) -> review_core::Result<Vec<CardState>> {
        let repo = self.clone();
        run_blocking(move || Ok(repo.due_states(deck_id, as_of)?)).await
    }

    async fn get_deck_flashcards(&self, deck_id: DeckId) -> review_core::Result<Vec<Flashcard>> {
        let repo = self.clone();
        run_blocking(move || Ok(repo.flashcards(deck_id)?)).await
    }

    async fn get_card_state(&self, card_id: CardId) -> review_core::Result<CardState> {
        let repo = self.clone();
        run_blocking(move || Ok(repo.state(card_id)?)).await
    }

    async fn save_card_state(&self, state: &CardState) -> review_core::Result<()> {
        let repo = self.clone();
        let state = state.clone();
        run_blocking(move || repo.save_state(&state)).await
    }
}

async fn run_blocking<T, F>(work: F) -> review_core::Result<T>
where
    F: FnOnce() -> review_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RepositoryError::Transient(format!("sqlite task failed: {}", e)))?
}

fn flashcard_exists(tx: &Transaction<'_>, card_id: CardId) -> Result<bool> {
    let found = tx
        .query_row(
            "SELECT 1 FROM flashcards WHERE id = ?1",
            params![card_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn stored_revision(tx: &Transaction<'_>, card_id: CardId) -> Result<Option<u64>> {
    let revision: Option<i64> = tx
        .query_row(
            "SELECT revision FROM card_states WHERE card_id = ?1",
            params![card_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(revision.map(|r| r.max(0) as u64))
}

fn write_state(tx: &Transaction<'_>, state: &CardState) -> Result<()> {
    let revision = i64::try_from(state.revision)
        .map_err(|_| DbError::InvalidData(format!("revision {} out of range", state.revision)))?;

    tx.execute(
        UPSERT_STATE,
        params![
            state.card_id,
            state.ease_factor,
            state.interval_days,
            state.repetitions,
            state.learning_step,
            state.lapses,
            format_timestamp(state.due_at),
            state.last_reviewed_at.map(format_timestamp),
            revision,
        ],
    )?;
    Ok(())
}

fn row_to_state(row: &Row) -> rusqlite::Result<CardState> {
    let due_at: String = row.get(6)?;
    let last_reviewed_at: Option<String> = row.get(7)?;
    let revision: i64 = row.get(8)?;

    Ok(CardState {
        card_id: row.get(0)?,
        ease_factor: row.get(1)?,
        interval_days: row.get(2)?,
        repetitions: row.get(3)?,
        learning_step: row.get(4)?,
        lapses: row.get(5)?,
        due_at: parse_timestamp(6, &due_at)?,
        last_reviewed_at: last_reviewed_at
            .map(|at| parse_timestamp(7, &at))
            .transpose()?,
        revision: revision.max(0) as u64,
    })
}

fn row_to_flashcard(row: &Row) -> rusqlite::Result<Flashcard> {
    let created_at: String = row.get(4)?;
    Ok(Flashcard {
        id: row.get(0)?,
        deck_id: row.get(1)?,
        front: row.get(2)?,
        back: row.get(3)?,
        created_at: parse_timestamp(4, &created_at)?,
    })
}

/// Fixed-width RFC 3339 so text comparison orders chronologically.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}
