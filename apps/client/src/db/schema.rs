//! SQLite schema definitions.

/// Current schema version for migrations.
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema for local SQLite database.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Decks (created locally or cached from the backend)
CREATE TABLE IF NOT EXISTS decks (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL
);

-- Flashcard content
CREATE TABLE IF NOT EXISTS flashcards (
    id INTEGER PRIMARY KEY,
    deck_id INTEGER NOT NULL REFERENCES decks(id) ON DELETE CASCADE,
    front TEXT NOT NULL,
    back TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Review state; never-reviewed cards have no row
CREATE TABLE IF NOT EXISTS card_states (
    card_id INTEGER PRIMARY KEY REFERENCES flashcards(id) ON DELETE CASCADE,
    ease_factor REAL NOT NULL,
    interval_days INTEGER NOT NULL,
    repetitions INTEGER NOT NULL,
    learning_step INTEGER NOT NULL DEFAULT 0,
    lapses INTEGER NOT NULL,
    due_at TEXT NOT NULL,
    last_reviewed_at TEXT,
    revision INTEGER NOT NULL
);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_flashcards_deck ON flashcards(deck_id);
CREATE INDEX IF NOT EXISTS idx_card_states_due ON card_states(due_at);
"#;
