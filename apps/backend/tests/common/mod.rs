//! Common test utilities and fixtures for integration tests.
//!
//! This module provides shared test infrastructure including:
//! - TestContext for setting up test environment with database
//! - Helpers for creating users, decks and flashcards directly in the database
//!
//! # Requirements
//! Integration tests require a PostgreSQL database (set DATABASE_URL env var).

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;

use axum::Router;
use uuid::Uuid;

use review_backend::db::Database;
use review_backend::models::{DbDeck, DbFlashcard};
use review_backend::AppState;

/// Test context containing database connection and router.
pub struct TestContext {
    pub db: Arc<Database>,
    app: Router,
}

impl TestContext {
    /// Create a new test context.
    ///
    /// # Panics
    /// Panics if DATABASE_URL is not set or database connection fails.
    pub async fn new() -> Self {
        dotenvy::dotenv().ok();

        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");

        let db = Database::connect(&database_url)
            .await
            .expect("Failed to connect to test database");

        db.run_migrations()
            .await
            .expect("Failed to run migrations");

        let db = Arc::new(db);
        let app = review_backend::router(AppState { db: db.clone() });

        Self { db, app }
    }

    /// Get the router for use with axum-test.
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    /// Create a test user and return its ID and token.
    pub async fn create_test_user(&self, name: Option<&str>) -> (Uuid, String) {
        let user = self
            .db
            .create_user(name)
            .await
            .expect("Failed to create test user");
        (user.id, user.token)
    }

    /// Create a deck owned by `user_id`.
    pub async fn create_deck(&self, user_id: Uuid, title: &str) -> DbDeck {
        self.db
            .create_deck(user_id, title, None)
            .await
            .expect("Failed to create test deck")
    }

    /// Create `count` flashcards in a deck.
    pub async fn create_flashcards(&self, deck_id: i64, count: usize) -> Vec<DbFlashcard> {
        let mut cards = Vec::with_capacity(count);
        for i in 0..count {
            let card = self
                .db
                .create_flashcard(
                    deck_id,
                    &format!("Question {}?", i + 1),
                    &format!("Answer {}.", i + 1),
                )
                .await
                .expect("Failed to create test flashcard");
            cards.push(card);
        }
        cards
    }

    /// Format authorization header value.
    pub fn auth_header_value(token: &str) -> String {
        format!("Bearer {}", token)
    }

    /// Clean up test data for a user.
    ///
    /// Decks, flashcards and card states cascade from the user row.
    pub async fn cleanup_user(&self, user_id: Uuid) {
        let _ = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(self.db.pool())
            .await;
    }
}
