//! Users API tests.
//!
//! These tests require a running PostgreSQL database.
//! Set DATABASE_URL before running.

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::Utc;
use review_core::Grade;
use uuid::Uuid;

use common::fixtures;
use common::TestContext;

/// Test register returns a usable token.
#[tokio::test]
#[ignore = "requires database"]
async fn test_register_and_me() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router()).unwrap();

    let response = server
        .post("/api/users/register")
        .json(&fixtures::register_request(Some("ada")))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    let user_id: Uuid = body["user_id"].as_str().unwrap().parse().unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    let response = server
        .get("/api/users/me")
        .add_header(
            axum::http::header::AUTHORIZATION,
            TestContext::auth_header_value(&token),
        )
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["user_id"], user_id.to_string());
    assert_eq!(body["name"], "ada");

    // Cleanup
    ctx.cleanup_user(user_id).await;
}

/// Test unknown token is rejected.
#[tokio::test]
#[ignore = "requires database"]
async fn test_invalid_token_unauthorized() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router()).unwrap();

    let response = server
        .get("/api/users/me")
        .add_header(
            axum::http::header::AUTHORIZATION,
            TestContext::auth_header_value("not-a-real-token"),
        )
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "unauthorized");
}

/// Test stats count decks, cards, studied cards and lapses.
#[tokio::test]
#[ignore = "requires database"]
async fn test_user_stats() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router()).unwrap();
    let (user_id, token) = ctx.create_test_user(None).await;

    let deck = ctx.create_deck(user_id, "Geography").await;
    ctx.create_deck(user_id, "Empty").await;
    let cards = ctx.create_flashcards(deck.id, 3).await;

    let now = Utc::now();
    let forgot = fixtures::graded_state(cards[0].id, cards[0].created_at, Grade::Forgot, now);
    let good = fixtures::graded_state(cards[1].id, cards[1].created_at, Grade::Good, now);
    ctx.db.save_card_state(user_id, &forgot).await.unwrap();
    ctx.db.save_card_state(user_id, &good).await.unwrap();

    let response = server
        .get("/api/users/stats")
        .add_header(
            axum::http::header::AUTHORIZATION,
            TestContext::auth_header_value(&token),
        )
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["total_decks"], 2);
    assert_eq!(body["total_cards"], 3);
    assert_eq!(body["total_cards_studied"], 2);
    assert_eq!(body["total_lapses"], 1);

    // Cleanup
    ctx.cleanup_user(user_id).await;
}
