//! HTTP repository backed by the review backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use review_core::{CardId, CardState, CardStateRepository, DeckId, Flashcard, RepositoryError};

/// Per-request timeout; a hung request would stall the study session.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Backend client errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend error: {status} - {message}")]
    Backend { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not authenticated - please register first")]
    NotAuthenticated,
}

impl ApiClientError {
    /// Classify for a repository caller. `card_id` names the card a 404 or
    /// 409 refers to; without one those statuses are plain rejections.
    pub fn into_repository_error(self, card_id: Option<CardId>) -> RepositoryError {
        match self {
            Self::Network(message) | Self::Parse(message) => RepositoryError::Transient(message),
            Self::NotAuthenticated => RepositoryError::Rejected {
                status: StatusCode::UNAUTHORIZED.as_u16(),
                message: "no API token configured".to_string(),
            },
            Self::Backend { status, message } => match (status, card_id) {
                (500..=599 | 408 | 429, _) => {
                    RepositoryError::Transient(format!("backend returned {}: {}", status, message))
                }
                (404, Some(card_id)) => RepositoryError::NotFound(card_id),
                (409, Some(card_id)) => RepositoryError::Conflict(card_id),
                _ => RepositoryError::Rejected { status, message },
            },
        }
    }
}

impl From<ApiClientError> for RepositoryError {
    fn from(error: ApiClientError) -> Self {
        error.into_repository_error(None)
    }
}

// === API Request/Response Types ===

#[derive(Debug, Serialize)]
struct RegisterRequest {
    name: Option<String>,
}

/// Credentials issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Registration {
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct DueCardsResponse {
    cards: Vec<CardState>,
}

#[derive(Debug, Deserialize)]
struct FlashcardListResponse {
    flashcards: Vec<Flashcard>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Inner state shared across clones.
struct HttpRepositoryInner {
    client: Client,
    backend_url: String,
    token: Option<String>,
}

/// [`CardStateRepository`] speaking to the backend HTTP API.
///
/// Clone-able; clones share one connection pool.
#[derive(Clone)]
pub struct HttpRepository {
    inner: Arc<HttpRepositoryInner>,
}

impl HttpRepository {
    pub fn new(backend_url: impl Into<String>, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "couldn't configure HTTP client, using defaults");
                Client::new()
            });

        Self {
            inner: Arc::new(HttpRepositoryInner {
                client,
                backend_url: backend_url.into().trim_end_matches('/').to_string(),
                token,
            }),
        }
    }

    /// Same backend, different credentials.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HttpRepositoryInner {
                client: self.inner.client.clone(),
                backend_url: self.inner.backend_url.clone(),
                token: Some(token.into()),
            }),
        }
    }

    pub fn backend_url(&self) -> &str {
        &self.inner.backend_url
    }

    /// Check if backend is reachable.
    pub async fn check_connectivity(&self) -> Result<bool, ApiClientError> {
        let url = self.url("/health");
        match self.inner.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(e) => Err(ApiClientError::Network(e.to_string())),
        }
    }

    /// Register a new user with the backend.
    pub async fn register(&self, name: Option<String>) -> Result<Registration, ApiClientError> {
        let request = self
            .inner
            .client
            .post(self.url("/api/users/register"))
            .json(&RegisterRequest { name });

        let resp = Self::execute(request).await?;
        let registration: Registration = resp
            .json()
            .await
            .map_err(|e| ApiClientError::Parse(e.to_string()))?;

        tracing::info!(user_id = %registration.user_id, "registered with backend");
        Ok(registration)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.backend_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiClientError> {
        match &self.inner.token {
            Some(token) => Ok(request.bearer_auth(token)),
            None => Err(ApiClientError::NotAuthenticated),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiClientError> {
        let resp = Self::execute(self.authorized(request)?).await?;
        resp.json()
            .await
            .map_err(|e| ApiClientError::Parse(e.to_string()))
    }

    async fn execute(request: RequestBuilder) -> Result<Response, ApiClientError> {
        let resp = request
            .send()
            .await
            .map_err(|e| ApiClientError::Network(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);
        tracing::debug!(status = status.as_u16(), %message, "backend rejected request");

        Err(ApiClientError::Backend {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CardStateRepository for HttpRepository {
    async fn get_due_cards(
        &self,
        deck_id: DeckId,
        as_of: DateTime<Utc>,
    ) -> review_core::Result<Vec<CardState>> {
        let request = self
            .inner
            .client
            .get(self.url(&format!("/api/decks/{}/due", deck_id)))
            .query(&[("as_of", as_of.to_rfc3339_opts(SecondsFormat::AutoSi, true))]);

        let response: DueCardsResponse = self.get_json(request).await?;
        Ok(response.cards)
    }

    async fn get_deck_flashcards(&self, deck_id: DeckId) -> review_core::Result<Vec<Flashcard>> {
        let request = self
            .inner
            .client
            .get(self.url(&format!("/api/decks/{}/flashcards", deck_id)));

        let response: FlashcardListResponse = self.get_json(request).await?;
        Ok(response.flashcards)
    }

    async fn get_card_state(&self, card_id: CardId) -> review_core::Result<CardState> {
        let request = self
            .inner
            .client
            .get(self.url(&format!("/api/cards/{}/state", card_id)));

        self.get_json(request)
            .await
            .map_err(|e| e.into_repository_error(Some(card_id)))
    }

    async fn save_card_state(&self, state: &CardState) -> review_core::Result<()> {
        let card_id = state.card_id;
        let request = self
            .inner
            .client
            .put(self.url(&format!("/api/cards/{}/state", card_id)))
            .json(state);

        let request = self
            .authorized(request)
            .map_err(|e| e.into_repository_error(Some(card_id)))?;
        Self::execute(request)
            .await
            .map_err(|e| e.into_repository_error(Some(card_id)))?;

        tracing::debug!(card_id, revision = state.revision, "card state sent");
        Ok(())
    }
}
