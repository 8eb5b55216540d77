//! Study session state machine.
//!
//! A [`SessionRunner`] walks a planned [`StudySession`]:
//!
//! ```text
//! Presenting(front) --reveal--> Revealed(front, back) --grade--> Presenting(next)
//!                                                           \--> Complete(summary)
//! ```
//!
//! Every grade is written through to the repository before the session
//! advances. Only card states are durable; the queue and position can be
//! dropped at any time and rebuilt with a new plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::{RepositoryError, SessionError};
use crate::repository::CardStateRepository;
use crate::scheduler::Scheduler;
use crate::types::{CardId, CardState, DeckId, Flashcard, Grade};

/// A card waiting in the session queue with its working state.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedCard {
    pub flashcard: Flashcard,
    pub state: CardState,
}

/// Ephemeral state of one study run.
#[derive(Debug, Clone)]
pub struct StudySession {
    pub deck_id: DeckId,
    pub queue: Vec<CardId>,
    pub position: usize,
    pub started_at: DateTime<Utc>,
    cards: HashMap<CardId, QueuedCard>,
}

impl StudySession {
    /// Session over `cards` in the given order.
    pub fn new(deck_id: DeckId, started_at: DateTime<Utc>, cards: Vec<QueuedCard>) -> Self {
        let queue = cards.iter().map(|c| c.flashcard.id).collect();
        let cards = cards.into_iter().map(|c| (c.flashcard.id, c)).collect();
        Self {
            deck_id,
            queue,
            position: 0,
            started_at,
            cards,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Cards not yet graded, including the current one.
    pub fn remaining(&self) -> usize {
        self.queue.len().saturating_sub(self.position)
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.queue.len()
    }

    pub fn current(&self) -> Option<&QueuedCard> {
        self.queue
            .get(self.position)
            .and_then(|id| self.cards.get(id))
    }

    pub fn card(&self, card_id: CardId) -> Option<&QueuedCard> {
        self.cards.get(&card_id)
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn drop_current(&mut self) {
        if self.position < self.queue.len() {
            let card_id = self.queue.remove(self.position);
            self.cards.remove(&card_id);
        }
    }

    fn replace_state(&mut self, state: CardState) {
        if let Some(card) = self.cards.get_mut(&state.card_id) {
            card.state = state;
        }
    }
}

/// What the UI should show.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionState {
    Presenting {
        card_id: CardId,
        front: String,
    },
    Revealed {
        card_id: CardId,
        front: String,
        back: String,
    },
    Complete {
        summary: SessionSummary,
    },
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            Self::Presenting { .. } => "presenting",
            Self::Revealed { .. } => "revealed",
            Self::Complete { .. } => "complete",
        }
    }

    pub fn card_id(&self) -> Option<CardId> {
        match self {
            Self::Presenting { card_id, .. } | Self::Revealed { card_id, .. } => Some(*card_id),
            Self::Complete { .. } => None,
        }
    }
}

/// Outcome of a study session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub deck_id: DeckId,
    pub cards_reviewed: usize,
    pub lapses_incurred: usize,
    pub cards_dropped: usize,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl SessionSummary {
    fn new(deck_id: DeckId, started_at: DateTime<Utc>) -> Self {
        Self {
            deck_id,
            cards_reviewed: 0,
            lapses_incurred: 0,
            cards_dropped: 0,
            started_at,
            finished_at: None,
        }
    }
}

/// Grade whose save has not been confirmed yet.
#[derive(Debug, Clone)]
struct PendingGrade {
    card_id: CardId,
    grade: Grade,
    state: CardState,
}

/// Drives one study session against a repository.
pub struct SessionRunner<R: ?Sized> {
    session: StudySession,
    repository: Arc<R>,
    clock: Arc<dyn Clock>,
    scheduler: Scheduler,
    config: SessionConfig,
    state: SessionState,
    pending: Option<PendingGrade>,
    summary: SessionSummary,
}

impl<R: CardStateRepository + ?Sized + 'static> SessionRunner<R> {
    pub fn new(
        session: StudySession,
        repository: Arc<R>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self::with_scheduler(session, repository, clock, Scheduler::default(), config)
    }

    pub fn with_scheduler(
        session: StudySession,
        repository: Arc<R>,
        clock: Arc<dyn Clock>,
        scheduler: Scheduler,
        config: SessionConfig,
    ) -> Self {
        let summary = SessionSummary::new(session.deck_id, session.started_at);
        let mut runner = Self {
            session,
            repository,
            clock,
            scheduler,
            config,
            state: SessionState::Complete {
                summary: summary.clone(),
            },
            pending: None,
            summary,
        };
        runner.state = runner.present_current();
        runner
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn session(&self) -> &StudySession {
        &self.session
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, SessionState::Complete { .. })
    }

    /// Grade kept after a failed save, for one-tap resubmission.
    pub fn pending_grade(&self) -> Option<Grade> {
        self.pending.as_ref().map(|p| p.grade)
    }

    /// Show the back of the current card.
    pub fn reveal(&mut self) -> Result<&SessionState, SessionError> {
        let (card_id, front) = match &self.state {
            SessionState::Presenting { card_id, front } => (*card_id, front.clone()),
            other => {
                return Err(SessionError::InvalidTransition {
                    action: "reveal",
                    state: other.name(),
                })
            }
        };

        let back = self
            .session
            .card(card_id)
            .map(|c| c.flashcard.back.clone())
            .unwrap_or_default();

        self.state = SessionState::Revealed {
            card_id,
            front,
            back,
        };
        Ok(&self.state)
    }

    /// Grade the revealed card, persist the new state and move on.
    ///
    /// Only valid while `Revealed`, so a repeated submission for a card that
    /// was already saved is rejected instead of applied twice.
    pub async fn grade(&mut self, grade: Grade) -> Result<&SessionState, SessionError> {
        let card_id = self.revealed_card("grade")?;

        let next = match &self.pending {
            Some(pending) if pending.card_id == card_id && pending.grade == grade => {
                pending.state.clone()
            }
            _ => {
                let current = self
                    .session
                    .card(card_id)
                    .map(|c| c.state.clone())
                    .ok_or(RepositoryError::NotFound(card_id))?;
                self.scheduler.schedule(&current, grade, self.clock.now())
            }
        };

        self.pending = Some(PendingGrade {
            card_id,
            grade,
            state: next,
        });
        self.submit_pending().await
    }

    /// Resubmit the grade whose save failed.
    pub async fn retry_save(&mut self) -> Result<&SessionState, SessionError> {
        self.revealed_card("retry")?;
        if self.pending.is_none() {
            return Err(SessionError::NothingToRetry);
        }
        self.submit_pending().await
    }

    /// End the session and hand back its summary.
    pub fn finish(mut self) -> SessionSummary {
        if self.summary.finished_at.is_none() {
            self.summary.finished_at = Some(self.clock.now());
        }
        self.summary
    }

    async fn submit_pending(&mut self) -> Result<&SessionState, SessionError> {
        let pending = self.pending.clone().ok_or(SessionError::NothingToRetry)?;

        match self.save_with_retry(pending.state.clone()).await {
            Ok(()) => {
                self.pending = None;
                self.summary.cards_reviewed += 1;
                if pending.grade == Grade::Forgot {
                    self.summary.lapses_incurred += 1;
                }
                tracing::debug!(
                    card_id = pending.card_id,
                    grade = pending.grade.as_str(),
                    interval_days = pending.state.interval_days,
                    "review saved"
                );
                self.session.replace_state(pending.state);
                self.session.advance();
                self.state = self.present_current();
                Ok(&self.state)
            }
            Err(RepositoryError::NotFound(_)) => {
                tracing::warn!(card_id = pending.card_id, "card no longer exists, dropping it");
                self.drop_current_card();
                Ok(&self.state)
            }
            Err(RepositoryError::Conflict(_)) => {
                self.pending = None;
                self.reload_after_conflict(pending.card_id).await
            }
            Err(source) => {
                tracing::warn!(card_id = pending.card_id, error = %source, "couldn't save review");
                Err(SessionError::SaveFailed {
                    card_id: pending.card_id,
                    grade: pending.grade,
                    source,
                })
            }
        }
    }

    /// Replace the stale working copy and ask for a new grade.
    async fn reload_after_conflict(&mut self, card_id: CardId) -> Result<&SessionState, SessionError> {
        match self.repository.get_card_state(card_id).await {
            Ok(fresh) => {
                tracing::info!(card_id, revision = fresh.revision, "reloaded card after conflict");
                self.session.replace_state(fresh);
                Err(SessionError::Conflict { card_id })
            }
            Err(RepositoryError::NotFound(_)) => {
                self.drop_current_card();
                Ok(&self.state)
            }
            Err(error) => {
                tracing::warn!(card_id, %error, "couldn't reload card after conflict");
                Err(SessionError::Conflict { card_id })
            }
        }
    }

    /// Save in a detached task so it finishes even if this future is dropped.
    async fn save_with_retry(&self, state: CardState) -> Result<(), RepositoryError> {
        let repository = Arc::clone(&self.repository);
        let backoff = self.config.retry_backoff();

        let task = tokio::spawn(async move {
            match repository.save_card_state(&state).await {
                Err(error) if error.is_retryable() => {
                    tracing::warn!(card_id = state.card_id, %error, "save failed, retrying once");
                    tokio::time::sleep(backoff).await;
                    repository.save_card_state(&state).await
                }
                result => result,
            }
        });

        match task.await {
            Ok(result) => result,
            Err(join_error) => Err(RepositoryError::Transient(format!(
                "save task failed: {}",
                join_error
            ))),
        }
    }

    fn revealed_card(&self, action: &'static str) -> Result<CardId, SessionError> {
        match &self.state {
            SessionState::Revealed { card_id, .. } => Ok(*card_id),
            other => Err(SessionError::InvalidTransition {
                action,
                state: other.name(),
            }),
        }
    }

    fn drop_current_card(&mut self) {
        self.pending = None;
        self.summary.cards_dropped += 1;
        self.session.drop_current();
        self.state = self.present_current();
    }

    fn present_current(&mut self) -> SessionState {
        if let Some(card) = self.session.current() {
            return SessionState::Presenting {
                card_id: card.flashcard.id,
                front: card.flashcard.front.clone(),
            };
        }

        if self.summary.finished_at.is_none() {
            self.summary.finished_at = Some(self.clock.now());
        }
        tracing::info!(
            deck_id = self.summary.deck_id,
            reviewed = self.summary.cards_reviewed,
            lapses = self.summary.lapses_incurred,
            dropped = self.summary.cards_dropped,
            "study session complete"
        );
        SessionState::Complete {
            summary: self.summary.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::planner::SessionPlanner;
    use crate::repository::MemoryRepository;
    use crate::scheduler::schedule;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 2, 7, 30, 0).unwrap()
    }

    fn flashcard(id: CardId) -> Flashcard {
        Flashcard {
            id,
            deck_id: 1,
            front: format!("front {}", id),
            back: format!("back {}", id),
            created_at: start() - Duration::days(1),
        }
    }

    /// Memory repository with scripted save failures.
    #[derive(Default)]
    struct ScriptedRepository {
        inner: MemoryRepository,
        save_failures: Mutex<VecDeque<RepositoryError>>,
        save_delay: Option<std::time::Duration>,
        save_calls: AtomicUsize,
    }

    impl ScriptedRepository {
        fn with_cards(ids: &[CardId]) -> Self {
            let repo = Self::default();
            for id in ids {
                repo.inner.insert_flashcard(flashcard(*id));
            }
            repo
        }

        fn fail_next_saves(&self, errors: Vec<RepositoryError>) {
            self.save_failures.lock().unwrap().extend(errors);
        }

        fn save_calls(&self) -> usize {
            self.save_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CardStateRepository for ScriptedRepository {
        async fn get_due_cards(
            &self,
            deck_id: DeckId,
            as_of: DateTime<Utc>,
        ) -> crate::error::Result<Vec<CardState>> {
            self.inner.get_due_cards(deck_id, as_of).await
        }

        async fn get_deck_flashcards(&self, deck_id: DeckId) -> crate::error::Result<Vec<Flashcard>> {
            self.inner.get_deck_flashcards(deck_id).await
        }

        async fn get_card_state(&self, card_id: CardId) -> crate::error::Result<CardState> {
            self.inner.get_card_state(card_id).await
        }

        async fn save_card_state(&self, state: &CardState) -> crate::error::Result<()> {
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.save_delay {
                tokio::time::sleep(delay).await;
            }
            let failure = self.save_failures.lock().unwrap().pop_front();
            match failure {
                Some(error) => Err(error),
                None => self.inner.save_card_state(state).await,
            }
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            retry_backoff_ms: 0,
            ..SessionConfig::default()
        }
    }

    async fn runner_for(repo: Arc<ScriptedRepository>) -> SessionRunner<ScriptedRepository> {
        let clock = Arc::new(ManualClock::new(start()));
        let planner = SessionPlanner::new(Arc::clone(&repo), config());
        let session = planner.plan_session(1, clock.now()).await.unwrap();
        SessionRunner::new(session, repo, clock, config())
    }

    #[tokio::test]
    async fn empty_queue_starts_complete() {
        let repo = Arc::new(ScriptedRepository::default());
        let runner = runner_for(repo).await;

        assert!(runner.is_complete());
        match runner.state() {
            SessionState::Complete { summary } => {
                assert_eq!(summary.cards_reviewed, 0);
                assert_eq!(summary.finished_at, Some(start()));
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn walks_queue_to_completion() {
        let repo = Arc::new(ScriptedRepository::with_cards(&[1, 2]));
        let mut runner = runner_for(Arc::clone(&repo)).await;

        assert_eq!(
            runner.state(),
            &SessionState::Presenting {
                card_id: 1,
                front: "front 1".to_string()
            }
        );
        assert_eq!(
            runner.reveal().unwrap(),
            &SessionState::Revealed {
                card_id: 1,
                front: "front 1".to_string(),
                back: "back 1".to_string()
            }
        );
        runner.grade(Grade::Good).await.unwrap();
        assert_eq!(runner.state().card_id(), Some(2));

        runner.reveal().unwrap();
        runner.grade(Grade::Forgot).await.unwrap();
        assert!(runner.is_complete());

        let summary = runner.finish();
        assert_eq!(summary.cards_reviewed, 2);
        assert_eq!(summary.lapses_incurred, 1);
        assert_eq!(summary.cards_dropped, 0);

        let saved = repo.inner.stored_state(1).unwrap();
        assert_eq!(saved.revision, 1);
        assert_eq!(saved.due_at, start() + Duration::minutes(10));
        assert_eq!(repo.inner.stored_state(2).unwrap().lapses, 1);
    }

    #[tokio::test]
    async fn grading_requires_reveal() {
        let repo = Arc::new(ScriptedRepository::with_cards(&[1]));
        let mut runner = runner_for(Arc::clone(&repo)).await;

        let err = runner.grade(Grade::Good).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                action: "grade",
                state: "presenting"
            }
        ));

        runner.reveal().unwrap();
        assert!(runner.reveal().is_err());
        assert_eq!(repo.save_calls(), 0);
    }

    #[tokio::test]
    async fn duplicate_grade_is_rejected() {
        let repo = Arc::new(ScriptedRepository::with_cards(&[1, 2]));
        let mut runner = runner_for(Arc::clone(&repo)).await;

        runner.reveal().unwrap();
        runner.grade(Grade::Easy).await.unwrap();
        assert!(runner.grade(Grade::Easy).await.is_err());

        assert_eq!(repo.save_calls(), 1);
        assert_eq!(runner.summary().cards_reviewed, 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let repo = Arc::new(ScriptedRepository::with_cards(&[1]));
        repo.fail_next_saves(vec![RepositoryError::Transient("timeout".to_string())]);
        let mut runner = runner_for(Arc::clone(&repo)).await;

        runner.reveal().unwrap();
        runner.grade(Grade::Good).await.unwrap();

        assert_eq!(repo.save_calls(), 2);
        assert!(runner.is_complete());
        assert!(repo.inner.stored_state(1).is_some());
    }

    #[tokio::test]
    async fn repeated_transient_failure_keeps_grade_for_retry() {
        let repo = Arc::new(ScriptedRepository::with_cards(&[1]));
        repo.fail_next_saves(vec![
            RepositoryError::Transient("offline".to_string()),
            RepositoryError::Transient("offline".to_string()),
        ]);
        let mut runner = runner_for(Arc::clone(&repo)).await;

        runner.reveal().unwrap();
        let err = runner.grade(Grade::Hard).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::SaveFailed {
                card_id: 1,
                grade: Grade::Hard,
                ..
            }
        ));
        assert_eq!(runner.state().card_id(), Some(1));
        assert!(matches!(runner.state(), SessionState::Revealed { .. }));
        assert_eq!(runner.pending_grade(), Some(Grade::Hard));
        assert!(repo.inner.stored_state(1).is_none());

        runner.retry_save().await.unwrap();
        assert!(runner.is_complete());
        assert_eq!(runner.pending_grade(), None);
        assert_eq!(repo.save_calls(), 3);
    }

    #[tokio::test]
    async fn retry_without_pending_grade_fails() {
        let repo = Arc::new(ScriptedRepository::with_cards(&[1]));
        let mut runner = runner_for(repo).await;

        runner.reveal().unwrap();
        assert!(matches!(
            runner.retry_save().await,
            Err(SessionError::NothingToRetry)
        ));
    }

    #[tokio::test]
    async fn conflict_reloads_state_and_asks_for_new_grade() {
        let repo = Arc::new(ScriptedRepository::with_cards(&[1]));
        let mut runner = runner_for(Arc::clone(&repo)).await;

        // Another device reviews the same card first.
        let theirs = schedule(&CardState::new(1, flashcard(1).created_at), Grade::Forgot, start());
        repo.inner.save_card_state(&theirs).await.unwrap();

        runner.reveal().unwrap();
        let err = runner.grade(Grade::Good).await.unwrap_err();
        assert!(matches!(err, SessionError::Conflict { card_id: 1 }));
        assert!(matches!(runner.state(), SessionState::Revealed { .. }));
        assert_eq!(runner.session().card(1).unwrap().state, theirs);
        assert_eq!(repo.inner.stored_state(1), Some(theirs.clone()));

        runner.grade(Grade::Good).await.unwrap();
        assert!(runner.is_complete());
        assert_eq!(repo.inner.stored_state(1).unwrap().revision, theirs.revision + 1);
    }

    #[tokio::test]
    async fn vanished_card_is_dropped() {
        let repo = Arc::new(ScriptedRepository::with_cards(&[1, 2]));
        let mut runner = runner_for(Arc::clone(&repo)).await;

        repo.inner.remove_flashcard(1);
        runner.reveal().unwrap();
        let state = runner.grade(Grade::Good).await.unwrap().clone();

        assert_eq!(
            state,
            SessionState::Presenting {
                card_id: 2,
                front: "front 2".to_string()
            }
        );
        assert_eq!(runner.summary().cards_dropped, 1);
        assert_eq!(runner.summary().cards_reviewed, 0);
        assert_eq!(runner.session().queue, vec![2]);
    }

    #[tokio::test]
    async fn rejected_save_is_not_retried() {
        let repo = Arc::new(ScriptedRepository::with_cards(&[1]));
        repo.fail_next_saves(vec![RepositoryError::Rejected {
            status: 401,
            message: "Invalid or missing token".to_string(),
        }]);
        let mut runner = runner_for(Arc::clone(&repo)).await;

        runner.reveal().unwrap();
        let err = runner.grade(Grade::Good).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::SaveFailed {
                card_id: 1,
                grade: Grade::Good,
                source: RepositoryError::Rejected { status: 401, .. },
            }
        ));
        assert_eq!(repo.save_calls(), 1);
        assert!(matches!(runner.state(), SessionState::Revealed { card_id: 1, .. }));
        assert_eq!(runner.pending_grade(), Some(Grade::Good));
        assert!(repo.inner.stored_state(1).is_none());
    }

    #[tokio::test]
    async fn conflict_on_deleted_card_drops_it() {
        let repo = Arc::new(ScriptedRepository::with_cards(&[1, 2]));
        repo.fail_next_saves(vec![RepositoryError::Conflict(1)]);
        let mut runner = runner_for(Arc::clone(&repo)).await;

        repo.inner.remove_flashcard(1);
        runner.reveal().unwrap();
        let state = runner.grade(Grade::Good).await.unwrap().clone();

        assert_eq!(
            state,
            SessionState::Presenting {
                card_id: 2,
                front: "front 2".to_string()
            }
        );
        assert_eq!(repo.save_calls(), 1);
        assert_eq!(runner.summary().cards_dropped, 1);
        assert_eq!(runner.summary().cards_reviewed, 0);
        assert_eq!(runner.pending_grade(), None);
    }

    #[tokio::test]
    async fn save_finishes_after_caller_gives_up() {
        let repo = Arc::new(ScriptedRepository {
            save_delay: Some(std::time::Duration::from_millis(50)),
            ..ScriptedRepository::with_cards(&[1])
        });
        let mut runner = runner_for(Arc::clone(&repo)).await;

        runner.reveal().unwrap();
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(5), runner.grade(Grade::Good)).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        let saved = repo.inner.stored_state(1).expect("detached save completed");

        // Resubmitting the same grade replays the identical state.
        assert_eq!(runner.pending_grade(), Some(Grade::Good));
        runner.retry_save().await.unwrap();
        assert!(runner.is_complete());
        assert_eq!(repo.inner.stored_state(1), Some(saved));
    }

    #[tokio::test]
    async fn finish_early_reports_progress() {
        let repo = Arc::new(ScriptedRepository::with_cards(&[1, 2, 3]));
        let mut runner = runner_for(repo).await;

        runner.reveal().unwrap();
        runner.grade(Grade::Good).await.unwrap();

        let summary = runner.finish();
        assert_eq!(summary.cards_reviewed, 1);
        assert_eq!(summary.finished_at, Some(start()));
    }
}
