//! Spaced-repetition review engine shared by the backend and the client.
//!
//! Provides:
//! - SM-2 scheduler with learning steps
//! - Session planner and the study session state machine
//! - Repository contract with revision-based conflict detection
//! - Shared types (Flashcard, CardState, Grade, etc.)

pub mod clock;
pub mod config;
pub mod error;
pub mod planner;
pub mod repository;
pub mod scheduler;
pub mod session;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use error::{RepositoryError, Result, SessionError};
pub use planner::{order_due_cards, SessionPlanner};
pub use repository::{resolve_write, CardStateRepository, MemoryRepository, WriteOutcome};
pub use scheduler::{schedule, Scheduler};
pub use session::{QueuedCard, SessionRunner, SessionState, SessionSummary, StudySession};
pub use types::{CardId, CardState, Deck, DeckId, Flashcard, Grade, GradeScale};
