//! Study session configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits and retry policy for study sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on cards in one session; overflow stays due.
    pub max_cards_per_session: usize,
    /// Wait before the single retry of a failed save.
    pub retry_backoff_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_cards_per_session: 50,
            retry_backoff_ms: 500,
        }
    }
}

impl SessionConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
