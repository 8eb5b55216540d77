//! SM-2 style review scheduler.
//!
//! New and lapsed cards walk a fixed list of learning steps. Once the last step
//! is completed the card graduates into exponential scheduling, where each
//! interval is the previous one multiplied by the card's ease factor.
//!
//! Scheduling is deterministic and does no I/O: the same state, grade and
//! `now` always produce the same result.

use chrono::{DateTime, Duration, Utc};

use crate::types::{CardId, CardState, Grade};

/// Float noise allowance before rounding an interval up.
const CEIL_EPSILON: f64 = 1e-9;

/// SM-2 scheduler with configurable parameters.
#[derive(Debug, Clone)]
pub struct Scheduler {
    pub initial_ease: f64,
    pub minimum_ease: f64,
    pub lapse_ease_penalty: f64,
    pub hard_ease_penalty: f64,
    pub easy_ease_bonus: f64,
    pub hard_multiplier: f64,
    pub easy_bonus: f64,
    pub lapse_interval_days: u32,
    /// Upper bound on any review interval.
    pub maximum_interval_days: u32,
    pub learning_steps: Vec<Duration>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            initial_ease: CardState::INITIAL_EASE,
            minimum_ease: 1.3,
            lapse_ease_penalty: 0.2,
            hard_ease_penalty: 0.15,
            easy_ease_bonus: 0.15,
            hard_multiplier: 1.2,
            easy_bonus: 1.3,
            lapse_interval_days: 1,
            maximum_interval_days: Self::MAXIMUM_INTERVAL_DAYS,
            learning_steps: vec![Duration::minutes(10), Duration::days(1)],
        }
    }
}

/// Schedule with the default parameters.
pub fn schedule(state: &CardState, grade: Grade, now: DateTime<Utc>) -> CardState {
    Scheduler::default().schedule(state, grade, now)
}

impl Scheduler {
    /// Default interval cap, roughly one hundred years.
    pub const MAXIMUM_INTERVAL_DAYS: u32 = 36_500;

    /// Compute the state after grading `state` at `now`.
    pub fn schedule(&self, state: &CardState, grade: Grade, now: DateTime<Utc>) -> CardState {
        let mut next = state.clone();

        if state.repetitions == 0 {
            self.schedule_learning(&mut next, grade, now);
        } else {
            self.schedule_review(&mut next, grade, now);
        }

        next.ease_factor = next.ease_factor.max(self.minimum_ease);
        next.last_reviewed_at = Some(now);
        next.revision = state.revision.saturating_add(1);
        next
    }

    /// Fresh state for a card created at `created_at`.
    pub fn initial_state(&self, card_id: CardId, created_at: DateTime<Utc>) -> CardState {
        CardState {
            ease_factor: self.initial_ease,
            ..CardState::new(card_id, created_at)
        }
    }

    fn schedule_learning(&self, next: &mut CardState, grade: Grade, now: DateTime<Utc>) {
        let step = match grade {
            Grade::Forgot => {
                next.lapses = next.lapses.saturating_add(1);
                0
            }
            _ => next.learning_step as usize,
        };

        let Some(delay) = self.step_delay(step) else {
            // No learning steps configured.
            if grade == Grade::Forgot {
                next.interval_days = self.lapse_interval_days.min(self.maximum_interval_days);
                next.due_at = after_days(now, next.interval_days);
            } else {
                self.graduate(next, now, Duration::days(1));
            }
            return;
        };

        match grade {
            Grade::Forgot | Grade::Hard => {
                next.learning_step = step as u32;
                next.interval_days = whole_days(delay);
                next.due_at = after(now, delay);
            }
            Grade::Good | Grade::Easy => {
                let completed = step + 1;
                if completed >= self.learning_steps.len() {
                    self.graduate(next, now, delay);
                } else {
                    next.learning_step = completed as u32;
                    next.interval_days = whole_days(delay);
                    next.due_at = after(now, delay);
                }
            }
        }
    }

    fn graduate(&self, next: &mut CardState, now: DateTime<Utc>, last_step: Duration) {
        next.repetitions = 1;
        next.learning_step = 0;
        next.interval_days = whole_days(last_step).clamp(1, self.maximum_interval_days.max(1));
        next.due_at = after_days(now, next.interval_days);
    }

    fn schedule_review(&self, next: &mut CardState, grade: Grade, now: DateTime<Utc>) {
        let interval = next.interval_days as f64;
        let ease = next.ease_factor;

        match grade {
            Grade::Forgot => {
                // Lapse: back to learning
                next.repetitions = 0;
                next.learning_step = 0;
                next.lapses = next.lapses.saturating_add(1);
                next.interval_days = self.lapse_interval_days.min(self.maximum_interval_days);
                next.ease_factor = (ease - self.lapse_ease_penalty).max(self.minimum_ease);
            }
            Grade::Hard => {
                next.interval_days = self.grow(interval, self.hard_multiplier);
                next.ease_factor = (ease - self.hard_ease_penalty).max(self.minimum_ease);
                next.repetitions = next.repetitions.saturating_add(1);
            }
            Grade::Good => {
                next.interval_days = self.grow(interval, ease);
                next.repetitions = next.repetitions.saturating_add(1);
            }
            Grade::Easy => {
                next.interval_days = self.grow(interval, ease * self.easy_bonus);
                next.ease_factor = ease + self.easy_ease_bonus;
                next.repetitions = next.repetitions.saturating_add(1);
            }
        }

        next.due_at = after_days(now, next.interval_days);
    }

    /// Multiply and round up, at least one day and at most the cap.
    fn grow(&self, interval: f64, multiplier: f64) -> u32 {
        let raw = (interval * multiplier - CEIL_EPSILON).ceil();
        raw.clamp(1.0, self.maximum_interval_days.max(1) as f64) as u32
    }

    fn step_delay(&self, step: usize) -> Option<Duration> {
        self.learning_steps
            .get(step)
            .or_else(|| self.learning_steps.last())
            .copied()
    }
}

/// `now + by`, saturating at the latest representable instant.
fn after(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn after_days(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    after(now, Duration::days(days as i64))
}

fn whole_days(duration: Duration) -> u32 {
    duration.num_days().max(0) as u32
}
