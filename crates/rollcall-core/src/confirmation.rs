//! Consecutive-hit gate with per-identity cooldown.
//!
//! A recognized identity is only accepted after it has been matched
//! `required` times. Once accepted it enters a cooldown during which further
//! hits are reported as recently marked instead of being counted again.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_REQUIRED_CONFIRMATIONS: u32 = 3;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// Verdict for a single above-threshold recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Counted, not yet confirmed.
    Counting { count: u32, required: u32 },
    /// Confirmed: the caller should attempt a mark now.
    Confirmed,
    /// Confirmed recently; suppressed.
    Cooldown { remaining: Duration },
}

#[derive(Debug)]
pub struct ConfirmationPolicy {
    required: u32,
    cooldown: Duration,
    counters: HashMap<String, u32>,
    last_confirmed: HashMap<String, Instant>,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REQUIRED_CONFIRMATIONS, DEFAULT_COOLDOWN)
    }
}

impl ConfirmationPolicy {
    /// `required` is clamped to at least one hit.
    pub fn new(required: u32, cooldown: Duration) -> Self {
        Self {
            required: required.max(1),
            cooldown,
            counters: HashMap::new(),
            last_confirmed: HashMap::new(),
        }
    }

    pub fn required(&self) -> u32 {
        self.required
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Record one above-threshold match of `student_id` observed at `now`.
    ///
    /// Counters are tracked per identity; a hit for one student never
    /// touches another student's counter.
    pub fn observe(&mut self, student_id: &str, now: Instant) -> Gate {
        if let Some(remaining) = self.cooldown_remaining(student_id, now) {
            return Gate::Cooldown { remaining };
        }

        let count = self.counters.entry(student_id.to_string()).or_insert(0);
        *count += 1;

        if *count >= self.required {
            *count = 0;
            self.last_confirmed.insert(student_id.to_string(), now);
            tracing::debug!(student_id, "recognition confirmed");
            Gate::Confirmed
        } else {
            Gate::Counting {
                count: *count,
                required: self.required,
            }
        }
    }

    /// Time left before `student_id` may be confirmed again, if cooling down.
    pub fn cooldown_remaining(&self, student_id: &str, now: Instant) -> Option<Duration> {
        let last = self.last_confirmed.get(student_id)?;
        let elapsed = now.saturating_duration_since(*last);
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }

    /// Current hit count for `student_id`.
    pub fn count(&self, student_id: &str) -> u32 {
        self.counters.get(student_id).copied().unwrap_or(0)
    }

    /// Zero every counter; cooldowns are kept.
    pub fn reset_counters(&mut self) {
        self.counters.clear();
    }

    /// Forget counters and cooldowns, e.g. on class switch.
    pub fn reset(&mut self) {
        self.counters.clear();
        self.last_confirmed.clear();
    }
}
