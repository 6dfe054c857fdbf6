//! Shared run state: per-item outcomes and aggregate counters.
//!
//! The outcome map is the only cross-worker mutable structure besides the
//! counters, so it sits behind a plain mutex while the counters are
//! atomics the progress display can read lock-free.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Final (or so-far) classification of one workshop item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Skipped,
    Timeout,
    RateLimit,
    /// "result : Locking Failed" - a state file locked by a parallel instance.
    LockFailed,
    /// "Staged file validation failed" - stale/corrupt staging files.
    ValidationFailed,
    Error,
    Unknown,
}

impl Outcome {
    pub fn name(self) -> &'static str {
        match self {
            Outcome::Success => "Success",
            Outcome::Skipped => "Skipped",
            Outcome::Timeout => "Timeout",
            Outcome::RateLimit => "RateLimit",
            Outcome::LockFailed => "LockFailed",
            Outcome::ValidationFailed => "ValidationFailed",
            Outcome::Error => "Error",
            Outcome::Unknown => "Unknown",
        }
    }

    /// Terminal outcomes are never fed back into a retry pass.
    pub fn is_terminal(self) -> bool {
        matches!(self, Outcome::Success | Outcome::Skipped)
    }
}

/// Aggregate counters, updated by workers and read by the progress display.
#[derive(Debug, Default)]
pub struct Counters {
    pub success: AtomicUsize,
    pub skipped: AtomicUsize,
    pub failed: AtomicUsize,
    pub timeout: AtomicUsize,
    pub error: AtomicUsize,
    pub rate_limit: AtomicUsize,
    pub lock_failed: AtomicUsize,
    pub validation_failed: AtomicUsize,
    pub processed: AtomicUsize,
}

/// Everything the workers, the scheduler and the retry controller share.
#[derive(Debug, Default)]
pub struct RunState {
    outcomes: Mutex<HashMap<String, Outcome>>,
    pub counters: Counters,
    /// Latched when any worker sees a rate limit; the retry controller
    /// consumes and clears it at the pass boundary.
    pub any_rate_limit: AtomicBool,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a worker's reconciled outcome for one item and bump the
    /// matching counters. `Unknown` is folded into `Error` here: by the
    /// time a worker records, "nothing observed and no files on disk" is
    /// just a failure. A previously recorded `Success` is never replaced.
    pub fn record(&self, id: &str, outcome: Outcome) -> Outcome {
        let mut map = self.outcomes.lock().unwrap();
        if map.get(id) == Some(&Outcome::Success) {
            return Outcome::Success;
        }

        let c = &self.counters;
        let outcome = match outcome {
            Outcome::Success => {
                c.success.fetch_add(1, Ordering::Relaxed);
                Outcome::Success
            }
            Outcome::Timeout => {
                c.timeout.fetch_add(1, Ordering::Relaxed);
                c.failed.fetch_add(1, Ordering::Relaxed);
                Outcome::Timeout
            }
            Outcome::RateLimit => {
                c.rate_limit.fetch_add(1, Ordering::Relaxed);
                c.failed.fetch_add(1, Ordering::Relaxed);
                Outcome::RateLimit
            }
            Outcome::LockFailed => {
                c.lock_failed.fetch_add(1, Ordering::Relaxed);
                c.failed.fetch_add(1, Ordering::Relaxed);
                Outcome::LockFailed
            }
            Outcome::ValidationFailed => {
                c.validation_failed.fetch_add(1, Ordering::Relaxed);
                c.failed.fetch_add(1, Ordering::Relaxed);
                Outcome::ValidationFailed
            }
            Outcome::Skipped => {
                c.skipped.fetch_add(1, Ordering::Relaxed);
                Outcome::Skipped
            }
            Outcome::Error | Outcome::Unknown => {
                c.error.fetch_add(1, Ordering::Relaxed);
                c.failed.fetch_add(1, Ordering::Relaxed);
                Outcome::Error
            }
        };
        c.processed.fetch_add(1, Ordering::Relaxed);
        map.insert(id.to_string(), outcome);
        outcome
    }

    /// Mark an item skipped during the pre-filter (never dispatched).
    pub fn mark_skipped(&self, id: &str) {
        let mut map = self.outcomes.lock().unwrap();
        map.insert(id.to_string(), Outcome::Skipped);
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn outcome_of(&self, id: &str) -> Option<Outcome> {
        self.outcomes.lock().unwrap().get(id).copied()
    }

    /// Items from `ids` whose recorded outcome is retriable.
    pub fn collect_failed(&self, ids: &[String]) -> Vec<String> {
        let map = self.outcomes.lock().unwrap();
        ids.iter()
            .filter(|id| matches!(map.get(*id), Some(o) if !o.is_terminal()))
            .cloned()
            .collect()
    }

    /// Count how many of `ids` currently carry the given outcome.
    pub fn count_with(&self, ids: &[String], outcome: Outcome) -> usize {
        let map = self.outcomes.lock().unwrap();
        ids.iter()
            .filter(|id| map.get(*id) == Some(&outcome))
            .count()
    }

    /// Rewind the counters for a retry set and reset each item to
    /// `Unknown`, so the aggregate totals stay consistent across passes.
    pub fn reset_for_retry(&self, ids: &[String]) {
        let mut map = self.outcomes.lock().unwrap();
        let c = &self.counters;
        for id in ids {
            let Some(outcome) = map.get_mut(id) else {
                continue;
            };
            match *outcome {
                Outcome::Timeout => c.timeout.fetch_sub(1, Ordering::Relaxed),
                Outcome::RateLimit => c.rate_limit.fetch_sub(1, Ordering::Relaxed),
                Outcome::LockFailed => c.lock_failed.fetch_sub(1, Ordering::Relaxed),
                Outcome::ValidationFailed => {
                    c.validation_failed.fetch_sub(1, Ordering::Relaxed)
                }
                _ => c.error.fetch_sub(1, Ordering::Relaxed),
            };
            c.failed.fetch_sub(1, Ordering::Relaxed);
            c.processed.fetch_sub(1, Ordering::Relaxed);
            *outcome = Outcome::Unknown;
        }
    }
}
