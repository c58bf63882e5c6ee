//! storage::retry
//!
//! Bounded retry for optimistic compare-and-swap updates.
//!
//! An operation reads fresh state, computes its change and tries to swap it
//! in. Losing the race is reported as [`Attempt::Conflict`] and the whole
//! read-modify-write runs again, up to [`RetryPolicy::attempts`] times.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::StorageError;
use crate::git::GitError;

/// Default number of attempts for one update.
pub const DEFAULT_ATTEMPTS: u32 = 5;

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 act as 1.
    pub attempts: u32,
    /// Pause before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff: Duration::from_millis(5),
        }
    }
}

impl RetryPolicy {
    /// Retry without pausing between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            backoff: Duration::ZERO,
        }
    }
}

/// Shared flag for abandoning work between attempts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    /// The attempt finished; stop retrying.
    Done(T),
    /// Another writer got there first; try again with fresh state.
    Conflict(GitError),
}

/// Run `op` until it finishes, fails, or runs out of attempts.
///
/// `op` receives the 1-based attempt number. The cancel token is checked
/// before every attempt. Hard errors from `op` are returned immediately.
///
/// # Errors
///
/// - [`StorageError::Cancelled`] if the token is set before an attempt
/// - [`StorageError::RetriesExhausted`] carrying the last conflict
pub fn retry_cas<T, F>(policy: RetryPolicy, cancel: &CancelToken, mut op: F) -> Result<T, StorageError>
where
    F: FnMut(u32) -> Result<Attempt<T>, StorageError>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let conflict = match op(attempt)? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Conflict(err) => err,
        };

        if attempt >= attempts {
            return Err(StorageError::RetriesExhausted {
                attempts,
                source: conflict,
            });
        }

        warn!(attempt, max = attempts, error = %conflict, "store update lost a race; retrying");
        if !policy.backoff.is_zero() {
            std::thread::sleep(policy.backoff * attempt);
        }
        attempt += 1;
    }
}
