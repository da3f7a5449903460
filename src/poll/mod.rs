//! Bounded readiness polling.
//!
//! Remote resources (a socket file, an installed binary, an RPC listener)
//! take time to appear. [`poll_until`] repeats a check with a delay before
//! every attempt until it yields a value, the attempt budget is spent or the
//! deadline passes. Every policy must carry at least one of those two bounds.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep, timeout};

/// Delay applied before each attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backoff {
    /// Same delay before every attempt.
    Fixed(Duration),
    /// Attempt `i` (counting from one) waits `i` times the unit.
    Linear(Duration),
    /// The first attempt runs at once; every later one waits the delay.
    Retry(Duration),
}

impl Backoff {
    /// Returns the delay that precedes `attempt` (counting from one).
    #[must_use]
    pub fn delay_before(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => delay,
            Self::Linear(unit) => unit.saturating_mul(attempt),
            Self::Retry(_) if attempt <= 1 => Duration::ZERO,
            Self::Retry(delay) => delay,
        }
    }
}

/// Limits and pacing for a polling loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Maximum number of checks, if bounded by count.
    pub max_attempts: Option<u32>,
    /// Delay schedule between checks.
    pub backoff: Backoff,
    /// Wall-clock budget measured from the start of polling.
    pub deadline: Option<Duration>,
}

impl PollPolicy {
    /// Policy bounded by an attempt count.
    #[must_use]
    pub const fn attempts(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
            deadline: None,
        }
    }

    /// Policy bounded by a wall-clock deadline.
    #[must_use]
    pub const fn until(deadline: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: None,
            backoff,
            deadline: Some(deadline),
        }
    }
}

/// Reasons a polling loop gave up.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PollError {
    /// Raised when every permitted attempt failed.
    #[error("not ready after {attempts} attempts")]
    Exhausted {
        /// Number of checks performed.
        attempts: u32,
    },
    /// Raised when the deadline passed before a check succeeded.
    #[error("not ready after {attempts} attempts within {}s", .waited.as_secs())]
    DeadlineElapsed {
        /// Number of checks performed.
        attempts: u32,
        /// Deadline that elapsed.
        waited: Duration,
    },
    /// Raised for a policy with neither an attempt limit nor a deadline.
    #[error("polling policy has no attempt limit and no deadline")]
    Unbounded,
}

/// Runs `check` until it yields `Some`, sleeping before each attempt.
///
/// Checks run strictly one after another. When a deadline is set, the
/// sleep before an attempt is shortened so that the last attempt happens no
/// later than the deadline, and a check still running when the deadline
/// passes is dropped. A check that has already resolved is never discarded,
/// even at the deadline itself.
///
/// # Errors
///
/// Returns [`PollError::Exhausted`] or [`PollError::DeadlineElapsed`] when
/// the policy runs out, and [`PollError::Unbounded`] for a policy without
/// bounds.
pub async fn poll_until<T, F, Fut>(policy: PollPolicy, mut check: F) -> Result<T, PollError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    if policy.max_attempts.is_none() && policy.deadline.is_none() {
        return Err(PollError::Unbounded);
    }

    let started = Instant::now();
    let mut attempts = 0_u32;
    loop {
        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(PollError::Exhausted { attempts });
        }

        let attempt = attempts.saturating_add(1);
        let mut delay = policy.backoff.delay_before(attempt);
        if let Some(deadline) = policy.deadline {
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() && attempts > 0 {
                return Err(PollError::DeadlineElapsed {
                    attempts,
                    waited: deadline,
                });
            }
            delay = delay.min(remaining);
        }

        sleep(delay).await;
        attempts = attempt;
        let outcome = match policy.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_sub(started.elapsed());
                timeout(remaining, check(attempt)).await.map_err(|_| {
                    PollError::DeadlineElapsed {
                        attempts,
                        waited: deadline,
                    }
                })?
            }
            None => check(attempt).await,
        };
        if let Some(value) = outcome {
            return Ok(value);
        }
    }
}

/// Boolean form of [`poll_until`].
///
/// # Errors
///
/// Propagates the errors of [`poll_until`].
pub async fn poll_until_ready<F, Fut>(policy: PollPolicy, mut check: F) -> Result<(), PollError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = bool>,
{
    poll_until(policy, |attempt| {
        let ready = check(attempt);
        async move { ready.await.then_some(()) }
    })
    .await
}
