//! Reconnection backoff.

use std::time::Duration;

/// Delay before reconnection attempt number `attempt` (zero-based):
/// `min(base * 2^attempt, cap)`.
#[must_use]
pub fn backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(cap, |delay| delay.min(cap))
}

/// How the client re-establishes a lost connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff(attempt, self.base, self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

/// Attempt counter driven by a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl ReconnectState {
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Claim the next attempt.
    ///
    /// Returns the delay to wait before it, or `None` once `max_attempts`
    /// attempts have been used since the last [`reset`](Self::reset).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.policy.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    /// Forget past failures. Called when a connection reaches `Open`.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts used since the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.policy.max_attempts
    }

    #[must_use]
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}
