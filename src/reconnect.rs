//! Reconnection backoff policy.
//!
//! Pure backoff computation and retry bookkeeping for one stream source:
//! `backoff(attempt) = min(base * 2^attempt, cap)`. The attempt count
//! resets to zero on any success, so the first delay after a recovered
//! connection is back at the base value.
//!
//! Writes are serialized by the owning stream connection; status readers
//! take a `ReconnectSnapshot` under the same lock.

use std::time::{Duration, Instant};

/// Default first-retry delay.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default backoff ceiling (5 minutes).
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Exponential backoff state for one source.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
    attempts: u32,
    last_attempt: Option<Instant>,
    last_success: Option<Instant>,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP)
    }

    pub fn with_limits(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            attempts: 0,
            last_attempt: None,
            last_success: None,
        }
    }

    /// Delay before retry number `attempt` (zero-based): `base * 2^attempt`,
    /// capped. Monotonically non-decreasing in `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let shift = attempt.min(32);
        let delay_ms = base_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay_ms).min(self.cap)
    }

    /// Delay implied by the failures recorded so far. With no failures the
    /// next attempt may proceed immediately.
    pub fn current_delay(&self) -> Duration {
        if self.attempts == 0 {
            Duration::ZERO
        } else {
            self.backoff(self.attempts - 1)
        }
    }

    /// Whether enough time has elapsed since the last attempt to try again.
    pub fn should_attempt(&self, now: Instant) -> bool {
        match self.last_attempt {
            None => true,
            Some(at) => now.duration_since(at) >= self.current_delay(),
        }
    }

    /// Record a failed attempt: bump the counter and stamp the attempt time.
    pub fn record_failure(&mut self, now: Instant) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt = Some(now);
    }

    /// Record a successful connection: the attempt count resets so the next
    /// failure starts over at the base delay.
    pub fn record_success(&mut self, now: Instant) {
        self.attempts = 0;
        self.last_attempt = Some(now);
        self.last_success = Some(now);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn snapshot(&self) -> ReconnectSnapshot {
        ReconnectSnapshot {
            attempts: self.attempts,
            current_delay: self.current_delay(),
            last_attempt_age: self.last_attempt.map(|at| at.elapsed()),
            last_success_age: self.last_success.map(|at| at.elapsed()),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the reconnect state for status reporting.
#[derive(Debug, Clone)]
pub struct ReconnectSnapshot {
    pub attempts: u32,
    pub current_delay: Duration,
    pub last_attempt_age: Option<Duration>,
    pub last_success_age: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let policy = ReconnectPolicy::with_limits(
            Duration::from_secs(1),
            Duration::from_secs(300),
        );
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_is_monotone_and_capped() {
        let policy = ReconnectPolicy::with_limits(
            Duration::from_secs(1),
            Duration::from_secs(300),
        );
        let mut prev = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.backoff(attempt);
            assert!(delay >= prev, "backoff decreased at attempt {}", attempt);
            assert!(delay <= Duration::from_secs(300));
            prev = delay;
        }
        assert_eq!(policy.backoff(63), Duration::from_secs(300));
    }

    #[test]
    fn four_open_failures_wait_1_2_4_8_then_reset() {
        let mut policy = ReconnectPolicy::with_limits(
            Duration::from_secs(1),
            Duration::from_secs(300),
        );
        let now = Instant::now();

        let mut waits = Vec::new();
        for _ in 0..4 {
            policy.record_failure(now);
            waits.push(policy.current_delay());
        }
        assert_eq!(
            waits,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );

        policy.record_success(now);
        policy.record_failure(now);
        assert_eq!(policy.current_delay(), Duration::from_secs(1));
    }

    #[test]
    fn should_attempt_respects_elapsed_delay() {
        let mut policy = ReconnectPolicy::with_limits(
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        let start = Instant::now();
        assert!(policy.should_attempt(start));

        policy.record_failure(start);
        assert!(!policy.should_attempt(start));
        assert!(policy.should_attempt(start + Duration::from_millis(10)));
    }

    #[test]
    fn success_stamps_last_success() {
        let mut policy = ReconnectPolicy::new();
        assert!(policy.snapshot().last_success_age.is_none());
        policy.record_success(Instant::now());
        assert!(policy.snapshot().last_success_age.is_some());
        assert_eq!(policy.attempts(), 0);
    }
}
