//! Retry policy for AI calls.
//!
//! Only failures that a fresh attempt can plausibly fix are retried:
//! server errors and transport failures up to the attempt ceiling, and a
//! single extra attempt after a 429. Authentication, malformed responses and
//! timeouts surface immediately.

use std::time::Duration;

use riskbot_core::{defaults, FailureKind};

/// Attempt ceiling and backoff schedule for one logical AI call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Sleep before the second attempt; doubles for each later one.
    pub base_delay: Duration,
    /// Cap on a single sleep.
    pub max_delay: Duration,
    /// Extra attempts allowed after rate-limit responses.
    pub rate_limit_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::AI_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(defaults::AI_RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(defaults::AI_RETRY_MAX_DELAY_MS),
            rate_limit_retries: defaults::AI_RATE_LIMIT_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Decide whether to try again after attempt number `attempt` (1-based)
    /// failed with `kind`. `rate_limit_hits` counts 429s so far, this one
    /// included.
    pub fn should_retry(&self, kind: FailureKind, attempt: u32, rate_limit_hits: u32) -> bool {
        if attempt >= self.max_attempts.max(1) {
            return false;
        }
        match kind {
            FailureKind::ServerError | FailureKind::Transport => true,
            FailureKind::RateLimited => rate_limit_hits <= self.rate_limit_retries,
            _ => false,
        }
    }

    /// Sleep after failed attempt number `attempt` (1-based):
    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            rate_limit_retries: 1,
        }
    }

    #[test]
    fn test_default_policy_matches_defaults() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, defaults::AI_MAX_ATTEMPTS);
        assert_eq!(p.rate_limit_retries, 1);
    }

    #[test]
    fn test_server_error_retried_until_ceiling() {
        let p = policy();
        assert!(p.should_retry(FailureKind::ServerError, 1, 0));
        assert!(p.should_retry(FailureKind::ServerError, 2, 0));
        assert!(!p.should_retry(FailureKind::ServerError, 3, 0));
    }

    #[test]
    fn test_transport_retried_until_ceiling() {
        let p = policy();
        assert!(p.should_retry(FailureKind::Transport, 2, 0));
        assert!(!p.should_retry(FailureKind::Transport, 3, 0));
    }

    #[test]
    fn test_rate_limit_retried_once() {
        let p = policy();
        assert!(p.should_retry(FailureKind::RateLimited, 1, 1));
        assert!(!p.should_retry(FailureKind::RateLimited, 2, 2));
    }

    #[test]
    fn test_terminal_kinds_never_retried() {
        let p = policy();
        for kind in [
            FailureKind::Unauthorized,
            FailureKind::MalformedResponse,
            FailureKind::Timeout,
            FailureKind::Internal,
        ] {
            assert!(!p.should_retry(kind, 1, 0), "{} should not retry", kind);
        }
    }

    #[test]
    fn test_zero_attempts_behaves_as_one() {
        let p = RetryPolicy {
            max_attempts: 0,
            ..policy()
        };
        assert!(!p.should_retry(FailureKind::ServerError, 1, 0));
    }

    #[test]
    fn test_none_policy() {
        assert!(!RetryPolicy::none().should_retry(FailureKind::Transport, 1, 0));
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(250));
        assert_eq!(p.backoff(40), Duration::from_millis(250));
    }
}
