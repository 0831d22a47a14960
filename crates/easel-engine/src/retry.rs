use std::time::Duration;

use easel_core::ErrorKind;
use rand::Rng as _;

/// What to do with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue the job after the delay
    Retry(Duration),
    /// Record the failure as terminal
    GiveUp,
}

/// Exponential backoff policy, pure over (attempt, error kind)
///
/// Keeping the decision free of I/O makes retry behavior testable in
/// isolation; the dispatcher owns the actual re-queueing.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        jitter: Duration,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
            max_delay,
            jitter,
        }
    }

    /// Build from configuration
    pub fn from_config(config: &easel_config::RetryConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            config.max_attempts,
            config.base_delay()?,
            config.multiplier,
            config.max_delay()?,
            config.jitter()?,
        ))
    }

    /// Maximum adapter invocations per job, including the first
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide the fate of attempt `attempt` (1-based) that failed with `kind`
    ///
    /// Terminal kinds give up immediately without spending retry budget.
    /// Retryable kinds back off exponentially with bounded random jitter,
    /// capped at `max_delay`.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if !kind.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let exponent = attempt.saturating_sub(1);
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powf(f64::from(exponent));
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::rng().random_range(Duration::ZERO..=self.jitter)
        };

        let delay = Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64())) + jitter;
        RetryDecision::Retry(delay.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            Duration::from_millis(500),
            2.0,
            Duration::from_secs(30),
            Duration::from_millis(250),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: Duration) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), 2.0, Duration::from_secs(5), jitter)
    }

    #[test]
    fn terminal_kinds_never_retry() {
        let policy = policy(Duration::ZERO);
        for kind in [ErrorKind::Auth, ErrorKind::InvalidRequest, ErrorKind::Unknown] {
            assert_eq!(policy.decide(1, kind), RetryDecision::GiveUp);
        }
    }

    #[test]
    fn retryable_kinds_back_off_exponentially() {
        let policy = policy(Duration::ZERO);
        assert_eq!(
            policy.decide(1, ErrorKind::Transient),
            RetryDecision::Retry(Duration::from_millis(100))
        );
        assert_eq!(
            policy.decide(2, ErrorKind::RateLimited),
            RetryDecision::Retry(Duration::from_millis(200))
        );
    }

    #[test]
    fn budget_exhausts_at_max_attempts() {
        let policy = policy(Duration::ZERO);
        assert_eq!(policy.decide(3, ErrorKind::Transient), RetryDecision::GiveUp);
        assert_eq!(policy.decide(4, ErrorKind::Transient), RetryDecision::GiveUp);
    }

    #[test]
    fn jitter_stays_within_bound() {
        let jitter = Duration::from_millis(50);
        let policy = policy(jitter);
        for _ in 0..100 {
            let RetryDecision::Retry(delay) = policy.decide(1, ErrorKind::Transient) else {
                panic!("expected retry");
            };
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn delay_caps_at_max_delay() {
        let policy = RetryPolicy::new(10, Duration::from_secs(4), 10.0, Duration::from_secs(5), Duration::ZERO);
        assert_eq!(
            policy.decide(5, ErrorKind::Transient),
            RetryDecision::Retry(Duration::from_secs(5))
        );
    }
}
