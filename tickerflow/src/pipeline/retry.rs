//! Retry policy with configurable backoff and jitter.
//!
//! Retry is a pure decision over `(status, attempt_count)`: executors run an
//! attempt, look at the resulting status and ask the policy whether to try
//! again and after how long. No control flow is driven by unwinding.

use crate::core::{GroupStatus, StageStatus};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * multiplier^(attempt - 1)
    #[default]
    Exponential,
    /// delay = base * attempt
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter; delays are deterministic.
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Statuses a retry policy can judge.
pub trait RetryableStatus: Copy {
    /// Returns true if an attempt ending in this status should be retried.
    fn is_retryable(self) -> bool;
}

impl RetryableStatus for GroupStatus {
    fn is_retryable(self) -> bool {
        self == GroupStatus::TotalFailure
    }
}

impl RetryableStatus for StageStatus {
    fn is_retryable(self) -> bool {
        self == StageStatus::Failed
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The attempt succeeded well enough; stop.
    Accept,
    /// Retry after the specified delay.
    Retry(Duration),
    /// Attempts are exhausted; accept the failure.
    GiveUp,
}

/// Retry policy.
///
/// Fields missing from a config table fall back to [`RetryPolicy::group`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum attempts (including the initial one).
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Growth factor for exponential backoff.
    pub multiplier: f64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::group()
    }
}

impl RetryPolicy {
    /// Whole-group retry: one retry after 2s, doubling, capped at 60s.
    #[must_use]
    pub fn group() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 2000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::None,
        }
    }

    /// Local stage retry: one retry after a short fixed delay.
    #[must_use]
    pub fn stage() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 1500,
            multiplier: 1.0,
            max_delay_ms: 1500,
            backoff: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::stage()
        }
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Backoff delay before the attempt following `attempt_count` attempts,
    /// before jitter.
    #[must_use]
    pub fn backoff_delay(&self, attempt_count: u32) -> Duration {
        let base = self.base_delay_ms;
        let retries_done = attempt_count.saturating_sub(1);

        let delay = match self.backoff {
            BackoffStrategy::Exponential => {
                let factor = self.multiplier.max(0.0).powi(i32::try_from(retries_done).unwrap_or(i32::MAX));
                let scaled = base as f64 * factor;
                if scaled.is_finite() && scaled < self.max_delay_ms as f64 {
                    scaled.round() as u64
                } else {
                    self.max_delay_ms
                }
            }
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt_count.max(1))),
            BackoffStrategy::Constant => base,
        };

        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let jittered = match self.jitter {
            JitterStrategy::None => millis,
            JitterStrategy::Full => {
                if millis == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=millis)
                }
            }
            JitterStrategy::Equal => {
                let half = millis / 2;
                if half == 0 {
                    millis
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };
        Duration::from_millis(jittered)
    }

    /// Decides what to do after an attempt.
    ///
    /// `attempt_count` is the number of attempts made so far, including the
    /// one that produced `status`.
    #[must_use]
    pub fn decide<S: RetryableStatus>(&self, status: S, attempt_count: u32) -> RetryDecision {
        if !status.is_retryable() {
            return RetryDecision::Accept;
        }
        if attempt_count >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.apply_jitter(self.backoff_delay(attempt_count)))
    }

    /// Sum of all waits a permanently failing operation incurs.
    #[must_use]
    pub fn total_retry_wait(&self) -> Duration {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.backoff_delay(attempt))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_policy_defaults() {
        let policy = RetryPolicy::group();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.base_delay_ms, 2000);
        assert_eq!(policy.jitter, JitterStrategy::None);
    }

    #[test]
    fn test_decide_accepts_non_failures() {
        let policy = RetryPolicy::group();
        assert_eq!(policy.decide(GroupStatus::Ok, 1), RetryDecision::Accept);
        assert_eq!(policy.decide(GroupStatus::PartialFailure, 1), RetryDecision::Accept);
        assert_eq!(policy.decide(StageStatus::Ok, 1), RetryDecision::Accept);
    }

    #[test]
    fn test_decide_retries_once_then_gives_up() {
        let policy = RetryPolicy::group();
        assert_eq!(
            policy.decide(GroupStatus::TotalFailure, 1),
            RetryDecision::Retry(Duration::from_millis(2000))
        );
        assert_eq!(policy.decide(GroupStatus::TotalFailure, 2), RetryDecision::GiveUp);
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy::group()
            .with_max_attempts(10)
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000);

        assert_eq!(policy.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(4000));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(5000));
        assert_eq!(policy.backoff_delay(30), Duration::from_millis(5000));
    }

    #[test]
    fn test_linear_and_constant_backoff() {
        let linear = RetryPolicy::group().with_backoff(BackoffStrategy::Linear).with_base_delay_ms(100);
        assert_eq!(linear.backoff_delay(3), Duration::from_millis(300));

        let constant = RetryPolicy::stage();
        assert_eq!(constant.backoff_delay(1), Duration::from_millis(1500));
        assert_eq!(constant.backoff_delay(5), Duration::from_millis(1500));
    }

    #[test]
    fn test_full_jitter_within_bounds() {
        let policy = RetryPolicy::group()
            .with_max_attempts(5)
            .with_jitter(JitterStrategy::Full);

        for _ in 0..50 {
            match policy.decide(GroupStatus::TotalFailure, 2) {
                RetryDecision::Retry(delay) => assert!(delay <= Duration::from_millis(4000)),
                other => panic!("unexpected decision {other:?}"),
            }
        }
    }

    #[test]
    fn test_none_policy_never_retries() {
        assert_eq!(RetryPolicy::none().decide(StageStatus::Failed, 1), RetryDecision::GiveUp);
    }

    #[test]
    fn test_total_retry_wait() {
        assert_eq!(RetryPolicy::group().total_retry_wait(), Duration::from_millis(2000));
        assert_eq!(
            RetryPolicy::group().with_max_attempts(3).total_retry_wait(),
            Duration::from_millis(6000)
        );
    }
}
