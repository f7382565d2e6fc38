//! Timed waits between pipeline steps.
//!
//! Every delay the scheduler and executor impose goes through a [`Pacer`], so
//! tests can observe the exact sequence of waits without sleeping.

use crate::utils::millis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a wait happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    /// Between two stages of the same group.
    StageGap,
    /// Before a stage's local retry.
    StageRetry,
    /// Before a whole-group retry.
    GroupRetry,
    /// After a group concludes, before the next group.
    GroupGap,
    /// Before synthesis.
    PreSynthesis,
    /// Before a synthesis retry.
    SynthesisRetry,
    /// After synthesis, before handoff.
    PostSynthesis,
}

impl fmt::Display for WaitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StageGap => "stage_gap",
            Self::StageRetry => "stage_retry",
            Self::GroupRetry => "group_retry",
            Self::GroupGap => "group_gap",
            Self::PreSynthesis => "pre_synthesis",
            Self::SynthesisRetry => "synthesis_retry",
            Self::PostSynthesis => "post_synthesis",
        };
        f.write_str(name)
    }
}

/// Performs pacing waits.
#[async_trait]
pub trait Pacer: Send + Sync {
    /// Waits for `delay`. A zero delay must return immediately.
    async fn wait(&self, kind: WaitKind, delay: Duration);
}

/// Production pacer backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn wait(&self, kind: WaitKind, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        tracing::info!(wait = %kind, delay_ms = millis(delay), "Pacing delay");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_pacer_sleeps() {
        let start = tokio::time::Instant::now();
        TokioPacer.wait(WaitKind::GroupGap, Duration::from_secs(90)).await;
        assert!(start.elapsed() >= Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_zero_delay_returns_immediately() {
        TokioPacer.wait(WaitKind::StageGap, Duration::ZERO).await;
    }
}
