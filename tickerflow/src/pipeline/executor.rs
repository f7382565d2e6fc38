//! Group executor: runs one group's stages in order.

use super::{GroupSpec, Pacer, RetryDecision, RetryPolicy, WaitKind};
use crate::capabilities::CapabilityRegistry;
use crate::core::{GroupResult, Identifier, StageResult, StageStatus};
use crate::stages::{Stage, StageContext};
use crate::telemetry::{Component, EventStatus, Recorder, UsageMeter};
use crate::utils::millis;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Executes a group attempt.
///
/// Every stage gets one local retry (per the stage retry policy) before it is
/// recorded as failed. A failed stage never stops its siblings, so a group
/// attempt always runs every stage.
#[derive(Clone)]
pub struct GroupExecutor {
    registry: Arc<CapabilityRegistry>,
    pacer: Arc<dyn Pacer>,
    stage_retry: RetryPolicy,
}

impl std::fmt::Debug for GroupExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupExecutor")
            .field("registry", &self.registry)
            .field("stage_retry", &self.stage_retry)
            .finish_non_exhaustive()
    }
}

impl GroupExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(registry: Arc<CapabilityRegistry>, pacer: Arc<dyn Pacer>, stage_retry: RetryPolicy) -> Self {
        Self {
            registry,
            pacer,
            stage_retry,
        }
    }

    /// Runs every stage of `group` once (plus local retries).
    ///
    /// `prior` holds the results of groups that already concluded in this
    /// run; `attempt` is the group attempt number recorded in telemetry.
    pub async fn execute(
        &self,
        group: &GroupSpec,
        identifier: &Identifier,
        prior: &[GroupResult],
        attempt: u32,
        recorder: &mut Recorder,
    ) -> GroupResult {
        info!(
            identifier = %identifier,
            group = %group.id,
            attempt,
            stages = group.stages.len(),
            "Starting group"
        );
        let span = recorder.start(Component::Group, &group.id, attempt);
        let usage = recorder.usage_meter();

        let mut results: Vec<StageResult> = Vec::with_capacity(group.stages.len());
        for (index, stage) in group.stages.iter().enumerate() {
            if index > 0 {
                self.pacer.wait(WaitKind::StageGap, group.stage_delay).await;
            }
            let result = self
                .run_stage(stage.as_ref(), identifier, prior, &results, &usage, recorder)
                .await;
            results.push(result);
        }

        let result = GroupResult::from_stage_results(&group.id, results, attempt);
        let error = match result.status() {
            crate::core::GroupStatus::TotalFailure => result
                .stage_results()
                .last()
                .and_then(|r| r.error.clone()),
            _ => None,
        };
        info!(
            group = %group.id,
            attempt,
            status = %result.status(),
            failed = ?result.failed_stages(),
            "Group concluded"
        );
        recorder.finish(span, EventStatus::from(result.status()), error);
        result
    }

    async fn run_stage(
        &self,
        stage: &dyn Stage,
        identifier: &Identifier,
        prior: &[GroupResult],
        earlier: &[StageResult],
        usage: &UsageMeter,
        recorder: &mut Recorder,
    ) -> StageResult {
        let started_at = Utc::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let span = recorder.start(Component::Stage, stage.id(), attempt);
            let ctx = StageContext::new(identifier, recorder.run_id(), &self.registry, usage)
                .with_prior_groups(prior)
                .with_earlier_stages(earlier)
                .with_attempt(attempt);

            let error = match stage.execute(&ctx).await {
                Ok(payload) => {
                    recorder.finish(span, EventStatus::Ok, None);
                    debug!(stage = %stage.id(), attempt, "Stage succeeded");
                    return StageResult::ok(stage.id(), payload, attempt, started_at);
                }
                Err(err) => err.to_string(),
            };
            recorder.finish(span, EventStatus::Failed, Some(error.clone()));

            match self.stage_retry.decide(StageStatus::Failed, attempt) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        stage = %stage.id(),
                        attempt,
                        delay_ms = millis(delay),
                        error = %error,
                        "Stage failed, retrying"
                    );
                    self.pacer.wait(WaitKind::StageRetry, delay).await;
                }
                RetryDecision::GiveUp | RetryDecision::Accept => {
                    warn!(stage = %stage.id(), attempts = attempt, error = %error, "Stage failed");
                    return StageResult::failed(stage.id(), error, attempt, started_at);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GroupStatus, RunId};
    use crate::testing::{RecordingPacer, ScriptedStage};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn executor(pacer: Arc<RecordingPacer>) -> GroupExecutor {
        GroupExecutor::new(Arc::new(CapabilityRegistry::new()), pacer, RetryPolicy::stage())
    }

    fn recorder() -> Recorder {
        Recorder::new(RunId::new(), Identifier::parse("AAA").unwrap())
    }

    #[tokio::test]
    async fn test_all_stages_ok() {
        let pacer = Arc::new(RecordingPacer::new());
        let group = GroupSpec::new("technical", "Technical")
            .with_stage(Arc::new(ScriptedStage::always_ok("part_06")))
            .with_stage(Arc::new(ScriptedStage::always_ok("part_07")))
            .with_stage(Arc::new(ScriptedStage::always_ok("part_08")))
            .with_stage_delay(Duration::from_secs(90));
        let mut recorder = recorder();

        let result = executor(Arc::clone(&pacer))
            .execute(&group, &Identifier::parse("AAA").unwrap(), &[], 1, &mut recorder)
            .await;

        assert_eq!(result.status(), GroupStatus::Ok);
        assert_eq!(
            pacer.waits(),
            vec![
                (WaitKind::StageGap, Duration::from_secs(90)),
                (WaitKind::StageGap, Duration::from_secs(90)),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_stage_does_not_stop_siblings() {
        let pacer = Arc::new(RecordingPacer::new());
        let failing = Arc::new(ScriptedStage::always_fail("part_09"));
        let after = Arc::new(ScriptedStage::always_ok("part_10"));
        let group = GroupSpec::new("sentiment", "Sentiment")
            .with_stage(failing.clone())
            .with_stage(after.clone());
        let mut recorder = recorder();

        let result = executor(Arc::clone(&pacer))
            .execute(&group, &Identifier::parse("AAA").unwrap(), &[], 1, &mut recorder)
            .await;

        assert_eq!(result.status(), GroupStatus::PartialFailure);
        assert_eq!(failing.calls(), 2);
        assert_eq!(after.calls(), 1);
        assert_eq!(result.stage_results()[0].attempt_count, 2);
        assert_eq!(
            pacer.waits(),
            vec![
                (WaitKind::StageRetry, Duration::from_millis(1500)),
                (WaitKind::StageGap, Duration::ZERO),
            ]
        );
    }

    #[tokio::test]
    async fn test_local_retry_absorbs_transient_failure() {
        let pacer = Arc::new(RecordingPacer::new());
        let flaky = Arc::new(ScriptedStage::flaky("part_12", 1));
        let group = GroupSpec::new("macro", "Macro").with_stage(flaky.clone());
        let mut recorder = recorder();

        let result = executor(pacer)
            .execute(&group, &Identifier::parse("AAA").unwrap(), &[], 1, &mut recorder)
            .await;

        assert_eq!(result.status(), GroupStatus::Ok);
        assert_eq!(result.stage_results()[0].attempt_count, 2);
        assert_eq!(flaky.calls(), 2);

        let stage_events = recorder.events().iter().filter(|e| e.component == Component::Stage).count();
        assert_eq!(stage_events, 2);
    }

    #[tokio::test]
    async fn test_total_failure() {
        let pacer = Arc::new(RecordingPacer::new());
        let group = GroupSpec::new("macro", "Macro")
            .with_stage(Arc::new(ScriptedStage::always_fail("part_12")))
            .with_stage(Arc::new(ScriptedStage::always_fail("part_13")));
        let mut recorder = recorder();

        let result = executor(pacer)
            .execute(&group, &Identifier::parse("AAA").unwrap(), &[], 1, &mut recorder)
            .await;

        assert_eq!(result.status(), GroupStatus::TotalFailure);
        let group_event = recorder.events().last().unwrap();
        assert_eq!(group_event.component, Component::Group);
        assert_eq!(group_event.status, EventStatus::Failed);
        assert!(group_event.error.is_some());
    }
}
