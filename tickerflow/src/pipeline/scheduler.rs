//! Pipeline scheduler: the ordered-group run loop.

use super::{GroupExecutor, GroupSpec, Pacer, PipelineSpec, RetryDecision, TokioPacer, WaitKind};
use crate::capabilities::CapabilityRegistry;
use crate::core::{
    FinalResult, GroupResult, GroupSection, Identifier, MergedContext, RunId, StageStatus,
    Synthesis,
};
use crate::errors::TickerflowError;
use crate::stages::StageContext;
use crate::telemetry::{Component, EventSink, EventStatus, NoOpEventSink, Recorder};
use crate::utils::millis;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Runs a validated [`PipelineSpec`] against one identifier at a time.
///
/// Groups run strictly one after another. A group that fails totally is
/// retried per the group retry policy and, if it still fails, is accepted as
/// missing. [`PipelineScheduler::run`] never returns an error: every outcome
/// is expressed in the [`FinalResult`].
pub struct PipelineScheduler {
    spec: PipelineSpec,
    registry: Arc<CapabilityRegistry>,
    pacer: Arc<dyn Pacer>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PipelineScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineScheduler")
            .field("spec", &self.spec)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl PipelineScheduler {
    /// Validates `spec` against `registry` and builds a scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`TickerflowError::Validation`] if the spec is malformed or a
    /// stage requires a capability the registry cannot provide.
    pub fn new(spec: PipelineSpec, registry: CapabilityRegistry) -> Result<Self, TickerflowError> {
        spec.validate(&registry)?;
        Ok(Self {
            spec,
            registry: Arc::new(registry),
            pacer: Arc::new(TokioPacer),
            sink: Arc::new(NoOpEventSink),
        })
    }

    /// Replaces the pacer.
    #[must_use]
    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    /// Sets the sink every telemetry event is forwarded to.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the pipeline spec.
    #[must_use]
    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    /// Runs the whole pipeline for one identifier.
    pub async fn run(&self, identifier: Identifier, run_id: RunId) -> FinalResult {
        let started_at = Utc::now();
        let mut recorder = Recorder::new(run_id, identifier.clone()).with_sink(Arc::clone(&self.sink));
        let run_span = recorder.start(Component::Scheduler, identifier.as_str(), 1);
        info!(identifier = %identifier, run_id = %run_id, groups = self.spec.groups.len(), "Pipeline run started");

        let executor = GroupExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.pacer),
            self.spec.stage_retry.clone(),
        );

        let mut concluded: Vec<GroupResult> = Vec::with_capacity(self.spec.groups.len());
        let mut sections = Vec::with_capacity(self.spec.groups.len());
        let mut retried_groups = Vec::new();
        let last = self.spec.groups.len().saturating_sub(1);

        for (index, group) in self.spec.groups.iter().enumerate() {
            let (result, attempts) = self
                .run_group(&executor, group, &identifier, &concluded, &mut recorder)
                .await;

            if attempts > 1 && result.status().has_output() {
                retried_groups.push(group.id.clone());
            }
            sections.push(GroupSection::from_result(&group.title, &result, attempts));
            concluded.push(result);

            if index < last {
                self.pacer.wait(WaitKind::GroupGap, group.delay_after).await;
            }
        }

        let merged = MergedContext {
            identifier: identifier.clone(),
            sections,
        };
        let unavailable_groups = merged.unavailable_groups();

        let synthesis = if merged.has_data() {
            self.pacer
                .wait(WaitKind::PreSynthesis, self.spec.pre_synthesis_delay)
                .await;
            let synthesis = self.run_synthesis(&merged, &mut recorder).await;
            self.pacer
                .wait(WaitKind::PostSynthesis, self.spec.post_synthesis_delay)
                .await;
            synthesis
        } else {
            error!(identifier = %identifier, "Every group failed; skipping synthesis");
            let span = recorder.start(Component::Synthesis, self.spec.synthesis.id(), 0);
            recorder.finish(span, EventStatus::Skipped, Some("insufficient data".to_string()));
            Synthesis::InsufficientData
        };

        let notice = FinalResult::build_notice(&retried_groups, &unavailable_groups, &synthesis);
        let (status, run_error) = if !merged.has_data() {
            (EventStatus::Failed, Some("no group produced output".to_string()))
        } else if notice.is_some() {
            (EventStatus::PartialFailure, None)
        } else {
            (EventStatus::Ok, None)
        };
        recorder.finish(run_span, status, run_error);

        info!(
            identifier = %identifier,
            run_id = %run_id,
            status = %status,
            unavailable = ?unavailable_groups,
            retried = ?retried_groups,
            "Pipeline run finished"
        );

        FinalResult {
            identifier,
            run_id,
            started_at,
            finished_at: Utc::now(),
            sections: merged.sections,
            retried_groups,
            unavailable_groups,
            synthesis,
            notice,
            telemetry: recorder.into_telemetry(),
        }
    }

    /// Runs a group until the retry policy accepts or gives up. Returns the
    /// last attempt's result and the number of attempts.
    async fn run_group(
        &self,
        executor: &GroupExecutor,
        group: &GroupSpec,
        identifier: &Identifier,
        prior: &[GroupResult],
        recorder: &mut Recorder,
    ) -> (GroupResult, u32) {
        let mut attempt = 1;
        loop {
            let result = executor
                .execute(group, identifier, prior, attempt, recorder)
                .await;

            match self.spec.group_retry.decide(result.status(), attempt) {
                RetryDecision::Accept => return (result, attempt),
                RetryDecision::Retry(delay) => {
                    warn!(
                        group = %group.id,
                        attempt,
                        delay_ms = millis(delay),
                        "Group failed totally, retrying"
                    );
                    self.pacer.wait(WaitKind::GroupRetry, delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => {
                    error!(
                        group = %group.id,
                        attempts = attempt,
                        "Group failed after retry; continuing without it"
                    );
                    return (result, attempt);
                }
            }
        }
    }

    async fn run_synthesis(&self, merged: &MergedContext, recorder: &mut Recorder) -> Synthesis {
        let stage = self.spec.synthesis.as_ref();
        let usage = recorder.usage_meter();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let span = recorder.start(Component::Synthesis, stage.id(), attempt);
            let ctx = StageContext::new(&merged.identifier, recorder.run_id(), &self.registry, &usage)
                .with_merged(merged)
                .with_attempt(attempt);

            let error = match stage.execute(&ctx).await {
                Ok(content) => {
                    recorder.finish(span, EventStatus::Ok, None);
                    return Synthesis::Completed { content, attempts: attempt };
                }
                Err(err) => err.to_string(),
            };
            recorder.finish(span, EventStatus::Failed, Some(error.clone()));

            match self.spec.synthesis_retry.decide(StageStatus::Failed, attempt) {
                RetryDecision::Retry(delay) => {
                    warn!(attempt, delay_ms = millis(delay), error = %error, "Synthesis failed, retrying");
                    self.pacer.wait(WaitKind::SynthesisRetry, delay).await;
                }
                RetryDecision::GiveUp | RetryDecision::Accept => {
                    error!(attempts = attempt, error = %error, "Synthesis unavailable");
                    return Synthesis::Unavailable { error, attempts: attempt };
                }
            }
        }
    }
}
