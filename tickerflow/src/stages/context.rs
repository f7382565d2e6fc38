//! Read-only view handed to a stage while it runs.

use crate::capabilities::{CapabilityRegistry, Generation};
use crate::core::{GroupResult, Identifier, MergedContext, RunId, StageResult};
use crate::errors::CapabilityError;
use crate::telemetry::UsageMeter;

/// Execution context for one stage attempt.
///
/// Everything is borrowed: a stage can read earlier output of the same run
/// but can never mutate another stage's result.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    identifier: &'a Identifier,
    run_id: RunId,
    attempt: u32,
    prior_groups: &'a [GroupResult],
    earlier_stages: &'a [StageResult],
    merged: Option<&'a MergedContext>,
    registry: &'a CapabilityRegistry,
    usage: &'a UsageMeter,
}

impl std::fmt::Debug for StageContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("identifier", self.identifier)
            .field("run_id", &self.run_id)
            .field("attempt", &self.attempt)
            .field("prior_groups", &self.prior_groups.len())
            .field("earlier_stages", &self.earlier_stages.len())
            .field("has_merged", &self.merged.is_some())
            .finish()
    }
}

impl<'a> StageContext<'a> {
    /// Creates a context with no prior output.
    #[must_use]
    pub fn new(
        identifier: &'a Identifier,
        run_id: RunId,
        registry: &'a CapabilityRegistry,
        usage: &'a UsageMeter,
    ) -> Self {
        Self {
            identifier,
            run_id,
            attempt: 1,
            prior_groups: &[],
            earlier_stages: &[],
            merged: None,
            registry,
            usage,
        }
    }

    /// Sets the results of groups that already concluded.
    #[must_use]
    pub fn with_prior_groups(mut self, prior_groups: &'a [GroupResult]) -> Self {
        self.prior_groups = prior_groups;
        self
    }

    /// Sets the results of earlier stages in the same group attempt.
    #[must_use]
    pub fn with_earlier_stages(mut self, earlier_stages: &'a [StageResult]) -> Self {
        self.earlier_stages = earlier_stages;
        self
    }

    /// Sets the merged context (synthesis only).
    #[must_use]
    pub fn with_merged(mut self, merged: &'a MergedContext) -> Self {
        self.merged = Some(merged);
        self
    }

    /// Sets the attempt number (1-based).
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// The identifier under analysis.
    #[must_use]
    pub fn identifier(&self) -> &'a Identifier {
        self.identifier
    }

    /// The run correlation id.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The current attempt (1 = first try).
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Results of groups that concluded before this one.
    #[must_use]
    pub fn prior_groups(&self) -> &'a [GroupResult] {
        self.prior_groups
    }

    /// Results of stages that ran earlier in this group attempt.
    #[must_use]
    pub fn earlier_stages(&self) -> &'a [StageResult] {
        self.earlier_stages
    }

    /// The merged context, when running as synthesis.
    #[must_use]
    pub fn merged(&self) -> Option<&'a MergedContext> {
        self.merged
    }

    /// Looks up the payload of an earlier stage in this group.
    #[must_use]
    pub fn earlier_payload(&self, stage_id: &str) -> Option<&'a serde_json::Value> {
        self.earlier_stages
            .iter()
            .find(|r| r.stage_id == stage_id)
            .and_then(|r| r.payload.as_ref())
    }

    /// Looks up the payload of a stage from a prior group.
    #[must_use]
    pub fn prior_payload(&self, group_id: &str, stage_id: &str) -> Option<&'a serde_json::Value> {
        self.prior_groups
            .iter()
            .find(|g| g.group_id() == group_id)
            .and_then(|g| g.payload(stage_id))
    }

    /// Calls a data capability, recording usage.
    pub async fn fetch(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<serde_json::Value, CapabilityError> {
        let capability = self.registry.data(name)?;
        let result = capability.fetch(arguments).await;
        self.usage.record_data_call(result.is_ok());
        result
    }

    /// Calls an inference capability, recording usage.
    pub async fn infer(&self, name: &str, prompt: &str) -> Result<Generation, CapabilityError> {
        let capability = self.registry.inference(name)?;
        let result = capability.generate(prompt).await;
        match &result {
            Ok(generation) => self
                .usage
                .record_inference_call(generation.usage.as_ref(), true),
            Err(_) => self.usage.record_inference_call(None, false),
        }
        result
    }
}
