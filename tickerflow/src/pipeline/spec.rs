//! Group and pipeline specifications.

use super::RetryPolicy;
use crate::capabilities::CapabilityRegistry;
use crate::config::TickerflowConfig;
use crate::errors::PipelineValidationError;
use crate::stages::{PromptStage, Stage, SynthesisStage};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Specification for one group: an ordered list of stages sharing a pacing
/// budget.
#[derive(Debug, Clone)]
pub struct GroupSpec {
    /// The unique group id.
    pub id: String,
    /// Human-readable title used in the report.
    pub title: String,
    /// Stages in execution order.
    pub stages: Vec<Arc<dyn Stage>>,
    /// Delay before every stage except the first.
    pub stage_delay: Duration,
    /// Delay after the group concludes (skipped for the last group).
    pub delay_after: Duration,
}

impl GroupSpec {
    /// Creates an empty group with no delays.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            stages: Vec::new(),
            stage_delay: Duration::ZERO,
            delay_after: Duration::ZERO,
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Sets the delay between stages.
    #[must_use]
    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        self.stage_delay = delay;
        self
    }

    /// Sets the delay after the group.
    #[must_use]
    pub fn with_delay_after(mut self, delay: Duration) -> Self {
        self.delay_after = delay;
        self
    }

    /// Returns the stage ids in order.
    #[must_use]
    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.id()).collect()
    }
}

/// Specification for the whole pipeline: groups, synthesis, pacing around
/// synthesis and the retry policy of each level.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    /// Groups in execution order.
    pub groups: Vec<GroupSpec>,
    /// The final synthesis stage.
    pub synthesis: Arc<dyn Stage>,
    /// Delay before synthesis.
    pub pre_synthesis_delay: Duration,
    /// Delay after synthesis, before handoff.
    pub post_synthesis_delay: Duration,
    /// Whole-group retry.
    pub group_retry: RetryPolicy,
    /// Local stage retry.
    pub stage_retry: RetryPolicy,
    /// Synthesis retry.
    pub synthesis_retry: RetryPolicy,
}

impl PipelineSpec {
    /// Creates a pipeline with no groups and default retry policies.
    #[must_use]
    pub fn new(synthesis: Arc<dyn Stage>) -> Self {
        Self {
            groups: Vec::new(),
            synthesis,
            pre_synthesis_delay: Duration::ZERO,
            post_synthesis_delay: Duration::ZERO,
            group_retry: RetryPolicy::group(),
            stage_retry: RetryPolicy::stage(),
            synthesis_retry: RetryPolicy::group(),
        }
    }

    /// Builds the prompt-driven pipeline described by a config.
    #[must_use]
    pub fn from_config(config: &TickerflowConfig) -> Self {
        let inference = &config.provider.inference;
        let stage_delay = Duration::from_secs(config.pacing.stage_delay_secs);

        let groups = config
            .groups
            .iter()
            .map(|group| {
                let spec = GroupSpec::new(&group.id, &group.title)
                    .with_stage_delay(stage_delay)
                    .with_delay_after(Duration::from_secs(group.delay_after_secs));
                group.stages.iter().fold(spec, |spec, stage| {
                    let prompt = stage
                        .data
                        .iter()
                        .fold(PromptStage::new(&stage.id, &stage.title, inference), |p, d| {
                            p.with_data(d)
                        })
                        .with_instructions(&stage.instructions);
                    spec.with_stage(Arc::new(prompt))
                })
            })
            .collect();

        let synthesis = SynthesisStage::new(&config.synthesis.id, &config.synthesis.title, inference)
            .with_instructions(&config.synthesis.instructions);

        Self {
            groups,
            synthesis: Arc::new(synthesis),
            pre_synthesis_delay: Duration::from_secs(config.pacing.pre_synthesis_delay_secs),
            post_synthesis_delay: Duration::from_secs(config.pacing.post_synthesis_delay_secs),
            group_retry: config.retry.group.clone(),
            stage_retry: config.retry.stage.clone(),
            synthesis_retry: config.retry.synthesis.clone(),
        }
    }

    /// Appends a group.
    #[must_use]
    pub fn with_group(mut self, group: GroupSpec) -> Self {
        self.groups.push(group);
        self
    }

    /// Sets the delays around synthesis.
    #[must_use]
    pub fn with_synthesis_delays(mut self, pre: Duration, post: Duration) -> Self {
        self.pre_synthesis_delay = pre;
        self.post_synthesis_delay = post;
        self
    }

    /// Sets the whole-group retry policy.
    #[must_use]
    pub fn with_group_retry(mut self, policy: RetryPolicy) -> Self {
        self.group_retry = policy;
        self
    }

    /// Sets the local stage retry policy.
    #[must_use]
    pub fn with_stage_retry(mut self, policy: RetryPolicy) -> Self {
        self.stage_retry = policy;
        self
    }

    /// Sets the synthesis retry policy.
    #[must_use]
    pub fn with_synthesis_retry(mut self, policy: RetryPolicy) -> Self {
        self.synthesis_retry = policy;
        self
    }

    /// Total number of stages, synthesis included.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.groups.iter().map(|g| g.stages.len()).sum::<usize>() + 1
    }

    /// Validates the structure and resolves every declared capability.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending groups or stages if there are
    /// no groups, a group is empty, ids collide, or a stage requires a
    /// capability the registry cannot provide with the right kind.
    pub fn validate(&self, registry: &CapabilityRegistry) -> Result<(), PipelineValidationError> {
        if self.groups.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no groups"));
        }

        let mut group_ids = HashSet::new();
        for group in &self.groups {
            if group.id.trim().is_empty() {
                return Err(PipelineValidationError::new("Group id cannot be empty"));
            }
            if !group_ids.insert(group.id.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "Duplicate group id '{}'",
                    group.id
                )));
            }
            if group.stages.is_empty() {
                return Err(PipelineValidationError::new(format!(
                    "Group '{}' has no stages",
                    group.id
                )));
            }
        }

        let all_stages = self
            .groups
            .iter()
            .flat_map(|g| g.stages.iter())
            .chain(std::iter::once(&self.synthesis));

        let mut stage_ids = HashSet::new();
        let mut duplicates = Vec::new();
        let mut unresolved = Vec::new();
        let mut problems = Vec::new();
        for stage in all_stages {
            if !stage_ids.insert(stage.id()) {
                duplicates.push(stage.id().to_string());
            }
            for requirement in stage.requires() {
                if let Err(err) = registry.resolve(&requirement) {
                    unresolved.push(stage.id().to_string());
                    problems.push(format!("{}: {err}", stage.id()));
                }
            }
        }

        if !duplicates.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Duplicate stage ids: {}",
                duplicates.join(", ")
            ))
            .with_stages(duplicates));
        }
        if !unresolved.is_empty() {
            unresolved.dedup();
            return Err(PipelineValidationError::new(format!(
                "Unresolved capabilities: {}",
                problems.join("; ")
            ))
            .with_stages(unresolved));
        }
        Ok(())
    }
}
