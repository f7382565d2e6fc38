//! Stage and group result types.

use super::{GroupStatus, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one stage after its local retry.
///
/// Stages only ever see shared references to results produced before them,
/// so a result is immutable once the executor has built it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage id.
    pub stage_id: String,
    /// Stage status.
    pub status: StageStatus,
    /// Payload produced by the stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Last error if the stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attempts made (initial + local retries).
    pub attempt_count: u32,
    /// When the first attempt started.
    pub started_at: DateTime<Utc>,
    /// When the last attempt ended.
    pub ended_at: DateTime<Utc>,
}

impl StageResult {
    /// Creates a successful stage result.
    #[must_use]
    pub fn ok(
        stage_id: impl Into<String>,
        payload: serde_json::Value,
        attempt_count: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: StageStatus::Ok,
            payload: Some(payload),
            error: None,
            attempt_count,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Creates a failed stage result.
    #[must_use]
    pub fn failed(
        stage_id: impl Into<String>,
        error: impl Into<String>,
        attempt_count: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: StageStatus::Failed,
            payload: None,
            error: Some(error.into()),
            attempt_count,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == StageStatus::Ok
    }
}

/// Aggregated result of one group attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupResult {
    group_id: String,
    stage_results: Vec<StageResult>,
    status: GroupStatus,
    attempt: u32,
}

impl GroupResult {
    /// Builds a group result, deriving its status from the stage results.
    #[must_use]
    pub fn from_stage_results(
        group_id: impl Into<String>,
        stage_results: Vec<StageResult>,
        attempt: u32,
    ) -> Self {
        let ok = stage_results.iter().filter(|r| r.is_ok()).count();
        let failed = stage_results.len() - ok;

        Self {
            group_id: group_id.into(),
            status: GroupStatus::from_counts(ok, failed),
            stage_results,
            attempt,
        }
    }

    /// Returns the group id.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Returns the stage results in execution order.
    #[must_use]
    pub fn stage_results(&self) -> &[StageResult] {
        &self.stage_results
    }

    /// Returns the aggregate status.
    #[must_use]
    pub fn status(&self) -> GroupStatus {
        self.status
    }

    /// Returns which group attempt produced this result (1-based).
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the payload of a stage by id, if it succeeded.
    #[must_use]
    pub fn payload(&self, stage_id: &str) -> Option<&serde_json::Value> {
        self.stage_results
            .iter()
            .find(|r| r.stage_id == stage_id)
            .and_then(|r| r.payload.as_ref())
    }

    /// Iterates over `(stage_id, payload)` of successful stages.
    pub fn payloads(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.stage_results
            .iter()
            .filter_map(|r| r.payload.as_ref().map(|p| (r.stage_id.as_str(), p)))
    }

    /// Returns the ids of failed stages.
    #[must_use]
    pub fn failed_stages(&self) -> Vec<&str> {
        self.stage_results
            .iter()
            .filter(|r| !r.is_ok())
            .map(|r| r.stage_id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(id: &str) -> StageResult {
        StageResult::ok(id, json!({ "text": id }), 1, Utc::now())
    }

    fn failed(id: &str) -> StageResult {
        StageResult::failed(id, "boom", 2, Utc::now())
    }

    #[test]
    fn test_group_result_all_ok() {
        let result = GroupResult::from_stage_results("technical", vec![ok("a"), ok("b")], 1);
        assert_eq!(result.status(), GroupStatus::Ok);
        assert_eq!(result.payloads().count(), 2);
        assert!(result.failed_stages().is_empty());
    }

    #[test]
    fn test_group_result_partial() {
        let result = GroupResult::from_stage_results("technical", vec![ok("a"), failed("b")], 1);
        assert_eq!(result.status(), GroupStatus::PartialFailure);
        assert_eq!(result.failed_stages(), vec!["b"]);
        assert_eq!(result.payload("a"), Some(&json!({ "text": "a" })));
        assert_eq!(result.payload("b"), None);
    }

    #[test]
    fn test_group_result_total_failure() {
        let result = GroupResult::from_stage_results("macro", vec![failed("a"), failed("b")], 2);
        assert_eq!(result.status(), GroupStatus::TotalFailure);
        assert_eq!(result.attempt(), 2);
    }

    #[test]
    fn test_stage_result_failed_fields() {
        let result = failed("part_03");
        assert!(!result.is_ok());
        assert_eq!(result.attempt_count, 2);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.duration_ms() >= 0);
    }
}
