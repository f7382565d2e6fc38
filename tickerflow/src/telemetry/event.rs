//! Telemetry event types.

use crate::core::{GroupStatus, Identifier, RunId, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The component that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// The pipeline scheduler (whole run).
    Scheduler,
    /// A group attempt.
    Group,
    /// A single stage attempt.
    Stage,
    /// The synthesis stage.
    Synthesis,
    /// The downstream handoff.
    Handoff,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduler => write!(f, "scheduler"),
            Self::Group => write!(f, "group"),
            Self::Stage => write!(f, "stage"),
            Self::Synthesis => write!(f, "synthesis"),
            Self::Handoff => write!(f, "handoff"),
        }
    }
}

/// Status carried by a telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Completed successfully.
    Ok,
    /// Completed with some failures.
    PartialFailure,
    /// Failed.
    Failed,
    /// Not attempted.
    Skipped,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::PartialFailure => write!(f, "partial_failure"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl From<StageStatus> for EventStatus {
    fn from(status: StageStatus) -> Self {
        match status {
            StageStatus::Ok => Self::Ok,
            StageStatus::Failed => Self::Failed,
        }
    }
}

impl From<GroupStatus> for EventStatus {
    fn from(status: GroupStatus) -> Self {
        match status {
            GroupStatus::Ok => Self::Ok,
            GroupStatus::PartialFailure => Self::PartialFailure,
            GroupStatus::TotalFailure => Self::Failed,
        }
    }
}

/// One finished span of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Sequence number within the run (1-based).
    pub sequence: u64,
    /// Run correlation id.
    pub run_id: RunId,
    /// Producing component.
    pub component: Component,
    /// Stage or group id (or the identifier for whole-run events).
    pub subject: String,
    /// Attempt number (1-based).
    pub attempt: u32,
    /// When the span started.
    pub start: DateTime<Utc>,
    /// When the span ended.
    pub end: DateTime<Utc>,
    /// Elapsed wall time in milliseconds.
    pub duration_ms: u64,
    /// Outcome.
    pub status: EventStatus,
    /// Error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TelemetryEvent {
    /// Returns the dotted event type forwarded to sinks (e.g. `group.failed`).
    #[must_use]
    pub fn event_type(&self) -> String {
        format!("{}.{}", self.component, self.status)
    }
}

/// Announces that a span of work has begun.
///
/// Sinks receive one of these per [`TelemetryEvent`], before the event
/// itself, so a live observer can see work in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanStarted {
    /// Run correlation id.
    pub run_id: RunId,
    /// The identifier the run operates on.
    pub identifier: Identifier,
    /// Producing component.
    pub component: Component,
    /// Stage or group id (or the identifier for whole-run spans).
    pub subject: String,
    /// Attempt number (1-based).
    pub attempt: u32,
    /// When the span started.
    pub at: DateTime<Utc>,
}

/// Capability usage accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Data capability calls made.
    pub data_calls: u64,
    /// Inference capability calls made.
    pub inference_calls: u64,
    /// Calls of either kind that failed.
    pub failed_calls: u64,
    /// Input tokens reported by inference capabilities.
    pub input_tokens: u64,
    /// Output tokens reported by inference capabilities.
    pub output_tokens: u64,
    /// Total tokens reported by inference capabilities.
    pub total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type() {
        let now = Utc::now();
        let event = TelemetryEvent {
            sequence: 1,
            run_id: RunId::new(),
            component: Component::Group,
            subject: "macro".to_string(),
            attempt: 2,
            start: now,
            end: now,
            duration_ms: 0,
            status: EventStatus::Failed,
            error: Some("all stages failed".to_string()),
        };
        assert_eq!(event.event_type(), "group.failed");
    }

    #[test]
    fn test_status_conversions() {
        assert_eq!(EventStatus::from(GroupStatus::TotalFailure), EventStatus::Failed);
        assert_eq!(EventStatus::from(GroupStatus::PartialFailure), EventStatus::PartialFailure);
        assert_eq!(EventStatus::from(StageStatus::Ok), EventStatus::Ok);
    }
}
