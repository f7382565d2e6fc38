//! Stage, group and backlog entry statuses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The outcome of a stage after its local retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage produced a payload.
    Ok,
    /// Stage failed on every attempt.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregate status of a group attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// Every stage succeeded.
    Ok,
    /// At least one stage succeeded and at least one failed.
    PartialFailure,
    /// No stage succeeded.
    TotalFailure,
}

impl GroupStatus {
    /// Derives the group status from stage outcome counts.
    #[must_use]
    pub fn from_counts(ok: usize, failed: usize) -> Self {
        match (ok, failed) {
            (0, _) => Self::TotalFailure,
            (_, 0) => Self::Ok,
            _ => Self::PartialFailure,
        }
    }

    /// Returns true if the group produced any usable output.
    #[must_use]
    pub fn has_output(&self) -> bool {
        !matches!(self, Self::TotalFailure)
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::PartialFailure => write!(f, "partial_failure"),
            Self::TotalFailure => write!(f, "total_failure"),
        }
    }
}

/// Status of a backlog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting to be processed (possibly in flight for a run).
    Pending,
    /// Durably recorded as processed.
    Completed,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_status_from_counts() {
        assert_eq!(GroupStatus::from_counts(3, 0), GroupStatus::Ok);
        assert_eq!(GroupStatus::from_counts(2, 1), GroupStatus::PartialFailure);
        assert_eq!(GroupStatus::from_counts(0, 3), GroupStatus::TotalFailure);
        assert_eq!(GroupStatus::from_counts(0, 0), GroupStatus::TotalFailure);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(StageStatus::Failed.to_string(), "failed");
        assert_eq!(GroupStatus::PartialFailure.to_string(), "partial_failure");
        assert_eq!(EntryStatus::Completed.to_string(), "completed");
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&GroupStatus::TotalFailure).unwrap();
        assert_eq!(json, r#""total_failure""#);

        let status: EntryStatus = serde_json::from_str(r#""completed""#).unwrap();
        assert_eq!(status, EntryStatus::Completed);
    }
}
