//! Per-run JSON log files.

use super::{Component, TelemetryEvent};
use crate::core::{FinalResult, Identifier, RunId};
use crate::errors::TickerflowError;
use crate::utils::format_iso8601;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Overall outcome written into the run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every group and the synthesis produced content.
    Completed,
    /// The run succeeded with missing or retried sections.
    Partial,
    /// No usable content was produced.
    Failed,
}

impl RunOutcome {
    /// Classifies a finished run.
    #[must_use]
    pub fn from_result(result: &FinalResult) -> Self {
        if !result.is_success() {
            Self::Failed
        } else if result.notice.is_some() {
            Self::Partial
        } else {
            Self::Completed
        }
    }
}

/// Writes the run log for one run.
///
/// Logs land in `<log_dir>/<YYYY-MM-DD>/tickerflow_<id>_<YYYYMMDD>_<HHMMSS>_<run8>.json`.
/// The path is fixed when the writer is created so it can be recorded in the
/// completion ledger before or after the file exists.
#[derive(Debug, Clone)]
pub struct RunLogWriter {
    path: PathBuf,
}

impl RunLogWriter {
    /// Creates a writer whose file name is stamped with the current time.
    #[must_use]
    pub fn new(log_dir: impl AsRef<Path>, identifier: &Identifier, run_id: RunId) -> Self {
        Self::at(log_dir, identifier, run_id, Utc::now())
    }

    /// Creates a writer stamped with the given time.
    #[must_use]
    pub fn at(
        log_dir: impl AsRef<Path>,
        identifier: &Identifier,
        run_id: RunId,
        now: DateTime<Utc>,
    ) -> Self {
        let file_name = format!(
            "tickerflow_{}_{}_{}.json",
            identifier.file_stem(),
            now.format("%Y%m%d_%H%M%S"),
            run_id.short()
        );
        let path = log_dir
            .as_ref()
            .join(now.format("%Y-%m-%d").to_string())
            .join(file_name);
        Self { path }
    }

    /// Returns the log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the log for a finished run and returns its path.
    pub fn write(
        &self,
        result: &FinalResult,
        outcome: RunOutcome,
        failure_reason: Option<&str>,
    ) -> Result<PathBuf, TickerflowError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let document = Self::render(result, outcome, failure_reason);
        let bytes = serde_json::to_vec_pretty(&document)?;
        std::fs::write(&self.path, bytes)?;

        tracing::debug!(path = %self.path.display(), "Run log written");
        Ok(self.path.clone())
    }

    fn render(
        result: &FinalResult,
        outcome: RunOutcome,
        failure_reason: Option<&str>,
    ) -> serde_json::Value {
        let duration = (result.finished_at - result.started_at).num_milliseconds() as f64 / 1000.0;
        let groups: Vec<serde_json::Value> = result
            .telemetry
            .events
            .iter()
            .filter(|e| e.component == Component::Group)
            .map(group_entry)
            .collect();

        json!({
            "run_metadata": {
                "run_id": result.run_id,
                "ticker": result.identifier,
                "start_time": format_iso8601(&result.started_at),
                "end_time": format_iso8601(&result.finished_at),
                "duration_seconds": duration,
                "status": outcome,
                "failure_reason": failure_reason,
            },
            "usage_summary": result.telemetry.usage,
            "execution_timeline": result.telemetry.events,
            "group_tracking": {
                "groups": groups,
                "retried_groups": result.retried_groups,
                "unavailable_groups": result.unavailable_groups,
            },
        })
    }
}

fn group_entry(event: &TelemetryEvent) -> serde_json::Value {
    json!({
        "group": event.subject,
        "attempt": event.attempt,
        "status": event.status,
        "start": format_iso8601(&event.start),
        "end": format_iso8601(&event.end),
        "duration_ms": event.duration_ms,
        "error": event.error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GroupSection, Synthesis};
    use crate::telemetry::{EventStatus, Recorder};
    use chrono::TimeZone;

    fn final_result(available: bool) -> FinalResult {
        let identifier = Identifier::parse("005930").unwrap();
        let run_id = RunId::new();
        let mut recorder = Recorder::new(run_id, identifier.clone());
        let span = recorder.start(Component::Group, "fundamental", 1);
        recorder.finish(span, EventStatus::Ok, None);

        let section = if available {
            GroupSection::Available {
                group_id: "fundamental".to_string(),
                title: "Fundamental".to_string(),
                parts: Vec::new(),
                failed_stages: Vec::new(),
                attempts: 1,
            }
        } else {
            GroupSection::Unavailable {
                group_id: "fundamental".to_string(),
                title: "Fundamental".to_string(),
                reason: "down".to_string(),
                attempts: 2,
            }
        };

        FinalResult {
            identifier,
            run_id,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            sections: vec![section],
            retried_groups: Vec::new(),
            unavailable_groups: Vec::new(),
            synthesis: Synthesis::InsufficientData,
            notice: None,
            telemetry: recorder.into_telemetry(),
        }
    }

    #[test]
    fn test_path_layout() {
        let identifier = Identifier::parse("005930").unwrap();
        let run_id: RunId = "a1b2c3d4-0000-4000-8000-000000000000".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 11, 30, 14, 23, 45).unwrap();

        let writer = RunLogWriter::at("/logs", &identifier, run_id, now);

        assert_eq!(
            writer.path(),
            Path::new("/logs/2025-11-30/tickerflow_005930_20251130_142345_a1b2c3d4.json")
        );
    }

    #[test]
    fn test_path_sanitizes_identifier() {
        let identifier = Identifier::parse("BRK/B").unwrap();
        let run_id: RunId = "a1b2c3d4-0000-4000-8000-000000000000".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 11, 30, 14, 23, 45).unwrap();

        let writer = RunLogWriter::at("/logs", &identifier, run_id, now);

        assert_eq!(
            writer.path(),
            Path::new("/logs/2025-11-30/tickerflow_BRK_B_20251130_142345_a1b2c3d4.json")
        );
    }

    #[test]
    fn test_write_creates_log() {
        let dir = tempfile::tempdir().unwrap();
        let result = final_result(true);
        let writer = RunLogWriter::new(dir.path(), &result.identifier, result.run_id);

        let path = writer.write(&result, RunOutcome::from_result(&result), None).unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["run_metadata"]["ticker"], "005930");
        assert_eq!(written["run_metadata"]["status"], "completed");
        assert_eq!(written["group_tracking"]["groups"][0]["group"], "fundamental");
        assert_eq!(written["execution_timeline"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(RunOutcome::from_result(&final_result(true)), RunOutcome::Completed);
        assert_eq!(RunOutcome::from_result(&final_result(false)), RunOutcome::Failed);

        let mut partial = final_result(true);
        partial.notice = Some("## Partial Analysis Results Notice".to_string());
        assert_eq!(RunOutcome::from_result(&partial), RunOutcome::Partial);
    }
}
