//! Delivery of finished results to downstream collaborators.
//!
//! Rendering and transport (documents, mail) live outside this crate; the
//! binary hands results to a [`Handoff`] after the post-synthesis delay.

use crate::core::FinalResult;
use crate::errors::TickerflowError;
use crate::queue::write_atomic;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Receives a finished run.
#[async_trait]
pub trait Handoff: Send + Sync {
    /// Delivers the result. Returns where it went, if that is a path.
    async fn deliver(&self, result: &FinalResult) -> Result<Option<PathBuf>, TickerflowError>;
}

/// Writes each result as a JSON report file.
#[derive(Debug, Clone)]
pub struct JsonReportHandoff {
    reports_dir: PathBuf,
}

impl JsonReportHandoff {
    /// Creates a handoff writing into `reports_dir`.
    #[must_use]
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    /// Returns the report path for a result.
    #[must_use]
    pub fn report_path(&self, result: &FinalResult) -> PathBuf {
        self.reports_dir.join(format!(
            "{}_report_{}_{}.json",
            result.identifier.file_stem(),
            result.finished_at.format("%Y%m%d"),
            result.run_id.short()
        ))
    }

    /// Returns the reports directory.
    #[must_use]
    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }
}

#[async_trait]
impl Handoff for JsonReportHandoff {
    async fn deliver(&self, result: &FinalResult) -> Result<Option<PathBuf>, TickerflowError> {
        let path = self.report_path(result);
        write_atomic(&path, &serde_json::to_vec_pretty(result)?)?;
        info!(identifier = %result.identifier, path = %path.display(), "Report written");
        Ok(Some(path))
    }
}
