//! Retention policy for dated run log directories.

use crate::errors::TickerflowError;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default number of days run logs are kept.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Summary of a prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Directories removed (or that would be removed in a dry run).
    pub removed: Vec<PathBuf>,
    /// Directories skipped because their name is not a date.
    pub skipped: Vec<PathBuf>,
    /// Bytes freed (or that would be freed).
    pub freed_bytes: u64,
}

/// Removes `YYYY-MM-DD` log directories dated before `now - retention_days`.
///
/// A missing log directory yields an empty report.
pub fn prune_logs(
    log_dir: &Path,
    retention_days: u32,
    dry_run: bool,
    now: DateTime<Utc>,
) -> Result<PruneReport, TickerflowError> {
    let mut report = PruneReport::default();
    if !log_dir.exists() {
        return Ok(report);
    }

    let cutoff = (now - Duration::days(i64::from(retention_days))).date_naive();

    let mut dirs: Vec<PathBuf> = std::fs::read_dir(log_dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let Ok(date) = NaiveDate::parse_from_str(name, "%Y-%m-%d") else {
            warn!(dir = %dir.display(), "Skipping non-date log directory");
            report.skipped.push(dir);
            continue;
        };
        if date >= cutoff {
            continue;
        }

        let size = dir_size(&dir)?;
        if !dry_run {
            std::fs::remove_dir_all(&dir)?;
        }
        info!(dir = %dir.display(), bytes = size, dry_run, "Pruned run log directory");
        report.freed_bytes += size;
        report.removed.push(dir);
    }

    Ok(report)
}

fn dir_size(path: &Path) -> Result<u64, TickerflowError> {
    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn seed(root: &Path, name: &str, bytes: usize) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("run.json"), vec![b'x'; bytes]).unwrap();
    }

    #[test]
    fn test_prune_removes_old_directories() {
        let root = tempfile::tempdir().unwrap();
        seed(root.path(), "2025-01-01", 10);
        seed(root.path(), "2025-06-01", 20);
        seed(root.path(), "notes", 5);
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap();

        let report = prune_logs(root.path(), 90, false, now).unwrap();

        assert_eq!(report.removed, vec![root.path().join("2025-01-01")]);
        assert_eq!(report.skipped, vec![root.path().join("notes")]);
        assert_eq!(report.freed_bytes, 10);
        assert!(!root.path().join("2025-01-01").exists());
        assert!(root.path().join("2025-06-01").exists());
    }

    #[test]
    fn test_dry_run_keeps_files() {
        let root = tempfile::tempdir().unwrap();
        seed(root.path(), "2024-01-01", 7);
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap();

        let report = prune_logs(root.path(), 30, true, now).unwrap();

        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.freed_bytes, 7);
        assert!(root.path().join("2024-01-01").exists());
    }

    #[test]
    fn test_missing_log_dir() {
        let root = tempfile::tempdir().unwrap();
        let report = prune_logs(&root.path().join("absent"), 90, false, Utc::now()).unwrap();
        assert_eq!(report, PruneReport::default());
    }
}
