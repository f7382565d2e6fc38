//! Crash-safe file replacement.

use crate::errors::TickerflowError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// New contents for a file, fully written and synced but not yet visible.
///
/// Committing renames the staged file over the target. Dropping without
/// committing discards it and leaves the target untouched.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    /// Writes `bytes` to a temporary file next to `target`.
    pub fn stage(target: &Path, bytes: &[u8]) -> Result<Self, TickerflowError> {
        let dir = parent_dir(target);
        std::fs::create_dir_all(dir)?;

        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;

        Ok(Self {
            temp,
            target: target.to_path_buf(),
        })
    }

    /// Returns the file this write will replace.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically replaces the target with the staged contents.
    pub fn commit(self) -> Result<(), TickerflowError> {
        let Self { temp, target } = self;
        temp.persist(&target).map_err(|err| err.error)?;
        sync_dir(parent_dir(&target));
        Ok(())
    }
}

/// Stages and commits in one step.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), TickerflowError> {
    StagedWrite::stage(target, bytes)?.commit()
}

pub(super) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = std::fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_commit_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("completed_tickers.json");
        std::fs::write(&target, b"old").unwrap();

        write_atomic(&target, b"new").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert_eq!(file_count(dir.path()), 1);
    }

    #[test]
    fn test_dropped_write_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("completed_tickers.json");
        std::fs::write(&target, b"old").unwrap();

        let staged = StagedWrite::stage(&target, b"half-finished").unwrap();
        assert_eq!(staged.target(), target.as_path());
        drop(staged);

        assert_eq!(std::fs::read(&target).unwrap(), b"old");
        assert_eq!(file_count(dir.path()), 1);
    }

    #[test]
    fn test_creates_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("claims.json");

        write_atomic(&target, b"{}").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"{}");
    }

    #[test]
    fn test_parent_dir_of_bare_file_name() {
        assert_eq!(parent_dir(Path::new("ticker_queue.txt")), Path::new("."));
        assert_eq!(parent_dir(Path::new("a/b.txt")), Path::new("a"));
    }
}
