//! Lease lock over a sentinel file.
//!
//! The lock file's existence means "held". Its JSON body names the owner
//! and the acquisition time; a lease older than its TTL is abandoned and any
//! caller may reclaim it.
//!
//! The body is written to a temporary file first and linked into place
//! without overwriting, so the lock file is never observed empty or torn.

use super::atomic::parent_dir;
use crate::errors::TickerflowError;
use crate::utils::{generate_uuid_v7, millis};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Contents of a held lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Owner token, unique per acquisition.
    pub owner: String,
    /// When the lease was taken.
    pub acquired_at: DateTime<Utc>,
    /// Lease time-to-live in milliseconds.
    pub ttl_ms: u64,
    /// Process id of the holder, for operators.
    pub pid: u32,
}

/// Returns true if a lease taken at `acquired_at` has outlived `ttl` at `now`.
///
/// A lease exactly `ttl` old is still live.
#[must_use]
pub fn is_stale(now: DateTime<Utc>, acquired_at: DateTime<Utc>, ttl: Duration) -> bool {
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => now - acquired_at > ttl,
        Err(_) => false,
    }
}

/// What the current holder of a lock file looks like.
#[derive(Debug)]
enum Holder {
    /// The file vanished between the create attempt and the read.
    Gone,
    Live,
    Stale(Option<LeaseRecord>),
}

/// Factory for lease guards on one lock file.
#[derive(Debug, Clone)]
pub struct LeaseLock {
    path: PathBuf,
    ttl: Duration,
    timeout: Duration,
    poll: Duration,
}

impl LeaseLock {
    /// Creates a lock handle. Nothing touches the filesystem until
    /// [`LeaseLock::acquire`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, ttl: Duration, timeout: Duration, poll: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
            timeout,
            poll,
        }
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquires the lease, waiting at most the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TickerflowError::QueueLockTimeout`] if a live lease is held
    /// for the whole wait, or an I/O error if the lock file cannot be created.
    pub async fn acquire(&self) -> Result<LeaseGuard, TickerflowError> {
        let started = tokio::time::Instant::now();
        let mut reclaimed = false;

        loop {
            let record = LeaseRecord {
                owner: generate_uuid_v7().to_string(),
                acquired_at: Utc::now(),
                ttl_ms: millis(self.ttl),
                pid: std::process::id(),
            };

            match self.try_create(&record) {
                Ok(()) => {
                    debug!(path = %self.path.display(), owner = %record.owner, reclaimed, "Queue lock acquired");
                    return Ok(LeaseGuard {
                        path: self.path.clone(),
                        owner: record.owner,
                        reclaimed,
                        released: false,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }

            match self.inspect_holder() {
                Holder::Gone => continue,
                Holder::Stale(previous) => {
                    if self.reclaim(previous.as_ref()) {
                        reclaimed = true;
                        continue;
                    }
                }
                Holder::Live => {}
            }

            let waited = started.elapsed();
            if waited >= self.timeout {
                return Err(TickerflowError::QueueLockTimeout {
                    path: self.path.clone(),
                    waited,
                });
            }
            tokio::time::sleep(self.poll.min(self.timeout - waited)).await;
        }
    }

    fn try_create(&self, record: &LeaseRecord) -> std::io::Result<()> {
        let body = serde_json::to_vec(record).map_err(std::io::Error::other)?;
        let mut temp = tempfile::Builder::new()
            .prefix(".lease")
            .tempfile_in(parent_dir(&self.path))?;
        temp.write_all(&body)?;
        temp.as_file().sync_all()?;
        temp.persist_noclobber(&self.path)
            .map(drop)
            .map_err(|err| err.error)
    }

    fn inspect_holder(&self) -> Holder {
        let now = Utc::now();
        match read_lease(&self.path) {
            Ok(Some(record)) => {
                let ttl = Duration::from_millis(record.ttl_ms);
                if is_stale(now, record.acquired_at, ttl) {
                    Holder::Stale(Some(record))
                } else {
                    Holder::Live
                }
            }
            Ok(None) => Holder::Gone,
            // Unreadable lock files come from outside this process family
            // (hand edits, foreign tools); judge them by modification time.
            Err(_) => match file_age(&self.path) {
                Some(age) if age > self.ttl => Holder::Stale(None),
                Some(_) => Holder::Live,
                None => Holder::Gone,
            },
        }
    }

    /// Removes a stale lock file, provided it still holds the same lease.
    fn reclaim(&self, previous: Option<&LeaseRecord>) -> bool {
        let current = read_lease(&self.path).ok().flatten();
        if current.as_ref() != previous {
            return false;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                warn!(
                    path = %self.path.display(),
                    previous_owner = previous.map_or("unknown", |r| r.owner.as_str()),
                    "Reclaimed stale queue lock"
                );
                true
            }
            Err(err) if err.kind() == ErrorKind::NotFound => true,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Failed to remove stale queue lock");
                false
            }
        }
    }
}

fn read_lease(path: &Path) -> Result<Option<LeaseRecord>, TickerflowError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn file_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(SystemTime::now().duration_since(modified).unwrap_or_default())
}

/// A held lease. Released on drop if still owned.
#[derive(Debug)]
pub struct LeaseGuard {
    path: PathBuf,
    owner: String,
    reclaimed: bool,
    released: bool,
}

impl LeaseGuard {
    /// Returns the owner token.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns true if acquiring required reclaiming an abandoned lease.
    #[must_use]
    pub fn reclaimed(&self) -> bool {
        self.reclaimed
    }

    /// Releases the lease explicitly.
    pub fn release(mut self) -> Result<(), TickerflowError> {
        self.released = true;
        self.remove_if_owned()
    }

    fn remove_if_owned(&self) -> Result<(), TickerflowError> {
        match read_lease(&self.path) {
            Ok(Some(record)) if record.owner == self.owner => {
                std::fs::remove_file(&self.path)?;
                Ok(())
            }
            Ok(Some(record)) => {
                warn!(
                    path = %self.path.display(),
                    owner = %self.owner,
                    current_owner = %record.owner,
                    "Queue lock was reclaimed by another process before release"
                );
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.remove_if_owned() {
            warn!(path = %self.path.display(), error = %err, "Failed to release queue lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock(dir: &Path, ttl_ms: u64, timeout_ms: u64) -> LeaseLock {
        LeaseLock::new(
            dir.join(".ticker_queue.lock"),
            Duration::from_millis(ttl_ms),
            Duration::from_millis(timeout_ms),
            Duration::from_millis(10),
        )
    }

    fn plant(path: &Path, acquired_at: DateTime<Utc>, ttl_ms: u64) {
        let record = LeaseRecord {
            owner: "crashed-holder".to_string(),
            acquired_at,
            ttl_ms,
            pid: 1,
        };
        std::fs::write(path, serde_json::to_vec(&record).unwrap()).unwrap();
    }

    #[test]
    fn test_is_stale_boundary() {
        let now = Utc::now();
        let ttl = Duration::from_secs(60);

        assert!(!is_stale(now, now, ttl));
        assert!(!is_stale(now, now - chrono::Duration::seconds(60), ttl));
        assert!(is_stale(now, now - chrono::Duration::seconds(61), ttl));
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock(dir.path(), 60_000, 100);

        let guard = lock.acquire().await.unwrap();
        assert!(lock.path().exists());
        assert!(!guard.reclaimed());

        let on_disk = read_lease(lock.path()).unwrap().unwrap();
        assert_eq!(on_disk.owner, guard.owner());

        guard.release().unwrap();
        assert!(!lock.path().exists());
    }

    #[tokio::test]
    async fn test_acquire_leaves_only_the_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock(dir.path(), 60_000, 50);
        let guard = lock.acquire().await.unwrap();

        // a contender fails to link its lease in and must clean up after itself
        assert!(lock.acquire().await.is_err());

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(".ticker_queue.lock")]);
        assert_eq!(read_lease(lock.path()).unwrap().unwrap().owner, guard.owner());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_contenders_never_see_a_partial_lease() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".ticker_queue.lock");
        let holders = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock(dir.path(), 60_000, 5_000);
                let holders = std::sync::Arc::clone(&holders);
                let path = path.clone();
                tokio::spawn(async move {
                    for _ in 0..5 {
                        let guard = lock.acquire().await.unwrap();
                        let held = holders.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        assert_eq!(held, 0, "two guards held at once");
                        let on_disk = read_lease(&path).unwrap().unwrap();
                        assert_eq!(on_disk.owner, guard.owner());
                        tokio::task::yield_now().await;
                        holders.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                        guard.release().unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock(dir.path(), 60_000, 100);
        {
            let _guard = lock.acquire().await.unwrap();
        }
        assert!(!lock.path().exists());
    }

    #[tokio::test]
    async fn test_fresh_lease_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock(dir.path(), 60_000, 100);
        plant(lock.path(), Utc::now(), 60_000);

        let err = lock.acquire().await.unwrap_err();

        assert!(matches!(err, TickerflowError::QueueLockTimeout { .. }));
        assert!(err.is_queue_fatal());
        // the live holder's lease is untouched
        assert_eq!(read_lease(lock.path()).unwrap().unwrap().owner, "crashed-holder");
    }

    #[tokio::test]
    async fn test_stale_lease_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock(dir.path(), 60_000, 100);
        plant(lock.path(), Utc::now() - chrono::Duration::minutes(5), 60_000);

        let guard = lock.acquire().await.unwrap();

        assert!(guard.reclaimed());
        assert_ne!(read_lease(lock.path()).unwrap().unwrap().owner, "crashed-holder");
    }

    #[tokio::test]
    async fn test_second_acquirer_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock(dir.path(), 60_000, 2_000);
        let guard = lock.acquire().await.unwrap();

        let waiter = tokio::spawn({
            let lock = lock.clone();
            async move { lock.acquire().await.map(|g| g.owner().to_string()) }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let first_owner = guard.owner().to_string();
        drop(guard);

        let second_owner = waiter.await.unwrap().unwrap();
        assert_ne!(first_owner, second_owner);
    }

    #[tokio::test]
    async fn test_release_does_not_remove_foreign_lease() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock(dir.path(), 60_000, 100);
        let guard = lock.acquire().await.unwrap();

        plant(lock.path(), Utc::now(), 60_000);
        guard.release().unwrap();

        assert!(lock.path().exists());
    }
}
