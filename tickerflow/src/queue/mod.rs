//! Durable, lease-locked backlog of identifiers.
//!
//! Every read-then-write operation runs under the lease lock and replaces
//! store files atomically. Diagnostics (`status`, `entries`) read without
//! the lock and may observe a slightly stale snapshot.

mod atomic;
mod lock;
mod store;

pub use atomic::{write_atomic, StagedWrite};
pub use lock::{is_stale, LeaseGuard, LeaseLock, LeaseRecord};
pub use store::STORE_VERSION;

use crate::config::QueueConfig;
use crate::core::{EntryStatus, Identifier, RunId};
use crate::errors::TickerflowError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use store::{ClaimRecord, Snapshot, StoreFiles};
use tracing::{debug, info, warn};

/// An identifier handed to one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claim {
    /// The claimed identifier.
    pub identifier: Identifier,
    /// Correlation id minted for this claim.
    pub run_id: RunId,
    /// When the claim was taken.
    pub claimed_at: DateTime<Utc>,
}

/// Result of [`BacklogQueue::claim_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// An entry was claimed.
    Claimed(Claim),
    /// Nothing is pending or every pending entry is in flight.
    NotAvailable,
}

/// Result of [`BacklogQueue::mark_completed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// A completion record was written.
    Recorded,
    /// The identifier was already completed; nothing was written.
    AlreadyCompleted,
}

/// Diagnostic view of one identifier in the backlog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BacklogEntry {
    /// The identifier.
    pub identifier: Identifier,
    /// Pending or completed.
    pub status: EntryStatus,
    /// Set while a live claim exists.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Completion time as recorded in the ledger.
    pub completed_at: Option<String>,
    /// Run id of the live claim or of the completion.
    pub run_id: Option<String>,
}

/// Diagnostic counters for the backlog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Whether the pending list exists.
    pub queue_file_exists: bool,
    /// Whether the completion ledger exists.
    pub completed_file_exists: bool,
    /// Distinct identifiers in the pending list.
    pub total_in_queue: usize,
    /// Pending-list identifiers already completed.
    pub completed: usize,
    /// Pending identifiers with a live claim.
    pub in_flight: usize,
    /// Pending identifiers neither completed nor in flight.
    pub remaining: usize,
    /// What `claim_next` would hand out now.
    pub next_candidate: Option<Identifier>,
}

/// File-backed backlog queue.
#[derive(Debug, Clone)]
pub struct BacklogQueue {
    config: QueueConfig,
    files: StoreFiles,
    lock: LeaseLock,
}

impl BacklogQueue {
    /// Creates a queue over the files named in `config`.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        let files = StoreFiles::new(&config);
        let lock = LeaseLock::new(
            config.lock_path(),
            config.lock_ttl(),
            config.lock_timeout(),
            config.lock_poll(),
        );
        Self {
            config,
            files,
            lock,
        }
    }

    /// Returns the queue configuration.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Claims the first pending identifier that is neither completed nor
    /// held by a live claim.
    pub async fn claim_next(&self) -> Result<ClaimOutcome, TickerflowError> {
        let guard = self.acquire().await?;
        let snapshot = self.files.load()?;
        let now = Utc::now();

        let Some(identifier) = self.next_candidate(&snapshot, now) else {
            debug!("No claimable backlog entry");
            guard.release()?;
            return Ok(ClaimOutcome::NotAvailable);
        };

        let claim = Claim {
            identifier,
            run_id: RunId::new(),
            claimed_at: now,
        };

        let mut claims = self.prune_claims(&snapshot, now);
        claims.claims.push(ClaimRecord {
            ticker: claim.identifier.clone(),
            run_id: claim.run_id,
            claimed_at: now,
        });
        self.files.stage_claims(&claims)?.commit()?;
        guard.release()?;

        info!(identifier = %claim.identifier, run_id = %claim.run_id, "Claimed backlog entry");
        Ok(ClaimOutcome::Claimed(claim))
    }

    /// Records `identifier` as completed. A second call is a no-op.
    pub async fn mark_completed(
        &self,
        identifier: &Identifier,
        run_id: RunId,
        monitoring_log: Option<String>,
    ) -> Result<CompletionOutcome, TickerflowError> {
        let guard = self.acquire().await?;
        let outcome = match self.stage_completion(identifier, run_id, monitoring_log)? {
            Some((ledger_write, snapshot)) => {
                ledger_write.commit()?;
                self.drop_claim(&snapshot, identifier, None)?;
                info!(identifier = %identifier, run_id = %run_id, "Marked backlog entry completed");
                CompletionOutcome::Recorded
            }
            None => {
                debug!(identifier = %identifier, "Backlog entry already completed");
                CompletionOutcome::AlreadyCompleted
            }
        };
        guard.release()?;
        Ok(outcome)
    }

    /// Stages the ledger write for a completion without committing it.
    /// Returns `None` if the identifier is already completed.
    ///
    /// Callers must hold the lock.
    pub(crate) fn stage_completion(
        &self,
        identifier: &Identifier,
        run_id: RunId,
        monitoring_log: Option<String>,
    ) -> Result<Option<(StagedWrite, Snapshot)>, TickerflowError> {
        let snapshot = self.files.load()?;
        if snapshot.ledger.contains(identifier) {
            return Ok(None);
        }
        let mut ledger = snapshot.ledger.clone();
        ledger.push(identifier, run_id, monitoring_log, Utc::now());
        let write = self.files.stage_ledger(&ledger)?;
        Ok(Some((write, snapshot)))
    }

    /// Appends `identifier` to the pending list unless it is already
    /// pending or completed. Returns true if it was added.
    pub async fn enqueue(&self, identifier: &Identifier) -> Result<bool, TickerflowError> {
        let guard = self.acquire().await?;
        let snapshot = self.files.load()?;

        if snapshot.pending.contains(identifier) || snapshot.ledger.contains(identifier) {
            guard.release()?;
            return Ok(false);
        }

        let mut pending = snapshot.pending;
        pending.push(identifier.clone());
        self.files.stage_pending(&pending)?.commit()?;
        guard.release()?;

        info!(identifier = %identifier, "Enqueued backlog entry");
        Ok(true)
    }

    /// Drops the claim `run_id` holds on `identifier` so the entry can be
    /// claimed again. Returns true if a claim was removed.
    pub async fn release(&self, identifier: &Identifier, run_id: RunId) -> Result<bool, TickerflowError> {
        let guard = self.acquire().await?;
        let snapshot = self.files.load()?;
        let released = self.drop_claim(&snapshot, identifier, Some(run_id))?;
        guard.release()?;

        if released {
            info!(identifier = %identifier, run_id = %run_id, "Released backlog claim");
        }
        Ok(released)
    }

    /// Removes completion records for `identifier` so it becomes claimable
    /// again. Returns true if anything was removed.
    pub async fn reset(&self, identifier: &Identifier) -> Result<bool, TickerflowError> {
        let guard = self.acquire().await?;
        let snapshot = self.files.load()?;

        let mut ledger = snapshot.ledger.clone();
        let removed = ledger.remove(identifier, Utc::now());
        if removed {
            self.files.stage_ledger(&ledger)?.commit()?;
            warn!(identifier = %identifier, "Reset completed backlog entry");
        }
        guard.release()?;
        Ok(removed)
    }

    /// Structural check of every store file.
    pub fn validate(&self) -> Result<(), TickerflowError> {
        self.files.load().map(|_| ())
    }

    /// Diagnostic counters.
    pub fn status(&self) -> Result<QueueStatus, TickerflowError> {
        let snapshot = self.files.load()?;
        let now = Utc::now();
        let ttl = self.config.claim_ttl();

        let mut total = 0;
        let mut completed = 0;
        let mut in_flight = 0;
        for identifier in unique(&snapshot.pending) {
            total += 1;
            if snapshot.ledger.contains(identifier) {
                completed += 1;
            } else if snapshot.claims.live(identifier, now, ttl).is_some() {
                in_flight += 1;
            }
        }

        Ok(QueueStatus {
            queue_file_exists: self.files.queue_path().exists(),
            completed_file_exists: self.files.completed_path().exists(),
            total_in_queue: total,
            completed,
            in_flight,
            remaining: total - completed - in_flight,
            next_candidate: self.next_candidate(&snapshot, now),
        })
    }

    /// Diagnostic listing: pending-list entries in order, then ledger
    /// entries no longer in the pending list.
    pub fn entries(&self) -> Result<Vec<BacklogEntry>, TickerflowError> {
        let snapshot = self.files.load()?;
        let now = Utc::now();
        let ttl = self.config.claim_ttl();

        let mut listed = HashSet::new();
        let mut entries = Vec::new();

        let ledger_ids = snapshot.ledger.tickers.iter().map(|r| &r.ticker);
        for identifier in unique(&snapshot.pending).chain(ledger_ids) {
            if !listed.insert(identifier.clone()) {
                continue;
            }
            let entry = if let Some(record) = snapshot.ledger.record(identifier) {
                BacklogEntry {
                    identifier: identifier.clone(),
                    status: EntryStatus::Completed,
                    claimed_at: None,
                    completed_at: Some(record.completion_time.clone()),
                    run_id: record.run_id.clone(),
                }
            } else {
                let claim = snapshot.claims.live(identifier, now, ttl);
                BacklogEntry {
                    identifier: identifier.clone(),
                    status: EntryStatus::Pending,
                    claimed_at: claim.map(|c| c.claimed_at),
                    completed_at: None,
                    run_id: claim.map(|c| c.run_id.to_string()),
                }
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn acquire(&self) -> Result<LeaseGuard, TickerflowError> {
        let guard = self.lock.acquire().await?;
        if guard.reclaimed() {
            // the abandoning holder may have died mid-operation
            if let Err(err) = self.validate() {
                warn!(error = %err, "Store failed validation after reclaiming a stale lock");
                return Err(err);
            }
        }
        Ok(guard)
    }

    fn next_candidate(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> Option<Identifier> {
        let ttl = self.config.claim_ttl();
        snapshot
            .pending
            .iter()
            .find(|id| !snapshot.ledger.contains(id) && snapshot.claims.live(id, now, ttl).is_none())
            .cloned()
    }

    /// Claims minus expired ones and ones for completed identifiers.
    fn prune_claims(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> store::ClaimsFile {
        let ttl = self.config.claim_ttl();
        let mut claims = snapshot.claims.clone();
        claims
            .claims
            .retain(|c| !c.is_expired(now, ttl) && !snapshot.ledger.contains(&c.ticker));
        claims
    }

    fn drop_claim(
        &self,
        snapshot: &Snapshot,
        identifier: &Identifier,
        run_id: Option<RunId>,
    ) -> Result<bool, TickerflowError> {
        let mut claims = snapshot.claims.clone();
        let before = claims.claims.len();
        claims
            .claims
            .retain(|c| !(&c.ticker == identifier && run_id.map_or(true, |r| c.run_id == r)));
        if claims.claims.len() == before {
            return Ok(false);
        }
        self.files.stage_claims(&claims)?.commit()?;
        Ok(true)
    }
}

fn unique(identifiers: &[Identifier]) -> impl Iterator<Item = &Identifier> {
    let mut seen = HashSet::new();
    identifiers.iter().filter(move |id| seen.insert(*id))
}
