//! On-disk formats of the backlog store.
//!
//! Three files make up the store: the human-editable pending list, the
//! completion ledger and the in-flight claims. Every read is strict: a file
//! that fails to parse is reported as corruption and never rewritten.

use super::atomic::StagedWrite;
use crate::config::QueueConfig;
use crate::core::{EntryStatus, Identifier, RunId};
use crate::errors::TickerflowError;
use crate::utils::{format_iso8601, parse_timestamp};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Format version written into the JSON store files.
pub const STORE_VERSION: &str = "1.0";

fn default_version() -> String {
    STORE_VERSION.to_string()
}

/// One completed identifier in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub ticker: Identifier,
    pub status: EntryStatus,
    /// Calendar date of the run, `YYYY-MM-DD`.
    pub analysis_date: String,
    pub completion_time: String,
    #[serde(default)]
    pub run_id: Option<String>,
    /// Path of the run log for this completion.
    #[serde(default)]
    pub monitoring_log: Option<String>,
}

/// The completion ledger file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionLedger {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub tickers: Vec<CompletionRecord>,
}

impl Default for CompletionLedger {
    fn default() -> Self {
        Self {
            version: default_version(),
            last_updated: None,
            tickers: Vec::new(),
        }
    }
}

impl CompletionLedger {
    pub fn record(&self, identifier: &Identifier) -> Option<&CompletionRecord> {
        self.tickers.iter().find(|r| &r.ticker == identifier)
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.record(identifier).is_some()
    }

    pub fn push(
        &mut self,
        identifier: &Identifier,
        run_id: RunId,
        monitoring_log: Option<String>,
        now: DateTime<Utc>,
    ) {
        let stamp = format_iso8601(&now);
        self.tickers.push(CompletionRecord {
            ticker: identifier.clone(),
            status: EntryStatus::Completed,
            analysis_date: now.format("%Y-%m-%d").to_string(),
            completion_time: stamp.clone(),
            run_id: Some(run_id.to_string()),
            monitoring_log,
        });
        self.last_updated = Some(stamp);
    }

    /// Drops every record for `identifier`. Returns true if any existed.
    pub fn remove(&mut self, identifier: &Identifier, now: DateTime<Utc>) -> bool {
        let before = self.tickers.len();
        self.tickers.retain(|r| &r.ticker != identifier);
        let removed = self.tickers.len() != before;
        if removed {
            self.last_updated = Some(format_iso8601(&now));
        }
        removed
    }

    fn check(&self, path: &Path) -> Result<(), TickerflowError> {
        for record in &self.tickers {
            if record.status != EntryStatus::Completed {
                return Err(TickerflowError::corruption(
                    path,
                    format!("{} has status {} in the completion ledger", record.ticker, record.status),
                ));
            }
            parse_timestamp(&record.completion_time).map_err(|err| {
                TickerflowError::corruption(
                    path,
                    format!("{} has an unreadable completion_time: {err}", record.ticker),
                )
            })?;
        }
        Ok(())
    }
}

/// An in-flight claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub ticker: Identifier,
    pub run_id: RunId,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimRecord {
    /// Returns true once the claim has outlived `ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        super::lock::is_stale(now, self.claimed_at, ttl)
    }
}

/// The claims file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsFile {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub claims: Vec<ClaimRecord>,
}

impl Default for ClaimsFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            claims: Vec::new(),
        }
    }
}

impl ClaimsFile {
    /// Returns the live claim for `identifier`, if any.
    pub fn live(&self, identifier: &Identifier, now: DateTime<Utc>, ttl: Duration) -> Option<&ClaimRecord> {
        self.claims
            .iter()
            .find(|c| &c.ticker == identifier && !c.is_expired(now, ttl))
    }
}

/// Parses the pending list. Blank lines are skipped.
pub fn parse_pending(path: &Path, text: &str) -> Result<Vec<Identifier>, TickerflowError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            Identifier::parse(line).map_err(|err| {
                TickerflowError::corruption(path, format!("line {}: {err}", index + 1))
            })
        })
        .collect()
}

/// Renders the pending list, one identifier per line.
pub fn render_pending(identifiers: &[Identifier]) -> String {
    identifiers.iter().map(|id| format!("{id}\n")).collect()
}

/// A consistent read of all three store files.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub pending: Vec<Identifier>,
    pub ledger: CompletionLedger,
    pub claims: ClaimsFile,
}

/// File-level access to the store.
#[derive(Debug, Clone)]
pub struct StoreFiles {
    queue: PathBuf,
    completed: PathBuf,
    claims: PathBuf,
}

impl StoreFiles {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            queue: config.queue_path(),
            completed: config.completed_path(),
            claims: config.claims_path(),
        }
    }

    pub fn queue_path(&self) -> &Path {
        &self.queue
    }

    pub fn completed_path(&self) -> &Path {
        &self.completed
    }

    /// Reads and checks every file. Missing files read as empty.
    pub fn load(&self) -> Result<Snapshot, TickerflowError> {
        let pending = match read_optional(&self.queue)? {
            Some(text) => parse_pending(&self.queue, &text)?,
            None => Vec::new(),
        };
        let ledger: CompletionLedger = read_json(&self.completed)?;
        ledger.check(&self.completed)?;
        let claims: ClaimsFile = read_json(&self.claims)?;

        Ok(Snapshot {
            pending,
            ledger,
            claims,
        })
    }

    pub fn stage_pending(&self, identifiers: &[Identifier]) -> Result<StagedWrite, TickerflowError> {
        StagedWrite::stage(&self.queue, render_pending(identifiers).as_bytes())
    }

    pub fn stage_ledger(&self, ledger: &CompletionLedger) -> Result<StagedWrite, TickerflowError> {
        StagedWrite::stage(&self.completed, &serde_json::to_vec_pretty(ledger)?)
    }

    pub fn stage_claims(&self, claims: &ClaimsFile) -> Result<StagedWrite, TickerflowError> {
        StagedWrite::stage(&self.claims, &serde_json::to_vec_pretty(claims)?)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, TickerflowError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) if err.kind() == ErrorKind::InvalidData => {
            Err(TickerflowError::corruption(path, "not valid UTF-8"))
        }
        Err(err) => Err(err.into()),
    }
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, TickerflowError> {
    match read_optional(path)? {
        Some(text) if !text.trim().is_empty() => serde_json::from_str(&text)
            .map_err(|err| TickerflowError::corruption(path, err.to_string())),
        _ => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(value: &str) -> Identifier {
        Identifier::parse(value).unwrap()
    }

    #[test]
    fn test_pending_skips_blank_lines() {
        let parsed = parse_pending(Path::new("q.txt"), "AAA\n\n  BBB \n005930\n").unwrap();
        assert_eq!(parsed, vec![id("AAA"), id("BBB"), id("005930")]);
        assert_eq!(render_pending(&parsed), "AAA\nBBB\n005930\n");
    }

    #[test]
    fn test_pending_keeps_free_form_lines() {
        let parsed = parse_pending(Path::new("q.txt"), "AAA\nBRK/B\r\n BRK B \n").unwrap();
        assert_eq!(parsed, vec![id("AAA"), id("BRK/B"), id("BRK B")]);
        assert_eq!(render_pending(&parsed), "AAA\nBRK/B\nBRK B\n");
    }

    #[test]
    fn test_pending_rejects_bad_line() {
        let err = parse_pending(Path::new("q.txt"), "AAA\nB\u{0}B\n").unwrap_err();
        assert!(matches!(err, TickerflowError::QueueCorruption { .. }));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let files = StoreFiles::new(&QueueConfig::in_dir(dir.path()));

        let snapshot = files.load().unwrap();

        assert!(snapshot.pending.is_empty());
        assert!(snapshot.ledger.tickers.is_empty());
        assert!(snapshot.claims.claims.is_empty());
    }

    #[test]
    fn test_ledger_reads_naive_completion_times() {
        let dir = tempfile::tempdir().unwrap();
        let config = QueueConfig::in_dir(dir.path());
        std::fs::write(
            config.completed_path(),
            r#"{
                "version": "1.0",
                "last_updated": "2025-11-30T14:23:45.123456",
                "tickers": [{
                    "ticker": "AAPL",
                    "status": "completed",
                    "analysis_date": "2025-11-30",
                    "completion_time": "2025-11-30T14:23:45.123456",
                    "monitoring_log": "monitoring_logs/2025-11-30/x.json"
                }]
            }"#,
        )
        .unwrap();

        let snapshot = StoreFiles::new(&config).load().unwrap();

        assert!(snapshot.ledger.contains(&id("AAPL")));
        assert_eq!(snapshot.ledger.tickers[0].run_id, None);
    }

    #[test]
    fn test_ledger_with_pending_status_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let config = QueueConfig::in_dir(dir.path());
        std::fs::write(
            config.completed_path(),
            r#"{"tickers": [{"ticker": "AAPL", "status": "pending",
                "analysis_date": "2025-11-30", "completion_time": "2025-11-30T00:00:00"}]}"#,
        )
        .unwrap();

        let err = StoreFiles::new(&config).load().unwrap_err();
        assert!(matches!(err, TickerflowError::QueueCorruption { .. }));
    }

    #[test]
    fn test_ledger_push_and_remove() {
        let now = Utc::now();
        let mut ledger = CompletionLedger::default();
        ledger.push(&id("AAA"), RunId::new(), Some("log.json".into()), now);

        assert!(ledger.contains(&id("AAA")));
        assert_eq!(ledger.tickers[0].status, EntryStatus::Completed);
        assert!(ledger.remove(&id("AAA"), now));
        assert!(!ledger.remove(&id("AAA"), now));
    }

    #[test]
    fn test_expired_claim_is_not_live() {
        let now = Utc::now();
        let ttl = Duration::from_secs(60);
        let claims = ClaimsFile {
            claims: vec![
                ClaimRecord {
                    ticker: id("OLD"),
                    run_id: RunId::new(),
                    claimed_at: now - chrono::Duration::minutes(5),
                },
                ClaimRecord {
                    ticker: id("NEW"),
                    run_id: RunId::new(),
                    claimed_at: now,
                },
            ],
            ..ClaimsFile::default()
        };

        assert!(claims.live(&id("OLD"), now, ttl).is_none());
        assert!(claims.live(&id("NEW"), now, ttl).is_some());
    }
}
