//! Configuration loaded from `tickerflow.toml`.
//!
//! Every field has a serde default, so an empty file (or no file at all)
//! yields the built-in pipeline: four analysis groups, 90 second pacing and
//! a single whole-group retry.

use crate::errors::TickerflowError;
use crate::pipeline::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tickerflow.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerflowConfig {
    /// Backlog store files and lock timing.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Delays between stages and around synthesis.
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Retry policies per level.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Run logs and event forwarding.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// HTTP capability bridge.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Report handoff.
    #[serde(default)]
    pub handoff: HandoffConfig,

    /// Analysis groups, run in order.
    #[serde(default = "default_groups")]
    pub groups: Vec<GroupConfig>,

    /// The final synthesis stage.
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

impl Default for TickerflowConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            pacing: PacingConfig::default(),
            retry: RetrySettings::default(),
            telemetry: TelemetryConfig::default(),
            provider: ProviderConfig::default(),
            handoff: HandoffConfig::default(),
            groups: default_groups(),
            synthesis: SynthesisConfig::default(),
        }
    }
}

impl TickerflowConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, TickerflowError> {
        let config: Self =
            toml::from_str(input).map_err(|e| TickerflowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config file.
    pub fn load(path: &Path) -> Result<Self, TickerflowError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TickerflowError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Loads `path` if given, else `tickerflow.toml` if present, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, TickerflowError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::load(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Distinct data capability names used by the configured stages, sorted.
    #[must_use]
    pub fn data_capability_names(&self) -> Vec<String> {
        let names: std::collections::BTreeSet<&str> = self
            .groups
            .iter()
            .flat_map(|g| &g.stages)
            .flat_map(|s| s.data.iter().map(String::as_str))
            .collect();
        names.into_iter().map(str::to_string).collect()
    }

    /// Checks cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), TickerflowError> {
        if self.groups.is_empty() {
            return Err(TickerflowError::Config("at least one group is required".to_string()));
        }
        for group in &self.groups {
            if group.stages.is_empty() {
                return Err(TickerflowError::Config(format!(
                    "group '{}' has no stages",
                    group.id
                )));
            }
        }
        for (name, policy) in [
            ("group", &self.retry.group),
            ("stage", &self.retry.stage),
            ("synthesis", &self.retry.synthesis),
        ] {
            if policy.max_attempts == 0 {
                return Err(TickerflowError::Config(format!(
                    "retry.{name}.max_attempts must be at least 1"
                )));
            }
        }
        if self.queue.lock_poll_ms == 0 {
            return Err(TickerflowError::Config("queue.lock_poll_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Backlog store location and lease timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Directory holding every store file.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Pending list, one identifier per line.
    #[serde(default = "default_queue_file")]
    pub queue_file: String,

    /// Completion ledger (JSON).
    #[serde(default = "default_completed_file")]
    pub completed_file: String,

    /// In-flight claims (JSON).
    #[serde(default = "default_claims_file")]
    pub claims_file: String,

    /// Lease lock sentinel.
    #[serde(default = "default_lock_file")]
    pub lock_file: String,

    /// How long to wait for the lock before failing.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// How often to re-check a held lock.
    #[serde(default = "default_lock_poll_ms")]
    pub lock_poll_ms: u64,

    /// Age after which a held lock counts as abandoned.
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,

    /// Age after which an in-flight claim counts as abandoned.
    #[serde(default = "default_claim_ttl_ms")]
    pub claim_ttl_ms: u64,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_queue_file() -> String {
    "ticker_queue.txt".to_string()
}

fn default_completed_file() -> String {
    "analyzed_tickers.json".to_string()
}

fn default_claims_file() -> String {
    "ticker_claims.json".to_string()
}

fn default_lock_file() -> String {
    ".ticker_queue.lock".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

fn default_lock_poll_ms() -> u64 {
    50
}

fn default_lock_ttl_ms() -> u64 {
    60_000
}

fn default_claim_ttl_ms() -> u64 {
    6 * 60 * 60 * 1000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            queue_file: default_queue_file(),
            completed_file: default_completed_file(),
            claims_file: default_claims_file(),
            lock_file: default_lock_file(),
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_poll_ms: default_lock_poll_ms(),
            lock_ttl_ms: default_lock_ttl_ms(),
            claim_ttl_ms: default_claim_ttl_ms(),
        }
    }
}

impl QueueConfig {
    /// Default file names and timings under `base_dir`.
    #[must_use]
    pub fn in_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Path of the pending list.
    #[must_use]
    pub fn queue_path(&self) -> PathBuf {
        self.base_dir.join(&self.queue_file)
    }

    /// Path of the completion ledger.
    #[must_use]
    pub fn completed_path(&self) -> PathBuf {
        self.base_dir.join(&self.completed_file)
    }

    /// Path of the in-flight claims file.
    #[must_use]
    pub fn claims_path(&self) -> PathBuf {
        self.base_dir.join(&self.claims_file)
    }

    /// Path of the lease file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(&self.lock_file)
    }

    /// Lock wait timeout.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Lock re-check interval.
    #[must_use]
    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms)
    }

    /// Lease lifetime.
    #[must_use]
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    /// Claim lifetime.
    #[must_use]
    pub fn claim_ttl(&self) -> Duration {
        Duration::from_millis(self.claim_ttl_ms)
    }
}

/// Pacing delays, in seconds. Per-group delays live on [`GroupConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Delay before every stage of a group except the first.
    #[serde(default = "default_pacing_secs")]
    pub stage_delay_secs: u64,

    /// Delay after the last group, before synthesis.
    #[serde(default = "default_pacing_secs")]
    pub pre_synthesis_delay_secs: u64,

    /// Delay after synthesis, before the run returns.
    #[serde(default = "default_pacing_secs")]
    pub post_synthesis_delay_secs: u64,
}

fn default_pacing_secs() -> u64 {
    90
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            stage_delay_secs: default_pacing_secs(),
            pre_synthesis_delay_secs: default_pacing_secs(),
            post_synthesis_delay_secs: default_pacing_secs(),
        }
    }
}

/// Retry policies for each level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Whole-group retries.
    #[serde(default = "RetryPolicy::group")]
    pub group: RetryPolicy,

    /// Per-stage retries within one group attempt.
    #[serde(default = "RetryPolicy::stage")]
    pub stage: RetryPolicy,

    /// Synthesis retries.
    #[serde(default = "RetryPolicy::group")]
    pub synthesis: RetryPolicy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            group: RetryPolicy::group(),
            stage: RetryPolicy::stage(),
            synthesis: RetryPolicy::group(),
        }
    }
}

/// Run log location and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Root of the dated run log directories.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Age in days after which `logs prune` removes a log directory.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Forward every telemetry event to the tracing log.
    #[serde(default)]
    pub log_events: bool,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./monitoring_logs")
}

fn default_retention_days() -> u32 {
    crate::telemetry::DEFAULT_RETENTION_DAYS
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            retention_days: default_retention_days(),
            log_events: false,
        }
    }
}

/// HTTP capability bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the capability service.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    /// Inference capability every prompt stage calls.
    #[serde(default = "default_inference")]
    pub inference: String,

    /// Environment variable holding the bearer token, if any.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    120
}

fn default_inference() -> String {
    "analyst".to_string()
}

fn default_api_key_env() -> String {
    "TICKERFLOW_PROVIDER_KEY".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_provider_timeout_secs(),
            inference: default_inference(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl ProviderConfig {
    /// Per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where the JSON report handoff writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffConfig {
    /// Directory the JSON reports are written to.
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("./reports")
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            reports_dir: default_reports_dir(),
        }
    }
}

/// One stage of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage id, unique across the pipeline.
    pub id: String,

    /// Heading used in the prompt and the report.
    pub title: String,

    /// Data capabilities fetched before inference.
    #[serde(default)]
    pub data: Vec<String>,

    /// Extra instructions appended to the prompt.
    #[serde(default)]
    pub instructions: String,
}

/// One group of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Group id, unique across the pipeline.
    pub id: String,

    /// Section heading in the merged context.
    pub title: String,

    /// Delay after this group concludes. Ignored for the last group.
    #[serde(default)]
    pub delay_after_secs: u64,

    /// Stages, run sequentially.
    pub stages: Vec<StageConfig>,
}

/// The final synthesis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Stage id of the synthesis.
    #[serde(default = "default_synthesis_id")]
    pub id: String,

    /// Heading of the synthesis section.
    #[serde(default = "default_synthesis_title")]
    pub title: String,

    /// Extra instructions appended to the synthesis prompt.
    #[serde(default)]
    pub instructions: String,
}

fn default_synthesis_id() -> String {
    "part_16".to_string()
}

fn default_synthesis_title() -> String {
    "Comprehensive Analysis and Forecast".to_string()
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            id: default_synthesis_id(),
            title: default_synthesis_title(),
            instructions: String::new(),
        }
    }
}

fn stage(id: &str, title: &str, data: &[&str]) -> StageConfig {
    StageConfig {
        id: id.to_string(),
        title: title.to_string(),
        data: data.iter().map(|d| (*d).to_string()).collect(),
        instructions: String::new(),
    }
}

fn default_groups() -> Vec<GroupConfig> {
    vec![
        GroupConfig {
            id: "fundamental".to_string(),
            title: "Fundamental Analysis".to_string(),
            delay_after_secs: 90,
            stages: vec![
                stage("part_01", "Financial Statement Analysis", &["financial_data"]),
                stage("part_02", "Industry Status Analysis", &["web_search"]),
                stage("part_03", "Management and Corporate Governance", &["web_search"]),
                stage("part_04", "Economic Moat Analysis", &["web_search"]),
                stage("part_05", "Product and Service Analysis", &["web_search"]),
            ],
        },
        GroupConfig {
            id: "technical".to_string(),
            title: "Technical Analysis".to_string(),
            delay_after_secs: 90,
            stages: vec![
                stage("part_06", "Chart Patterns and Trendlines", &["historical_data", "financial_data"]),
                stage("part_07", "Key Technical Indicators", &["technical_indicators"]),
                stage("part_08", "Volume and Supply-Demand Analysis", &["historical_data", "technical_indicators"]),
            ],
        },
        GroupConfig {
            id: "sentiment".to_string(),
            title: "Market Sentiment Analysis".to_string(),
            delay_after_secs: 90,
            stages: vec![
                stage("part_09", "News and Disclosures", &["news_search", "market_sentiment", "guidance"]),
                stage("part_10", "Social Media and Public Opinion", &["social_search", "web_search"]),
                stage("part_11", "Comprehensive Sentiment Evaluation", &[]),
            ],
        },
        GroupConfig {
            id: "macro".to_string(),
            title: "Macroeconomic Analysis".to_string(),
            delay_after_secs: 0,
            stages: vec![
                stage("part_12", "Key Economic Indicators", &["economic_indicators"]),
                stage("part_13", "Policy Environment Analysis", &["policy_environment", "consumer_trends", "fomc"]),
                stage("part_14", "Global Economic Events", &["global_environment", "fomc"]),
                stage("part_15", "Economic Cycles and Sector Rotation", &["economic_cycle"]),
            ],
        },
    ]
}
