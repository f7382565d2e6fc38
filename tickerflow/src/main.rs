//! Tickerflow CLI.
//!
//! `tickerflow` with no ticker claims the next backlog entry; `tickerflow
//! <TICKER>` analyses that ticker and leaves the backlog alone.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tickerflow::config::TickerflowConfig;
use tickerflow::core::{Identifier, RunId};
use tickerflow::errors::TickerflowError;
use tickerflow::handoff::{Handoff, JsonReportHandoff};
use tickerflow::pipeline::{PipelineScheduler, PipelineSpec};
use tickerflow::queue::{BacklogQueue, ClaimOutcome};
use tickerflow::telemetry::{
    prune_logs, EventSink, LoggingEventSink, NoOpEventSink, RunLogWriter, RunOutcome,
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_RUN_FAILED: u8 = 1;
const EXIT_QUEUE_FATAL: u8 = 2;

/// Paced multi-stage ticker analysis
#[derive(Parser)]
#[command(name = "tickerflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(args_conflicts_with_subcommands = true)]
#[command(long_about = r#"
Runs the analysis pipeline for one ticker.

Examples:
  tickerflow                      # Claim and analyse the next backlog ticker
  tickerflow AAPL                 # Analyse AAPL, backlog untouched
  tickerflow queue status         # Show backlog counters
  tickerflow queue add 005930     # Append a ticker to the backlog
  tickerflow logs prune --dry-run # Show which run logs would be removed
"#)]
struct Cli {
    /// Ticker to analyse; omit to use the backlog
    ticker: Option<String>,

    /// Config file (defaults to ./tickerflow.toml when present)
    #[arg(short, long, env = "TICKERFLOW_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Backlog management
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Run log maintenance
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Show backlog counters
    Status,
    /// Show the ticker the next backlog run would claim
    Next,
    /// Append a ticker to the backlog
    Add { ticker: String },
    /// Forget that a ticker was completed
    Reset { ticker: String },
    /// Check the backlog files for corruption
    Validate,
}

#[derive(Subcommand)]
enum LogsAction {
    /// Remove dated run log directories past the retention period
    Prune {
        /// Days to keep (defaults to telemetry.retention_days)
        #[arg(long)]
        retention_days: Option<u32>,

        /// Report without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            let queue_fatal = err
                .downcast_ref::<TickerflowError>()
                .is_some_and(TickerflowError::is_queue_fatal);
            error!(error = %format!("{err:#}"), queue_fatal, "tickerflow failed");
            if queue_fatal {
                ExitCode::from(EXIT_QUEUE_FATAL)
            } else {
                ExitCode::from(EXIT_RUN_FAILED)
            }
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let (plain, json) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer().with_target(false)), None)
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = TickerflowConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Queue { action }) => queue_command(&config, action).await,
        Some(Commands::Logs {
            action: LogsAction::Prune {
                retention_days,
                dry_run,
            },
        }) => {
            let days = retention_days.unwrap_or(config.telemetry.retention_days);
            let report = prune_logs(&config.telemetry.log_dir, days, dry_run, Utc::now())?;
            let verb = if dry_run { "Would remove" } else { "Removed" };
            println!(
                "{verb} {} log directories ({} bytes), skipped {}",
                report.removed.len(),
                report.freed_bytes,
                report.skipped.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        None => {
            let explicit = cli.ticker.map(Identifier::parse).transpose()?;
            analyse(&config, explicit).await
        }
    }
}

async fn queue_command(config: &TickerflowConfig, action: QueueAction) -> Result<ExitCode> {
    let queue = BacklogQueue::new(config.queue.clone());
    match action {
        QueueAction::Status => {
            let status = queue.status()?;
            println!("Queue file:      {}", presence(status.queue_file_exists));
            println!("Completed file:  {}", presence(status.completed_file_exists));
            println!("Total in queue:  {}", status.total_in_queue);
            println!("Completed:       {}", status.completed);
            println!("In flight:       {}", status.in_flight);
            println!("Remaining:       {}", status.remaining);
            match status.next_candidate {
                Some(next) => println!("Next:            {next}"),
                None => println!("Next:            (none)"),
            }
        }
        QueueAction::Next => match queue.status()?.next_candidate {
            Some(next) => println!("{next}"),
            None => println!("No pending tickers"),
        },
        QueueAction::Add { ticker } => {
            let identifier = Identifier::parse(&ticker)?;
            if queue.enqueue(&identifier).await? {
                println!("Added {identifier}");
            } else {
                println!("{identifier} is already in the backlog");
            }
        }
        QueueAction::Reset { ticker } => {
            let identifier = Identifier::parse(&ticker)?;
            if queue.reset(&identifier).await? {
                println!("Reset {identifier}; it will be analysed again");
            } else {
                println!("{identifier} was not completed");
            }
        }
        QueueAction::Validate => {
            queue.validate()?;
            println!("Backlog store is valid");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn presence(exists: bool) -> &'static str {
    if exists {
        "present"
    } else {
        "missing"
    }
}

fn build_scheduler(config: &TickerflowConfig) -> Result<PipelineScheduler> {
    let spec = PipelineSpec::from_config(config);
    let registry = capability_registry(config)?;
    let sink: Arc<dyn EventSink> = if config.telemetry.log_events {
        Arc::new(LoggingEventSink::new(Level::INFO))
    } else {
        Arc::new(NoOpEventSink)
    };
    Ok(PipelineScheduler::new(spec, registry)?.with_sink(sink))
}

#[cfg(feature = "http-provider")]
fn capability_registry(config: &TickerflowConfig) -> Result<tickerflow::capabilities::CapabilityRegistry> {
    let bridge = tickerflow::providers::HttpBridge::new(&config.provider)?;
    Ok(bridge.registry_for(config))
}

#[cfg(not(feature = "http-provider"))]
fn capability_registry(_config: &TickerflowConfig) -> Result<tickerflow::capabilities::CapabilityRegistry> {
    anyhow::bail!("built without the http-provider feature; no capabilities are available")
}

async fn analyse(config: &TickerflowConfig, explicit: Option<Identifier>) -> Result<ExitCode> {
    // validate the pipeline before claiming so a bad setup never holds a claim
    let scheduler = build_scheduler(config)?;
    let queue = BacklogQueue::new(config.queue.clone());

    let (identifier, run_id, from_backlog) = match explicit {
        Some(identifier) => (identifier, RunId::new(), false),
        None => match queue.claim_next().await? {
            ClaimOutcome::Claimed(claim) => (claim.identifier, claim.run_id, true),
            ClaimOutcome::NotAvailable => {
                info!("No pending tickers in the backlog");
                return Ok(ExitCode::SUCCESS);
            }
        },
    };

    info!(identifier = %identifier, form = %identifier.form(), run_id = %run_id, from_backlog, "Starting analysis");
    let result = scheduler.run(identifier.clone(), run_id).await;
    let success = result.is_success();

    let writer = RunLogWriter::new(&config.telemetry.log_dir, &identifier, run_id);
    let failure = (!success).then_some("no group produced usable output");
    let log_path = match writer.write(&result, RunOutcome::from_result(&result), failure) {
        Ok(path) => Some(path),
        Err(err) => {
            warn!(error = %err, "Failed to write run log");
            None
        }
    };

    if success {
        let handoff = JsonReportHandoff::new(&config.handoff.reports_dir);
        if let Err(err) = handoff.deliver(&result).await {
            warn!(error = %err, "Report handoff failed");
        }
    }

    if from_backlog {
        if success {
            let log = log_path.map(|p| p.display().to_string());
            queue
                .mark_completed(&identifier, run_id, log)
                .await
                .with_context(|| format!("recording completion of {identifier}"))?;
        } else {
            queue.release(&identifier, run_id).await?;
            warn!(identifier = %identifier, "Run failed; ticker stays pending");
        }
    }

    if success {
        info!(identifier = %identifier, notice = result.notice.is_some(), "Analysis finished");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(identifier = %identifier, "Analysis produced no usable output");
        Ok(ExitCode::from(EXIT_RUN_FAILED))
    }
}
