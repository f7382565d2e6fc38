//! # Tickerflow
//!
//! A paced, multi-stage analysis pipeline for a single identifier ("ticker"),
//! fed either explicitly or from a durable file-backed backlog.
//!
//! Tickerflow provides:
//!
//! - **Backlog queue**: lease-locked, crash-safe claim/complete over plain files
//! - **Group execution**: ordered stages with a one-shot local retry
//! - **Pipeline scheduling**: strictly sequential groups with pacing delays,
//!   whole-group retry with backoff and graceful degradation
//! - **Capabilities**: typed data/inference interfaces resolved once at startup
//! - **Telemetry**: per-run event accumulation and JSON run logs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tickerflow::prelude::*;
//!
//! let config = TickerflowConfig::load_or_default(None)?;
//! let scheduler = PipelineScheduler::new(PipelineSpec::from_config(&config), registry)?;
//!
//! let queue = BacklogQueue::new(config.queue.clone());
//! if let ClaimOutcome::Claimed(claim) = queue.claim_next().await? {
//!     let result = scheduler.run(claim.identifier.clone(), claim.run_id).await;
//!     if result.is_success() {
//!         queue.mark_completed(&claim.identifier, claim.run_id, None).await?;
//!     } else {
//!         queue.release(&claim.identifier, claim.run_id).await?;
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod capabilities;
pub mod config;
pub mod core;
pub mod errors;
pub mod handoff;
pub mod pipeline;
#[cfg(feature = "http-provider")]
pub mod providers;
pub mod queue;
pub mod stages;
pub mod telemetry;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::capabilities::{
        CapabilityId, CapabilityKind, CapabilityRegistry, DataCapability, Generation,
        InferenceCapability, TokenUsage,
    };
    pub use crate::config::{
        GroupConfig, PacingConfig, QueueConfig, RetrySettings, TelemetryConfig, TickerflowConfig,
    };
    pub use crate::core::{
        FinalResult, GroupResult, GroupSection, GroupStatus, Identifier, IdentifierForm, RunId,
        StageResult, StageStatus, Synthesis,
    };
    pub use crate::errors::{CapabilityError, PipelineValidationError, StageError, TickerflowError};
    pub use crate::handoff::{Handoff, JsonReportHandoff};
    pub use crate::pipeline::{
        GroupExecutor, GroupSpec, Pacer, PipelineScheduler, PipelineSpec, RetryPolicy,
        TokioPacer,
    };
    pub use crate::queue::{
        BacklogEntry, BacklogQueue, Claim, ClaimOutcome, CompletionOutcome, QueueStatus,
    };
    pub use crate::stages::{Stage, StageContext};
    pub use crate::telemetry::{
        EventSink, LoggingEventSink, NoOpEventSink, Recorder, RunLogWriter, SpanStarted,
        TelemetryEvent,
    };
}
