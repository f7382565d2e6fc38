//! Pipeline scheduling and execution.
//!
//! This module provides:
//! - Group and pipeline specifications
//! - The group executor (ordered stages, local retry)
//! - The pipeline scheduler (sequential groups, pacing, group retry,
//!   merge and synthesis)
//! - Retry policies and the pacing seam

mod executor;
mod pacing;
mod retry;
mod scheduler;
mod spec;

pub use executor::GroupExecutor;
pub use pacing::{Pacer, TokioPacer, WaitKind};
pub use retry::{BackoffStrategy, JitterStrategy, RetryDecision, RetryPolicy, RetryableStatus};
pub use scheduler::PipelineScheduler;
pub use spec::{GroupSpec, PipelineSpec};
