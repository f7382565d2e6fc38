//! Run telemetry: event model, per-run recorder, sinks and run logs.
//!
//! There is no process-wide telemetry context. Each run owns a [`Recorder`]
//! that is passed explicitly through the scheduler and group executor, so
//! two runs sharing a process never see each other's events.

mod event;
mod recorder;
mod retention;
mod run_log;
mod sink;

pub use event::{Component, EventStatus, SpanStarted, TelemetryEvent, UsageSummary};
pub use recorder::{Recorder, RunTelemetry, Span, UsageMeter};
pub use retention::{prune_logs, PruneReport, DEFAULT_RETENTION_DAYS};
pub use run_log::{RunLogWriter, RunOutcome};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
