//! Per-run event accumulator.

use super::{
    Component, EventSink, EventStatus, NoOpEventSink, SpanStarted, TelemetryEvent, UsageSummary,
};
use crate::capabilities::TokenUsage;
use crate::core::{Identifier, RunId};
use crate::utils::millis;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// An open span returned by [`Recorder::start`].
#[derive(Debug)]
pub struct Span {
    component: Component,
    subject: String,
    attempt: u32,
    start: DateTime<Utc>,
    started: Instant,
}

/// Shared usage counter handed to stage contexts.
///
/// Stages run while the executor holds the recorder, so usage goes through
/// this small shared meter instead of the recorder itself.
#[derive(Debug, Default)]
pub struct UsageMeter {
    summary: Mutex<UsageSummary>,
}

impl UsageMeter {
    /// Records a data capability call.
    pub fn record_data_call(&self, success: bool) {
        let mut summary = self.summary.lock();
        summary.data_calls += 1;
        if !success {
            summary.failed_calls += 1;
        }
    }

    /// Records an inference capability call.
    pub fn record_inference_call(&self, usage: Option<&TokenUsage>, success: bool) {
        let mut summary = self.summary.lock();
        summary.inference_calls += 1;
        if !success {
            summary.failed_calls += 1;
        }
        if let Some(usage) = usage {
            summary.input_tokens += usage.input_tokens;
            summary.output_tokens += usage.output_tokens;
            summary.total_tokens += usage.total();
        }
    }

    /// Returns a copy of the current summary.
    #[must_use]
    pub fn snapshot(&self) -> UsageSummary {
        self.summary.lock().clone()
    }
}

/// Everything the recorder accumulated for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTelemetry {
    /// Finished spans in completion order.
    pub events: Vec<TelemetryEvent>,
    /// Capability usage summary.
    pub usage: UsageSummary,
}

impl RunTelemetry {
    /// Returns the events of one component for one subject.
    #[must_use]
    pub fn events_for(&self, component: Component, subject: &str) -> Vec<&TelemetryEvent> {
        self.events
            .iter()
            .filter(|e| e.component == component && e.subject == subject)
            .collect()
    }
}

/// Accumulates telemetry for exactly one run and forwards it to a sink.
pub struct Recorder {
    run_id: RunId,
    identifier: Identifier,
    events: Vec<TelemetryEvent>,
    usage: Arc<UsageMeter>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("run_id", &self.run_id)
            .field("identifier", &self.identifier)
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl Recorder {
    /// Creates a recorder for a run.
    #[must_use]
    pub fn new(run_id: RunId, identifier: Identifier) -> Self {
        Self {
            run_id,
            identifier,
            events: Vec::new(),
            usage: Arc::new(UsageMeter::default()),
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Returns the shared usage meter.
    #[must_use]
    pub fn usage_meter(&self) -> Arc<UsageMeter> {
        Arc::clone(&self.usage)
    }

    /// Opens a span and notifies the sink that it started.
    pub fn start(&self, component: Component, subject: impl Into<String>, attempt: u32) -> Span {
        let subject = subject.into();
        let start = Utc::now();
        self.sink.on_start(&SpanStarted {
            run_id: self.run_id,
            identifier: self.identifier.clone(),
            component,
            subject: subject.clone(),
            attempt,
            at: start,
        });

        Span {
            component,
            subject,
            attempt,
            start,
            started: Instant::now(),
        }
    }

    /// Closes a span, storing and forwarding the finished event.
    pub fn finish(&mut self, span: Span, status: EventStatus, error: Option<String>) {
        let event = TelemetryEvent {
            sequence: self.events.len() as u64 + 1,
            run_id: self.run_id,
            component: span.component,
            subject: span.subject,
            attempt: span.attempt,
            start: span.start,
            end: Utc::now(),
            duration_ms: millis(span.started.elapsed()),
            status,
            error,
        };

        self.sink.on_event(&event);
        self.events.push(event);
    }

    /// Returns the events recorded so far.
    #[must_use]
    pub fn events(&self) -> &[TelemetryEvent] {
        &self.events
    }

    /// Consumes the recorder, returning the accumulated telemetry.
    #[must_use]
    pub fn into_telemetry(self) -> RunTelemetry {
        RunTelemetry {
            usage: self.usage.snapshot(),
            events: self.events,
        }
    }
}
