//! Live observers of run telemetry.

use super::{Component, EventStatus, SpanStarted, TelemetryEvent};
use parking_lot::RwLock;
use tracing::Level;

/// Receives telemetry while a run is in progress.
///
/// Sinks observe only. They are called inline from the recorder and must
/// not block or panic; nothing they do changes how the run proceeds.
pub trait EventSink: Send + Sync {
    /// Called when a span opens.
    fn on_start(&self, _started: &SpanStarted) {}

    /// Called when a span closes, with the event the recorder stored.
    fn on_event(&self, event: &TelemetryEvent);
}

/// Discards everything. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn on_event(&self, _event: &TelemetryEvent) {}
}

/// Writes telemetry to the `tracing` subscriber as structured fields.
///
/// Failed spans are always logged at `WARN`; everything else uses the
/// configured level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink at the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn on_start(&self, started: &SpanStarted) {
        if self.level == Level::DEBUG {
            tracing::debug!(
                run_id = %started.run_id,
                component = %started.component,
                subject = %started.subject,
                attempt = started.attempt,
                "Span started"
            );
        } else {
            tracing::trace!(
                run_id = %started.run_id,
                component = %started.component,
                subject = %started.subject,
                attempt = started.attempt,
                "Span started"
            );
        }
    }

    fn on_event(&self, event: &TelemetryEvent) {
        let error = event.error.as_deref().unwrap_or_default();
        if event.status == EventStatus::Failed {
            tracing::warn!(
                run_id = %event.run_id,
                component = %event.component,
                subject = %event.subject,
                attempt = event.attempt,
                event_type = %event.event_type(),
                status = %event.status,
                duration_ms = event.duration_ms,
                error,
                "Span failed"
            );
        } else if self.level == Level::DEBUG {
            tracing::debug!(
                run_id = %event.run_id,
                component = %event.component,
                subject = %event.subject,
                attempt = event.attempt,
                event_type = %event.event_type(),
                status = %event.status,
                duration_ms = event.duration_ms,
                "Span finished"
            );
        } else {
            tracing::info!(
                run_id = %event.run_id,
                component = %event.component,
                subject = %event.subject,
                attempt = event.attempt,
                event_type = %event.event_type(),
                status = %event.status,
                duration_ms = event.duration_ms,
                "Span finished"
            );
        }
    }
}

/// Keeps everything it receives. Used in tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    starts: RwLock<Vec<SpanStarted>>,
    events: RwLock<Vec<TelemetryEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the finished events in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.read().clone()
    }

    /// Returns the start notifications in arrival order.
    #[must_use]
    pub fn starts(&self) -> Vec<SpanStarted> {
        self.starts.read().clone()
    }

    /// Returns the number of finished events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no event has finished yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns the finished events of one component.
    #[must_use]
    pub fn events_for(&self, component: Component) -> Vec<TelemetryEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.component == component)
            .cloned()
            .collect()
    }

    /// Counts finished events with the given component and status.
    #[must_use]
    pub fn count(&self, component: Component, status: EventStatus) -> usize {
        self.events
            .read()
            .iter()
            .filter(|e| e.component == component && e.status == status)
            .count()
    }
}

impl EventSink for CollectingEventSink {
    fn on_start(&self, started: &SpanStarted) {
        self.starts.write().push(started.clone());
    }

    fn on_event(&self, event: &TelemetryEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Identifier, RunId};
    use chrono::Utc;

    fn started(component: Component, subject: &str) -> SpanStarted {
        SpanStarted {
            run_id: RunId::new(),
            identifier: Identifier::parse("AAA").unwrap(),
            component,
            subject: subject.to_string(),
            attempt: 1,
            at: Utc::now(),
        }
    }

    fn finished(component: Component, subject: &str, status: EventStatus) -> TelemetryEvent {
        let now = Utc::now();
        TelemetryEvent {
            sequence: 1,
            run_id: RunId::new(),
            component,
            subject: subject.to_string(),
            attempt: 1,
            start: now,
            end: now,
            duration_ms: 3,
            status,
            error: (status == EventStatus::Failed).then(|| "down".to_string()),
        }
    }

    #[test]
    fn test_noop_sink_ignores_everything() {
        let sink = NoOpEventSink;
        sink.on_start(&started(Component::Group, "macro"));
        sink.on_event(&finished(Component::Group, "macro", EventStatus::Ok));
    }

    #[test]
    fn test_logging_sink_handles_every_status() {
        for sink in [LoggingEventSink::default(), LoggingEventSink::debug()] {
            sink.on_start(&started(Component::Stage, "part_01"));
            sink.on_event(&finished(Component::Stage, "part_01", EventStatus::Ok));
            sink.on_event(&finished(Component::Stage, "part_02", EventStatus::Failed));
        }
    }

    #[test]
    fn test_collecting_sink_groups_by_component_and_status() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.on_start(&started(Component::Group, "macro"));
        sink.on_event(&finished(Component::Group, "macro", EventStatus::Failed));
        sink.on_event(&finished(Component::Group, "macro", EventStatus::Ok));
        sink.on_event(&finished(Component::Stage, "part_12", EventStatus::Ok));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.starts().len(), 1);
        assert_eq!(sink.events_for(Component::Group).len(), 2);
        assert_eq!(sink.count(Component::Group, EventStatus::Failed), 1);
        assert_eq!(sink.count(Component::Stage, EventStatus::Ok), 1);
        assert_eq!(sink.count(Component::Synthesis, EventStatus::Ok), 0);
        assert_eq!(sink.events()[0].error.as_deref(), Some("down"));
    }
}
