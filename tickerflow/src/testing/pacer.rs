//! A pacer that records waits instead of sleeping.

use crate::pipeline::{Pacer, WaitKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

/// Records every requested wait, in order, and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingPacer {
    waits: Mutex<Vec<(WaitKind, Duration)>>,
}

impl RecordingPacer {
    /// Creates an empty recording pacer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all waits in request order, zero-length ones included.
    #[must_use]
    pub fn waits(&self) -> Vec<(WaitKind, Duration)> {
        self.waits.lock().clone()
    }

    /// Returns the delays requested for one kind of wait.
    #[must_use]
    pub fn waits_of(&self, kind: WaitKind) -> Vec<Duration> {
        self.waits
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, d)| *d)
            .collect()
    }

    /// Returns the summed delay for one kind of wait.
    #[must_use]
    pub fn total(&self, kind: WaitKind) -> Duration {
        self.waits_of(kind).into_iter().sum()
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn wait(&self, kind: WaitKind, delay: Duration) {
        self.waits.lock().push((kind, delay));
    }
}
