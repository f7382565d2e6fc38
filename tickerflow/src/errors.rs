//! Error types for tickerflow.
//!
//! Only queue-integrity errors (`QueueLockTimeout`, `QueueCorruption`) are
//! meant to abort a run. Capability and stage failures are recovered by the
//! executor and scheduler and end up as data in the final result.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for tickerflow operations.
#[derive(Debug, Error)]
pub enum TickerflowError {
    /// The backlog lock could not be acquired within the configured bound.
    #[error("Queue lock not acquired within {}ms: {}", waited.as_millis(), path.display())]
    QueueLockTimeout {
        /// The lock artifact path.
        path: PathBuf,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A backlog store file failed structural validation.
    #[error("Queue store corrupted: {}: {reason}", path.display())]
    QueueCorruption {
        /// The offending file.
        path: PathBuf,
        /// What failed validation.
        reason: String,
    },

    /// A pipeline validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// An identifier was rejected.
    #[error("Invalid identifier '{value}': {reason}")]
    InvalidIdentifier {
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TickerflowError {
    /// Creates a corruption error for a store file.
    #[must_use]
    pub fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::QueueCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors that must abort a backlog-mode invocation.
    #[must_use]
    pub fn is_queue_fatal(&self) -> bool {
        matches!(self, Self::QueueLockTimeout { .. } | Self::QueueCorruption { .. })
    }
}

/// Error raised when a pipeline fails validation against its capabilities.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Errors returned by data and inference capabilities.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityError {
    /// The capability is not registered.
    #[error("Capability not found: {name}")]
    NotFound {
        /// The capability name.
        name: String,
    },

    /// The capability exists but with a different kind.
    #[error("Capability {name} is not a {expected} capability")]
    KindMismatch {
        /// The capability name.
        name: String,
        /// The expected kind.
        expected: String,
    },

    /// The call completed with a failure.
    #[error("Capability call failed: {name} - {reason}")]
    Call {
        /// The capability name.
        name: String,
        /// The reason for failure.
        reason: String,
    },

    /// The call did not complete within its bound.
    #[error("Capability call timed out: {name} after {timeout_ms}ms")]
    Timeout {
        /// The capability name.
        name: String,
        /// The bound that elapsed.
        timeout_ms: u64,
    },
}

impl CapabilityError {
    /// Creates a not found error.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates a call failure.
    #[must_use]
    pub fn call(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Call {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Error produced by a single stage attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// A capability call inside the stage failed.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// The stage produced output it considers unusable.
    #[error("Stage {stage} produced invalid output: {reason}")]
    InvalidOutput {
        /// The stage id.
        stage: String,
        /// Why the output was rejected.
        reason: String,
    },
}

impl StageError {
    /// Creates an invalid output error.
    #[must_use]
    pub fn invalid_output(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOutput {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}
