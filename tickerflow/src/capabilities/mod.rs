//! Capability interfaces consumed by stages.
//!
//! A capability is a bounded, retry-safe operation behind which any provider
//! may sit: a data fetch (name + arguments to structured payload) or an
//! inference call (prompt to generated text). Stages declare the capabilities
//! they need as [`CapabilityId`]s and the pipeline checks those declarations
//! against the [`CapabilityRegistry`] once, at startup.

mod registry;

pub use registry::CapabilityRegistry;

use crate::errors::CapabilityError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two capability shapes a stage may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Structured data retrieval.
    Data,
    /// Generative inference.
    Inference,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::Inference => write!(f, "inference"),
        }
    }
}

/// Stable identifier of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CapabilityId {
    /// Capability shape.
    pub kind: CapabilityKind,
    /// Capability name.
    pub name: String,
}

impl CapabilityId {
    /// A data capability id.
    #[must_use]
    pub fn data(name: impl Into<String>) -> Self {
        Self {
            kind: CapabilityKind::Data,
            name: name.into(),
        }
    }

    /// An inference capability id.
    #[must_use]
    pub fn inference(name: impl Into<String>) -> Self {
        Self {
            kind: CapabilityKind::Inference,
            name: name.into(),
        }
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Token counts reported by an inference provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    #[serde(default)]
    pub input_tokens: u64,
    /// Completion tokens.
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Returns input plus output tokens.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Text produced by an inference capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// Generated text.
    pub text: String,
    /// Token usage, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl Generation {
    /// Creates a generation without usage information.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

/// A data retrieval capability.
///
/// Implementations must eventually return and must be safe to call again
/// after a failure.
#[async_trait]
pub trait DataCapability: Send + Sync {
    /// Returns the capability name.
    fn name(&self) -> &str;

    /// Fetches a structured payload.
    async fn fetch(&self, arguments: &serde_json::Value) -> Result<serde_json::Value, CapabilityError>;
}

/// A generative inference capability.
#[async_trait]
pub trait InferenceCapability: Send + Sync {
    /// Returns the capability name.
    fn name(&self) -> &str;

    /// Generates text for a prompt.
    async fn generate(&self, prompt: &str) -> Result<Generation, CapabilityError>;
}
