//! Mock stages and capabilities.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::capabilities::{DataCapability, Generation, InferenceCapability, TokenUsage};
use crate::errors::{CapabilityError, StageError};
use crate::stages::{Stage, StageContext};

#[derive(Debug, Clone, Copy)]
enum Script {
    AlwaysOk,
    AlwaysFail,
    /// Fails this many calls, then succeeds.
    FailFirst(u32),
}

/// A stage whose outcome is scripted and whose calls are counted.
///
/// Successful calls return `{"stage": <id>, "identifier": <identifier>}`.
#[derive(Debug)]
pub struct ScriptedStage {
    id: String,
    script: Script,
    calls: AtomicU32,
}

impl ScriptedStage {
    fn new(id: impl Into<String>, script: Script) -> Self {
        Self {
            id: id.into(),
            script,
            calls: AtomicU32::new(0),
        }
    }

    /// A stage that always succeeds.
    #[must_use]
    pub fn always_ok(id: impl Into<String>) -> Self {
        Self::new(id, Script::AlwaysOk)
    }

    /// A stage that always fails with a capability error.
    #[must_use]
    pub fn always_fail(id: impl Into<String>) -> Self {
        Self::new(id, Script::AlwaysFail)
    }

    /// A stage that fails its first `failures` calls, then succeeds.
    #[must_use]
    pub fn flaky(id: impl Into<String>, failures: u32) -> Self {
        Self::new(id, Script::FailFirst(failures))
    }

    /// Returns the number of times the stage was executed.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<serde_json::Value, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = match self.script {
            Script::AlwaysOk => false,
            Script::AlwaysFail => true,
            Script::FailFirst(failures) => call <= failures,
        };

        if fail {
            return Err(CapabilityError::call(&self.id, format!("scripted failure on call {call}")).into());
        }
        Ok(serde_json::json!({
            "stage": self.id,
            "identifier": ctx.identifier(),
        }))
    }
}

/// A data capability returning a fixed payload.
#[derive(Debug, Clone)]
pub struct StaticData {
    name: String,
    payload: serde_json::Value,
}

impl StaticData {
    /// Creates a static data capability.
    #[must_use]
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

#[async_trait]
impl DataCapability for StaticData {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _arguments: &serde_json::Value) -> Result<serde_json::Value, CapabilityError> {
        Ok(self.payload.clone())
    }
}

/// A data capability that always fails.
#[derive(Debug, Clone)]
pub struct FailingData {
    name: String,
}

impl FailingData {
    /// Creates a failing data capability.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl DataCapability for FailingData {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _arguments: &serde_json::Value) -> Result<serde_json::Value, CapabilityError> {
        Err(CapabilityError::call(&self.name, "provider unavailable"))
    }
}

/// An inference capability returning fixed text.
#[derive(Debug, Clone)]
pub struct StaticInference {
    name: String,
    text: String,
    usage: Option<TokenUsage>,
}

impl StaticInference {
    /// Creates a static inference capability.
    #[must_use]
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            usage: None,
        }
    }

    /// Reports the given usage with every generation.
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

#[async_trait]
impl InferenceCapability for StaticInference {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _prompt: &str) -> Result<Generation, CapabilityError> {
        Ok(Generation {
            text: self.text.clone(),
            usage: self.usage,
        })
    }
}

/// An inference capability that returns its prompt, for asserting on
/// prompt construction.
#[derive(Debug, Clone)]
pub struct EchoInference {
    name: String,
}

impl EchoInference {
    /// Creates an echo inference capability.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl InferenceCapability for EchoInference {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, CapabilityError> {
        Ok(Generation::text(prompt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilityRegistry;
    use crate::core::{Identifier, RunId};
    use crate::telemetry::UsageMeter;

    #[tokio::test]
    async fn test_flaky_stage_recovers() {
        let identifier = Identifier::parse("AAA").unwrap();
        let registry = CapabilityRegistry::new();
        let usage = UsageMeter::default();
        let ctx = StageContext::new(&identifier, RunId::new(), &registry, &usage);
        let stage = ScriptedStage::flaky("s", 2);

        assert!(stage.execute(&ctx).await.is_err());
        assert!(stage.execute(&ctx).await.is_err());
        let payload = stage.execute(&ctx).await.unwrap();

        assert_eq!(payload["identifier"], "AAA");
        assert_eq!(stage.calls(), 3);
    }

    #[tokio::test]
    async fn test_failing_data() {
        let err = FailingData::new("news").fetch(&serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Call { .. }));
    }
}
