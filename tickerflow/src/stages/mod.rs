//! Stage trait and implementations.
//!
//! Stages are the smallest schedulable unit of a tickerflow pipeline. A stage
//! reads the run's earlier output through its [`StageContext`], optionally
//! calls capabilities, and returns a JSON payload or a [`StageError`].

mod context;
mod prompt;

pub use context::StageContext;
pub use prompt::{PromptStage, SynthesisStage};

use crate::capabilities::CapabilityId;
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the stage id (unique within a pipeline).
    fn id(&self) -> &str;

    /// Returns a human-readable title.
    fn title(&self) -> &str {
        self.id()
    }

    /// Capabilities this stage calls. Checked against the registry once,
    /// before any run starts.
    fn requires(&self) -> Vec<CapabilityId> {
        Vec::new()
    }

    /// Executes one attempt of the stage.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The stage execution context
    ///
    /// # Returns
    ///
    /// The stage payload, or the error that made this attempt fail.
    async fn execute(&self, ctx: &StageContext<'_>) -> Result<serde_json::Value, StageError>;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&StageContext<'_>) -> Result<serde_json::Value, StageError> + Send + Sync,
{
    id: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext<'_>) -> Result<serde_json::Value, StageError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(id: impl Into<String>, func: F) -> Self {
        Self {
            id: id.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext<'_>) -> Result<serde_json::Value, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("id", &self.id).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext<'_>) -> Result<serde_json::Value, StageError> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<serde_json::Value, StageError> {
        (self.func)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilityRegistry;
    use crate::core::{Identifier, RunId};
    use crate::telemetry::UsageMeter;

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("echo", |ctx: &StageContext<'_>| {
            Ok(serde_json::json!(ctx.identifier().as_str()))
        });
        assert_eq!(stage.id(), "echo");
        assert_eq!(stage.title(), "echo");
        assert!(stage.requires().is_empty());

        let identifier = Identifier::parse("AAA").unwrap();
        let registry = CapabilityRegistry::new();
        let usage = UsageMeter::default();
        let ctx = StageContext::new(&identifier, RunId::new(), &registry, &usage);

        assert_eq!(stage.execute(&ctx).await.unwrap(), serde_json::json!("AAA"));
    }
}
