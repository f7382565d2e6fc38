//! Prompt-driven stages used by the binary.

use super::{Stage, StageContext};
use crate::capabilities::CapabilityId;
use crate::errors::StageError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt::Write as _;

/// Renders a stage payload as prompt text.
fn payload_text(payload: &Value) -> String {
    match payload.get("text").and_then(Value::as_str) {
        Some(text) => text.to_string(),
        None => match payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

/// A stage that fetches its declared data, then asks an inference
/// capability to write its section.
#[derive(Debug, Clone)]
pub struct PromptStage {
    id: String,
    title: String,
    instructions: String,
    data: Vec<String>,
    inference: String,
}

impl PromptStage {
    /// Creates a prompt stage backed by the given inference capability.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, inference: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            instructions: String::new(),
            data: Vec::new(),
            inference: inference.into(),
        }
    }

    /// Sets stage-specific instructions appended to the prompt.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Adds a data capability fetched before inference.
    #[must_use]
    pub fn with_data(mut self, capability: impl Into<String>) -> Self {
        self.data.push(capability.into());
        self
    }

    /// Builds the prompt from the context and the fetched data.
    fn build_prompt(&self, ctx: &StageContext<'_>, fetched: &[(String, Value)]) -> String {
        let identifier = ctx.identifier();
        let mut prompt = format!(
            "Now starting **{}**.\n\n* Target: {} ({})\n",
            self.title,
            identifier,
            identifier.form()
        );
        if !self.instructions.is_empty() {
            let _ = write!(prompt, "\n{}\n", self.instructions);
        }

        if !fetched.is_empty() {
            prompt.push_str("\n## Collected data\n");
            for (name, value) in fetched {
                let _ = write!(prompt, "\n### {name}\n{value}\n");
            }
        }

        let earlier: Vec<_> = ctx
            .prior_groups()
            .iter()
            .flat_map(|g| g.stage_results())
            .chain(ctx.earlier_stages())
            .filter_map(|r| r.payload.as_ref().map(|p| (&r.stage_id, p)))
            .collect();
        if !earlier.is_empty() {
            prompt.push_str("\n## Earlier findings\n");
            for (stage_id, payload) in earlier {
                let _ = write!(prompt, "\n### {stage_id}\n{}\n", payload_text(payload));
            }
        }

        prompt
    }
}

#[async_trait]
impl Stage for PromptStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn requires(&self) -> Vec<CapabilityId> {
        self.data
            .iter()
            .map(CapabilityId::data)
            .chain(std::iter::once(CapabilityId::inference(&self.inference)))
            .collect()
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<Value, StageError> {
        let arguments = json!({
            "identifier": ctx.identifier(),
            "form": ctx.identifier().form(),
        });

        let mut fetched = Vec::with_capacity(self.data.len());
        for name in &self.data {
            let value = ctx.fetch(name, &arguments).await?;
            fetched.push((name.clone(), value));
        }

        let prompt = self.build_prompt(ctx, &fetched);
        let generation = ctx.infer(&self.inference, &prompt).await?;
        if generation.text.trim().is_empty() {
            return Err(StageError::invalid_output(&self.id, "empty generation"));
        }

        Ok(json!({ "title": self.title, "text": generation.text }))
    }
}

/// The final stage: consumes only the merged context of all groups.
#[derive(Debug, Clone)]
pub struct SynthesisStage {
    id: String,
    title: String,
    instructions: String,
    inference: String,
}

impl SynthesisStage {
    /// Creates a synthesis stage backed by the given inference capability.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, inference: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            instructions: String::new(),
            inference: inference.into(),
        }
    }

    /// Sets instructions appended to the synthesis prompt.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }
}

#[async_trait]
impl Stage for SynthesisStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn requires(&self) -> Vec<CapabilityId> {
        vec![CapabilityId::inference(&self.inference)]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<Value, StageError> {
        let merged = ctx
            .merged()
            .ok_or_else(|| StageError::invalid_output(&self.id, "no merged context"))?;

        let mut prompt = format!(
            "Now starting **{}** for {}.\n\nBelow are all analysis results completed so far.\n",
            self.title, merged.identifier
        );
        for section in merged.sections.iter().filter(|s| s.is_available()) {
            let _ = write!(prompt, "\n## {}\n", section.title());
            for part in section.parts() {
                let _ = write!(prompt, "\n### {}\n{}\n", part.stage_id, payload_text(&part.content));
            }
        }
        if !self.instructions.is_empty() {
            let _ = write!(prompt, "\n{}\n", self.instructions);
        }

        let unavailable = merged.unavailable_groups();
        if !unavailable.is_empty() {
            let _ = write!(
                prompt,
                "\n**Warning**: the following groups have incomplete analysis: {}\n\
                 State the resulting uncertainty explicitly.\n",
                unavailable.join(", ")
            );
        }

        let generation = ctx.infer(&self.inference, &prompt).await?;
        Ok(json!({ "title": self.title, "text": generation.text }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilityRegistry;
    use crate::core::{
        GroupResult, GroupSection, Identifier, MergedContext, RunId, SectionPart, StageResult,
    };
    use crate::telemetry::UsageMeter;
    use crate::testing::{EchoInference, StaticData};
    use chrono::Utc;
    use std::sync::Arc;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new()
            .with_data(Arc::new(StaticData::new("financials", json!({"revenue": 42}))))
            .with_inference(Arc::new(EchoInference::new("analyst")))
    }

    #[test]
    fn test_prompt_stage_requires() {
        let stage = PromptStage::new("part_01", "Financials", "analyst").with_data("financials");
        assert_eq!(
            stage.requires(),
            vec![CapabilityId::data("financials"), CapabilityId::inference("analyst")]
        );
    }

    #[tokio::test]
    async fn test_prompt_includes_data_and_earlier_findings() {
        let identifier = Identifier::parse("005930").unwrap();
        let registry = registry();
        let usage = UsageMeter::default();
        let earlier = vec![StageResult::ok(
            "part_06",
            json!({"title": "Charts", "text": "uptrend"}),
            1,
            Utc::now(),
        )];
        let ctx = StageContext::new(&identifier, RunId::new(), &registry, &usage)
            .with_earlier_stages(&earlier);

        let stage = PromptStage::new("part_07", "Indicators", "analyst")
            .with_data("financials")
            .with_instructions("Look at RSI.");
        let payload = stage.execute(&ctx).await.unwrap();
        let text = payload["text"].as_str().unwrap();

        assert!(text.contains("**Indicators**"));
        assert!(text.contains("005930 (domestic_code)"));
        assert!(text.contains("\"revenue\":42"));
        assert!(text.contains("uptrend"));
        assert!(text.contains("Look at RSI."));
        assert_eq!(usage.snapshot().data_calls, 1);
    }

    #[tokio::test]
    async fn test_prompt_includes_prior_group_output() {
        let identifier = Identifier::parse("AAA").unwrap();
        let registry = registry();
        let usage = UsageMeter::default();
        let prior = vec![GroupResult::from_stage_results(
            "fundamental",
            vec![
                StageResult::ok("part_01", json!({"text": "strong margins"}), 1, Utc::now()),
                StageResult::failed("part_02", "timeout", 2, Utc::now()),
            ],
            1,
        )];
        let ctx = StageContext::new(&identifier, RunId::new(), &registry, &usage)
            .with_prior_groups(&prior);

        let payload = PromptStage::new("part_06", "Charts", "analyst")
            .execute(&ctx)
            .await
            .unwrap();
        let text = payload["text"].as_str().unwrap();

        assert!(text.contains("### part_01\nstrong margins"));
        assert!(!text.contains("part_02"));
    }

    #[tokio::test]
    async fn test_synthesis_warns_about_missing_groups() {
        let identifier = Identifier::parse("AAA").unwrap();
        let registry = registry();
        let usage = UsageMeter::default();
        let merged = MergedContext {
            identifier: identifier.clone(),
            sections: vec![
                GroupSection::Available {
                    group_id: "fundamental".to_string(),
                    title: "Fundamental".to_string(),
                    parts: vec![SectionPart {
                        stage_id: "part_01".to_string(),
                        content: json!({"text": "solid balance sheet"}),
                    }],
                    failed_stages: Vec::new(),
                    attempts: 1,
                },
                GroupSection::Unavailable {
                    group_id: "macro".to_string(),
                    title: "Macro".to_string(),
                    reason: "down".to_string(),
                    attempts: 2,
                },
            ],
        };
        let ctx = StageContext::new(&identifier, RunId::new(), &registry, &usage).with_merged(&merged);

        let payload = SynthesisStage::new("outlook", "Outlook", "analyst")
            .execute(&ctx)
            .await
            .unwrap();
        let text = payload["text"].as_str().unwrap();

        assert!(text.contains("solid balance sheet"));
        assert!(text.contains("incomplete analysis: macro"));
    }

    #[tokio::test]
    async fn test_synthesis_without_merged_context_fails() {
        let identifier = Identifier::parse("AAA").unwrap();
        let registry = registry();
        let usage = UsageMeter::default();
        let ctx = StageContext::new(&identifier, RunId::new(), &registry, &usage);

        let err = SynthesisStage::new("outlook", "Outlook", "analyst")
            .execute(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::InvalidOutput { .. }));
    }
}
