//! Merged context and the final pipeline result.

use super::{GroupResult, Identifier, RunId};
use crate::telemetry::RunTelemetry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output of one successful stage, as carried into the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionPart {
    /// Stage id.
    pub stage_id: String,
    /// Stage payload.
    pub content: serde_json::Value,
}

/// One group's section of the final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "availability", rename_all = "snake_case")]
pub enum GroupSection {
    /// The group produced at least some output.
    Available {
        /// Group id.
        group_id: String,
        /// Human-readable group title.
        title: String,
        /// Outputs of the stages that succeeded, in stage order.
        parts: Vec<SectionPart>,
        /// Stages that failed within an otherwise usable group.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        failed_stages: Vec<String>,
        /// Group attempts made.
        attempts: u32,
    },
    /// The group failed totally, including its retry.
    Unavailable {
        /// Group id.
        group_id: String,
        /// Human-readable group title.
        title: String,
        /// Why the section is missing.
        reason: String,
        /// Group attempts made.
        attempts: u32,
    },
}

impl GroupSection {
    /// Builds the section for a concluded group.
    #[must_use]
    pub fn from_result(title: impl Into<String>, result: &GroupResult, attempts: u32) -> Self {
        let title = title.into();
        let group_id = result.group_id().to_string();

        if result.status().has_output() {
            Self::Available {
                group_id,
                title,
                parts: result
                    .payloads()
                    .map(|(stage_id, content)| SectionPart {
                        stage_id: stage_id.to_string(),
                        content: content.clone(),
                    })
                    .collect(),
                failed_stages: result
                    .failed_stages()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                attempts,
            }
        } else {
            let last_error = result
                .stage_results()
                .iter()
                .rev()
                .find_map(|r| r.error.clone())
                .unwrap_or_else(|| "no stages ran".to_string());
            Self::Unavailable {
                group_id,
                title,
                reason: format!(
                    "all {} stages failed; last error: {last_error}",
                    result.stage_results().len()
                ),
                attempts,
            }
        }
    }

    /// Returns the group id.
    #[must_use]
    pub fn group_id(&self) -> &str {
        match self {
            Self::Available { group_id, .. } | Self::Unavailable { group_id, .. } => group_id,
        }
    }

    /// Returns the group title.
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Available { title, .. } | Self::Unavailable { title, .. } => title,
        }
    }

    /// Returns true if the section carries content.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }

    /// Returns the parts of an available section (empty otherwise).
    #[must_use]
    pub fn parts(&self) -> &[SectionPart] {
        match self {
            Self::Available { parts, .. } => parts,
            Self::Unavailable { .. } => &[],
        }
    }

    /// Returns the number of group attempts.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Available { attempts, .. } | Self::Unavailable { attempts, .. } => *attempts,
        }
    }
}

/// Everything the groups produced, in group order. The only input the
/// synthesis stage sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedContext {
    /// The identifier under analysis.
    pub identifier: Identifier,
    /// Group sections in group order.
    pub sections: Vec<GroupSection>,
}

impl MergedContext {
    /// Returns true if at least one section has content.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.sections.iter().any(GroupSection::is_available)
    }

    /// Returns the ids of unavailable groups.
    #[must_use]
    pub fn unavailable_groups(&self) -> Vec<String> {
        self.sections
            .iter()
            .filter(|s| !s.is_available())
            .map(|s| s.group_id().to_string())
            .collect()
    }

    /// Iterates over all available parts across sections, in order.
    pub fn parts(&self) -> impl Iterator<Item = &SectionPart> {
        self.sections.iter().flat_map(GroupSection::parts)
    }
}

/// Outcome of the final synthesis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Synthesis {
    /// Synthesis produced content.
    Completed {
        /// Synthesis payload.
        content: serde_json::Value,
        /// Attempts made.
        attempts: u32,
    },
    /// Synthesis failed after its retry.
    Unavailable {
        /// Last error.
        error: String,
        /// Attempts made.
        attempts: u32,
    },
    /// No group produced data, so synthesis was not attempted.
    InsufficientData,
}

impl Synthesis {
    /// Returns true if synthesis produced content.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// The structurally complete result of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResult {
    /// The identifier analysed.
    pub identifier: Identifier,
    /// Run correlation id.
    pub run_id: RunId,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// One section per configured group, in group order.
    pub sections: Vec<GroupSection>,
    /// Groups that only succeeded on their retry.
    pub retried_groups: Vec<String>,
    /// Groups whose section is unavailable.
    pub unavailable_groups: Vec<String>,
    /// Synthesis outcome.
    pub synthesis: Synthesis,
    /// Human-readable notice about partial results, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    /// Events and usage accumulated during the run.
    pub telemetry: RunTelemetry,
}

impl FinalResult {
    /// Returns true if the run produced any group content.
    ///
    /// Partial failures are tolerated; only total degradation counts as a
    /// failed run at the process boundary.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.sections.iter().any(GroupSection::is_available)
    }

    /// Returns the section for a group id.
    #[must_use]
    pub fn section(&self, group_id: &str) -> Option<&GroupSection> {
        self.sections.iter().find(|s| s.group_id() == group_id)
    }

    /// Builds the partial-results notice, or `None` when nothing is missing.
    #[must_use]
    pub fn build_notice(
        retried_groups: &[String],
        unavailable_groups: &[String],
        synthesis: &Synthesis,
    ) -> Option<String> {
        let synthesis_missing = !synthesis.is_completed();
        if unavailable_groups.is_empty() && retried_groups.is_empty() && !synthesis_missing {
            return None;
        }

        let mut lines = vec!["## Partial Analysis Results Notice".to_string()];
        if !retried_groups.is_empty() {
            lines.push(format!(
                "**Groups successfully retried:** {}",
                retried_groups.join(", ")
            ));
        }
        if !unavailable_groups.is_empty() {
            lines.push(format!(
                "**Incomplete groups:** {}",
                unavailable_groups.join(", ")
            ));
            lines.push(
                "The provided results are partial analysis based on available data.".to_string(),
            );
        }
        match synthesis {
            Synthesis::Unavailable { .. } => {
                lines.push("**Synthesis unavailable:** the final outlook could not be generated.".to_string());
            }
            Synthesis::InsufficientData => {
                lines.push("**Insufficient data:** no group produced usable output.".to_string());
            }
            Synthesis::Completed { .. } => {}
        }

        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageResult;
    use serde_json::json;

    #[test]
    fn test_section_from_partial_result() {
        let result = GroupResult::from_stage_results(
            "technical",
            vec![
                StageResult::ok("part_06", json!("charts"), 1, Utc::now()),
                StageResult::failed("part_07", "timeout", 2, Utc::now()),
            ],
            1,
        );
        let section = GroupSection::from_result("Technical", &result, 1);

        match section {
            GroupSection::Available { parts, failed_stages, .. } => {
                assert_eq!(parts.len(), 1);
                assert_eq!(failed_stages, vec!["part_07".to_string()]);
            }
            GroupSection::Unavailable { .. } => panic!("expected available section"),
        }
    }

    #[test]
    fn test_section_from_total_failure() {
        let result = GroupResult::from_stage_results(
            "macro",
            vec![StageResult::failed("part_12", "quota", 2, Utc::now())],
            2,
        );
        let section = GroupSection::from_result("Macro", &result, 2);

        assert!(!section.is_available());
        assert_eq!(section.attempts(), 2);
        let json = serde_json::to_value(&section).unwrap();
        assert_eq!(json["availability"], "unavailable");
        assert!(json["reason"].as_str().unwrap().contains("quota"));
    }

    #[test]
    fn test_merged_context_unavailable_groups() {
        let merged = MergedContext {
            identifier: Identifier::parse("AAA").unwrap(),
            sections: vec![
                GroupSection::Unavailable {
                    group_id: "sentiment".to_string(),
                    title: "Sentiment".to_string(),
                    reason: "down".to_string(),
                    attempts: 2,
                },
            ],
        };
        assert!(!merged.has_data());
        assert_eq!(merged.unavailable_groups(), vec!["sentiment".to_string()]);
        assert_eq!(merged.parts().count(), 0);
    }

    #[test]
    fn test_notice_absent_when_complete() {
        let synthesis = Synthesis::Completed { content: json!("ok"), attempts: 1 };
        assert!(FinalResult::build_notice(&[], &[], &synthesis).is_none());
    }

    #[test]
    fn test_notice_lists_missing_groups() {
        let notice = FinalResult::build_notice(
            &["fundamental".to_string()],
            &["macro".to_string()],
            &Synthesis::Unavailable { error: "x".to_string(), attempts: 2 },
        )
        .unwrap();

        assert!(notice.contains("fundamental"));
        assert!(notice.contains("**Incomplete groups:** macro"));
        assert!(notice.contains("Synthesis unavailable"));
    }
}
