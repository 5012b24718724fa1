//! Prompt Assembler - Builds the structured prompt for the generator
//!
//! Provides:
//! - Context sections grouped by source, ordered by best rank
//! - Per-item attribution
//! - Role-specific instructions
//! - Flat text rendering

use crate::context::degradation::Degradation;
use crate::context::intent::{Entities, Intent, QueryAnalysis};
use crate::context::memory::{TurnRole, WeightedTurn};
use crate::context::ranker::ContextItem;
use crate::context::router::SourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Pre-authenticated caller attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleMetadata {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl RoleMetadata {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            display_name: None,
            attributes: BTreeMap::new(),
        }
    }
}

/// Prompt configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub base_system_prompt: String,

    /// Used for roles without an entry in `role_instructions`
    pub default_instructions: String,

    pub role_instructions: BTreeMap<String, String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        let mut role_instructions = BTreeMap::new();
        role_instructions.insert(
            "investor".to_string(),
            "Focus on rental yields, capital appreciation, payment plans and exit options. \
             Quote figures together with their source."
                .to_string(),
        );
        role_instructions.insert(
            "agent".to_string(),
            "Be concise. Include listing references, fees and the next practical step.".to_string(),
        );
        role_instructions.insert(
            "buyer".to_string(),
            "Explain each step plainly and point out fees a first-time buyer may miss.".to_string(),
        );

        Self {
            base_system_prompt: "You are a Dubai real estate assistant. Answer using ONLY the provided \
                context and conversation. If the context does not contain the answer, say so. \
                Never invent prices, fees or regulations."
                .to_string(),
            default_instructions: "Answer clearly and briefly for a general audience.".to_string(),
            role_instructions,
        }
    }
}

/// A ranked item with its attribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributedItem {
    /// 1-based global rank, the `[n]` used for citations
    pub reference: usize,
    /// `source_kind:source_id`
    pub attribution: String,
    pub content: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// All items of one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    pub source_kind: SourceKind,
    pub source_id: String,
    pub title: String,
    pub items: Vec<AttributedItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub primary_intent: Intent,
    pub confidence: f32,
    pub secondary_intents: Vec<Intent>,
    pub entities: Entities,
}

/// Everything the text generator receives for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptObject {
    pub system_instructions: String,
    pub role: RoleMetadata,
    pub query: String,
    pub analysis: AnalysisSummary,
    pub sections: Vec<ContextSection>,
    /// Oldest first, with decay weights
    pub conversation: Vec<WeightedTurn>,
    pub preferences: Entities,
    /// No retrieved context; built from conversation memory alone
    pub context_less: bool,
    pub degradations: Vec<Degradation>,
    pub generated_at: DateTime<Utc>,
}

impl PromptObject {
    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }

    /// Flat prompt for completion-style generators
    pub fn render_text(&self) -> String {
        let mut prompt = format!("{}\n\n", self.system_instructions);

        if !self.preferences.is_empty() {
            let known = self
                .preferences
                .iter()
                .map(|(kind, value)| format!("{}={}", kind, value))
                .collect::<Vec<_>>()
                .join("; ");
            let _ = writeln!(prompt, "Known preferences: {}\n", known);
        }

        if !self.conversation.is_empty() {
            prompt.push_str("Conversation so far (most recent last):\n");
            for weighted in &self.conversation {
                let speaker = match weighted.turn.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant => "assistant",
                };
                let _ = writeln!(
                    prompt,
                    "- {} (weight {:.2}): {}",
                    speaker, weighted.weight, weighted.turn.text
                );
            }
            prompt.push('\n');
        }

        let _ = write!(prompt, "Question: {}\n\nContext:\n", self.query);

        if self.context_less {
            prompt.push_str(
                "\nNo retrieved context is available. Answer from the conversation only \
                 and say that current data could not be retrieved.\n",
            );
        }

        for section in &self.sections {
            let _ = writeln!(prompt, "\n## {}", section.title);
            for item in &section.items {
                let _ = write!(
                    prompt,
                    "[{}] {} (relevance: {:.2})\n{}\n",
                    item.reference, item.attribution, item.score, item.content
                );
            }
        }

        prompt.push_str("\nAnswer:");
        prompt
    }
}

/// Pure prompt builder
#[derive(Debug, Clone, Default)]
pub struct PromptAssembler {
    config: PromptConfig,
}

impl PromptAssembler {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    /// Instructions for a role, falling back to the defaults
    pub fn instructions_for(&self, role: &str) -> &str {
        self.config
            .role_instructions
            .get(&role.to_lowercase())
            .map(String::as_str)
            .unwrap_or(self.config.default_instructions.as_str())
    }

    pub fn assemble(
        &self,
        analysis: &QueryAnalysis,
        ranked_context: &[ContextItem],
        memory_window: &[WeightedTurn],
        preferences: &Entities,
        role: &RoleMetadata,
        degradations: Vec<Degradation>,
    ) -> PromptObject {
        let mut sections: Vec<ContextSection> = Vec::new();

        for (rank, item) in ranked_context.iter().enumerate() {
            let attributed = AttributedItem {
                reference: rank + 1,
                attribution: format!("{}:{}", item.source_kind, item.source_id),
                content: item.content.clone(),
                score: item.normalized_score,
                metadata: item.metadata.clone(),
            };

            // first appearance is the best rank, so sections stay rank-ordered
            match sections
                .iter_mut()
                .find(|s| s.source_kind == item.source_kind && s.source_id == item.source_id)
            {
                Some(section) => section.items.push(attributed),
                None => sections.push(ContextSection {
                    source_kind: item.source_kind,
                    source_id: item.source_id.clone(),
                    title: section_title(item.source_kind, &item.source_id),
                    items: vec![attributed],
                }),
            }
        }

        let system_instructions = format!(
            "{}\n\n{}",
            self.config.base_system_prompt,
            self.instructions_for(&role.role)
        );

        PromptObject {
            system_instructions,
            role: role.clone(),
            query: analysis.raw_text.clone(),
            analysis: AnalysisSummary {
                primary_intent: analysis.primary_intent,
                confidence: analysis.confidence,
                secondary_intents: analysis.secondary_intents.clone(),
                entities: analysis.entities.clone(),
            },
            sections,
            conversation: memory_window.to_vec(),
            preferences: preferences.clone(),
            context_less: ranked_context.is_empty(),
            degradations,
            generated_at: Utc::now(),
        }
    }
}

fn section_title(kind: SourceKind, source_id: &str) -> String {
    let name = source_id.replace('_', " ");
    match kind {
        SourceKind::Relational => format!("{} (structured data)", name),
        SourceKind::Vector => format!("{} (documents)", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::intent::{EntityKind, EntityValue};
    use crate::context::memory::ConversationTurn;

    fn analysis() -> QueryAnalysis {
        let mut entities = Entities::new();
        entities.insert(EntityKind::Location, EntityValue::Text("Dubai Marina".into()));
        QueryAnalysis {
            raw_text: "2 bedroom in Dubai Marina".into(),
            primary_intent: Intent::PropertySearch,
            confidence: 0.7,
            secondary_intents: vec![],
            entities,
            timestamp: Utc::now(),
        }
    }

    fn item(content: &str, source: &str, kind: SourceKind, score: f32) -> ContextItem {
        let mut item = ContextItem::new(content, source, kind, score);
        item.normalized_score = score;
        item
    }

    #[test]
    fn test_sections_follow_best_rank() {
        let ranked = vec![
            item("Marina Gate 2BR, AED 2.8M", "listings", SourceKind::Relational, 1.0),
            item("Marina is walkable", "neighborhoods", SourceKind::Vector, 0.5),
            item("Princess Tower 2BR, AED 2.1M", "listings", SourceKind::Relational, 0.9),
        ];
        let prompt = PromptAssembler::default().assemble(
            &analysis(),
            &ranked,
            &[],
            &Entities::new(),
            &RoleMetadata::new("buyer"),
            vec![],
        );

        assert_eq!(prompt.sections.len(), 2);
        assert_eq!(prompt.sections[0].source_id, "listings");
        let refs: Vec<usize> = prompt.sections[0].items.iter().map(|i| i.reference).collect();
        assert_eq!(refs, vec![1, 3]);
        assert_eq!(prompt.sections[1].items[0].attribution, "vector:neighborhoods");
        assert_eq!(prompt.item_count(), 3);
        assert!(!prompt.context_less);
    }

    #[test]
    fn test_role_instructions() {
        let assembler = PromptAssembler::default();
        assert!(assembler.instructions_for("Investor").contains("yields"));
        assert_eq!(
            assembler.instructions_for("auditor"),
            PromptConfig::default().default_instructions
        );
    }

    #[test]
    fn test_context_less_prompt_keeps_conversation() {
        let window = vec![WeightedTurn {
            turn: ConversationTurn::user("I like Dubai Marina"),
            weight: 1.0,
        }];
        let prompt = PromptAssembler::default().assemble(
            &analysis(),
            &[],
            &window,
            &Entities::new(),
            &RoleMetadata::new("guest"),
            vec![Degradation::AllSourcesFailed],
        );

        assert!(prompt.context_less);
        let text = prompt.render_text();
        assert!(text.contains("No retrieved context is available"));
        assert!(text.contains("I like Dubai Marina"));
        assert!(text.ends_with("Answer:"));
    }

    #[test]
    fn test_render_includes_attribution() {
        let ranked = vec![item("Escrow is mandatory for off-plan sales", "regulations", SourceKind::Vector, 0.8)];
        let text = PromptAssembler::default()
            .assemble(&analysis(), &ranked, &[], &Entities::new(), &RoleMetadata::new("buyer"), vec![])
            .render_text();
        assert!(text.contains("[1] vector:regulations (relevance: 0.80)"));
        assert!(text.contains("Question: 2 bedroom in Dubai Marina"));
    }
}
