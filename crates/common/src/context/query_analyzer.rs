//! Query Analyzer - Classifies intent and extracts entities
//!
//! Provides:
//! - Weighted multi-intent classification over the pattern library
//! - Confidence derived from the matched weight
//! - Thresholded secondary intents
//! - Follow-up intent carry-over from recent turns

use crate::context::intent::{Entities, Intent, QueryAnalysis};
use crate::context::memory::{ConversationTurn, TurnRole};
use crate::context::patterns::{AnalyzedText, IntentScore, PatternLibrary, PatternLibrarySpec};
use crate::errors::{AppError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Query analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Added to the matched weight in `s / (s + baseline)`
    pub unmatched_baseline: f32,

    /// Fraction of the primary score a secondary intent must reach
    pub secondary_threshold: f32,

    /// Confidence assigned to an intent inherited from a previous turn
    pub follow_up_confidence: f32,

    /// Maximum accepted query length in characters
    pub max_query_chars: usize,

    /// Optional rule table replacing the built-in one (toml/json/yaml)
    pub patterns_path: Option<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            unmatched_baseline: 2.0,
            secondary_threshold: 0.4,
            follow_up_confidence: 0.3,
            max_query_chars: 2000,
            patterns_path: None,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.unmatched_baseline.is_finite() && self.unmatched_baseline > 0.0) {
            return Err(AppError::Configuration {
                message: "analyzer.unmatched_baseline must be positive".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.secondary_threshold) {
            return Err(AppError::Configuration {
                message: "analyzer.secondary_threshold must be within [0, 1]".into(),
            });
        }
        if !(self.follow_up_confidence > 0.0 && self.follow_up_confidence <= 1.0) {
            return Err(AppError::Configuration {
                message: "analyzer.follow_up_confidence must be within (0, 1]".into(),
            });
        }
        if self.max_query_chars == 0 {
            return Err(AppError::Configuration {
                message: "analyzer.max_query_chars must be positive".into(),
            });
        }
        Ok(())
    }

    /// Load the rule table, from `patterns_path` when set
    pub fn load_library(&self) -> Result<PatternLibrary> {
        let spec = match &self.patterns_path {
            Some(path) => {
                tracing::info!(path = %path, "Loading pattern library override");
                config::Config::builder()
                    .add_source(config::File::with_name(path))
                    .build()?
                    .try_deserialize::<PatternLibrarySpec>()?
            }
            None => PatternLibrarySpec::default(),
        };
        PatternLibrary::compile(&spec)
    }
}

/// Stateless analyzer; safe to share across requests
#[derive(Debug, Clone)]
pub struct QueryAnalyzer {
    library: Arc<PatternLibrary>,
    config: AnalyzerConfig,
}

impl QueryAnalyzer {
    pub fn new(library: Arc<PatternLibrary>, config: AnalyzerConfig) -> Self {
        Self { library, config }
    }

    pub fn library(&self) -> &Arc<PatternLibrary> {
        &self.library
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze one query. Never fails: an unmatched query degrades to
    /// `general` with zero confidence.
    pub fn analyze(&self, text: &str, recent_turns: &[ConversationTurn]) -> QueryAnalysis {
        let analyzed = AnalyzedText::new(text);
        let scores = self.library.score_intents(&analyzed);
        let entities = self.library.extract_entities(&analyzed);

        let (primary_intent, confidence, secondary_intents) = match primary(&scores) {
            Some(best) => {
                let confidence =
                    (best.score / (best.score + self.config.unmatched_baseline)).clamp(0.0, 1.0);
                (best.intent, confidence, self.secondaries(&scores, best))
            }
            None => match self.carried_intent(&entities, recent_turns) {
                Some(intent) => {
                    tracing::debug!(intent = %intent, "Carrying intent over from previous turn");
                    (intent, self.config.follow_up_confidence, Vec::new())
                }
                None => (Intent::General, 0.0, Vec::new()),
            },
        };

        tracing::debug!(
            intent = %primary_intent,
            confidence = confidence,
            secondary = secondary_intents.len(),
            entities = entities.len(),
            "Query analyzed"
        );

        QueryAnalysis {
            raw_text: text.to_string(),
            primary_intent,
            confidence,
            secondary_intents,
            entities,
            timestamp: Utc::now(),
        }
    }

    /// Entity extraction alone, used when recording turns
    pub fn extract_entities(&self, text: &str) -> Entities {
        self.library.extract_entities(&AnalyzedText::new(text))
    }

    fn secondaries(&self, scores: &[IntentScore], best: &IntentScore) -> Vec<Intent> {
        let floor = self.config.secondary_threshold * best.score;
        let mut secondary: Vec<&IntentScore> = scores
            .iter()
            .filter(|s| s.intent != best.intent && s.score > 0.0 && s.score >= floor)
            .collect();
        // stable: equal scores keep declaration order
        secondary.sort_by(|a, b| b.score.total_cmp(&a.score));
        secondary.into_iter().map(|s| s.intent).collect()
    }

    fn carried_intent(&self, entities: &Entities, recent_turns: &[ConversationTurn]) -> Option<Intent> {
        if entities.is_empty() {
            return None;
        }
        recent_turns
            .iter()
            .rev()
            .filter(|turn| turn.role == TurnRole::User)
            .find_map(|turn| turn.intent.filter(|intent| *intent != Intent::General))
    }
}

/// Highest score wins; the first declared wins ties
fn primary(scores: &[IntentScore]) -> Option<&IntentScore> {
    scores
        .iter()
        .filter(|s| s.score > 0.0)
        .fold(None, |best: Option<&IntentScore>, s| match best {
            Some(b) if b.score >= s.score => Some(b),
            _ => Some(s),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::intent::{BudgetRange, EntityKind, EntityValue};
    use proptest::prelude::*;

    fn analyzer() -> QueryAnalyzer {
        let config = AnalyzerConfig::default();
        let library = config.load_library().unwrap();
        QueryAnalyzer::new(Arc::new(library), config)
    }

    #[test]
    fn test_property_search_scenario() {
        let analysis = analyzer().analyze("Show me 2-bedroom apartments in Dubai Marina under 3M", &[]);

        assert_eq!(analysis.primary_intent, Intent::PropertySearch);
        assert!(analysis.confidence > 0.5 && analysis.confidence < 1.0);
        assert_eq!(analysis.entities.get(&EntityKind::BedroomCount), Some(&EntityValue::Count(2)));
        assert_eq!(
            analysis.entities.get(&EntityKind::Location),
            Some(&EntityValue::Text("Dubai Marina".into()))
        );
        assert_eq!(
            analysis.entities.get(&EntityKind::BudgetRange),
            Some(&EntityValue::Budget(BudgetRange { min: None, max: Some(3_000_000) }))
        );
        assert_eq!(
            analysis.entities[&EntityKind::BudgetRange].to_string(),
            "<3000000"
        );
    }

    #[test]
    fn test_multi_intent_scenario() {
        let analysis = analyzer().analyze(
            "What ROI can I expect from an Emaar off-plan project, and does it qualify me for a Golden Visa?",
            &[],
        );

        assert_eq!(analysis.primary_intent, Intent::InvestmentQuestion);
        assert!(analysis.secondary_intents.contains(&Intent::RegulatoryQuestion));
        assert!(analysis.secondary_intents.contains(&Intent::DeveloperQuestion));
        assert!(!analysis.secondary_intents.contains(&Intent::InvestmentQuestion));
        // regulatory (3.0) outscores developer (2.0)
        assert_eq!(
            analysis.secondary_intents,
            vec![Intent::RegulatoryQuestion, Intent::DeveloperQuestion]
        );
        assert_eq!(
            analysis.entities.get(&EntityKind::DeveloperName),
            Some(&EntityValue::Text("Emaar".into()))
        );
    }

    #[test]
    fn test_no_match_degrades_to_general() {
        let analysis = analyzer().analyze("hello there", &[]);
        assert_eq!(analysis.primary_intent, Intent::General);
        assert_eq!(analysis.confidence, 0.0);
        assert!(analysis.entities.is_empty());
        assert!(analysis.secondary_intents.is_empty());
        assert!(analysis.is_degraded());
    }

    #[test]
    fn test_tie_goes_to_declaration_order() {
        let analysis = analyzer().analyze("market investment", &[]);
        assert_eq!(analysis.primary_intent, Intent::MarketInfo);
        assert_eq!(analysis.secondary_intents, vec![Intent::InvestmentQuestion]);
    }

    #[test]
    fn test_follow_up_inherits_previous_intent() {
        let analyzer = analyzer();
        let previous = ConversationTurn::user("Show me villas for sale")
            .with_analysis(Intent::PropertySearch, Entities::new());

        let analysis = analyzer.analyze("what about in JVC", &[previous]);
        assert_eq!(analysis.primary_intent, Intent::PropertySearch);
        assert_eq!(analysis.confidence, analyzer.config().follow_up_confidence);

        // without entities nothing is inherited
        let previous = ConversationTurn::user("Show me villas")
            .with_analysis(Intent::PropertySearch, Entities::new());
        let analysis = analyzer.analyze("ok thanks", &[previous]);
        assert_eq!(analysis.primary_intent, Intent::General);
        assert_eq!(analysis.confidence, 0.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(AnalyzerConfig::default().validate().is_ok());

        let bad = AnalyzerConfig { secondary_threshold: 1.5, ..Default::default() };
        assert!(bad.validate().is_err());

        let bad = AnalyzerConfig { unmatched_baseline: 0.0, ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_missing_patterns_file_is_configuration_error() {
        let config = AnalyzerConfig {
            patterns_path: Some("/nonexistent/patterns".into()),
            ..Default::default()
        };
        assert!(matches!(config.load_library(), Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_patterns_file_replaces_builtin_rules() {
        let path = std::env::temp_dir().join(format!("propforge-patterns-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
[[intents]]
intent = "market_info"
matchers = [
    { kind = "keyword", value = "prices" },
    { kind = "phrase", value = "price index", weight = 2.5 },
]

[[entities]]
extractor = "gazetteer"
kind = "location"
entries = [ { canonical = "Al Furjan", aliases = ["furjan"] } ]
"#,
        )
        .unwrap();

        let config = AnalyzerConfig {
            patterns_path: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let library = config.load_library();
        std::fs::remove_file(&path).ok();
        let library = library.unwrap();
        assert_eq!(library.intents().collect::<Vec<_>>(), vec![Intent::MarketInfo]);

        let analyzer = QueryAnalyzer::new(Arc::new(library), config);
        let analysis = analyzer.analyze("Price index for Furjan", &[]);
        assert_eq!(analysis.primary_intent, Intent::MarketInfo);
        assert!((analysis.confidence - 2.5 / 4.5).abs() < 1e-6);
        assert_eq!(
            analysis.entities.get(&EntityKind::Location),
            Some(&EntityValue::Text("Al Furjan".into()))
        );

        // built-in rules are gone
        let analysis = analyzer.analyze("show me villas in Dubai Marina", &[]);
        assert_eq!(analysis.primary_intent, Intent::General);
        assert!(analysis.entities.is_empty());
    }

    #[test]
    fn test_rental_request_is_property_search() {
        let analysis = analyzer().analyze("rent a 1 bed in JLT", &[]);
        assert_eq!(analysis.primary_intent, Intent::PropertySearch);
        assert!(analysis.confidence > 0.0);
        assert_eq!(
            analysis.entities.get(&EntityKind::TransactionType),
            Some(&EntityValue::Text("rent".into()))
        );
        assert_eq!(analysis.entities.get(&EntityKind::BedroomCount), Some(&EntityValue::Count(1)));
    }

    proptest! {
        #[test]
        fn prop_no_letters_means_general(text in "[0-9 ?!.,-]{0,40}") {
            let analysis = analyzer().analyze(&text, &[]);
            prop_assert_eq!(analysis.primary_intent, Intent::General);
            prop_assert_eq!(analysis.confidence, 0.0);
        }

        #[test]
        fn prop_confidence_in_unit_range(text in "[a-z ]{0,60}") {
            let analysis = analyzer().analyze(&text, &[]);
            prop_assert!((0.0..=1.0).contains(&analysis.confidence));
        }
    }
}
