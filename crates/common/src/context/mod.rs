//! Context Engine Core Components
//!
//! The synchronous half of the pipeline:
//! - Query understanding (intents and entities)
//! - Intent to source routing
//! - Cross-source ranking
//! - Conversation memory
//! - Prompt assembly

mod degradation;
mod intent;
mod memory;
mod patterns;
mod prompt;
mod query_analyzer;
mod ranker;
mod router;

pub use degradation::Degradation;
pub use intent::{BudgetRange, Entities, EntityKind, EntityValue, Intent, QueryAnalysis};
pub use memory::{
    ConversationMemory, ConversationTurn, MemoryConfig, MemorySnapshot, SessionStore, TurnRole,
    WeightedTurn,
};
pub use patterns::{
    normalize, AnalyzedText, EntityRuleSpec, GazetteerEntry, IntentRuleSpec, IntentScore,
    MatcherSpec, PatternLibrary, PatternLibrarySpec,
};
pub use prompt::{
    AnalysisSummary, AttributedItem, ContextSection, PromptAssembler, PromptConfig, PromptObject,
    RoleMetadata,
};
pub use query_analyzer::{AnalyzerConfig, QueryAnalyzer};
pub use ranker::{ContextItem, ContextRanker};
pub use router::{CollectionRouter, IntentRoute, RoutedPlan, RoutingConfig, SourceKind, SourceRoute};
