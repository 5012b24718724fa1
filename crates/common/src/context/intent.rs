//! Intent and entity vocabulary shared by every pipeline stage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Classified purpose of a user query.
///
/// Variant order is the declaration order used to break scoring ties in
/// the default pattern library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    PropertySearch,
    MarketInfo,
    InvestmentQuestion,
    RegulatoryQuestion,
    NeighborhoodQuestion,
    DeveloperQuestion,
    TransactionGuidance,
    General,
}

impl Intent {
    /// Every intent, `General` last
    pub const ALL: [Intent; 8] = [
        Intent::PropertySearch,
        Intent::MarketInfo,
        Intent::InvestmentQuestion,
        Intent::RegulatoryQuestion,
        Intent::NeighborhoodQuestion,
        Intent::DeveloperQuestion,
        Intent::TransactionGuidance,
        Intent::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::PropertySearch => "property-search",
            Intent::MarketInfo => "market-info",
            Intent::InvestmentQuestion => "investment-question",
            Intent::RegulatoryQuestion => "regulatory-question",
            Intent::NeighborhoodQuestion => "neighborhood-question",
            Intent::DeveloperQuestion => "developer-question",
            Intent::TransactionGuidance => "transaction-guidance",
            Intent::General => "general",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of typed parameter that can be extracted from query text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    BudgetRange,
    Location,
    PropertyType,
    BedroomCount,
    DeveloperName,
    TransactionType,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::BudgetRange => "budget-range",
            EntityKind::Location => "location",
            EntityKind::PropertyType => "property-type",
            EntityKind::BedroomCount => "bedroom-count",
            EntityKind::DeveloperName => "developer-name",
            EntityKind::TransactionType => "transaction-type",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price bounds in AED. At least one side is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetRange {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl fmt::Display for BudgetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(min), Some(max)) => write!(f, "{}-{}", min, max),
            (None, Some(max)) => write!(f, "<{}", max),
            (Some(min), None) => write!(f, ">{}", min),
            (None, None) => f.write_str("any"),
        }
    }
}

/// Typed value of an extracted entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EntityValue {
    /// Canonical gazetteer value, e.g. "Dubai Marina"
    Text(String),
    /// Whole count, e.g. bedrooms
    Count(u32),
    Budget(BudgetRange),
}

impl EntityValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EntityValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u32> {
        match self {
            EntityValue::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_budget(&self) -> Option<BudgetRange> {
        match self {
            EntityValue::Budget(range) => Some(*range),
            _ => None,
        }
    }
}

impl fmt::Display for EntityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityValue::Text(text) => f.write_str(text),
            EntityValue::Count(n) => write!(f, "{}", n),
            EntityValue::Budget(range) => write!(f, "{}", range),
        }
    }
}

/// Entities keyed by kind, at most one value per kind
pub type Entities = BTreeMap<EntityKind, EntityValue>;

/// Result of analyzing one incoming query. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub raw_text: String,
    pub primary_intent: Intent,
    /// In [0, 1]
    pub confidence: f32,
    /// Ordered by score, then declaration order. Never contains the primary.
    pub secondary_intents: Vec<Intent>,
    pub entities: Entities,
    pub timestamp: DateTime<Utc>,
}

impl QueryAnalysis {
    /// True when no intent rule fired and the query fell back to `General`
    pub fn is_degraded(&self) -> bool {
        self.primary_intent == Intent::General && self.confidence == 0.0
    }

    /// Primary followed by secondary intents
    pub fn intents(&self) -> impl Iterator<Item = Intent> + '_ {
        std::iter::once(self.primary_intent).chain(self.secondary_intents.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_display() {
        let under = BudgetRange { min: None, max: Some(3_000_000) };
        let over = BudgetRange { min: Some(2_000_000), max: None };
        let between = BudgetRange { min: Some(1_000_000), max: Some(2_000_000) };

        assert_eq!(under.to_string(), "<3000000");
        assert_eq!(over.to_string(), ">2000000");
        assert_eq!(between.to_string(), "1000000-2000000");
    }

    #[test]
    fn test_intent_serde_uses_snake_case() {
        let json = serde_json::to_string(&Intent::InvestmentQuestion).unwrap();
        assert_eq!(json, "\"investment_question\"");
        assert_eq!(Intent::InvestmentQuestion.to_string(), "investment-question");
    }

    #[test]
    fn test_entity_value_accessors() {
        assert_eq!(EntityValue::Count(2).as_count(), Some(2));
        assert_eq!(EntityValue::Text("JVC".into()).as_text(), Some("JVC"));
        assert!(EntityValue::Count(2).as_budget().is_none());
    }
}
