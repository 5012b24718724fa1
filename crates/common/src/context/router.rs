//! Collection Router - Maps intents to the sources worth consulting
//!
//! Provides:
//! - Static intent -> (context budget, weighted sources) table
//! - Multi-intent union with weight reconciliation
//! - Fallback to the general route

use crate::context::intent::{Intent, QueryAnalysis};
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Backend family of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Vector,
    Relational,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Vector => "vector",
            SourceKind::Relational => "relational",
        }
    }

    /// Ranking tie-break: structured rows before narrative passages
    pub fn tie_rank(&self) -> u8 {
        match self {
            SourceKind::Relational => 0,
            SourceKind::Vector => 1,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One weighted source (collection or table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRoute {
    pub kind: SourceKind,
    pub source_id: String,
    /// Authority of this source for the intent, in [0, 1]
    pub weight: f32,
}

/// Route for a single intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRoute {
    pub intent: Intent,
    /// Maximum number of ranked items handed to the prompt
    pub context_budget: usize,
    pub sources: Vec<SourceRoute>,
}

/// Routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub routes: Vec<IntentRoute>,
}

fn route(intent: Intent, context_budget: usize, sources: &[(SourceKind, &str, f32)]) -> IntentRoute {
    IntentRoute {
        intent,
        context_budget,
        sources: sources
            .iter()
            .map(|(kind, id, weight)| SourceRoute {
                kind: *kind,
                source_id: (*id).to_string(),
                weight: *weight,
            })
            .collect(),
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        use SourceKind::{Relational, Vector};

        Self {
            routes: vec![
                route(Intent::PropertySearch, 8, &[
                    (Relational, "listings", 1.0),
                    (Vector, "neighborhoods", 0.5),
                ]),
                route(Intent::MarketInfo, 8, &[
                    (Relational, "transactions", 1.0),
                    (Vector, "market_reports", 0.8),
                ]),
                route(Intent::InvestmentQuestion, 10, &[
                    (Relational, "transactions", 1.0),
                    (Vector, "investment_guides", 0.8),
                    (Vector, "market_reports", 0.6),
                ]),
                route(Intent::RegulatoryQuestion, 6, &[
                    (Vector, "regulations", 1.0),
                ]),
                route(Intent::NeighborhoodQuestion, 6, &[
                    (Vector, "neighborhoods", 1.0),
                    (Relational, "listings", 0.5),
                ]),
                route(Intent::DeveloperQuestion, 8, &[
                    (Relational, "developers", 1.0),
                    (Relational, "projects", 0.9),
                    (Vector, "developer_profiles", 0.8),
                ]),
                route(Intent::TransactionGuidance, 6, &[
                    (Vector, "buying_process", 1.0),
                    (Vector, "regulations", 0.6),
                ]),
                route(Intent::General, 5, &[
                    (Vector, "general_faq", 1.0),
                    (Vector, "market_reports", 0.4),
                ]),
            ],
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<()> {
        let mut seen = Vec::new();
        let mut kinds: HashMap<&str, SourceKind> = HashMap::new();

        for route in &self.routes {
            if seen.contains(&route.intent) {
                return Err(routing_error(format!("duplicate route for intent {}", route.intent)));
            }
            seen.push(route.intent);

            if route.context_budget == 0 {
                return Err(routing_error(format!("context_budget for {} must be positive", route.intent)));
            }
            for source in &route.sources {
                if source.source_id.trim().is_empty() {
                    return Err(routing_error(format!("empty source id in route {}", route.intent)));
                }
                if !(0.0..=1.0).contains(&source.weight) {
                    return Err(routing_error(format!(
                        "weight of {} in route {} must be within [0, 1], got {}",
                        source.source_id, route.intent, source.weight
                    )));
                }
                match kinds.insert(source.source_id.as_str(), source.kind) {
                    Some(previous) if previous != source.kind => {
                        return Err(routing_error(format!(
                            "source {} is declared as both {} and {}",
                            source.source_id, previous, source.kind
                        )));
                    }
                    _ => {}
                }
            }
        }

        if !seen.contains(&Intent::General) {
            return Err(routing_error("a route for the general intent is required"));
        }
        Ok(())
    }

    /// Every distinct source named by any route
    pub fn all_sources(&self) -> Vec<SourceRoute> {
        let mut sources: Vec<SourceRoute> = Vec::new();
        for source in self.routes.iter().flat_map(|r| r.sources.iter()) {
            if !sources.iter().any(|s| s.source_id == source.source_id) {
                sources.push(source.clone());
            }
        }
        sources
    }
}

fn routing_error(message: impl Into<String>) -> AppError {
    AppError::Configuration { message: format!("routing: {}", message.into()) }
}

/// Sources selected for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedPlan {
    /// Intents that contributed, primary first
    pub intents: Vec<Intent>,
    /// Deduplicated by source id, in first-seen order
    pub sources: Vec<SourceRoute>,
    pub context_budget: usize,
}

impl RoutedPlan {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Source id -> weight, as consumed by the ranker
    pub fn weights(&self) -> HashMap<String, f32> {
        self.sources
            .iter()
            .map(|s| (s.source_id.clone(), s.weight))
            .collect()
    }
}

/// Read-only router built once at startup
#[derive(Debug, Clone)]
pub struct CollectionRouter {
    routes: BTreeMap<Intent, IntentRoute>,
}

impl CollectionRouter {
    pub fn new(config: &RoutingConfig) -> Result<Self> {
        config.validate()?;
        let routes = config
            .routes
            .iter()
            .map(|r| (r.intent, r.clone()))
            .collect();
        Ok(Self { routes })
    }

    /// Union the routes of the primary and every secondary intent.
    ///
    /// A source named by several intents appears once, at its first
    /// position, with the highest of its weights.
    pub fn route(&self, analysis: &QueryAnalysis) -> RoutedPlan {
        let mut plan = RoutedPlan {
            intents: Vec::new(),
            sources: Vec::new(),
            context_budget: 0,
        };

        for intent in analysis.intents() {
            let Some(route) = self.routes.get(&intent).or_else(|| self.routes.get(&Intent::General))
            else {
                continue;
            };
            plan.intents.push(intent);
            plan.context_budget = plan.context_budget.max(route.context_budget);

            for source in &route.sources {
                match plan.sources.iter_mut().find(|s| s.source_id == source.source_id) {
                    Some(existing) => existing.weight = existing.weight.max(source.weight),
                    None => plan.sources.push(source.clone()),
                }
            }
        }

        tracing::debug!(
            intents = plan.intents.len(),
            sources = plan.sources.len(),
            context_budget = plan.context_budget,
            "Routed query"
        );

        plan
    }
}
