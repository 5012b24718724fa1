//! Request pipeline
//!
//! analyze -> route -> retrieve -> rank -> remember -> assemble.
//! Only retrieval awaits I/O; every other stage is synchronous and cheap.

use propforge_common::config::AppConfig;
use propforge_common::context::{
    CollectionRouter, ContextRanker, ConversationTurn, Degradation, Entities, MemorySnapshot,
    PromptAssembler, PromptObject, QueryAnalyzer, RoleMetadata, SessionStore,
};
use propforge_common::errors::{AppError, Result};
use propforge_common::metrics;
use propforge_search::{HybridRetriever, RelationalStore, VectorStore};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Owns every pipeline stage; shared behind an `Arc` by the HTTP layer
pub struct ContextEngine {
    analyzer: QueryAnalyzer,
    router: CollectionRouter,
    retriever: HybridRetriever,
    ranker: ContextRanker,
    assembler: PromptAssembler,
    sessions: Arc<SessionStore>,
    results_per_source: usize,
}

impl ContextEngine {
    /// Build the engine from validated configuration and the two stores
    pub fn new(
        config: &AppConfig,
        vector: Arc<dyn VectorStore>,
        relational: Arc<dyn RelationalStore>,
    ) -> Result<Self> {
        let library = Arc::new(config.analyzer.load_library()?);
        let router = CollectionRouter::new(&config.routing)?;
        let sessions = Arc::new(SessionStore::new(config.memory.clone(), library.clone()));

        info!(
            intents = library.intents().len(),
            source_timeout_ms = config.retrieval.source_timeout_ms,
            "Context engine ready"
        );

        Ok(Self {
            analyzer: QueryAnalyzer::new(library, config.analyzer.clone()),
            router,
            retriever: HybridRetriever::new(
                vector,
                relational,
                config.store.clone(),
                config.source_timeout(),
            ),
            ranker: ContextRanker::new(),
            assembler: PromptAssembler::new(config.prompt.clone()),
            sessions,
            results_per_source: config.retrieval.results_per_source,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Produce the prompt for one user message.
    ///
    /// Source failures degrade the prompt instead of failing it. The only
    /// errors are invalid input and cancellation; a cancelled request
    /// leaves the session untouched.
    #[instrument(skip(self, role, text, cancel), fields(role = %role.role))]
    pub async fn handle_query(
        &self,
        session_id: &str,
        role: &RoleMetadata,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<PromptObject> {
        let start = Instant::now();
        self.validate_query(session_id, text)?;

        let mut degradations = Vec::new();
        let prompt_turns = self.sessions.config().prompt_turns;
        let snapshot = self
            .sessions
            .snapshot(session_id, prompt_turns)
            .await
            .unwrap_or_else(|| MemorySnapshot::empty(session_id));
        if let Some(ref reason) = snapshot.reset_reason {
            degradations.push(Degradation::MemoryCorrupted { reason: reason.clone() });
        }

        let analysis = self.analyzer.analyze(text, &snapshot.recent_turns());
        if analysis.is_degraded() {
            metrics::record_analysis_degraded();
            degradations.push(Degradation::AnalysisDegraded);
        }

        // Stored preferences fill in whatever this query left unsaid
        let mut filters: Entities = snapshot.preferences.clone();
        filters.extend(analysis.entities.iter().map(|(k, v)| (*k, v.clone())));

        let plan = self.router.route(&analysis);
        debug!(
            intents = ?plan.intents,
            sources = plan.sources.len(),
            budget = plan.context_budget,
            "Query routed"
        );

        let outcome = match self
            .retriever
            .retrieve(text, &filters, &plan, self.results_per_source, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::record_query(
                    start.elapsed().as_secs_f64(),
                    analysis.primary_intent.as_str(),
                    "cancelled",
                    0,
                );
                return Err(e);
            }
        };

        let all_failed = outcome.all_failed();
        degradations.extend(outcome.degraded);
        if all_failed {
            warn!(session_id = %session_id, sources = outcome.attempted, "No source answered");
            degradations.push(Degradation::AllSourcesFailed);
        }

        let ranked = self.ranker.rank(outcome.items, &plan.weights(), plan.context_budget);

        let turn = ConversationTurn::user(text)
            .with_analysis(analysis.primary_intent, analysis.entities.clone());
        let preferences = self.sessions.append(session_id, turn).await;

        let prompt = self.assembler.assemble(
            &analysis,
            &ranked,
            &snapshot.window,
            &preferences,
            role,
            degradations,
        );

        let outcome_label = if prompt.context_less {
            "context_less"
        } else if prompt.degradations.is_empty() {
            "ok"
        } else {
            "degraded"
        };
        metrics::record_query(
            start.elapsed().as_secs_f64(),
            analysis.primary_intent.as_str(),
            outcome_label,
            prompt.item_count(),
        );

        info!(
            session_id = %session_id,
            intent = %analysis.primary_intent,
            items = prompt.item_count(),
            degradations = prompt.degradations.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Prompt assembled"
        );

        Ok(prompt)
    }

    /// Record the assistant's reply so the next prompt sees it
    pub async fn record_response(&self, session_id: &str, text: &str) -> Result<()> {
        if session_id.trim().is_empty() {
            return Err(AppError::MissingField { field: "session_id".into() });
        }
        if text.trim().is_empty() {
            return Err(AppError::MissingField { field: "text".into() });
        }
        if !self.sessions.contains(session_id) {
            return Err(AppError::SessionNotFound { id: session_id.to_string() });
        }
        self.sessions.append(session_id, ConversationTurn::assistant(text)).await;
        Ok(())
    }

    pub async fn session_snapshot(&self, session_id: &str) -> Option<MemorySnapshot> {
        self.sessions
            .snapshot(session_id, self.sessions.config().window_size)
            .await
    }

    pub async fn close_session(&self, session_id: &str) -> bool {
        self.sessions.close(session_id).await
    }

    fn validate_query(&self, session_id: &str, text: &str) -> Result<()> {
        if session_id.trim().is_empty() {
            return Err(AppError::MissingField { field: "session_id".into() });
        }
        if text.trim().is_empty() {
            return Err(AppError::Validation {
                message: "Query text must not be empty".into(),
                field: Some("message".into()),
            });
        }
        let max = self.analyzer.config().max_query_chars;
        if text.chars().count() > max {
            return Err(AppError::Validation {
                message: format!("Query exceeds {} characters", max),
                field: Some("message".into()),
            });
        }
        Ok(())
    }
}
