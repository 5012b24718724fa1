//! Hybrid retrieval across routed sources
//!
//! Every source of a routed plan is queried concurrently, each lookup
//! bounded by its own timeout. A failing or slow source is dropped and
//! reported as a degradation; it never fails the whole retrieval.

use super::{MetadataFilter, RelationalStore, Row, RowFilter, VectorStore};
use futures::future::join_all;
use propforge_common::config::StoreConfig;
use propforge_common::context::{ContextItem, Degradation, Entities, RoutedPlan, SourceKind, SourceRoute};
use propforge_common::errors::{AppError, Result};
use propforge_common::metrics;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Items gathered from every source that answered in time
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub items: Vec<ContextItem>,

    /// One entry per source that timed out or errored
    pub degraded: Vec<Degradation>,

    /// Number of sources queried
    pub attempted: usize,
}

impl RetrievalOutcome {
    /// True when no source answered, including an empty plan
    pub fn all_failed(&self) -> bool {
        self.degraded.len() >= self.attempted
    }
}

/// Fans a routed plan out to the vector and relational stores
pub struct HybridRetriever {
    vector: Arc<dyn VectorStore>,
    relational: Arc<dyn RelationalStore>,
    store: StoreConfig,
    source_timeout: Duration,
}

impl HybridRetriever {
    pub fn new(
        vector: Arc<dyn VectorStore>,
        relational: Arc<dyn RelationalStore>,
        store: StoreConfig,
        source_timeout: Duration,
    ) -> Self {
        Self { vector, relational, store, source_timeout }
    }

    pub fn source_timeout(&self) -> Duration {
        self.source_timeout
    }

    /// Query every planned source concurrently.
    ///
    /// Returns `RequestCancelled` as soon as `cancel` fires; outstanding
    /// lookups are dropped with it.
    pub async fn retrieve(
        &self,
        text: &str,
        entities: &Entities,
        plan: &RoutedPlan,
        per_source: usize,
        cancel: &CancellationToken,
    ) -> Result<RetrievalOutcome> {
        if cancel.is_cancelled() {
            return Err(AppError::RequestCancelled);
        }

        let intent = plan.intents.first().map(|i| i.as_str()).unwrap_or("general");
        let lookups = join_all(
            plan.sources
                .iter()
                .map(|route| self.timed_lookup(route, text, entities, per_source, intent)),
        );

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::RequestCancelled),
            results = lookups => results,
        };

        let mut outcome = RetrievalOutcome { attempted: plan.sources.len(), ..Default::default() };
        for result in results {
            match result {
                Ok(items) => outcome.items.extend(items),
                Err(degradation) => outcome.degraded.push(degradation),
            }
        }

        debug!(
            intent = intent,
            attempted = outcome.attempted,
            degraded = outcome.degraded.len(),
            items = outcome.items.len(),
            "Retrieval complete"
        );

        Ok(outcome)
    }

    async fn timed_lookup(
        &self,
        route: &SourceRoute,
        text: &str,
        entities: &Entities,
        per_source: usize,
        intent: &str,
    ) -> std::result::Result<Vec<ContextItem>, Degradation> {
        let start = Instant::now();
        let result = tokio::time::timeout(self.source_timeout, self.lookup(route, text, entities, per_source)).await;
        let elapsed = start.elapsed();
        let latency_ms = elapsed.as_millis().min(u64::MAX as u128) as u64;
        let kind = route.kind.as_str();

        match result {
            Ok(Ok(items)) => {
                metrics::record_source_lookup(&route.source_id, kind, "ok", elapsed.as_secs_f64());
                Ok(items)
            }
            Ok(Err(e)) => {
                metrics::record_source_lookup(&route.source_id, kind, "error", elapsed.as_secs_f64());
                warn!(
                    source_id = %route.source_id,
                    intent = intent,
                    latency_ms = latency_ms,
                    error = %e,
                    "Source lookup failed"
                );
                Err(Degradation::SourceUnavailable {
                    source_id: route.source_id.clone(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                metrics::record_source_lookup(&route.source_id, kind, "timeout", elapsed.as_secs_f64());
                warn!(
                    source_id = %route.source_id,
                    intent = intent,
                    latency_ms = latency_ms,
                    "Source lookup timed out"
                );
                Err(Degradation::SourceTimeout {
                    source_id: route.source_id.clone(),
                    latency_ms,
                })
            }
        }
    }

    async fn lookup(
        &self,
        route: &SourceRoute,
        text: &str,
        entities: &Entities,
        per_source: usize,
    ) -> Result<Vec<ContextItem>> {
        let source_id = route.source_id.as_str();
        match route.kind {
            SourceKind::Vector => {
                let filter = MetadataFilter::from_entities(self.store.collection(source_id), entities);
                let hits = self
                    .vector
                    .similarity_search(source_id, text, filter.as_ref(), per_source)
                    .await?;
                Ok(hits
                    .into_iter()
                    .map(|hit| {
                        ContextItem::new(hit.content, source_id, SourceKind::Vector, hit.score)
                            .with_metadata(hit.metadata)
                    })
                    .collect())
            }
            SourceKind::Relational => {
                let schema = self.store.table(source_id);
                let filter = RowFilter::from_entities(schema, entities);
                let rows = self.relational.query(source_id, &filter, per_source).await?;
                let display = schema.map(|s| s.display_columns.as_slice()).unwrap_or(&[]);

                // Rows carry no similarity; store order is kept by the stable ranker sort
                Ok(rows
                    .iter()
                    .map(|row| {
                        ContextItem::new(render_row(row, display), source_id, SourceKind::Relational, 1.0)
                            .with_metadata(scalar_columns(row))
                    })
                    .collect())
            }
        }
    }
}

/// `col: value | col: value`, restricted to `display` when non-empty
fn render_row(row: &Row, display: &[String]) -> String {
    let columns: Vec<&String> = if display.is_empty() {
        row.keys().collect()
    } else {
        display.iter().filter(|c| row.contains_key(c.as_str())).collect()
    };

    columns
        .into_iter()
        .filter_map(|column| {
            let value = row.get(column.as_str())?;
            scalar_text(value).map(|text| format!("{}: {}", column, text))
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

fn scalar_columns(row: &Row) -> BTreeMap<String, String> {
    row.iter()
        .filter_map(|(k, v)| scalar_text(v).map(|text| (k.clone(), text)))
        .collect()
}

fn scalar_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{Document, InMemoryRelationalStore, InMemoryVectorStore, VectorHit};
    use async_trait::async_trait;
    use propforge_common::context::{EntityKind, EntityValue, Intent};
    use serde_json::json;

    struct SlowVectorStore {
        inner: InMemoryVectorStore,
        slow_collection: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl VectorStore for SlowVectorStore {
        async fn similarity_search(
            &self,
            collection: &str,
            query: &str,
            filter: Option<&MetadataFilter>,
            k: usize,
        ) -> Result<Vec<VectorHit>> {
            if collection == self.slow_collection {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.similarity_search(collection, query, filter, k).await
        }
    }

    struct FailingRelationalStore;

    #[async_trait]
    impl RelationalStore for FailingRelationalStore {
        async fn query(&self, _table: &str, _filter: &RowFilter, _limit: usize) -> Result<Vec<Row>> {
            Err(AppError::DatabaseConnection { message: "connection refused".into() })
        }
    }

    fn vectors() -> InMemoryVectorStore {
        let mut collections = BTreeMap::new();
        collections.insert(
            "market_reports".to_string(),
            vec![Document::new("Dubai Marina prices rose 12 percent year on year")
                .with_metadata("community", "Dubai Marina")],
        );
        collections.insert(
            "investment_guides".to_string(),
            vec![Document::new("Rental yield in Dubai Marina averages 6 percent")],
        );
        InMemoryVectorStore::new(collections)
    }

    fn relational() -> InMemoryRelationalStore {
        let mut tables = BTreeMap::new();
        tables.insert(
            "transactions".to_string(),
            vec![json!({
                "community": "Dubai Marina",
                "property_type": "apartment",
                "price": 2_750_000,
                "transaction_date": "2024-05-01"
            })
            .as_object()
            .cloned()
            .unwrap()],
        );
        InMemoryRelationalStore::new(tables)
    }

    fn plan() -> RoutedPlan {
        RoutedPlan {
            intents: vec![Intent::InvestmentQuestion],
            sources: vec![
                SourceRoute { kind: SourceKind::Relational, source_id: "transactions".into(), weight: 1.0 },
                SourceRoute { kind: SourceKind::Vector, source_id: "investment_guides".into(), weight: 0.8 },
                SourceRoute { kind: SourceKind::Vector, source_id: "market_reports".into(), weight: 0.6 },
            ],
            context_budget: 10,
        }
    }

    fn entities() -> Entities {
        let mut entities = Entities::new();
        entities.insert(EntityKind::Location, EntityValue::Text("Dubai Marina".into()));
        entities
    }

    #[tokio::test]
    async fn test_retrieves_from_every_source() {
        let retriever = HybridRetriever::new(
            Arc::new(vectors()),
            Arc::new(relational()),
            StoreConfig::default(),
            Duration::from_millis(500),
        );

        let outcome = retriever
            .retrieve("rental yield dubai marina", &entities(), &plan(), 5, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempted, 3);
        assert!(outcome.degraded.is_empty());
        assert!(!outcome.all_failed());
        assert_eq!(outcome.items.len(), 3);

        let row = outcome.items.iter().find(|i| i.source_kind == SourceKind::Relational).unwrap();
        assert!(row.content.contains("community: Dubai Marina"));
        assert!(row.content.contains("price: 2750000"));
        assert_eq!(row.metadata.get("property_type").map(String::as_str), Some("apartment"));
    }

    #[tokio::test]
    async fn test_slow_source_is_dropped() {
        let slow = SlowVectorStore {
            inner: vectors(),
            slow_collection: "market_reports",
            delay: Duration::from_millis(1_000),
        };
        let retriever = HybridRetriever::new(
            Arc::new(slow),
            Arc::new(relational()),
            StoreConfig::default(),
            Duration::from_millis(50),
        );

        let start = Instant::now();
        let outcome = retriever
            .retrieve("rental yield", &entities(), &plan(), 5, &CancellationToken::new())
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_millis(900));
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.degraded.len(), 1);
        assert!(matches!(
            &outcome.degraded[0],
            Degradation::SourceTimeout { source_id, .. } if source_id == "market_reports"
        ));
    }

    #[tokio::test]
    async fn test_failing_source_is_reported() {
        let retriever = HybridRetriever::new(
            Arc::new(vectors()),
            Arc::new(FailingRelationalStore),
            StoreConfig::default(),
            Duration::from_millis(500),
        );

        let outcome = retriever
            .retrieve("rental yield", &entities(), &plan(), 5, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.degraded[0].source_id(), Some("transactions"));
        assert!(!outcome.all_failed());
    }

    #[tokio::test]
    async fn test_empty_plan_counts_as_all_failed() {
        let retriever = HybridRetriever::new(
            Arc::new(vectors()),
            Arc::new(relational()),
            StoreConfig::default(),
            Duration::from_millis(500),
        );
        let empty = RoutedPlan { intents: vec![Intent::General], sources: vec![], context_budget: 5 };

        let outcome = retriever
            .retrieve("hello", &Entities::new(), &empty, 5, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.items.is_empty());
        assert!(outcome.all_failed());
    }

    #[tokio::test]
    async fn test_cancellation_aborts_retrieval() {
        let slow = SlowVectorStore {
            inner: vectors(),
            slow_collection: "market_reports",
            delay: Duration::from_millis(1_000),
        };
        let retriever = HybridRetriever::new(
            Arc::new(slow),
            Arc::new(relational()),
            StoreConfig::default(),
            Duration::from_secs(5),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = retriever.retrieve("rental yield", &entities(), &plan(), 5, &cancel).await;
        assert!(matches!(result, Err(AppError::RequestCancelled)));
    }

    #[test]
    fn test_render_row_uses_display_columns() {
        let row = json!({ "name": "Emaar", "founded": 1997, "tags": ["a"] })
            .as_object()
            .cloned()
            .unwrap();

        assert_eq!(render_row(&row, &["name".into()]), "name: Emaar");
        // serde_json maps iterate in key order
        assert_eq!(render_row(&row, &[]), "founded: 1997 | name: Emaar");
        assert!(!scalar_columns(&row).contains_key("tags"));
    }
}
