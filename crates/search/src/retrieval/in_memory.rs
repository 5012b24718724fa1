//! In-process stores seeded from JSON fixtures
//!
//! Used by the `memory` store provider and by tests. Similarity is a
//! lexical cosine over normalized token counts, which keeps results
//! deterministic without an embedding service.

use super::{MetadataFilter, RelationalStore, Row, RowFilter, VectorHit, VectorStore};
use async_trait::async_trait;
use propforge_common::context::normalize;
use propforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into(), metadata: BTreeMap::new() }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Seed data for both in-memory stores
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<Document>>,

    #[serde(default)]
    pub tables: BTreeMap<String, Vec<Row>>,
}

impl Fixtures {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn with_documents(mut self, collection: impl Into<String>, documents: Vec<Document>) -> Self {
        self.collections.entry(collection.into()).or_default().extend(documents);
        self
    }

    pub fn with_rows(mut self, table: impl Into<String>, rows: Vec<Row>) -> Self {
        self.tables.entry(table.into()).or_default().extend(rows);
        self
    }
}

fn term_counts(text: &str) -> HashMap<String, f32> {
    let mut counts = HashMap::new();
    for token in normalize(text).split_whitespace() {
        *counts.entry(token.to_string()).or_insert(0.0) += 1.0;
    }
    counts
}

fn cosine(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    let dot: f32 = a.iter().filter_map(|(t, x)| b.get(t).map(|y| x * y)).sum();
    let norm_a = a.values().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.values().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

pub struct InMemoryVectorStore {
    collections: HashMap<String, Vec<(Document, HashMap<String, f32>)>>,
}

impl InMemoryVectorStore {
    pub fn new(collections: BTreeMap<String, Vec<Document>>) -> Self {
        let collections = collections
            .into_iter()
            .map(|(name, docs)| {
                let indexed = docs
                    .into_iter()
                    .map(|doc| {
                        let terms = term_counts(&doc.content);
                        (doc, terms)
                    })
                    .collect();
                (name, indexed)
            })
            .collect();
        Self { collections }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn similarity_search(
        &self,
        collection: &str,
        query: &str,
        filter: Option<&MetadataFilter>,
        k: usize,
    ) -> Result<Vec<VectorHit>> {
        let Some(documents) = self.collections.get(collection) else {
            return Err(AppError::NotFound {
                resource_type: "collection".into(),
                id: collection.into(),
            });
        };

        let query_terms = term_counts(query);
        let mut hits: Vec<VectorHit> = documents
            .iter()
            .filter(|(doc, _)| filter.map_or(true, |f| f.matches(&doc.metadata)))
            .map(|(doc, terms)| VectorHit {
                content: doc.content.clone(),
                score: cosine(&query_terms, terms),
                metadata: doc.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }
}

pub struct InMemoryRelationalStore {
    tables: HashMap<String, Vec<Row>>,
}

impl InMemoryRelationalStore {
    pub fn new(tables: BTreeMap<String, Vec<Row>>) -> Self {
        Self { tables: tables.into_iter().collect() }
    }
}

#[async_trait]
impl RelationalStore for InMemoryRelationalStore {
    async fn query(&self, table: &str, filter: &RowFilter, limit: usize) -> Result<Vec<Row>> {
        let rows = self.tables.get(table).ok_or_else(|| AppError::NotFound {
            resource_type: "table".into(),
            id: table.into(),
        })?;

        Ok(rows
            .iter()
            .filter(|row| filter.matches(row))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use propforge_common::context::{RoutingConfig, SourceKind};
    use serde_json::json;

    fn fixtures() -> Fixtures {
        Fixtures::default()
            .with_documents(
                "neighborhoods",
                vec![
                    Document::new("Dubai Marina is a waterfront community with high-rise towers")
                        .with_metadata("community", "Dubai Marina"),
                    Document::new("JVC offers affordable family townhouses and apartments")
                        .with_metadata("community", "Jumeirah Village Circle"),
                ],
            )
            .with_rows(
                "listings",
                vec![
                    json!({ "community": "Dubai Marina", "bedrooms": 2, "price": 2_900_000 })
                        .as_object()
                        .cloned()
                        .unwrap(),
                    json!({ "community": "JVC", "bedrooms": 1, "price": 900_000 })
                        .as_object()
                        .cloned()
                        .unwrap(),
                ],
            )
    }

    #[tokio::test]
    async fn test_similarity_prefers_overlapping_terms() {
        let store = InMemoryVectorStore::new(fixtures().collections);
        let hits = store
            .similarity_search("neighborhoods", "waterfront towers in dubai marina", None, 5)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits[0].content.starts_with("Dubai Marina"));
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_similarity_respects_filter_and_k() {
        let store = InMemoryVectorStore::new(fixtures().collections);
        let mut filter = MetadataFilter::default();
        filter.equals.insert("community".into(), "jumeirah village circle".into());

        let hits = store
            .similarity_search("neighborhoods", "apartments", Some(&filter), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.starts_with("JVC"));

        let none = store.similarity_search("neighborhoods", "apartments", None, 0).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_collection_and_table() {
        let vectors = InMemoryVectorStore::new(fixtures().collections);
        assert!(matches!(
            vectors.similarity_search("missing", "x", None, 3).await,
            Err(AppError::NotFound { .. })
        ));

        let rows = InMemoryRelationalStore::new(fixtures().tables);
        assert!(rows.query("missing", &RowFilter::default(), 3).await.is_err());
    }

    #[tokio::test]
    async fn test_relational_limit() {
        let store = InMemoryRelationalStore::new(fixtures().tables);
        let rows = store.query("listings", &RowFilter::default(), 1).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_fixtures_deserialize() {
        let raw = r#"{
            "collections": { "regulations": [ { "content": "Freehold areas" } ] },
            "tables": { "developers": [ { "name": "Emaar" } ] }
        }"#;
        let fixtures: Fixtures = serde_json::from_str(raw).unwrap();
        assert_eq!(fixtures.collections["regulations"].len(), 1);
        assert!(fixtures.collections["regulations"][0].metadata.is_empty());
        assert_eq!(fixtures.tables["developers"][0]["name"], "Emaar");
    }

    #[tokio::test]
    async fn test_shipped_fixtures_cover_default_routes() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/fixtures.json");
        let fixtures = Fixtures::load(path).await.unwrap();

        for source in RoutingConfig::default().all_sources() {
            let present = match source.kind {
                SourceKind::Vector => fixtures.collections.contains_key(&source.source_id),
                SourceKind::Relational => fixtures.tables.contains_key(&source.source_id),
            };
            assert!(present, "fixtures lack {}", source.source_id);
        }
    }
}
