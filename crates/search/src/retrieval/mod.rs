//! Hybrid retrieval system
//!
//! Provides:
//! - Store traits for the vector and relational collaborators
//! - Entity-derived filters for both store kinds
//! - Postgres (pgvector / row_to_json) and in-memory implementations
//! - The concurrent, per-source-timeout hybrid retriever

mod filter;
mod hybrid;
mod in_memory;
mod relational;
mod vector;

pub use filter::{CompareOp, FilterValue, MetadataFilter, Predicate, RowFilter};
pub use hybrid::{HybridRetriever, RetrievalOutcome};
pub use in_memory::{Document, Fixtures, InMemoryRelationalStore, InMemoryVectorStore};
pub use relational::SqlRelationalStore;
pub use vector::PgVectorStore;

use async_trait::async_trait;
use propforge_common::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One relational row, column name -> JSON value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Passage returned by a similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub content: String,

    /// Cosine similarity, only comparable within one collection
    pub score: f32,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Semantic document store with several topical collections
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Top `k` passages of `collection` most similar to `query`
    async fn similarity_search(
        &self,
        collection: &str,
        query: &str,
        filter: Option<&MetadataFilter>,
        k: usize,
    ) -> Result<Vec<VectorHit>>;
}

/// Structured store queried with parameterized filters
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// At most `limit` rows of `table` matching every predicate
    async fn query(&self, table: &str, filter: &RowFilter, limit: usize) -> Result<Vec<Row>>;
}
