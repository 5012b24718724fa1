//! PropForge Search
//!
//! Hybrid retrieval over the routed knowledge sources:
//! - pgvector similarity search over topical document collections
//! - Parameterized relational lookups driven by extracted entities
//! - In-memory stores for local runs and tests

pub mod retrieval;

pub use retrieval::{HybridRetriever, RelationalStore, RetrievalOutcome, VectorStore};
