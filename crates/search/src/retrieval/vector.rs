//! Vector similarity search using pgvector
//!
//! Every collection lives in one documents table, partitioned by the
//! `collection` column. Query text is embedded per lookup.

use super::{MetadataFilter, VectorHit, VectorStore};
use async_trait::async_trait;
use propforge_common::config::is_valid_identifier;
use propforge_common::db::DbPool;
use propforge_common::embeddings::Embedder;
use propforge_common::errors::{AppError, Result};
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use std::collections::BTreeMap;
use std::sync::Arc;

/// pgvector-backed document store
pub struct PgVectorStore {
    db: Arc<DbPool>,
    embedder: Arc<dyn Embedder>,
    table: String,
}

impl PgVectorStore {
    pub fn new(db: Arc<DbPool>, embedder: Arc<dyn Embedder>, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_valid_identifier(&table) {
            return Err(AppError::Configuration {
                message: format!("'{}' is not a valid documents table", table),
            });
        }
        Ok(Self { db, embedder, table })
    }

    /// Build the similarity query; `$1` embedding, `$2` collection
    fn build_query(
        &self,
        embedding: &[f32],
        collection: &str,
        filter: Option<&MetadataFilter>,
        k: usize,
    ) -> (String, Vec<sea_orm::Value>) {
        let mut values: Vec<sea_orm::Value> =
            vec![format_embedding(embedding).into(), collection.to_string().into()];

        let mut sql = format!(
            r#"
            SELECT
                content,
                metadata::text AS metadata,
                1 - (embedding <=> $1::vector) AS score
            FROM {}
            WHERE collection = $2
            "#,
            self.table
        );

        if let Some(filter) = filter {
            values.push(filter.to_json().to_string().into());
            sql.push_str(&format!("  AND metadata @> ${}::jsonb\n", values.len()));
        }

        values.push((k.min(i64::MAX as usize) as i64).into());
        sql.push_str(&format!(
            "            ORDER BY embedding <=> $1::vector\n            LIMIT ${}",
            values.len()
        ));

        (sql, values)
    }
}

fn format_embedding(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// Flatten a jsonb metadata document into string pairs; nested values are
/// kept as their JSON text
fn parse_metadata(raw: Option<String>) -> BTreeMap<String, String> {
    let Some(raw) = raw else {
        return BTreeMap::new();
    };
    match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&raw) {
        Ok(map) => map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect(),
        Err(_) => BTreeMap::new(),
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn similarity_search(
        &self,
        collection: &str,
        query: &str,
        filter: Option<&MetadataFilter>,
        k: usize,
    ) -> Result<Vec<VectorHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;
        let (sql, values) = self.build_query(&embedding, collection, filter, k);

        let rows = self
            .db
            .read()
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await?;

        let hits = rows
            .into_iter()
            .filter_map(|row| {
                Some(VectorHit {
                    content: row.try_get_by_index::<String>(0).ok()?,
                    metadata: parse_metadata(row.try_get_by_index::<Option<String>>(1).ok()?),
                    score: row.try_get_by_index::<f64>(2).ok()? as f32,
                })
            })
            .collect();

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_format() {
        assert_eq!(format_embedding(&[0.1, 0.2, 0.3]), "[0.1,0.2,0.3]");
    }

    #[test]
    fn test_parse_metadata() {
        let parsed = parse_metadata(Some(r#"{"community":"JVC","year":2024,"gone":null}"#.into()));
        assert_eq!(parsed.get("community").map(String::as_str), Some("JVC"));
        assert_eq!(parsed.get("year").map(String::as_str), Some("2024"));
        assert!(!parsed.contains_key("gone"));

        assert!(parse_metadata(Some("not json".into())).is_empty());
        assert!(parse_metadata(None).is_empty());
    }
}
