//! Relational lookups over configured tables
//!
//! Rows come back as `row_to_json` text so any table shape maps onto
//! [`Row`] without per-table models.

use super::{RelationalStore, Row, RowFilter};
use async_trait::async_trait;
use propforge_common::config::{is_valid_identifier, TableSchema};
use propforge_common::db::DbPool;
use propforge_common::errors::{AppError, Result};
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use std::sync::Arc;
use tracing::warn;

pub struct SqlRelationalStore {
    db: Arc<DbPool>,
    schemas: Vec<TableSchema>,
}

impl SqlRelationalStore {
    pub fn new(db: Arc<DbPool>, schemas: Vec<TableSchema>) -> Self {
        Self { db, schemas }
    }

    fn schema(&self, table: &str) -> Option<&TableSchema> {
        self.schemas.iter().find(|s| s.table == table)
    }
}

fn build_query(
    schema: Option<&TableSchema>,
    table: &str,
    filter: &RowFilter,
    limit: usize,
) -> Result<(String, Vec<sea_orm::Value>)> {
    if !is_valid_identifier(table) {
        return Err(AppError::Configuration {
            message: format!("'{}' is not a valid table identifier", table),
        });
    }

    let (where_clause, mut values) = filter.where_clause("t", 1)?;
    let mut sql = format!("SELECT row_to_json(t)::text AS row FROM {} t{}", table, where_clause);

    if let Some(schema) = schema {
        if let Some(ref column) = schema.order_by {
            if !is_valid_identifier(column) {
                return Err(AppError::Configuration {
                    message: format!("'{}' is not a valid order column", column),
                });
            }
            let direction = if schema.order_desc { "DESC" } else { "ASC" };
            sql.push_str(&format!(" ORDER BY t.{} {}", column, direction));
        }
    }

    values.push((limit.min(i64::MAX as usize) as i64).into());
    sql.push_str(&format!(" LIMIT ${}", values.len()));

    Ok((sql, values))
}

#[async_trait]
impl RelationalStore for SqlRelationalStore {
    async fn query(&self, table: &str, filter: &RowFilter, limit: usize) -> Result<Vec<Row>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let (sql, values) = build_query(self.schema(table), table, filter, limit)?;
        let rows = self
            .db
            .read()
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await?;

        let parsed = rows
            .into_iter()
            .filter_map(|row| {
                let text = row.try_get_by_index::<String>(0).ok()?;
                match serde_json::from_str::<Row>(&text) {
                    Ok(row) => Some(row),
                    Err(e) => {
                        warn!(table = %table, error = %e, "Skipping unparseable row");
                        None
                    }
                }
            })
            .collect();

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use propforge_common::config::StoreConfig;
    use propforge_common::context::{Entities, EntityKind, EntityValue};

    #[test]
    fn test_build_query_orders_and_limits() {
        let store = StoreConfig::default();
        let schema = store.table("transactions");
        let (sql, values) = build_query(schema, "transactions", &RowFilter::default(), 5).unwrap();

        assert_eq!(
            sql,
            "SELECT row_to_json(t)::text AS row FROM transactions t ORDER BY t.transaction_date DESC LIMIT $1"
        );
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_build_query_numbers_parameters_after_filter() {
        let store = StoreConfig::default();
        let mut entities = Entities::new();
        entities.insert(EntityKind::Location, EntityValue::Text("JVC".into()));
        entities.insert(EntityKind::BedroomCount, EntityValue::Count(1));

        let schema = store.table("listings");
        let filter = RowFilter::from_entities(schema, &entities);
        let (sql, values) = build_query(schema, "listings", &filter, 3).unwrap();

        assert!(sql.contains(" WHERE "));
        assert!(sql.ends_with(&format!("LIMIT ${}", filter.predicates.len() + 1)));
        assert_eq!(values.len(), filter.predicates.len() + 1);
        assert!(!sql.contains("JVC"));
    }

    #[test]
    fn test_build_query_rejects_bad_table() {
        let result = build_query(None, "listings; drop", &RowFilter::default(), 3);
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }
}
