//! Entity-derived filters
//!
//! Entities become typed predicates through the configured bindings. The
//! SQL rendering only ever places validated identifiers in the statement
//! text; values travel as bound parameters.

use super::Row;
use propforge_common::config::{is_valid_identifier, CollectionSchema, TableSchema};
use propforge_common::context::{Entities, EntityValue};
use propforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Gte,
    Lte,
    /// Case-insensitive text equality
    EqIgnoreCase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Int(i64),
    Text(String),
}

impl From<FilterValue> for sea_orm::Value {
    fn from(value: FilterValue) -> Self {
        match value {
            FilterValue::Int(n) => n.into(),
            FilterValue::Text(s) => s.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    pub value: FilterValue,
}

impl Predicate {
    fn matches(&self, row: &Row) -> bool {
        let Some(actual) = row.get(&self.column) else {
            return false;
        };
        match (&self.value, self.op) {
            (FilterValue::Int(expected), op) => {
                let Some(actual) = actual.as_f64() else {
                    return false;
                };
                let expected = *expected as f64;
                match op {
                    CompareOp::Gte => actual >= expected,
                    CompareOp::Lte => actual <= expected,
                    CompareOp::Eq | CompareOp::EqIgnoreCase => actual == expected,
                }
            }
            (FilterValue::Text(expected), op) => {
                let Some(actual) = actual.as_str() else {
                    return false;
                };
                match op {
                    CompareOp::EqIgnoreCase => actual.to_lowercase() == expected.to_lowercase(),
                    _ => actual == expected,
                }
            }
        }
    }
}

/// Conjunction of predicates over one table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowFilter {
    pub predicates: Vec<Predicate>,
}

impl RowFilter {
    /// Build predicates for every entity the table has a binding for.
    /// Entities without a binding are ignored.
    pub fn from_entities(schema: Option<&TableSchema>, entities: &Entities) -> Self {
        let Some(schema) = schema else {
            return Self::default();
        };

        let mut predicates = Vec::new();
        for binding in &schema.bindings {
            let Some(value) = entities.get(&binding.entity) else {
                continue;
            };
            let column = binding.field.clone();
            match value {
                EntityValue::Budget(range) => {
                    if let Some(min) = range.min {
                        predicates.push(Predicate {
                            column: column.clone(),
                            op: CompareOp::Gte,
                            value: FilterValue::Int(clamp_i64(min)),
                        });
                    }
                    if let Some(max) = range.max {
                        predicates.push(Predicate {
                            column,
                            op: CompareOp::Lte,
                            value: FilterValue::Int(clamp_i64(max)),
                        });
                    }
                }
                EntityValue::Count(n) => predicates.push(Predicate {
                    column,
                    op: CompareOp::Eq,
                    value: FilterValue::Int(i64::from(*n)),
                }),
                EntityValue::Text(text) => predicates.push(Predicate {
                    column,
                    op: CompareOp::EqIgnoreCase,
                    value: FilterValue::Text(text.clone()),
                }),
            }
        }

        Self { predicates }
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// In-process evaluation, used by the in-memory store
    pub fn matches(&self, row: &Row) -> bool {
        self.predicates.iter().all(|p| p.matches(row))
    }

    /// `WHERE` fragment with placeholders starting at `$first_param`.
    /// Returns an empty fragment for an empty filter.
    pub fn where_clause(
        &self,
        alias: &str,
        first_param: usize,
    ) -> Result<(String, Vec<sea_orm::Value>)> {
        if self.predicates.is_empty() {
            return Ok((String::new(), Vec::new()));
        }

        let mut clauses = Vec::with_capacity(self.predicates.len());
        let mut values = Vec::with_capacity(self.predicates.len());

        for (offset, predicate) in self.predicates.iter().enumerate() {
            if !is_valid_identifier(&predicate.column) {
                return Err(AppError::Configuration {
                    message: format!("'{}' is not a valid column identifier", predicate.column),
                });
            }
            let param = first_param + offset;
            let column = format!("{}.{}", alias, predicate.column);
            clauses.push(match predicate.op {
                CompareOp::Eq => format!("{} = ${}", column, param),
                CompareOp::Gte => format!("{} >= ${}", column, param),
                CompareOp::Lte => format!("{} <= ${}", column, param),
                CompareOp::EqIgnoreCase => format!("LOWER({}) = LOWER(${})", column, param),
            });
            values.push(predicate.value.clone().into());
        }

        Ok((format!(" WHERE {}", clauses.join(" AND ")), values))
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Exact-match metadata constraints for one collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub equals: BTreeMap<String, String>,
}

impl MetadataFilter {
    /// `None` when no bound entity is present
    pub fn from_entities(schema: Option<&CollectionSchema>, entities: &Entities) -> Option<Self> {
        let schema = schema?;
        let equals: BTreeMap<String, String> = schema
            .bindings
            .iter()
            .filter_map(|binding| {
                entities
                    .get(&binding.entity)
                    .map(|value| (binding.field.clone(), value.to_string()))
            })
            .collect();
        (!equals.is_empty()).then_some(Self { equals })
    }

    /// Case-insensitive on values; a missing key never matches
    pub fn matches(&self, metadata: &BTreeMap<String, String>) -> bool {
        self.equals.iter().all(|(key, expected)| {
            metadata
                .get(key)
                .is_some_and(|actual| actual.to_lowercase() == expected.to_lowercase())
        })
    }

    /// JSON object for a jsonb containment (`@>`) parameter
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.equals
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }
}
