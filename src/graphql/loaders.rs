//! DataLoaders batching relation lookups
//!
//! Resolving `author` or `image` on every edge of a page would cost one query
//! per edge. The loaders collect the keys requested while a page resolves and
//! fetch them with one `IN (...)` query per table (or per table and field for
//! file references).
//!
//! The loaders are registered as schema data without a cache, so every batch
//! reads current rows.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_graphql::dataloader::Loader;

use super::builtins::FILE_REFERENCE_TABLE;
use super::error::GraphqlError;
use super::filters::AliasAllocator;
use super::resolvers::json_int;
use crate::persistence::{
    Constraint, OrderBy, Persistence, QueryPlan, Record, SortDirection, SqlValue,
};

/// A record of `table` by `uid`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub table: String,
    pub uid: i64,
}

impl RecordKey {
    pub fn new(table: impl Into<String>, uid: i64) -> Self {
        Self {
            table: table.into(),
            uid,
        }
    }
}

/// The file references of `field` on the record `uid_foreign` of `table`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileReferenceKey {
    pub table: String,
    pub field: String,
    pub uid_foreign: i64,
}

impl FileReferenceKey {
    pub fn new(table: impl Into<String>, field: impl Into<String>, uid_foreign: i64) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
            uid_foreign,
        }
    }
}

fn uid_constraint(plan: &QueryPlan, column: &str, uids: Vec<i64>) -> Constraint {
    Constraint::In {
        column: plan.root_column(column),
        values: uids.into_iter().map(SqlValue::Int).collect(),
    }
}

/// Loads single records referenced by `select` columns
pub struct RecordLoader {
    store: Arc<dyn Persistence>,
}

impl RecordLoader {
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self { store }
    }
}

impl Loader<RecordKey> for RecordLoader {
    type Value = Record;
    type Error = Arc<GraphqlError>;

    async fn load(&self, keys: &[RecordKey]) -> Result<HashMap<RecordKey, Record>, Self::Error> {
        let mut by_table: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
        for key in keys {
            by_table.entry(key.table.as_str()).or_default().push(key.uid);
        }

        let mut loaded = HashMap::with_capacity(keys.len());
        for (table, uids) in by_table {
            tracing::debug!(table = %table, count = uids.len(), "Batch loading records");

            let mut aliases = AliasAllocator::new();
            let mut plan = QueryPlan::new(table, aliases.next(table));
            plan.constraints.push(uid_constraint(&plan, "uid", uids));

            let page = self.store.fetch_all(&plan).await.map_err(Arc::new)?;
            for record in page.rows {
                if let Some(uid) = record.get("uid").and_then(json_int) {
                    loaded.insert(RecordKey::new(table, uid), record);
                }
            }
        }

        Ok(loaded)
    }
}

/// Loads `sys_file_reference` rows, ordered by `sorting_foreign`
pub struct FileReferenceLoader {
    store: Arc<dyn Persistence>,
}

impl FileReferenceLoader {
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self { store }
    }
}

impl Loader<FileReferenceKey> for FileReferenceLoader {
    type Value = Vec<Record>;
    type Error = Arc<GraphqlError>;

    async fn load(
        &self,
        keys: &[FileReferenceKey],
    ) -> Result<HashMap<FileReferenceKey, Vec<Record>>, Self::Error> {
        let mut grouped: BTreeMap<(&str, &str), Vec<i64>> = BTreeMap::new();
        for key in keys {
            grouped
                .entry((key.table.as_str(), key.field.as_str()))
                .or_default()
                .push(key.uid_foreign);
        }

        let mut loaded: HashMap<FileReferenceKey, Vec<Record>> =
            keys.iter().map(|k| (k.clone(), Vec::new())).collect();

        for ((table, field), uids) in grouped {
            tracing::debug!(
                table = %table,
                field = %field,
                count = uids.len(),
                "Batch loading file references"
            );

            let mut aliases = AliasAllocator::new();
            let mut plan =
                QueryPlan::new(FILE_REFERENCE_TABLE, aliases.next(FILE_REFERENCE_TABLE));
            plan.constraints = vec![
                uid_constraint(&plan, "uid_foreign", uids),
                Constraint::Eq {
                    column: plan.root_column("tablenames"),
                    value: SqlValue::String(table.to_string()),
                },
                Constraint::Eq {
                    column: plan.root_column("fieldname"),
                    value: SqlValue::String(field.to_string()),
                },
            ];
            plan.order = vec![
                OrderBy {
                    column: plan.root_column("sorting_foreign"),
                    direction: SortDirection::Asc,
                },
                OrderBy {
                    column: plan.root_column("uid"),
                    direction: SortDirection::Asc,
                },
            ];

            let page = self.store.fetch_all(&plan).await.map_err(Arc::new)?;
            for row in page.rows {
                let Some(uid_foreign) = row.get("uid_foreign").and_then(json_int) else {
                    continue;
                };
                if let Some(rows) = loaded.get_mut(&FileReferenceKey::new(table, field, uid_foreign)) {
                    rows.push(row);
                }
            }
        }

        Ok(loaded)
    }
}

/// Unwrap a loader error, keeping its variant when this was the last handle
pub fn load_error(error: Arc<GraphqlError>) -> GraphqlError {
    Arc::try_unwrap(error).unwrap_or_else(|shared| match shared.as_ref() {
        GraphqlError::Persistence(message) => GraphqlError::Persistence(message.clone()),
        other => GraphqlError::Persistence(other.to_string()),
    })
}
