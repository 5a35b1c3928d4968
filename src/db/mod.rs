//! SQLite access to the content tables

pub mod query;
pub mod sqlite_helpers;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use tracing::debug;

use crate::graphql::GraphqlError;
use crate::persistence::{GroupedCount, Page, Persistence, QueryPlan, Record};

use query::SqlQuery;
use sqlite_helpers::{bind_value, column_f64, column_value, group_key, row_to_record};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new database connection pool
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            format!("sqlite://{url}")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .with_context(|| format!("Invalid database URL {url}"))?
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_rows(&self, query: &SqlQuery) -> Result<Vec<SqliteRow>, GraphqlError> {
        debug!(sql = %query.sql, binds = query.values.len(), "Executing content query");
        let mut statement = sqlx::query(&query.sql);
        for value in &query.values {
            statement = bind_value(statement, value);
        }
        statement.fetch_all(&self.pool).await.map_err(persistence_error)
    }
}

fn persistence_error(e: sqlx::Error) -> GraphqlError {
    GraphqlError::Persistence(e.to_string())
}

#[async_trait]
impl Persistence for Database {
    async fn fetch_by_id(&self, table: &str, uid: i64) -> Result<Option<Record>, GraphqlError> {
        let rows = self.fetch_rows(&query::build_fetch_by_id(table, uid)?).await?;
        Ok(rows.first().map(row_to_record))
    }

    async fn fetch_all(&self, plan: &QueryPlan) -> Result<Page, GraphqlError> {
        let rows = self.fetch_rows(&query::build_select(plan)?).await?;
        let counted = self.fetch_rows(&query::build_count(plan)?).await?;
        let total = counted
            .first()
            .and_then(|row| column_value(row, 0).as_i64())
            .unwrap_or(0);

        Ok(Page {
            rows: rows.iter().map(row_to_record).collect(),
            total,
        })
    }

    async fn count_grouped_by(
        &self,
        query: &GroupedCount,
    ) -> Result<Vec<(String, i64)>, GraphqlError> {
        let counted = self.fetch_rows(&query::build_grouped_count(query)?).await?;
        let mut counts: Vec<(String, i64)> = counted
            .iter()
            .filter_map(|row| {
                let key = group_key(&column_value(row, 0))?;
                Some((key, column_value(row, 1).as_i64().unwrap_or(0)))
            })
            .collect();

        let known = self.fetch_rows(&query::build_distinct_values(query)?).await?;
        for row in &known {
            let Some(key) = group_key(&column_value(row, 0)) else {
                continue;
            };
            if !counts.iter().any(|(k, _)| *k == key) {
                counts.push((key, 0));
            }
        }

        Ok(counts)
    }

    async fn range_bounds(
        &self,
        query: &GroupedCount,
    ) -> Result<(Option<f64>, Option<f64>), GraphqlError> {
        let rows = self.fetch_rows(&query::build_range_bounds(query)?).await?;
        Ok(rows
            .first()
            .map(|row| (column_f64(row, 0), column_f64(row, 1)))
            .unwrap_or((None, None)))
    }
}
