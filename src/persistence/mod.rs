//! Persistence collaborator interface
//!
//! Resolvers never issue SQL themselves. They describe what they need as
//! logical descriptors ([QueryPlan], [GroupedCount]) and hand them to a
//! [Persistence] implementation, which owns translation to real queries.
//! The SQLite implementation lives in [crate::db].

use std::fmt;

use async_trait::async_trait;

use crate::graphql::GraphqlError;

/// One stored row, keyed by column name
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Column reached through a table alias (`alias.column`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.column)
    }
}

/// Represents a SQL value that can be bound to a query.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

/// Logical WHERE condition
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Eq { column: ColumnRef, value: SqlValue },
    In { column: ColumnRef, values: Vec<SqlValue> },
    /// Closed interval; a missing bound is open on that side
    Between {
        column: ColumnRef,
        min: Option<f64>,
        max: Option<f64>,
    },
}

/// Inner join of `table AS alias` on `left = right`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub table: String,
    pub alias: String,
    pub left: ColumnRef,
    pub right: ColumnRef,
}

/// Sort direction for ORDER BY clauses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A-Z, 1-9, oldest-newest)
    #[default]
    Asc,
    /// Descending order (Z-A, 9-1, newest-oldest)
    Desc,
}

impl SortDirection {
    /// Convert to SQL order string
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub direction: SortDirection,
}

/// A list query against one root table
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub table: String,
    /// Alias of the root table
    pub alias: String,
    pub joins: Vec<Join>,
    pub constraints: Vec<Constraint>,
    pub order: Vec<OrderBy>,
    pub offset: i64,
    pub limit: Option<i64>,
}

impl QueryPlan {
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
            joins: Vec::new(),
            constraints: Vec::new(),
            order: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    /// Column of the root table
    pub fn root_column(&self, column: impl Into<String>) -> ColumnRef {
        ColumnRef::new(self.alias.clone(), column)
    }
}

/// Counts distinct root records per value of `group`, restricted to the
/// records matched by `base`.
///
/// `alias` and `joins` describe a second walk from the root table to the
/// grouped column; their aliases never collide with the ones inside `base`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedCount {
    pub base: QueryPlan,
    pub alias: String,
    pub joins: Vec<Join>,
    pub group: ColumnRef,
}

/// One page of rows plus the total number of matches
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub rows: Vec<Record>,
    pub total: i64,
}

/// Storage access used by the generated resolvers
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Fetch one record by `uid`
    async fn fetch_by_id(&self, table: &str, uid: i64) -> Result<Option<Record>, GraphqlError>;

    /// Fetch one page of `plan` together with the unpaged total
    async fn fetch_all(&self, plan: &QueryPlan) -> Result<Page, GraphqlError>;

    /// Per-value record counts. Values known to the store but matching no
    /// record of `base` are reported with a count of 0.
    async fn count_grouped_by(
        &self,
        query: &GroupedCount,
    ) -> Result<Vec<(String, i64)>, GraphqlError>;

    /// Smallest and largest value of the grouped column within `base`
    async fn range_bounds(
        &self,
        query: &GroupedCount,
    ) -> Result<(Option<f64>, Option<f64>), GraphqlError>;
}
