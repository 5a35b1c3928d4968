//! SQL generation for logical query descriptors
//!
//! Turns [QueryPlan] and [GroupedCount] into parameterized SQLite statements.
//! Identifiers come from metadata, never from the request, but they are still
//! validated and quoted before they reach SQL text.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::graphql::GraphqlError;
use crate::persistence::{ColumnRef, Constraint, GroupedCount, Join, QueryPlan, SqlValue};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex is valid"));

/// A statement plus the values bound to its `?N` placeholders, in order
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// Quote an identifier after checking it is a plain name
pub fn quote_ident(name: &str) -> Result<String, GraphqlError> {
    if IDENTIFIER.is_match(name) {
        Ok(format!("\"{name}\""))
    } else {
        Err(GraphqlError::Persistence(format!(
            "invalid SQL identifier `{name}`"
        )))
    }
}

fn column_sql(column: &ColumnRef) -> Result<String, GraphqlError> {
    Ok(format!(
        "{}.{}",
        quote_ident(&column.alias)?,
        quote_ident(&column.column)?
    ))
}

#[derive(Default)]
struct Builder {
    values: Vec<SqlValue>,
}

impl Builder {
    fn bind(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        format!("?{}", self.values.len())
    }

    fn from_clause(&self, table: &str, alias: &str, joins: &[Join]) -> Result<String, GraphqlError> {
        let mut sql = format!("FROM {} AS {}", quote_ident(table)?, quote_ident(alias)?);
        self.push_joins(&mut sql, joins)?;
        Ok(sql)
    }

    fn push_joins(&self, sql: &mut String, joins: &[Join]) -> Result<(), GraphqlError> {
        for join in joins {
            let _ = write!(
                sql,
                " JOIN {} AS {} ON {} = {}",
                quote_ident(&join.table)?,
                quote_ident(&join.alias)?,
                column_sql(&join.left)?,
                column_sql(&join.right)?
            );
        }
        Ok(())
    }

    fn conditions(&mut self, constraints: &[Constraint]) -> Result<Vec<String>, GraphqlError> {
        let mut out = Vec::with_capacity(constraints.len());
        for constraint in constraints {
            match constraint {
                Constraint::Eq { column, value } => {
                    let column = column_sql(column)?;
                    if *value == SqlValue::Null {
                        out.push(format!("{column} IS NULL"));
                    } else {
                        let param = self.bind(value.clone());
                        out.push(format!("{column} = {param}"));
                    }
                }
                Constraint::In { column, values } => {
                    if values.is_empty() {
                        out.push("0".to_string());
                        continue;
                    }
                    let column = column_sql(column)?;
                    let params: Vec<String> =
                        values.iter().map(|v| self.bind(v.clone())).collect();
                    out.push(format!("{column} IN ({})", params.join(", ")));
                }
                Constraint::Between { column, min, max } => {
                    let column = column_sql(column)?;
                    if let Some(min) = min {
                        let param = self.bind(SqlValue::Float(*min));
                        out.push(format!("{column} >= {param}"));
                    }
                    if let Some(max) = max {
                        let param = self.bind(SqlValue::Float(*max));
                        out.push(format!("{column} <= {param}"));
                    }
                }
            }
        }
        Ok(out)
    }

    fn where_clause(&mut self, constraints: &[Constraint]) -> Result<String, GraphqlError> {
        let conditions = self.conditions(constraints)?;
        if conditions.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" WHERE {}", conditions.join(" AND ")))
        }
    }

    /// `SELECT root.uid ...` restricted by the plan, for use inside `IN (...)`
    fn matching_uids(&mut self, plan: &QueryPlan) -> Result<String, GraphqlError> {
        let from = self.from_clause(&plan.table, &plan.alias, &plan.joins)?;
        let filter = self.where_clause(&plan.constraints)?;
        Ok(format!(
            "SELECT {} {from}{filter}",
            column_sql(&plan.root_column("uid"))?
        ))
    }

    fn finish(self, sql: String) -> SqlQuery {
        SqlQuery {
            sql,
            values: self.values,
        }
    }
}

/// One page of root rows. Joins may repeat a root row, hence `DISTINCT`.
pub fn build_select(plan: &QueryPlan) -> Result<SqlQuery, GraphqlError> {
    let mut builder = Builder::default();
    let alias = quote_ident(&plan.alias)?;
    let from = builder.from_clause(&plan.table, &plan.alias, &plan.joins)?;
    let filter = builder.where_clause(&plan.constraints)?;
    let mut sql = format!("SELECT DISTINCT {alias}.* {from}{filter}");

    if !plan.order.is_empty() {
        let order = plan
            .order
            .iter()
            .map(|o| Ok(format!("{} {}", column_sql(&o.column)?, o.direction.to_sql())))
            .collect::<Result<Vec<_>, GraphqlError>>()?;
        let _ = write!(sql, " ORDER BY {}", order.join(", "));
    }

    match plan.limit {
        Some(limit) => {
            let param = builder.bind(SqlValue::Int(limit));
            let _ = write!(sql, " LIMIT {param}");
        }
        None if plan.offset > 0 => sql.push_str(" LIMIT -1"),
        None => {}
    }
    if plan.offset > 0 {
        let param = builder.bind(SqlValue::Int(plan.offset));
        let _ = write!(sql, " OFFSET {param}");
    }

    Ok(builder.finish(sql))
}

/// Number of distinct root rows matched by the plan, ignoring paging
pub fn build_count(plan: &QueryPlan) -> Result<SqlQuery, GraphqlError> {
    let mut builder = Builder::default();
    let from = builder.from_clause(&plan.table, &plan.alias, &plan.joins)?;
    let filter = builder.where_clause(&plan.constraints)?;
    let sql = format!(
        "SELECT COUNT(DISTINCT {}) AS total {from}{filter}",
        column_sql(&plan.root_column("uid"))?
    );
    Ok(builder.finish(sql))
}

/// Per-value counts of root rows matched by `query.base`
pub fn build_grouped_count(query: &GroupedCount) -> Result<SqlQuery, GraphqlError> {
    let mut builder = Builder::default();
    let base = &query.base;
    let group = column_sql(&query.group)?;
    let outer_uid = column_sql(&ColumnRef::new(query.alias.clone(), "uid"))?;
    let from = builder.from_clause(&base.table, &query.alias, &query.joins)?;
    let matching = builder.matching_uids(base)?;
    let sql = format!(
        "SELECT {group} AS value, COUNT(DISTINCT {outer_uid}) AS total {from} \
         WHERE {group} IS NOT NULL AND {outer_uid} IN ({matching}) GROUP BY {group}"
    );
    Ok(builder.finish(sql))
}

/// Every value the grouped column holds in its own table
pub fn build_distinct_values(query: &GroupedCount) -> Result<SqlQuery, GraphqlError> {
    let table = terminal_table(query);
    let column = quote_ident(&query.group.column)?;
    let sql = format!(
        "SELECT DISTINCT {column} AS value FROM {} WHERE {column} IS NOT NULL",
        quote_ident(table)?
    );
    Ok(Builder::default().finish(sql))
}

/// Smallest and largest grouped value among rows matched by `query.base`
pub fn build_range_bounds(query: &GroupedCount) -> Result<SqlQuery, GraphqlError> {
    let mut builder = Builder::default();
    let group = column_sql(&query.group)?;
    let outer_uid = column_sql(&ColumnRef::new(query.alias.clone(), "uid"))?;
    let from = builder.from_clause(&query.base.table, &query.alias, &query.joins)?;
    let matching = builder.matching_uids(&query.base)?;
    let sql = format!(
        "SELECT CAST(MIN({group}) AS REAL) AS min_value, CAST(MAX({group}) AS REAL) AS max_value \
         {from} WHERE {outer_uid} IN ({matching})"
    );
    Ok(builder.finish(sql))
}

/// Table the grouped column belongs to
fn terminal_table(query: &GroupedCount) -> &str {
    query
        .joins
        .iter()
        .find(|j| j.alias == query.group.alias)
        .map(|j| j.table.as_str())
        .unwrap_or(query.base.table.as_str())
}

pub fn build_fetch_by_id(table: &str, uid: i64) -> Result<SqlQuery, GraphqlError> {
    let mut builder = Builder::default();
    let param = builder.bind(SqlValue::Int(uid));
    let sql = format!(
        "SELECT * FROM {} WHERE {} = {param}",
        quote_ident(table)?,
        quote_ident("uid")?
    );
    Ok(builder.finish(sql))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{OrderBy, SortDirection};

    fn news_plan() -> QueryPlan {
        QueryPlan::new("tx_news", "tx_news_1")
    }

    fn category_joins(root: &str, n: usize) -> Vec<Join> {
        let mm = format!("sys_category_record_mm_{n}");
        let cat = format!("sys_category_{n}");
        vec![
            Join {
                table: "sys_category_record_mm".to_string(),
                alias: mm.clone(),
                left: ColumnRef::new(root, "uid"),
                right: ColumnRef::new(mm.clone(), "uid_local"),
            },
            Join {
                table: "sys_category".to_string(),
                alias: cat.clone(),
                left: ColumnRef::new(mm, "uid_foreign"),
                right: ColumnRef::new(cat, "uid"),
            },
        ]
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("tx_news").unwrap(), "\"tx_news\"");
        assert!(quote_ident("tx_news; DROP TABLE x").is_err());
        assert!(quote_ident("").is_err());
        assert!(quote_ident("1abc").is_err());
    }

    #[test]
    fn test_build_select_plain() {
        let mut plan = news_plan();
        plan.limit = Some(25);
        let query = build_select(&plan).unwrap();
        assert_eq!(
            query.sql,
            "SELECT DISTINCT \"tx_news_1\".* FROM \"tx_news\" AS \"tx_news_1\" LIMIT ?1"
        );
        assert_eq!(query.values, vec![SqlValue::Int(25)]);
    }

    #[test]
    fn test_build_select_with_constraints_and_order() {
        let mut plan = news_plan();
        plan.joins = category_joins("tx_news_1", 1);
        plan.constraints.push(Constraint::In {
            column: ColumnRef::new("sys_category_1", "uid"),
            values: vec![SqlValue::Int(3), SqlValue::Int(4)],
        });
        plan.constraints.push(Constraint::Between {
            column: ColumnRef::new("tx_news_1", "price"),
            min: Some(1.0),
            max: None,
        });
        plan.order.push(OrderBy {
            column: ColumnRef::new("tx_news_1", "title"),
            direction: SortDirection::Desc,
        });
        plan.offset = 50;
        plan.limit = Some(25);

        let query = build_select(&plan).unwrap();
        assert!(query.sql.contains(
            "JOIN \"sys_category_record_mm\" AS \"sys_category_record_mm_1\" ON \"tx_news_1\".\"uid\" = \"sys_category_record_mm_1\".\"uid_local\""
        ));
        assert!(query.sql.contains(
            "WHERE \"sys_category_1\".\"uid\" IN (?1, ?2) AND \"tx_news_1\".\"price\" >= ?3"
        ));
        assert!(query.sql.ends_with("ORDER BY \"tx_news_1\".\"title\" DESC LIMIT ?4 OFFSET ?5"));
        assert_eq!(
            query.values,
            vec![
                SqlValue::Int(3),
                SqlValue::Int(4),
                SqlValue::Float(1.0),
                SqlValue::Int(25),
                SqlValue::Int(50)
            ]
        );
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let mut plan = news_plan();
        plan.constraints.push(Constraint::In {
            column: ColumnRef::new("tx_news_1", "uid"),
            values: vec![],
        });
        let query = build_count(&plan).unwrap();
        assert!(query.sql.ends_with("WHERE 0"));
        assert!(query.values.is_empty());
    }

    #[test]
    fn test_offset_without_limit() {
        let mut plan = news_plan();
        plan.offset = 10;
        let query = build_select(&plan).unwrap();
        assert!(query.sql.ends_with("LIMIT -1 OFFSET ?1"));
    }

    #[test]
    fn test_build_count_distinct() {
        let mut plan = news_plan();
        plan.joins = category_joins("tx_news_1", 1);
        let query = build_count(&plan).unwrap();
        assert!(query
            .sql
            .starts_with("SELECT COUNT(DISTINCT \"tx_news_1\".\"uid\") AS total FROM \"tx_news\""));
    }

    #[test]
    fn test_grouped_count_uses_separate_walk() {
        let mut base = news_plan();
        base.constraints.push(Constraint::Eq {
            column: ColumnRef::new("tx_news_1", "type"),
            value: SqlValue::String("0".to_string()),
        });
        let query = GroupedCount {
            base,
            alias: "tx_news_2".to_string(),
            joins: category_joins("tx_news_2", 3),
            group: ColumnRef::new("sys_category_3", "uid"),
        };
        let sql = build_grouped_count(&query).unwrap();
        assert!(sql.sql.contains("FROM \"tx_news\" AS \"tx_news_2\""));
        assert!(sql.sql.contains(
            "\"tx_news_2\".\"uid\" IN (SELECT \"tx_news_1\".\"uid\" FROM \"tx_news\" AS \"tx_news_1\" WHERE \"tx_news_1\".\"type\" = ?1)"
        ));
        assert!(sql.sql.ends_with("GROUP BY \"sys_category_3\".\"uid\""));

        let values = build_distinct_values(&query).unwrap();
        assert_eq!(
            values.sql,
            "SELECT DISTINCT \"uid\" AS value FROM \"sys_category\" WHERE \"uid\" IS NOT NULL"
        );
    }

    #[test]
    fn test_distinct_values_of_root_column() {
        let query = GroupedCount {
            base: news_plan(),
            alias: "tx_news_2".to_string(),
            joins: vec![],
            group: ColumnRef::new("tx_news_2", "color"),
        };
        let values = build_distinct_values(&query).unwrap();
        assert!(values.sql.contains("FROM \"tx_news\""));
    }

    #[test]
    fn test_null_equality() {
        let mut plan = news_plan();
        plan.constraints.push(Constraint::Eq {
            column: ColumnRef::new("tx_news_1", "deleted_at"),
            value: SqlValue::Null,
        });
        let query = build_count(&plan).unwrap();
        assert!(query.sql.ends_with("\"tx_news_1\".\"deleted_at\" IS NULL"));
    }
}
