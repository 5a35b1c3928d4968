//! SQLite helper utilities for type conversion
//!
//! Content tables are read without a compile-time schema, so rows are decoded
//! by inspecting each value's storage class.

use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite, ValueRef};

use crate::persistence::{Record, SqlValue};

// ============================================================================
// Binding
// ============================================================================

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Bind a [SqlValue] to a query. Booleans are stored as 0/1.
pub fn bind_value<'q>(query: SqliteQuery<'q>, value: &SqlValue) -> SqliteQuery<'q> {
    match value {
        SqlValue::String(s) => query.bind(s.clone()),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Bool(b) => query.bind(i64::from(*b)),
        SqlValue::Null => query.bind(Option::<String>::None),
    }
}

// ============================================================================
// Row decoding
// ============================================================================

/// Decode column `index` into JSON: INTEGER, then REAL, then TEXT; BLOBs become null
pub fn column_value(row: &SqliteRow, index: usize) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(_) => {}
        Err(_) => return Value::Null,
    }
    if let Ok(i) = row.try_get::<i64, _>(index) {
        return Value::from(i);
    }
    if let Ok(f) = row.try_get::<f64, _>(index) {
        return serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(s) = row.try_get::<String, _>(index) {
        return Value::String(s);
    }
    Value::Null
}

/// Decode a whole row keyed by column name
pub fn row_to_record(row: &SqliteRow) -> Record {
    row.columns()
        .iter()
        .map(|column| (column.name().to_string(), column_value(row, column.ordinal())))
        .collect()
}

/// String form of a grouped value; matches how filter values are keyed
pub fn group_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(i.to_string()),
            None => n.as_f64().map(|f| f.to_string()),
        },
        Value::Bool(b) => Some(i64::from(*b).to_string()),
        _ => None,
    }
}

/// Optional float column, tolerating integer storage
pub fn column_f64(row: &SqliteRow, index: usize) -> Option<f64> {
    match column_value(row, index) {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
