//! Decoding of TCA-style table definitions
//!
//! A table definition looks like
//!
//! ```yaml
//! ctrl:
//!   title: News
//! columns:
//!   type:
//!     label: LLL:EXT:news/locallang.xlf:type
//!     config:
//!       type: select
//!       items:
//!         - [Article, 0]
//!         - { label: External, value: 1 }
//!       eval: trim,required
//! ```
//!
//! Keys are loosely typed: values may be strings or numbers, `eval` may be a
//! comma-separated string or a list, and `items` come in two shapes.

use std::collections::BTreeSet;

use serde_yaml::Value;

use super::{Column, ColumnDescriptor, FieldKind, MetadataError, SelectItem, TableMetadata};

/// Decode one table definition
pub fn decode_table(table: &str, raw: &Value) -> Result<TableMetadata, MetadataError> {
    let invalid = |reason: &str| MetadataError::InvalidTable {
        table: table.to_string(),
        reason: reason.to_string(),
    };

    let root = raw
        .as_mapping()
        .ok_or_else(|| invalid("table definition must be a mapping"))?;

    let title = raw
        .get("ctrl")
        .and_then(|ctrl| ctrl.get("title"))
        .and_then(Value::as_str)
        .map(strip_translation_key);

    let mut columns = Vec::new();
    if let Some(raw_columns) = root.get("columns") {
        let raw_columns = raw_columns
            .as_mapping()
            .ok_or_else(|| invalid("`columns` must be a mapping"))?;
        for (name, column) in raw_columns {
            let name = name
                .as_str()
                .ok_or_else(|| invalid("column names must be strings"))?;
            let descriptor = decode_column(column)
                .map_err(|reason| invalid(&format!("column `{name}`: {reason}")))?;
            columns.push(Column {
                name: name.to_string(),
                descriptor,
            });
        }
    }

    Ok(TableMetadata { title, columns })
}

/// Decode one column definition (the value under `columns.<name>`)
pub fn decode_column(raw: &Value) -> Result<ColumnDescriptor, String> {
    let config = raw.get("config").ok_or("missing `config`")?;
    let kind = config
        .get("type")
        .and_then(Value::as_str)
        .ok_or("missing `config.type`")?;
    let render_type = config.get("renderType").and_then(Value::as_str);

    // Pre-v12 definitions express dates and links as input render types
    let kind = match (FieldKind::from_tca(kind), render_type) {
        (FieldKind::Input, Some("inputDateTime")) => FieldKind::DateTime,
        (FieldKind::Input, Some("inputLink")) => FieldKind::Link,
        (kind, _) => kind,
    };

    let mut descriptor = ColumnDescriptor::new(kind);
    descriptor.label = raw
        .get("label")
        .and_then(Value::as_str)
        .map(strip_translation_key)
        .filter(|l| !l.is_empty());
    descriptor.eval = decode_eval(config.get("eval"));
    descriptor.format = config.get("format").and_then(Value::as_str).map(str::to_string);
    descriptor.required = config
        .get("required")
        .map(|v| v.as_bool().unwrap_or_else(|| scalar_to_string(v) == "1"))
        .unwrap_or(false);
    descriptor.foreign_table = config
        .get("foreign_table")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    descriptor.mm_table = config
        .get("MM")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    if let Some(items) = config.get("items") {
        descriptor.items = decode_items(items)?;
    }

    Ok(descriptor)
}

fn decode_eval(raw: Option<&Value>) -> BTreeSet<String> {
    let flags: Vec<String> = match raw {
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(Value::Sequence(seq)) => seq.iter().map(scalar_to_string).collect(),
        _ => Vec::new(),
    };
    flags
        .into_iter()
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .collect()
}

fn decode_items(raw: &Value) -> Result<Vec<SelectItem>, String> {
    let seq = raw.as_sequence().ok_or("`items` must be a list")?;
    seq.iter()
        .map(|item| match item {
            Value::Sequence(pair) => {
                let label = pair.first().map(scalar_to_string).unwrap_or_default();
                let value = pair.get(1).map(scalar_to_string).unwrap_or_default();
                Ok(SelectItem::new(strip_translation_key(&label), value))
            }
            Value::Mapping(_) => {
                let label = item.get("label").map(scalar_to_string).unwrap_or_default();
                let value = item.get("value").map(scalar_to_string).unwrap_or_default();
                Ok(SelectItem::new(strip_translation_key(&label), value))
            }
            _ => Err("select items must be lists or mappings".to_string()),
        })
        .collect()
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        _ => String::new(),
    }
}

/// `LLL:EXT:news/Resources/Private/Language/locallang_db.xlf:type.article`
/// becomes `type.article`; plain labels pass through.
pub fn strip_translation_key(label: &str) -> String {
    match label.strip_prefix("LLL:") {
        Some(key) => key.rsplit(':').next().unwrap_or(key).to_string(),
        None => label.to_string(),
    }
}
