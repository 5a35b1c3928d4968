//! Column-to-type mapping
//!
//! [map_column] turns one column descriptor into the GraphQL type of its field
//! together with a [MappedKind] telling the resolver how to read the stored
//! value. Enums are synthesized from static select items on the fly.

use std::collections::BTreeMap;

use async_graphql::dynamic::TypeRef;
use async_graphql::{Number, Value};

use super::builtins::{DATETIME, FILE_REFERENCE, LINK};
use super::error::GraphqlError;
use super::naming::enum_symbols;
use super::registry::TypeRegistry;
use crate::metadata::{ColumnDescriptor, FieldKind, SelectItem};
use crate::persistence::SqlValue;

/// Built-in scalar a stored value is exposed as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Int,
    Float,
    String,
    Boolean,
}

impl ScalarKind {
    pub fn type_name(self) -> &'static str {
        match self {
            ScalarKind::Int => TypeRef::INT,
            ScalarKind::Float => TypeRef::FLOAT,
            ScalarKind::String => TypeRef::STRING,
            ScalarKind::Boolean => TypeRef::BOOLEAN,
        }
    }

    /// Parse a filter literal into a bindable value
    pub fn coerce(self, literal: &str) -> Option<SqlValue> {
        match self {
            ScalarKind::Int => literal.trim().parse().ok().map(SqlValue::Int),
            ScalarKind::Float => literal
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(SqlValue::Float),
            ScalarKind::String => Some(SqlValue::String(literal.to_string())),
            ScalarKind::Boolean => match literal.trim().to_lowercase().as_str() {
                "true" | "1" => Some(SqlValue::Bool(true)),
                "false" | "0" => Some(SqlValue::Bool(false)),
                _ => None,
            },
        }
    }

    /// Convert a stored value; `None` for NULL or values of another shape
    pub fn to_value(self, raw: &serde_json::Value) -> Option<Value> {
        use serde_json::Value as Json;

        match (self, raw) {
            (_, Json::Null) => None,
            (ScalarKind::Int, Json::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Value::from),
            (ScalarKind::Int, Json::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (ScalarKind::Int, Json::Bool(b)) => Some(Value::from(i64::from(*b))),
            (ScalarKind::Float, Json::Number(n)) => Some(Value::Number(n.clone())),
            (ScalarKind::Float, Json::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            (ScalarKind::String, Json::String(s)) => Some(Value::from(s.clone())),
            (ScalarKind::String, Json::Number(n)) => Some(Value::from(n.to_string())),
            (ScalarKind::String, Json::Bool(b)) => Some(Value::from(b.to_string())),
            (ScalarKind::Boolean, Json::Bool(b)) => Some(Value::from(*b)),
            (ScalarKind::Boolean, Json::Number(n)) => Some(Value::from(n.as_f64() != Some(0.0))),
            (ScalarKind::Boolean, Json::String(s)) => {
                Some(Value::from(!matches!(s.trim(), "" | "0" | "false")))
            }
            _ => None,
        }
    }
}

/// How a resolver reads a mapped column
#[derive(Debug, Clone, PartialEq)]
pub enum MappedKind {
    Scalar(ScalarKind),
    /// Stored value to enum symbol
    Enum { symbols: BTreeMap<String, String> },
    /// Stored uid of a record in `table`
    Reference { table: String },
    DateTime,
    Link,
    Files,
}

#[derive(Debug, Clone)]
pub struct MappedField {
    pub type_ref: TypeRef,
    pub kind: MappedKind,
}

/// Map one column of the type `owner` to its GraphQL field type.
///
/// `UnsupportedType` is the only non-fatal error: the caller skips the field.
pub fn map_column(
    owner: &str,
    name: &str,
    descriptor: &ColumnDescriptor,
    registry: &mut TypeRegistry,
) -> Result<MappedField, GraphqlError> {
    let unsupported = || GraphqlError::UnsupportedType {
        column: name.to_string(),
        kind: descriptor.kind.as_str().to_string(),
    };

    let (type_name, kind) = match &descriptor.kind {
        FieldKind::Select if !descriptor.items.is_empty() => {
            match items_scalar(&descriptor.items) {
                Some(scalar) => (scalar.type_name().to_string(), MappedKind::Scalar(scalar)),
                None => synthesize_enum(owner, name, descriptor, registry)?,
            }
        }
        FieldKind::Select => match (&descriptor.foreign_table, &descriptor.mm_table) {
            (Some(table), None) => {
                let binding =
                    registry
                        .binding(table)
                        .ok_or_else(|| GraphqlError::DanglingReference {
                            column: name.to_string(),
                            table: table.clone(),
                        })?;
                (
                    binding.type_name.clone(),
                    MappedKind::Reference {
                        table: table.clone(),
                    },
                )
            }
            _ => return Err(unsupported()),
        },
        FieldKind::Input
        | FieldKind::Number
        | FieldKind::Language
        | FieldKind::Text
        | FieldKind::Email
        | FieldKind::Check => {
            let scalar = storage_scalar(descriptor).ok_or_else(unsupported)?;
            (scalar.type_name().to_string(), MappedKind::Scalar(scalar))
        }
        FieldKind::DateTime => (DATETIME.to_string(), MappedKind::DateTime),
        FieldKind::Link => (LINK.to_string(), MappedKind::Link),
        // A record always has a (possibly empty) list of references
        FieldKind::File => {
            return Ok(MappedField {
                type_ref: TypeRef::named_nn_list_nn(FILE_REFERENCE),
                kind: MappedKind::Files,
            });
        }
        FieldKind::Inline | FieldKind::Category | FieldKind::Other(_) => {
            return Err(unsupported());
        }
    };

    let type_ref = if descriptor.is_required() {
        TypeRef::named_nn(type_name)
    } else {
        TypeRef::named(type_name)
    };

    Ok(MappedField { type_ref, kind })
}

/// Scalar a column is stored as. Used to coerce filter literals and to decide
/// which columns are sortable.
pub fn storage_scalar(descriptor: &ColumnDescriptor) -> Option<ScalarKind> {
    match &descriptor.kind {
        FieldKind::Select if !descriptor.items.is_empty() => {
            Some(items_scalar(&descriptor.items).unwrap_or(ScalarKind::String))
        }
        FieldKind::Select if descriptor.foreign_table.is_some() && descriptor.mm_table.is_none() => {
            Some(ScalarKind::Int)
        }
        FieldKind::Input if descriptor.has_eval("int") => Some(ScalarKind::Int),
        FieldKind::Input if descriptor.has_eval("double2") => Some(ScalarKind::Float),
        FieldKind::Input | FieldKind::Text | FieldKind::Email => Some(ScalarKind::String),
        FieldKind::Number if descriptor.format.as_deref() == Some("decimal") => {
            Some(ScalarKind::Float)
        }
        FieldKind::Number | FieldKind::Language | FieldKind::DateTime => Some(ScalarKind::Int),
        FieldKind::Check => Some(ScalarKind::Boolean),
        _ => None,
    }
}

/// Scalar of a static item list, or `None` when it needs an enum
fn items_scalar(items: &[SelectItem]) -> Option<ScalarKind> {
    if items.iter().all(|i| i.value.trim().parse::<i64>().is_ok()) {
        Some(ScalarKind::Int)
    } else if items.iter().all(|i| i.value.trim().parse::<f64>().is_ok()) {
        Some(ScalarKind::Float)
    } else if items.iter().any(|i| i.value.is_empty()) {
        Some(ScalarKind::String)
    } else {
        None
    }
}

fn synthesize_enum(
    owner: &str,
    name: &str,
    descriptor: &ColumnDescriptor,
    registry: &mut TypeRegistry,
) -> Result<(String, MappedKind), GraphqlError> {
    let symbols = enum_symbols(
        descriptor
            .items
            .iter()
            .map(|i| (i.label.as_str(), i.value.as_str())),
    );
    let pairs: Vec<(String, String)> = descriptor
        .items
        .iter()
        .map(|i| i.value.clone())
        .zip(symbols)
        .collect();

    let label = descriptor.label.as_deref().unwrap_or(name);
    let enum_name = registry.register_enum(owner, label, pairs.clone())?;

    Ok((
        enum_name,
        MappedKind::Enum {
            symbols: pairs.into_iter().collect(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphql::registry::TableBinding;

    fn select(items: &[(&str, &str)]) -> ColumnDescriptor {
        ColumnDescriptor::new(FieldKind::Select)
            .with_label("Color")
            .with_items(items.iter().map(|(l, v)| SelectItem::new(*l, *v)).collect())
    }

    #[test]
    fn test_scalar_policy() {
        let mut registry = TypeRegistry::new();
        let cases = [
            (ColumnDescriptor::new(FieldKind::Input), "String"),
            (ColumnDescriptor::new(FieldKind::Input).with_eval("int"), "Int"),
            (ColumnDescriptor::new(FieldKind::Input).with_eval("double2"), "Float"),
            (ColumnDescriptor::new(FieldKind::Number), "Int"),
            (
                ColumnDescriptor::new(FieldKind::Number).with_format("decimal"),
                "Float",
            ),
            (ColumnDescriptor::new(FieldKind::Language), "Int"),
            (ColumnDescriptor::new(FieldKind::Check), "Boolean"),
            (ColumnDescriptor::new(FieldKind::DateTime), "DateTime"),
            (select(&[("One", "1"), ("Two", "2")]), "Int"),
            (select(&[("Half", "0.5"), ("One", "1")]), "Float"),
            (select(&[("None", ""), ("Red", "red")]), "String"),
        ];
        for (descriptor, expected) in cases {
            let mapped = map_column("News", "col", &descriptor, &mut registry).unwrap();
            assert_eq!(mapped.type_ref.to_string(), expected, "{descriptor:?}");
        }
    }

    #[test]
    fn test_required_wrapping() {
        let mut registry = TypeRegistry::new();
        let descriptor = ColumnDescriptor::new(FieldKind::Input).required();
        let mapped = map_column("News", "title", &descriptor, &mut registry).unwrap();
        assert_eq!(mapped.type_ref.to_string(), "String!");

        let descriptor = ColumnDescriptor::new(FieldKind::Input).with_eval("required");
        let mapped = map_column("News", "title", &descriptor, &mut registry).unwrap();
        assert_eq!(mapped.type_ref.to_string(), "String!");
    }

    #[test]
    fn test_enum_synthesis_is_deterministic() {
        let descriptor = select(&[("Red", "red"), ("Blue sky", "blue")]);

        let mut a = TypeRegistry::new();
        let mut b = TypeRegistry::new();
        let first = map_column("News", "color", &descriptor, &mut a).unwrap();
        let second = map_column("News", "color", &descriptor, &mut b).unwrap();

        assert_eq!(first.type_ref.to_string(), "ColorEnum");
        assert_eq!(first.kind, second.kind);
        match first.kind {
            MappedKind::Enum { symbols } => {
                assert_eq!(symbols["red"], "RED");
                assert_eq!(symbols["blue"], "BLUE_SKY");
            }
            other => panic!("expected enum, got {other:?}"),
        }
    }

    #[test]
    fn test_identical_enum_is_reused() {
        let mut registry = TypeRegistry::new();
        let descriptor = select(&[("Red", "red")]);
        let a = map_column("News", "color", &descriptor, &mut registry).unwrap();
        let b = map_column("Event", "color", &descriptor, &mut registry).unwrap();
        assert_eq!(a.type_ref.to_string(), "ColorEnum");
        assert_eq!(b.type_ref.to_string(), "ColorEnum");
    }

    #[test]
    fn test_conflicting_enum_is_prefixed() {
        let mut registry = TypeRegistry::new();
        let a = map_column("News", "color", &select(&[("Red", "red")]), &mut registry).unwrap();
        let b = map_column("Event", "color", &select(&[("Green", "green")]), &mut registry).unwrap();
        assert_eq!(a.type_ref.to_string(), "ColorEnum");
        assert_eq!(b.type_ref.to_string(), "EventColorEnum");

        let err =
            map_column("Event", "color", &select(&[("Blue", "blue")]), &mut registry).unwrap_err();
        assert!(matches!(err, GraphqlError::DuplicateName(_)));
    }

    #[test]
    fn test_references() {
        let mut registry = TypeRegistry::new();
        registry
            .bind_table("tx_author", TableBinding::new("Author", "author", None))
            .unwrap();

        let single = ColumnDescriptor::new(FieldKind::Select).with_foreign_table("tx_author");
        let mapped = map_column("News", "author", &single, &mut registry).unwrap();
        assert_eq!(mapped.type_ref.to_string(), "Author");
        assert_eq!(
            mapped.kind,
            MappedKind::Reference {
                table: "tx_author".to_string()
            }
        );

        let dangling = ColumnDescriptor::new(FieldKind::Select).with_foreign_table("tx_missing");
        assert!(matches!(
            map_column("News", "x", &dangling, &mut registry),
            Err(GraphqlError::DanglingReference { .. })
        ));

        let mm = single.clone().with_mm_table("tx_news_author_mm");
        assert!(matches!(
            map_column("News", "authors", &mm, &mut registry),
            Err(GraphqlError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_unsupported_kinds() {
        let mut registry = TypeRegistry::new();
        for kind in [FieldKind::Inline, FieldKind::Category, FieldKind::Other("json".into())] {
            let err = map_column("News", "x", &ColumnDescriptor::new(kind), &mut registry);
            assert!(matches!(err, Err(GraphqlError::UnsupportedType { .. })));
        }
    }

    #[test]
    fn test_files_are_non_null_lists() {
        let mut registry = TypeRegistry::new();
        let mapped = map_column(
            "News",
            "media",
            &ColumnDescriptor::new(FieldKind::File),
            &mut registry,
        )
        .unwrap();
        assert_eq!(mapped.type_ref.to_string(), "[FileReference!]!");
    }

    #[test]
    fn test_coerce_literals() {
        assert_eq!(ScalarKind::Int.coerce(" 7"), Some(SqlValue::Int(7)));
        assert_eq!(ScalarKind::Int.coerce("seven"), None);
        assert_eq!(ScalarKind::Float.coerce("1.5"), Some(SqlValue::Float(1.5)));
        assert_eq!(ScalarKind::Boolean.coerce("true"), Some(SqlValue::Bool(true)));
        assert_eq!(
            ScalarKind::String.coerce("x"),
            Some(SqlValue::String("x".to_string()))
        );
    }
}
