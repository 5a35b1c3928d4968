//! Built-in types every generated schema carries
//!
//! `DateTime`, `Link`, `FileReference` and `SortDirection`. `PageInfo` and
//! the filter/facet types live next to the code that fills them
//! ([super::pagination], [super::filters]).

use async_graphql::Value;
use async_graphql::dynamic::{Enum, EnumItem, Field, FieldFuture, FieldValue, Object, Scalar, TypeRef};
use chrono::{DateTime, Utc};
use url::Url;

use super::mapper::ScalarKind;
use super::resolvers::RecordNode;
use crate::persistence::SortDirection;

pub const DATETIME: &str = "DateTime";
pub const LINK: &str = "Link";
pub const FILE_REFERENCE: &str = "FileReference";
pub const SORT_DIRECTION: &str = "SortDirection";

/// Table holding file references
pub const FILE_REFERENCE_TABLE: &str = "sys_file_reference";

pub fn datetime_scalar() -> Scalar {
    Scalar::new(DATETIME)
        .description("ISO 8601 date and time, stored as a unix timestamp")
}

/// Unix timestamp to RFC 3339. Zero is the "unset" marker and maps to `None`.
pub fn format_timestamp(raw: &serde_json::Value) -> Option<String> {
    let seconds = match raw {
        serde_json::Value::Number(n) => n.as_i64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    if seconds == 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp(seconds, 0).map(|dt| dt.to_rfc3339())
}

/// A parsed typolink value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: String,
    pub target: Option<String>,
    pub class: Option<String>,
    pub title: Option<String>,
    pub external: bool,
}

/// Parse a typolink string: `url target class "title" params`.
///
/// Parts are space separated, quoted parts may contain spaces and `-` marks an
/// empty part.
pub fn parse_typolink(raw: &str) -> Option<Link> {
    let parts = split_typolink(raw);
    let mut parts = parts.into_iter().map(|p| (p != "-" && !p.is_empty()).then_some(p));

    let url = parts.next().flatten()?;
    let target = parts.next().flatten();
    let class = parts.next().flatten();
    let title = parts.next().flatten();

    let external = Url::parse(&url)
        .map(|u| matches!(u.scheme(), "http" | "https" | "mailto" | "tel"))
        .unwrap_or(false);

    Some(Link {
        url,
        target,
        class,
        title,
        external,
    })
}

fn split_typolink(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = raw.trim().chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if quoted => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

pub fn link_object() -> Object {
    fn text(name: &str, get: fn(&Link) -> Option<String>) -> Field {
        Field::new(name, TypeRef::named(TypeRef::STRING), move |ctx| {
            FieldFuture::new(async move {
                let link = ctx.parent_value.try_downcast_ref::<Link>()?;
                Ok(get(link).map(FieldValue::value))
            })
        })
    }

    Object::new(LINK)
        .description("A typolink value")
        .field(Field::new("url", TypeRef::named_nn(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let link = ctx.parent_value.try_downcast_ref::<Link>()?;
                Ok(Some(FieldValue::value(link.url.clone())))
            })
        }))
        .field(text("target", |l| l.target.clone()))
        .field(text("class", |l| l.class.clone()))
        .field(text("title", |l| l.title.clone()))
        .field(Field::new("external", TypeRef::named_nn(TypeRef::BOOLEAN), |ctx| {
            FieldFuture::new(async move {
                let link = ctx.parent_value.try_downcast_ref::<Link>()?;
                Ok(Some(FieldValue::value(link.external)))
            })
        }))
}

/// `FileReference` fields over `sys_file_reference` rows
pub fn file_reference_object() -> Object {
    fn column(name: &str, column: &'static str, scalar: ScalarKind, non_null: bool) -> Field {
        let type_ref = if non_null {
            TypeRef::named_nn(scalar.type_name())
        } else {
            TypeRef::named(scalar.type_name())
        };
        Field::new(name, type_ref, move |ctx| {
            FieldFuture::new(async move {
                let node = ctx.parent_value.try_downcast_ref::<RecordNode>()?;
                Ok(node
                    .record
                    .get(column)
                    .and_then(|raw| scalar.to_value(raw))
                    .map(FieldValue::value))
            })
        })
    }

    Object::new(FILE_REFERENCE)
        .description("A file attached to a record")
        .field(column("uid", "uid", ScalarKind::Int, true))
        .field(column("fileUid", "uid_local", ScalarKind::Int, true))
        .field(column("title", "title", ScalarKind::String, false))
        .field(column("description", "description", ScalarKind::String, false))
        .field(column("alternative", "alternative", ScalarKind::String, false))
        .field(column("link", "link", ScalarKind::String, false))
}

pub fn sort_direction_enum() -> Enum {
    Enum::new(SORT_DIRECTION)
        .item(EnumItem::new("ASC"))
        .item(EnumItem::new("DESC"))
}

/// Read a `SortDirection` argument value
pub fn parse_sort_direction(symbol: &str) -> Option<SortDirection> {
    match symbol {
        "ASC" => Some(SortDirection::Asc),
        "DESC" => Some(SortDirection::Desc),
        _ => None,
    }
}

/// GraphQL value of a `DateTime` field
pub fn datetime_value(raw: &serde_json::Value) -> Option<Value> {
    format_timestamp(raw).map(Value::from)
}
