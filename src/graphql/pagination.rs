//! Cursor-based pagination for generated list fields
//!
//! Every connection field shares one cursor format: the standard base64
//! encoding of a decimal offset. An edge carries the 1-based absolute position
//! of its node, so passing the last edge's cursor as `after` resumes exactly
//! at the next node.

use std::any::Any;

use async_graphql::dynamic::{Field, FieldFuture, FieldValue, Object, TypeRef};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use super::error::{GraphqlError, bad_input};
use super::filters::{FACET, Facet};

pub const PAGE_INFO: &str = "PageInfo";

/// Page size limits applied to `first`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSettings {
    pub default_size: i64,
    pub max_size: i64,
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            default_size: 25,
            max_size: 100,
        }
    }
}

/// Information about pagination in a connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    /// When paginating forwards, are there more items?
    pub has_next_page: bool,
    /// When paginating backwards, are there more items?
    pub has_previous_page: bool,
    /// Cursor of the first item in this page
    pub start_cursor: Option<String>,
    /// Cursor of the last item in this page
    pub end_cursor: Option<String>,
}

/// An edge in a connection, containing a node and cursor
#[derive(Debug, Clone, PartialEq)]
pub struct Edge<T> {
    /// The item at the end of the edge
    pub node: T,
    /// A cursor for pagination
    pub cursor: String,
}

/// A paginated connection result
#[derive(Debug, Clone, PartialEq)]
pub struct Connection<T> {
    /// The edges in this connection
    pub edges: Vec<Edge<T>>,
    /// Total number of matches, independent of the page
    pub total_count: i64,
    /// Pagination information
    pub page_info: PageInfo,
    /// Facets of the filtered result set; empty for unfiltered types
    pub facets: Vec<Facet>,
}

impl<T> Connection<T> {
    pub fn with_facets(mut self, facets: Vec<Facet>) -> Self {
        self.facets = facets;
        self
    }
}

/// Wrap one page of items, starting at absolute `offset`, into a connection
pub fn paginate<T>(items: Vec<T>, total_count: i64, offset: i64) -> Connection<T> {
    let has_next_page = total_count > offset + items.len() as i64;

    let edges: Vec<Edge<T>> = items
        .into_iter()
        .enumerate()
        .map(|(i, node)| Edge {
            cursor: encode_cursor(offset + i as i64 + 1),
            node,
        })
        .collect();

    let page_info = PageInfo {
        has_next_page,
        has_previous_page: offset > 0,
        start_cursor: edges.first().map(|e| e.cursor.clone()),
        end_cursor: edges.last().map(|e| e.cursor.clone()),
    };

    Connection {
        edges,
        total_count,
        page_info,
        facets: Vec::new(),
    }
}

/// Encode an offset as a cursor string
pub fn encode_cursor(offset: i64) -> String {
    BASE64.encode(offset.to_string())
}

/// Decode a cursor string to an offset. The empty cursor is offset 0.
pub fn decode_cursor(cursor: &str) -> Result<i64, GraphqlError> {
    if cursor.is_empty() {
        return Ok(0);
    }
    let decoded = BASE64
        .decode(cursor)
        .map_err(|_| bad_input(format!("invalid cursor `{cursor}`")))?;
    let s = String::from_utf8(decoded)
        .map_err(|_| bad_input(format!("invalid cursor encoding `{cursor}`")))?;
    match s.parse::<i64>() {
        Ok(offset) if offset >= 0 => Ok(offset),
        _ => Err(bad_input(format!("invalid cursor value `{cursor}`"))),
    }
}

/// Parse pagination arguments into offset and limit
pub fn parse_pagination_args(
    first: Option<i64>,
    after: Option<&str>,
    settings: &PageSettings,
) -> Result<(i64, i64), GraphqlError> {
    let limit = match first {
        Some(n) if n < 0 => return Err(bad_input("`first` must not be negative")),
        Some(n) => n.min(settings.max_size),
        None => settings.default_size,
    };

    let offset = match after {
        Some(cursor) => decode_cursor(cursor)?,
        None => 0,
    };

    Ok((offset, limit))
}

/// The shared `PageInfo` object type
pub fn page_info_object() -> Object {
    fn flag(name: &str, get: fn(&PageInfo) -> bool) -> Field {
        Field::new(name, TypeRef::named_nn(TypeRef::BOOLEAN), move |ctx| {
            FieldFuture::new(async move {
                let info = ctx.parent_value.try_downcast_ref::<PageInfo>()?;
                Ok(Some(FieldValue::value(get(info))))
            })
        })
    }
    fn cursor(name: &str, get: fn(&PageInfo) -> Option<String>) -> Field {
        Field::new(name, TypeRef::named(TypeRef::STRING), move |ctx| {
            FieldFuture::new(async move {
                let info = ctx.parent_value.try_downcast_ref::<PageInfo>()?;
                Ok(get(info).map(FieldValue::value))
            })
        })
    }

    Object::new(PAGE_INFO)
        .description("Information about pagination in a connection")
        .field(flag("hasNextPage", |p| p.has_next_page))
        .field(flag("hasPreviousPage", |p| p.has_previous_page))
        .field(cursor("startCursor", |p| p.start_cursor.clone()))
        .field(cursor("endCursor", |p| p.end_cursor.clone()))
}

/// Build the connection and edge object types for one node type.
///
/// Parent values are [Connection<T>] and [Edge<T>]; nodes are handed to the
/// node type's resolvers as owned `T`.
pub fn connection_objects<T>(node: &str, connection: &str, edge: &str, with_facets: bool) -> (Object, Object)
where
    T: Any + Clone + Send + Sync,
{
    let edge_object = Object::new(edge)
        .field(Field::new("node", TypeRef::named_nn(node), |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<Edge<T>>()?;
                Ok(Some(FieldValue::owned_any(edge.node.clone())))
            })
        }))
        .field(Field::new("cursor", TypeRef::named_nn(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<Edge<T>>()?;
                Ok(Some(FieldValue::value(edge.cursor.clone())))
            })
        }));

    let mut connection_object = Object::new(connection)
        .field(Field::new("edges", TypeRef::named_nn_list_nn(edge), |ctx| {
            FieldFuture::new(async move {
                let conn = ctx.parent_value.try_downcast_ref::<Connection<T>>()?;
                Ok(Some(FieldValue::list(
                    conn.edges.iter().cloned().map(FieldValue::owned_any),
                )))
            })
        }))
        .field(Field::new("totalCount", TypeRef::named_nn(TypeRef::INT), |ctx| {
            FieldFuture::new(async move {
                let conn = ctx.parent_value.try_downcast_ref::<Connection<T>>()?;
                Ok(Some(FieldValue::value(conn.total_count)))
            })
        }))
        .field(Field::new("pageInfo", TypeRef::named_nn(PAGE_INFO), |ctx| {
            FieldFuture::new(async move {
                let conn = ctx.parent_value.try_downcast_ref::<Connection<T>>()?;
                Ok(Some(FieldValue::owned_any(conn.page_info.clone())))
            })
        }));

    if with_facets {
        connection_object = connection_object.field(Field::new(
            "facets",
            TypeRef::named_nn_list_nn(FACET),
            |ctx| {
                FieldFuture::new(async move {
                    let conn = ctx.parent_value.try_downcast_ref::<Connection<T>>()?;
                    Ok(Some(FieldValue::list(
                        conn.facets.iter().cloned().map(FieldValue::owned_any),
                    )))
                })
            },
        ));
    }

    (connection_object, edge_object)
}
