//! Field resolution for generated types
//!
//! Generated fields do not capture any metadata in their closures. Each one
//! holds a [ResolverKey] and looks its [FieldResolver] up in the
//! [ResolverTable] stored as schema data.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_graphql::dataloader::DataLoader;
use async_graphql::dynamic::{Field, FieldFuture, FieldValue, ResolverContext, TypeRef};
use async_graphql::{ErrorExtensions, Name, Value};

use super::builtins::{FILE_REFERENCE_TABLE, datetime_value, parse_sort_direction, parse_typolink};
use super::cache::CacheTags;
use super::error::{GraphqlError, bad_input, not_found, schema_error};
use super::filters::{AliasAllocator, FilterArgs, FilterEngine};
use super::loaders::{FileReferenceKey, FileReferenceLoader, RecordKey, RecordLoader, load_error};
use super::mapper::{MappedKind, ScalarKind};
use super::pagination::{PageSettings, paginate, parse_pagination_args};
use crate::metadata::MetadataSet;
use crate::persistence::{ColumnRef, OrderBy, Persistence, QueryPlan, Record, SortDirection};

/// A stored record handed to the resolvers of its type
#[derive(Debug, Clone, PartialEq)]
pub struct RecordNode {
    pub table: String,
    pub record: Record,
}

impl RecordNode {
    pub fn new(table: impl Into<String>, record: Record) -> Self {
        Self {
            table: table.into(),
            record,
        }
    }

    pub fn uid(&self) -> Option<i64> {
        self.record.get("uid").and_then(json_int)
    }
}

pub(crate) fn json_int(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolverKey {
    pub type_name: String,
    pub field_name: String,
}

impl fmt::Display for ResolverKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.field_name)
    }
}

/// What a generated field does when resolved
#[derive(Debug, Clone, PartialEq)]
pub enum FieldResolver {
    /// Root field returning one record by `uid`
    Record { type_name: String, table: String },
    /// Root field returning a paginated, optionally filtered list
    Connection {
        content_type: String,
        table: String,
        /// Order field symbol to column
        order_fields: BTreeMap<String, String>,
        filterable: bool,
    },
    /// A column of the parent record
    Column { column: String, kind: MappedKind },
}

#[derive(Debug, Default)]
pub struct ResolverTable {
    entries: HashMap<ResolverKey, FieldResolver>,
}

impl ResolverTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the resolver of `type_name.field_name`; field names are unique per type
    pub fn insert(
        &mut self,
        type_name: &str,
        field_name: &str,
        resolver: FieldResolver,
    ) -> Result<ResolverKey, GraphqlError> {
        let key = ResolverKey {
            type_name: type_name.to_string(),
            field_name: field_name.to_string(),
        };
        if self.entries.contains_key(&key) {
            return Err(GraphqlError::DuplicateName(key.to_string()));
        }
        self.entries.insert(key.clone(), resolver);
        Ok(key)
    }

    pub fn get(&self, key: &ResolverKey) -> Option<&FieldResolver> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A dynamic field dispatching to the resolver registered under `key`
pub fn field(key: ResolverKey, type_ref: TypeRef) -> Field {
    Field::new(key.field_name.clone(), type_ref, move |ctx| {
        let key = key.clone();
        FieldFuture::new(async move {
            let table = ctx.data::<Arc<ResolverTable>>()?;
            let resolver = table
                .get(&key)
                .ok_or_else(|| schema_error(format!("no resolver registered for `{key}`")).extend())?;
            resolve(&ctx, resolver).await.map_err(|e| e.extend())
        })
    })
}

fn data<'a, T: Any + Send + Sync>(ctx: &'a ResolverContext<'_>) -> Result<&'a T, GraphqlError> {
    ctx.data::<T>().map_err(|e| schema_error(e.message))
}

/// Record that the response depends on `table`
fn tag(ctx: &ResolverContext<'_>, table: &str) {
    if let Some(tags) = ctx.data_opt::<CacheTags>() {
        tags.insert(table);
    }
}

fn parent<'a>(ctx: &ResolverContext<'a>) -> Result<&'a RecordNode, GraphqlError> {
    ctx.parent_value
        .downcast_ref::<RecordNode>()
        .ok_or_else(|| schema_error("parent value is not a record"))
}

async fn resolve<'a>(
    ctx: &ResolverContext<'a>,
    resolver: &FieldResolver,
) -> Result<Option<FieldValue<'a>>, GraphqlError> {
    match resolver {
        FieldResolver::Record { type_name, table } => {
            let uid = ctx
                .args
                .try_get("uid")
                .and_then(|v| v.i64())
                .map_err(|e| bad_input(e.message))?;
            tag(ctx, table);
            let store = data::<Arc<dyn Persistence>>(ctx)?;
            match store.fetch_by_id(table, uid).await? {
                Some(record) => Ok(Some(FieldValue::owned_any(RecordNode::new(table, record)))),
                None => Err(not_found(format!(
                    "{type_name} with uid {uid} not found in table `{table}`"
                ))),
            }
        }
        FieldResolver::Connection {
            content_type,
            table,
            order_fields,
            filterable,
        } => {
            resolve_connection(ctx, content_type, table, order_fields, *filterable).await
        }
        FieldResolver::Column { column, kind } => resolve_column(ctx, column, kind).await,
    }
}

async fn resolve_connection<'a>(
    ctx: &ResolverContext<'a>,
    content_type: &str,
    table: &str,
    order_fields: &BTreeMap<String, String>,
    filterable: bool,
) -> Result<Option<FieldValue<'a>>, GraphqlError> {
    let settings = data::<PageSettings>(ctx)?;
    let first = match ctx.args.get("first") {
        Some(v) if !v.is_null() => Some(v.i64().map_err(|e| bad_input(e.message))?),
        _ => None,
    };
    let after = match ctx.args.get("after") {
        Some(v) if !v.is_null() => Some(v.string().map_err(|e| bad_input(e.message))?.to_string()),
        _ => None,
    };
    let (offset, limit) = parse_pagination_args(first, after.as_deref(), settings)?;

    let filter_args = match ctx.args.get("filters") {
        Some(v) if !v.is_null() => FilterArgs::from_value(v.as_value())?,
        _ => FilterArgs::default(),
    };

    let metadata = data::<Arc<MetadataSet>>(ctx)?;
    let definition = metadata
        .content_type(content_type)
        .ok_or_else(|| schema_error(format!("content type `{content_type}` is not loaded")))?;
    let engine = FilterEngine::new(metadata, definition);

    let mut aliases = AliasAllocator::new();
    let mut plan = QueryPlan::new(table, aliases.next(table));
    engine.resolve_filters(&filter_args, &mut plan, &mut aliases)?;

    if let Some(order) = ctx.args.get("orderBy").filter(|v| !v.is_null()) {
        plan.order = parse_order(order.as_value(), &plan.alias, order_fields)?;
    }
    // uid breaks ties so that offsets are stable between pages
    if !plan.order.iter().any(|o| o.column.column == "uid") {
        let uid = plan.root_column("uid");
        plan.order.push(OrderBy {
            column: uid,
            direction: SortDirection::Asc,
        });
    }
    plan.offset = offset;
    plan.limit = Some(limit);

    tag(ctx, table);
    for join in &plan.joins {
        tag(ctx, &join.table);
    }

    let store = data::<Arc<dyn Persistence>>(ctx)?;
    let page = store.fetch_all(&plan).await?;
    tracing::debug!(
        table = %table,
        offset,
        limit,
        rows = page.rows.len(),
        total = page.total,
        "Fetched connection page"
    );

    let nodes = page
        .rows
        .into_iter()
        .map(|record| RecordNode::new(table, record))
        .collect();
    let mut connection = paginate(nodes, page.total, offset);

    if filterable && ctx.look_ahead().field("facets").exists() {
        let facets = engine.compute_facets(&filter_args, store.as_ref()).await?;
        connection = connection.with_facets(facets);
    }

    Ok(Some(FieldValue::owned_any(connection)))
}

/// Decode an `orderBy` argument. Accepts a single input object as well as a list.
pub fn parse_order(
    value: &Value,
    root_alias: &str,
    order_fields: &BTreeMap<String, String>,
) -> Result<Vec<OrderBy>, GraphqlError> {
    let items = match value {
        Value::List(items) => items.as_slice(),
        Value::Object(_) => std::slice::from_ref(value),
        Value::Null => &[],
        _ => return Err(bad_input("`orderBy` must be a list of order inputs")),
    };

    items
        .iter()
        .map(|item| {
            let Value::Object(fields) = item else {
                return Err(bad_input("`orderBy` entries must be objects"));
            };
            let symbol = fields
                .get("field")
                .and_then(symbol_of)
                .ok_or_else(|| bad_input("`orderBy` entry is missing `field`"))?;
            let column = order_fields
                .get(symbol)
                .ok_or_else(|| bad_input(format!("unknown order field `{symbol}`")))?;
            let direction = match fields.get("direction").and_then(symbol_of) {
                Some(direction) => parse_sort_direction(direction)
                    .ok_or_else(|| bad_input(format!("unknown sort direction `{direction}`")))?,
                None => SortDirection::Asc,
            };
            Ok(OrderBy {
                column: ColumnRef::new(root_alias, column),
                direction,
            })
        })
        .collect()
}

fn symbol_of(value: &Value) -> Option<&str> {
    match value {
        Value::Enum(name) => Some(name.as_str()),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    }
}

async fn resolve_column<'a>(
    ctx: &ResolverContext<'a>,
    column: &str,
    kind: &MappedKind,
) -> Result<Option<FieldValue<'a>>, GraphqlError> {
    let node = parent(ctx)?;

    if let MappedKind::Files = kind {
        return resolve_files(ctx, node, column).await;
    }

    let Some(raw) = node.record.get(column).filter(|v| !v.is_null()) else {
        return Ok(None);
    };

    match kind {
        MappedKind::Scalar(scalar) => Ok(scalar.to_value(raw).map(FieldValue::value)),
        MappedKind::Enum { symbols } => {
            let key = match raw {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match symbols.get(&key) {
                Some(symbol) => Ok(Some(FieldValue::value(Value::Enum(Name::new(symbol))))),
                None => {
                    tracing::debug!(column = %column, value = %key, "Stored value has no enum symbol");
                    Ok(None)
                }
            }
        }
        MappedKind::Reference { table } => {
            let Some(uid) = json_int(raw).filter(|uid| *uid > 0) else {
                return Ok(None);
            };
            tag(ctx, table);
            let loader = data::<DataLoader<RecordLoader>>(ctx)?;
            Ok(loader
                .load_one(RecordKey::new(table.as_str(), uid))
                .await
                .map_err(load_error)?
                .map(|record| FieldValue::owned_any(RecordNode::new(table, record))))
        }
        MappedKind::DateTime => Ok(datetime_value(raw).map(FieldValue::value)),
        MappedKind::Link => Ok(raw
            .as_str()
            .and_then(parse_typolink)
            .map(FieldValue::owned_any)),
        MappedKind::Files => Ok(None),
    }
}

async fn resolve_files<'a>(
    ctx: &ResolverContext<'a>,
    node: &RecordNode,
    column: &str,
) -> Result<Option<FieldValue<'a>>, GraphqlError> {
    let Some(uid) = node.uid() else {
        return Ok(Some(FieldValue::list(Vec::<FieldValue<'a>>::new())));
    };

    tag(ctx, FILE_REFERENCE_TABLE);
    let loader = data::<DataLoader<FileReferenceLoader>>(ctx)?;
    let rows = loader
        .load_one(FileReferenceKey::new(node.table.as_str(), column, uid))
        .await
        .map_err(load_error)?
        .unwrap_or_default();

    Ok(Some(FieldValue::list(rows.into_iter().map(|row| {
        FieldValue::owned_any(RecordNode::new(FILE_REFERENCE_TABLE, row))
    }))))
}

/// The `uid`/`pid` system column resolver
pub fn system_column(column: &str) -> FieldResolver {
    FieldResolver::Column {
        column: column.to_string(),
        kind: MappedKind::Scalar(ScalarKind::Int),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_fields() -> BTreeMap<String, String> {
        [("TITLE", "title"), ("UID", "uid")]
            .into_iter()
            .map(|(s, c)| (s.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut table = ResolverTable::new();
        table.insert("News", "uid", system_column("uid")).unwrap();
        let err = table.insert("News", "uid", system_column("uid")).unwrap_err();
        assert!(matches!(err, GraphqlError::DuplicateName(name) if name == "News.uid"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_parse_order() {
        let value = Value::from_json(serde_json::json!([
            { "field": "TITLE", "direction": "DESC" },
            { "field": "UID" }
        ]))
        .unwrap();
        let order = parse_order(&value, "tx_news_0", &order_fields()).unwrap();
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].column.to_string(), "tx_news_0.title");
        assert_eq!(order[0].direction, SortDirection::Desc);
        assert_eq!(order[1].direction, SortDirection::Asc);
    }

    #[test]
    fn test_parse_order_single_object_and_unknown_field() {
        let single = Value::from_json(serde_json::json!({ "field": "TITLE" })).unwrap();
        assert_eq!(parse_order(&single, "n", &order_fields()).unwrap().len(), 1);

        let unknown = Value::from_json(serde_json::json!([{ "field": "NOPE" }])).unwrap();
        let err = parse_order(&unknown, "n", &order_fields()).unwrap_err();
        assert!(matches!(err, GraphqlError::BadInput(_)));
    }

    #[test]
    fn test_record_node_uid() {
        let mut record = Record::new();
        record.insert("uid".to_string(), serde_json::json!("12"));
        assert_eq!(RecordNode::new("tx_news", record).uid(), Some(12));
    }
}
