//! Filter and facet resolution
//!
//! Content types declare filters as dotted paths starting at their table,
//! e.g. `categories.parent.title`. Every segment but the last must be an MM
//! relation; the last one names the column that is filtered and grouped on.
//!
//! [FilterEngine::resolve_filters] turns incoming filter arguments into
//! constraints on a [QueryPlan]. [FilterEngine::compute_facets] counts, for
//! each declared filter, how many records every option would yield under the
//! *other* active filters.

use std::collections::{BTreeSet, HashMap};

use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, InputObject, InputValue, Object, Type, TypeRef,
};
use async_graphql::{Number, Value};
use serde::{Deserialize, Deserializer};

use super::error::{GraphqlError, bad_input, not_found};
use super::mapper::{ScalarKind, storage_scalar};
use crate::metadata::{ColumnDescriptor, ContentTypeDefinition, FilterConfig, FilterKind, MetadataSet};
use crate::persistence::{
    ColumnRef, Constraint, GroupedCount, Join, Persistence, QueryPlan, SqlValue,
};

pub const FILTER_INPUT: &str = "FilterInput";
pub const DISCRETE_FILTER_INPUT: &str = "DiscreteFilterInput";
pub const RANGE_FILTER_INPUT: &str = "RangeFilterInput";
pub const RANGE_INPUT: &str = "RangeInput";
pub const FACET: &str = "Facet";
pub const FILTER_OPTION: &str = "FilterOption";
pub const FACET_RANGE: &str = "FacetRange";

// ============================================================================
// Arguments
// ============================================================================

/// The `filters` argument of a connection field
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterArgs {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub discrete_filters: Vec<DiscreteFilter>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub range_filters: Vec<RangeFilter>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiscreteFilter {
    pub path: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RangeFilter {
    pub path: String,
    pub range: RangeBounds,
}

/// Inclusive bounds; a missing bound is open
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct RangeBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl FilterArgs {
    /// Decode the argument value of a `FilterInput`
    pub fn from_value(value: &Value) -> Result<Self, GraphqlError> {
        let json = value
            .clone()
            .into_json()
            .map_err(|e| bad_input(format!("invalid filters: {e}")))?;
        serde_json::from_value(json).map_err(|e| bad_input(format!("invalid filters: {e}")))
    }

    fn selected_values(&self, path: &str) -> Vec<&str> {
        self.discrete_filters
            .iter()
            .filter(|f| f.path == path)
            .flat_map(|f| f.options.iter().map(String::as_str))
            .collect()
    }
}

// ============================================================================
// Facets
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOption {
    pub path: String,
    pub value: String,
    /// Item label, when the value comes from a static item list
    pub label: Option<String>,
    pub result_count: i64,
    pub selected: bool,
    pub disabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FacetRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Facet {
    pub label: String,
    pub path: String,
    pub kind: FilterKind,
    pub unit: Option<String>,
    pub options: Vec<FilterOption>,
    pub range: Option<FacetRange>,
}

// ============================================================================
// Aliases and paths
// ============================================================================

/// Hands out table aliases for one query build: `<table>_<n>`, counting from
/// zero per table.
#[derive(Debug, Default)]
pub struct AliasAllocator {
    counters: HashMap<String, usize>,
}

impl AliasAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, base: &str) -> String {
        let n = self.counters.entry(base.to_string()).or_insert(0);
        let alias = format!("{base}_{n}");
        *n += 1;
        alias
    }
}

/// One MM hop of a filter path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathHop {
    pub mm_table: String,
    pub foreign_table: String,
}

/// A filter path resolved against table metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    pub path: String,
    pub hops: Vec<PathHop>,
    /// Table holding the terminal column
    pub table: String,
    pub column: String,
    /// `None` for the `uid`/`pid` system columns
    pub descriptor: Option<ColumnDescriptor>,
}

/// Resolve `path` starting at `table`
pub fn resolve_path(
    metadata: &MetadataSet,
    table: &str,
    path: &str,
) -> Result<ResolvedPath, GraphqlError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(bad_input(format!("malformed filter path `{path}`")));
    }
    let Some((terminal, relations)) = segments.split_last() else {
        return Err(bad_input(format!("malformed filter path `{path}`")));
    };

    let table_meta = |name: &str| {
        metadata
            .table(name)
            .ok_or_else(|| bad_input(format!("filter path `{path}` reaches unknown table `{name}`")))
    };

    let mut hops = Vec::new();
    let mut current = table.to_string();
    for segment in relations {
        let descriptor = table_meta(&current)?.column(segment).ok_or_else(|| {
            bad_input(format!("unknown segment `{segment}` in filter path `{path}`"))
        })?;
        match (&descriptor.mm_table, &descriptor.foreign_table) {
            (Some(mm_table), Some(foreign_table)) if descriptor.is_mm_relation() => {
                hops.push(PathHop {
                    mm_table: mm_table.clone(),
                    foreign_table: foreign_table.clone(),
                });
                current = foreign_table.clone();
            }
            _ => {
                return Err(bad_input(format!(
                    "segment `{segment}` in filter path `{path}` is not a relation"
                )));
            }
        }
    }

    let descriptor = match *terminal {
        "uid" | "pid" => None,
        column => Some(
            table_meta(&current)?
                .column(column)
                .cloned()
                .ok_or_else(|| {
                    bad_input(format!("unknown column `{column}` in filter path `{path}`"))
                })?,
        ),
    };

    Ok(ResolvedPath {
        path: path.to_string(),
        hops,
        table: current,
        column: terminal.to_string(),
        descriptor,
    })
}

impl ResolvedPath {
    /// Scalar the terminal column is stored as
    fn scalar(&self) -> Result<ScalarKind, GraphqlError> {
        match &self.descriptor {
            None => Ok(ScalarKind::Int),
            Some(descriptor) => storage_scalar(descriptor).ok_or_else(|| {
                GraphqlError::NotImplemented(format!(
                    "filtering on `{}` columns",
                    descriptor.kind.as_str()
                ))
            }),
        }
    }

    fn coerce(&self, literal: &str) -> Result<SqlValue, GraphqlError> {
        self.scalar()?.coerce(literal).ok_or_else(|| {
            bad_input(format!(
                "`{literal}` is not a valid value for filter `{}`",
                self.path
            ))
        })
    }

    /// Append the joins from `root_alias` to the terminal table and return
    /// the terminal column
    pub fn join(
        &self,
        root_alias: &str,
        aliases: &mut AliasAllocator,
        joins: &mut Vec<Join>,
    ) -> ColumnRef {
        let mut current = root_alias.to_string();
        for hop in &self.hops {
            let mm = aliases.next(&hop.mm_table);
            joins.push(Join {
                table: hop.mm_table.clone(),
                alias: mm.clone(),
                left: ColumnRef::new(&current, "uid"),
                right: ColumnRef::new(&mm, "uid_local"),
            });
            let foreign = aliases.next(&hop.foreign_table);
            joins.push(Join {
                table: hop.foreign_table.clone(),
                alias: foreign.clone(),
                left: ColumnRef::new(&mm, "uid_foreign"),
                right: ColumnRef::new(&foreign, "uid"),
            });
            current = foreign;
        }
        ColumnRef::new(current, &self.column)
    }
}

/// Normalized text form of a value, matching how stores report group values
fn value_key(value: &SqlValue) -> String {
    match value {
        SqlValue::String(s) => s.clone(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Bool(b) => i64::from(*b).to_string(),
        SqlValue::Null => String::new(),
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Filters and facets of one content type
pub struct FilterEngine<'a> {
    metadata: &'a MetadataSet,
    content_type: &'a ContentTypeDefinition,
}

impl<'a> FilterEngine<'a> {
    pub fn new(metadata: &'a MetadataSet, content_type: &'a ContentTypeDefinition) -> Self {
        Self {
            metadata,
            content_type,
        }
    }

    /// Declared filters whose paths resolve. Others are logged and dropped.
    pub fn valid_filters(&self) -> Vec<FilterConfig> {
        self.content_type
            .filters
            .iter()
            .filter(|config| match self.usable(config) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        content_type = %self.content_type.id,
                        filter = %config.name,
                        error = %e,
                        "Invalid filter, dropping it"
                    );
                    false
                }
            })
            .cloned()
            .collect()
    }

    /// A filter is usable when it starts at the content type's table and its path resolves
    fn usable(&self, config: &FilterConfig) -> Result<(), GraphqlError> {
        if config.table != self.content_type.table {
            return Err(bad_input(format!(
                "filter starts at table `{}`, not `{}`",
                config.table, self.content_type.table
            )));
        }
        resolve_path(self.metadata, &config.table, &config.path).map(|_| ())
    }

    fn declared(&self, path: &str, kind: FilterKind) -> Result<&'a FilterConfig, GraphqlError> {
        let config = self
            .content_type
            .filters
            .iter()
            .find(|f| f.path == path && self.usable(f).is_ok())
            .ok_or_else(|| {
                not_found(format!(
                    "no filter `{path}` declared for `{}`",
                    self.content_type.id
                ))
            })?;
        if config.kind != kind {
            return Err(bad_input(format!(
                "filter `{path}` is not a {} filter",
                match kind {
                    FilterKind::Discrete => "discrete",
                    FilterKind::Range => "range",
                }
            )));
        }
        Ok(config)
    }

    /// Add the constraints of every active filter to `plan`
    pub fn resolve_filters(
        &self,
        args: &FilterArgs,
        plan: &mut QueryPlan,
        aliases: &mut AliasAllocator,
    ) -> Result<(), GraphqlError> {
        self.apply(args, plan, aliases, None)
    }

    /// Like [Self::resolve_filters], leaving out the filter on `skip`
    fn apply(
        &self,
        args: &FilterArgs,
        plan: &mut QueryPlan,
        aliases: &mut AliasAllocator,
        skip: Option<&str>,
    ) -> Result<(), GraphqlError> {
        for filter in &args.discrete_filters {
            let config = self.declared(&filter.path, FilterKind::Discrete)?;
            if skip == Some(filter.path.as_str()) || filter.options.is_empty() {
                continue;
            }
            let path = resolve_path(self.metadata, &config.table, &config.path)?;
            let values = filter
                .options
                .iter()
                .map(|o| path.coerce(o))
                .collect::<Result<Vec<_>, _>>()?;
            let column = path.join(&plan.alias, aliases, &mut plan.joins);
            plan.constraints.push(Constraint::In { column, values });
        }

        for filter in &args.range_filters {
            let config = self.declared(&filter.path, FilterKind::Range)?;
            let RangeBounds { min, max } = filter.range;
            if skip == Some(filter.path.as_str()) || (min.is_none() && max.is_none()) {
                continue;
            }
            let path = resolve_path(self.metadata, &config.table, &config.path)?;
            if !matches!(path.scalar()?, ScalarKind::Int | ScalarKind::Float) {
                return Err(bad_input(format!(
                    "range filter `{}` targets a non-numeric column",
                    filter.path
                )));
            }
            let column = path.join(&plan.alias, aliases, &mut plan.joins);
            plan.constraints.push(Constraint::Between { column, min, max });
        }

        Ok(())
    }

    /// Facets for every declared filter, each computed under all *other*
    /// active filters
    pub async fn compute_facets(
        &self,
        args: &FilterArgs,
        store: &dyn Persistence,
    ) -> Result<Vec<Facet>, GraphqlError> {
        let root = &self.content_type.table;
        let mut facets = Vec::new();

        let usable = self
            .content_type
            .filters
            .iter()
            .filter(|config| self.usable(config).is_ok());
        for config in usable {
            let path = resolve_path(self.metadata, &config.table, &config.path)?;

            let mut aliases = AliasAllocator::new();
            let mut base = QueryPlan::new(root.as_str(), aliases.next(root));
            self.apply(args, &mut base, &mut aliases, Some(&config.path))?;

            let alias = aliases.next(root);
            let mut joins = Vec::new();
            let group = path.join(&alias, &mut aliases, &mut joins);
            let query = GroupedCount {
                base,
                alias,
                joins,
                group,
            };

            let mut facet = Facet {
                label: config.name.clone(),
                path: config.path.clone(),
                kind: config.kind,
                unit: config.unit.clone(),
                options: Vec::new(),
                range: None,
            };

            match config.kind {
                FilterKind::Discrete => {
                    let counts = store.count_grouped_by(&query).await?;
                    let selected: BTreeSet<String> = args
                        .selected_values(&config.path)
                        .into_iter()
                        .map(|v| path.coerce(v).map(|c| value_key(&c)))
                        .collect::<Result<_, _>>()?;
                    facet.options = build_options(&path, counts, &selected);
                }
                FilterKind::Range => {
                    let (min, max) = store.range_bounds(&query).await?;
                    facet.range = Some(FacetRange { min, max });
                }
            }

            facets.push(facet);
        }

        Ok(facets)
    }
}

/// Merge store counts with the declared items of the terminal column.
/// Declared items come first, in declaration order.
fn build_options(
    path: &ResolvedPath,
    counts: Vec<(String, i64)>,
    selected: &BTreeSet<String>,
) -> Vec<FilterOption> {
    let items = path
        .descriptor
        .as_ref()
        .map(|d| d.items.as_slice())
        .unwrap_or_default();

    let mut counts: Vec<(String, i64, Option<String>)> =
        counts.into_iter().map(|(v, c)| (v, c, None)).collect();
    let mut ordered = Vec::with_capacity(items.len() + counts.len());
    for item in items {
        let count = match counts.iter().position(|(v, _, _)| *v == item.value) {
            Some(i) => counts.remove(i).1,
            None => 0,
        };
        ordered.push((item.value.clone(), count, Some(item.label.clone())));
    }
    ordered.append(&mut counts);

    ordered
        .into_iter()
        .map(|(value, result_count, label)| FilterOption {
            path: path.path.clone(),
            selected: selected.contains(&value),
            disabled: result_count == 0,
            value,
            label,
            result_count,
        })
        .collect()
}

// ============================================================================
// GraphQL types
// ============================================================================

fn float_value<'a>(f: f64) -> Option<FieldValue<'a>> {
    Number::from_f64(f).map(|n| FieldValue::value(Value::Number(n)))
}

/// Input and output types used by filterable connections
pub fn filter_types() -> Vec<(&'static str, Type)> {
    let range_input = InputObject::new(RANGE_INPUT)
        .field(InputValue::new("min", TypeRef::named(TypeRef::FLOAT)))
        .field(InputValue::new("max", TypeRef::named(TypeRef::FLOAT)));
    let discrete_input = InputObject::new(DISCRETE_FILTER_INPUT)
        .field(InputValue::new("path", TypeRef::named_nn(TypeRef::STRING)))
        .field(InputValue::new(
            "options",
            TypeRef::named_nn_list_nn(TypeRef::STRING),
        ));
    let range_filter_input = InputObject::new(RANGE_FILTER_INPUT)
        .field(InputValue::new("path", TypeRef::named_nn(TypeRef::STRING)))
        .field(InputValue::new("range", TypeRef::named_nn(RANGE_INPUT)));
    let filter_input = InputObject::new(FILTER_INPUT)
        .field(InputValue::new(
            "discreteFilters",
            TypeRef::named_nn_list(DISCRETE_FILTER_INPUT),
        ))
        .field(InputValue::new(
            "rangeFilters",
            TypeRef::named_nn_list(RANGE_FILTER_INPUT),
        ));

    let option = Object::new(FILTER_OPTION)
        .field(option_text("path", TypeRef::named_nn(TypeRef::STRING), |o| {
            Some(o.path.clone())
        }))
        .field(option_text("value", TypeRef::named_nn(TypeRef::STRING), |o| {
            Some(o.value.clone())
        }))
        .field(option_text("label", TypeRef::named(TypeRef::STRING), |o| {
            o.label.clone()
        }))
        .field(Field::new("resultCount", TypeRef::named_nn(TypeRef::INT), |ctx| {
            FieldFuture::new(async move {
                let option = ctx.parent_value.try_downcast_ref::<FilterOption>()?;
                Ok(Some(FieldValue::value(option.result_count)))
            })
        }))
        .field(Field::new("selected", TypeRef::named_nn(TypeRef::BOOLEAN), |ctx| {
            FieldFuture::new(async move {
                let option = ctx.parent_value.try_downcast_ref::<FilterOption>()?;
                Ok(Some(FieldValue::value(option.selected)))
            })
        }))
        .field(Field::new("disabled", TypeRef::named_nn(TypeRef::BOOLEAN), |ctx| {
            FieldFuture::new(async move {
                let option = ctx.parent_value.try_downcast_ref::<FilterOption>()?;
                Ok(Some(FieldValue::value(option.disabled)))
            })
        }));

    let range = Object::new(FACET_RANGE)
        .field(Field::new("min", TypeRef::named(TypeRef::FLOAT), |ctx| {
            FieldFuture::new(async move {
                let range = ctx.parent_value.try_downcast_ref::<FacetRange>()?;
                Ok(range.min.and_then(float_value))
            })
        }))
        .field(Field::new("max", TypeRef::named(TypeRef::FLOAT), |ctx| {
            FieldFuture::new(async move {
                let range = ctx.parent_value.try_downcast_ref::<FacetRange>()?;
                Ok(range.max.and_then(float_value))
            })
        }));

    let facet = Object::new(FACET)
        .field(facet_text("label", TypeRef::named_nn(TypeRef::STRING), |f| {
            Some(f.label.clone())
        }))
        .field(facet_text("path", TypeRef::named_nn(TypeRef::STRING), |f| {
            Some(f.path.clone())
        }))
        .field(facet_text("type", TypeRef::named_nn(TypeRef::STRING), |f| {
            Some(
                match f.kind {
                    FilterKind::Discrete => "discrete",
                    FilterKind::Range => "range",
                }
                .to_string(),
            )
        }))
        .field(facet_text("unit", TypeRef::named(TypeRef::STRING), |f| {
            f.unit.clone()
        }))
        .field(Field::new(
            "options",
            TypeRef::named_nn_list_nn(FILTER_OPTION),
            |ctx| {
                FieldFuture::new(async move {
                    let facet = ctx.parent_value.try_downcast_ref::<Facet>()?;
                    Ok(Some(FieldValue::list(
                        facet.options.iter().cloned().map(FieldValue::owned_any),
                    )))
                })
            },
        ))
        .field(Field::new("range", TypeRef::named(FACET_RANGE), |ctx| {
            FieldFuture::new(async move {
                let facet = ctx.parent_value.try_downcast_ref::<Facet>()?;
                Ok(facet.range.map(FieldValue::owned_any))
            })
        }));

    vec![
        (RANGE_INPUT, range_input.into()),
        (DISCRETE_FILTER_INPUT, discrete_input.into()),
        (RANGE_FILTER_INPUT, range_filter_input.into()),
        (FILTER_INPUT, filter_input.into()),
        (FILTER_OPTION, option.into()),
        (FACET_RANGE, range.into()),
        (FACET, facet.into()),
    ]
}

fn option_text(name: &str, ty: TypeRef, get: fn(&FilterOption) -> Option<String>) -> Field {
    Field::new(name, ty, move |ctx| {
        FieldFuture::new(async move {
            let option = ctx.parent_value.try_downcast_ref::<FilterOption>()?;
            Ok(get(option).map(FieldValue::value))
        })
    })
}

fn facet_text(name: &str, ty: TypeRef, get: fn(&Facet) -> Option<String>) -> Field {
    Field::new(name, ty, move |ctx| {
        FieldFuture::new(async move {
            let facet = ctx.parent_value.try_downcast_ref::<Facet>()?;
            Ok(get(facet).map(FieldValue::value))
        })
    })
}
