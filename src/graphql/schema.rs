//! Schema generation
//!
//! Builds one dynamic schema from the enabled content types:
//!
//! 1. bind every content type's table to its object type name, so relations
//!    can point at types that are built later;
//! 2. build each object type from its columns, plus its ordering types and
//!    its connection/edge pair;
//! 3. add a single-record field and a connection field per type to `Query`.
//!
//! Any structural error aborts generation. Columns that cannot be mapped are
//! skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_graphql::dataloader::DataLoader;
use async_graphql::dynamic::{Enum, EnumItem, InputObject, InputValue, Object, Schema, TypeRef};
use async_graphql::{Name, Value};
use tracing::{debug, info, warn};

use super::builtins::SORT_DIRECTION;
use super::error::{GraphqlError, schema_error};
use super::filters::{FILTER_INPUT, FilterEngine};
use super::loaders::{FileReferenceLoader, RecordLoader};
use super::mapper::{MappedKind, map_column};
use super::naming::{camel_case, class_short_name, non_empty, pascal_case, pluralize, screaming_snake_case};
use super::pagination::PageSettings;
use super::registry::{TableBinding, TypeRegistry};
use super::resolvers::{FieldResolver, ResolverTable, field, system_column};
use crate::metadata::{ContentTypeDefinition, MetadataSet};
use crate::persistence::Persistence;

pub const QUERY: &str = "Query";

const SYSTEM_COLUMNS: [&str; 2] = ["uid", "pid"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Content type ids to expose; empty exposes every declared content type
    pub enabled_content_types: Vec<String>,
    pub page: PageSettings,
}

/// A finished schema plus what went into it
pub struct GeneratedSchema {
    pub schema: Schema,
    /// Object type names, in content type order
    pub object_types: Vec<String>,
}

/// Object type name of a content type: its title, else the pluralized short
/// name of its model class
pub fn object_type_name(content_type: &ContentTypeDefinition) -> Result<String, GraphqlError> {
    content_type
        .title
        .as_deref()
        .and_then(|title| non_empty(pascal_case(title)))
        .or_else(|| {
            content_type
                .model_class
                .as_deref()
                .and_then(|class| non_empty(pluralize(&pascal_case(class_short_name(class)))))
        })
        .ok_or_else(|| GraphqlError::NameMissing(format!("content type `{}`", content_type.id)))
}

/// Query field names of a type: single record and connection
pub fn query_field_names(type_name: &str) -> (String, String) {
    let single = camel_case(type_name);
    let mut list = camel_case(&pluralize(type_name));
    if list == single {
        list = format!("{single}List");
    }
    (single, list)
}

fn sortable(kind: &MappedKind) -> bool {
    matches!(
        kind,
        MappedKind::Scalar(_) | MappedKind::Enum { .. } | MappedKind::DateTime | MappedKind::Reference { .. }
    )
}

/// Generate the schema for the enabled content types of `metadata`
pub fn generate_schema(
    metadata: Arc<MetadataSet>,
    store: Arc<dyn Persistence>,
    options: &GenerateOptions,
) -> Result<GeneratedSchema, GraphqlError> {
    for id in &options.enabled_content_types {
        if metadata.content_type(id).is_none() {
            warn!(content_type = %id, "Enabled content type is not declared in the metadata");
        }
    }

    let content_types: Vec<&ContentTypeDefinition> = metadata
        .enabled_content_types(&options.enabled_content_types)
        .collect();
    if content_types.is_empty() {
        return Err(schema_error("no content types are enabled"));
    }
    info!(
        content_types = content_types.len(),
        "Generating GraphQL schema"
    );

    let mut registry = TypeRegistry::new();
    let mut resolvers = ResolverTable::new();

    // Pass 1: table bindings
    let mut planned = Vec::with_capacity(content_types.len());
    for content_type in content_types {
        let type_name = object_type_name(content_type)?;
        registry.bind_table(
            &content_type.table,
            TableBinding::new(
                &type_name,
                &content_type.id,
                content_type.model_class.clone(),
            ),
        )?;
        planned.push((content_type, type_name));
    }

    // Pass 2: object types and root fields
    let mut query = Object::new(QUERY);
    for (content_type, type_name) in &planned {
        let table = metadata.table(&content_type.table).ok_or_else(|| {
            schema_error(format!(
                "content type `{}` references unknown table `{}`",
                content_type.id, content_type.table
            ))
        })?;

        let mut object = Object::new(type_name.as_str());
        if let Some(title) = &content_type.title {
            object = object.description(title);
        }

        let mut order_fields = BTreeMap::new();
        for column in SYSTEM_COLUMNS {
            let key = resolvers.insert(type_name, column, system_column(column))?;
            object = object.field(field(key, TypeRef::named_nn(TypeRef::INT)));
            order_fields.insert(screaming_snake_case(column), column.to_string());
        }

        for column in &table.columns {
            if SYSTEM_COLUMNS.contains(&column.name.as_str()) {
                continue;
            }
            let mapped = match map_column(type_name, &column.name, &column.descriptor, &mut registry) {
                Ok(mapped) => mapped,
                Err(GraphqlError::UnsupportedType { column, kind }) => {
                    debug!(
                        type_name = %type_name,
                        column = %column,
                        kind = %kind,
                        "Skipping column with unsupported type"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            let field_name = non_empty(camel_case(&column.name)).ok_or_else(|| {
                GraphqlError::NameMissing(format!("column `{}` of `{type_name}`", column.name))
            })?;
            if sortable(&mapped.kind) {
                order_fields.insert(screaming_snake_case(&column.name), column.name.clone());
            }
            let key = resolvers.insert(
                type_name,
                &field_name,
                FieldResolver::Column {
                    column: column.name.clone(),
                    kind: mapped.kind,
                },
            )?;
            let mut generated = field(key, mapped.type_ref);
            if let Some(label) = &column.descriptor.label {
                generated = generated.description(label);
            }
            object = object.field(generated);
        }
        registry.register(type_name, object)?;

        let order_field_enum = format!("{type_name}OrderField");
        let order_input = format!("{type_name}OrderInput");
        let order_enum = order_fields
            .keys()
            .fold(Enum::new(order_field_enum.as_str()), |e, symbol| {
                e.item(EnumItem::new(symbol.as_str()))
            });
        registry.register(&order_field_enum, order_enum)?;
        registry.register(
            &order_input,
            InputObject::new(order_input.as_str())
                .field(InputValue::new("field", TypeRef::named_nn(order_field_enum.as_str())))
                .field(
                    InputValue::new("direction", TypeRef::named(SORT_DIRECTION))
                        .default_value(Value::Enum(Name::new("ASC"))),
                ),
        )?;

        let filterable = !FilterEngine::new(&metadata, content_type)
            .valid_filters()
            .is_empty();
        let connection = registry.connection_for(type_name, filterable)?;

        let (single_name, list_name) = query_field_names(type_name);
        let key = resolvers.insert(
            QUERY,
            &single_name,
            FieldResolver::Record {
                type_name: type_name.clone(),
                table: content_type.table.clone(),
            },
        )?;
        query = query.field(
            field(key, TypeRef::named(type_name.as_str()))
                .argument(InputValue::new("uid", TypeRef::named_nn(TypeRef::INT))),
        );

        let key = resolvers.insert(
            QUERY,
            &list_name,
            FieldResolver::Connection {
                content_type: content_type.id.clone(),
                table: content_type.table.clone(),
                order_fields,
                filterable,
            },
        )?;
        let mut list = field(key, TypeRef::named_nn(connection.connection.as_str()))
            .argument(InputValue::new("first", TypeRef::named(TypeRef::INT)))
            .argument(InputValue::new("after", TypeRef::named(TypeRef::STRING)))
            .argument(InputValue::new(
                "orderBy",
                TypeRef::named_nn_list(order_input.as_str()),
            ));
        if filterable {
            list = list.argument(InputValue::new("filters", TypeRef::named(FILTER_INPUT)));
        }
        query = query.field(list);
    }
    registry.register(QUERY, query)?;

    let object_types = planned.into_iter().map(|(_, name)| name).collect();
    let schema = registry
        .into_types()
        .into_iter()
        .fold(Schema::build(QUERY, None, None), |builder, ty| builder.register(ty))
        .data(Arc::new(resolvers))
        .data(metadata)
        .data(DataLoader::new(RecordLoader::new(store.clone()), tokio::spawn))
        .data(DataLoader::new(FileReferenceLoader::new(store.clone()), tokio::spawn))
        .data(store)
        .data(options.page)
        .finish()
        .map_err(|e| schema_error(e.to_string()))?;

    Ok(GeneratedSchema {
        schema,
        object_types,
    })
}
