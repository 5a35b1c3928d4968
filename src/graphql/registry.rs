//! Type registry for one schema generation pass
//!
//! Owns every generated type keyed by name, the table to type bindings used
//! to resolve relations, and the memoized connection/edge pairs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_graphql::dynamic::{Enum, EnumItem, Type};

use super::builtins;
use super::error::GraphqlError;
use super::filters;
use super::naming::pascal_case;
use super::pagination::{self, PAGE_INFO};
use super::resolvers::RecordNode;
use super::schema::QUERY;

/// Names generated next to every bound object type, as suffixes of its name
const BOUND_TYPE_SUFFIXES: [&str; 5] = ["", "Connection", "Edge", "OrderField", "OrderInput"];

/// Which content type a table is exposed as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBinding {
    pub type_name: String,
    pub content_type: String,
    pub model_class: Option<String>,
}

impl TableBinding {
    pub fn new(
        type_name: impl Into<String>,
        content_type: impl Into<String>,
        model_class: Option<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            content_type: content_type.into(),
            model_class,
        }
    }
}

/// Names of the connection and edge types of one node type
#[derive(Debug, PartialEq, Eq)]
pub struct ConnectionTypes {
    pub node: String,
    pub connection: String,
    pub edge: String,
    pub with_facets: bool,
}

pub struct TypeRegistry {
    types: Vec<Type>,
    names: HashSet<String>,
    /// Enum name to its (value, symbol) pairs
    enums: HashMap<String, Vec<(String, String)>>,
    bindings: BTreeMap<String, TableBinding>,
    connections: HashMap<String, Arc<ConnectionTypes>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// A registry preloaded with the built-in types
    pub fn new() -> Self {
        let mut registry = Self {
            types: Vec::new(),
            names: HashSet::new(),
            enums: HashMap::new(),
            bindings: BTreeMap::new(),
            connections: HashMap::new(),
        };

        let builtins: Vec<(&str, Type)> = vec![
            (builtins::DATETIME, builtins::datetime_scalar().into()),
            (builtins::LINK, builtins::link_object().into()),
            (builtins::FILE_REFERENCE, builtins::file_reference_object().into()),
            (builtins::SORT_DIRECTION, builtins::sort_direction_enum().into()),
            (PAGE_INFO, pagination::page_info_object().into()),
        ];
        for (name, ty) in builtins.into_iter().chain(filters::filter_types()) {
            registry.names.insert(name.to_string());
            registry.types.push(ty);
        }
        registry
    }

    /// Register a type under `name`; names are unique
    pub fn register(&mut self, name: &str, ty: impl Into<Type>) -> Result<(), GraphqlError> {
        if !self.names.insert(name.to_string()) {
            return Err(GraphqlError::DuplicateName(name.to_string()));
        }
        self.types.push(ty.into());
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Registered, or taken by a bound type or one of the types generated for it
    pub fn is_reserved(&self, name: &str) -> bool {
        if self.contains(name) || name == QUERY {
            return true;
        }
        self.bindings.values().any(|binding| {
            name.strip_prefix(binding.type_name.as_str())
                .is_some_and(|suffix| BOUND_TYPE_SUFFIXES.contains(&suffix))
        })
    }

    /// Bind a table to the type it is exposed as. Happens for every enabled
    /// content type before any column is mapped, so relations may point forward.
    pub fn bind_table(&mut self, table: &str, binding: TableBinding) -> Result<(), GraphqlError> {
        if self.bindings.contains_key(table) {
            return Err(GraphqlError::DuplicateName(format!(
                "table `{table}` is bound to more than one content type"
            )));
        }
        self.bindings.insert(table.to_string(), binding);
        Ok(())
    }

    pub fn binding(&self, table: &str) -> Option<&TableBinding> {
        self.bindings.get(table)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&String, &TableBinding)> {
        self.bindings.iter()
    }

    /// Register an enum named after `label`, returning the name it ended up with.
    ///
    /// An existing enum with the same (value, symbol) pairs is reused. On a
    /// conflicting name the owning type's name is prefixed once.
    pub fn register_enum(
        &mut self,
        owner: &str,
        label: &str,
        pairs: Vec<(String, String)>,
    ) -> Result<String, GraphqlError> {
        let base = format!("{}Enum", pascal_case(label));
        let candidates = [base.clone(), format!("{owner}{base}")];

        for candidate in &candidates {
            match self.enums.get(candidate) {
                Some(existing) if *existing == pairs => return Ok(candidate.clone()),
                Some(_) => continue,
                None if self.is_reserved(candidate) => continue,
                None => {
                    let ty = pairs
                        .iter()
                        .fold(Enum::new(candidate.as_str()), |ty, (_, symbol)| {
                            ty.item(EnumItem::new(symbol.as_str()))
                        });
                    self.register(candidate, ty)?;
                    self.enums.insert(candidate.clone(), pairs);
                    return Ok(candidate.clone());
                }
            }
        }

        Err(GraphqlError::DuplicateName(candidates[1].clone()))
    }

    /// The connection and edge types for `node`, created on first request.
    ///
    /// Later requests return the same `Arc`.
    pub fn connection_for(
        &mut self,
        node: &str,
        with_facets: bool,
    ) -> Result<Arc<ConnectionTypes>, GraphqlError> {
        if let Some(existing) = self.connections.get(node) {
            return Ok(existing.clone());
        }

        let types = Arc::new(ConnectionTypes {
            node: node.to_string(),
            connection: format!("{node}Connection"),
            edge: format!("{node}Edge"),
            with_facets,
        });
        let (connection, edge) = pagination::connection_objects::<RecordNode>(
            &types.node,
            &types.connection,
            &types.edge,
            with_facets,
        );
        self.register(&types.edge, edge)?;
        self.register(&types.connection, connection)?;

        self.connections.insert(node.to_string(), types.clone());
        Ok(types)
    }

    /// Consume the registry, yielding every registered type
    pub fn into_types(self) -> Vec<Type> {
        self.types
    }
}
