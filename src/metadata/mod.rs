//! Content metadata: typed column descriptors and content type definitions
//!
//! Everything downstream (mapper, filters, generator) works on the typed form
//! defined here. The loosely-typed TCA maps are decoded exactly once, in
//! [tca], when a [MetadataSet] is loaded.

pub mod tca;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised while loading or decoding metadata
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to read metadata file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse metadata: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid metadata for table `{table}`: {reason}")]
    InvalidTable { table: String, reason: String },
    #[error("content type `{content_type}` references unknown table `{table}`")]
    UnknownTable { content_type: String, table: String },
}

/// Storage kind of a column (the TCA `config.type`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Input,
    Number,
    Select,
    Language,
    Category,
    Inline,
    Text,
    Email,
    Check,
    DateTime,
    Link,
    File,
    Other(String),
}

impl FieldKind {
    pub fn from_tca(kind: &str) -> Self {
        match kind {
            "input" => FieldKind::Input,
            "number" => FieldKind::Number,
            "select" => FieldKind::Select,
            "language" => FieldKind::Language,
            "category" => FieldKind::Category,
            "inline" => FieldKind::Inline,
            "text" => FieldKind::Text,
            "email" => FieldKind::Email,
            "check" => FieldKind::Check,
            "datetime" => FieldKind::DateTime,
            "link" => FieldKind::Link,
            "file" => FieldKind::File,
            other => FieldKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldKind::Input => "input",
            FieldKind::Number => "number",
            FieldKind::Select => "select",
            FieldKind::Language => "language",
            FieldKind::Category => "category",
            FieldKind::Inline => "inline",
            FieldKind::Text => "text",
            FieldKind::Email => "email",
            FieldKind::Check => "check",
            FieldKind::DateTime => "datetime",
            FieldKind::Link => "link",
            FieldKind::File => "file",
            FieldKind::Other(kind) => kind,
        }
    }
}

/// One static option of a `select` column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectItem {
    pub label: String,
    pub value: String,
}

impl SelectItem {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Typed description of one content type column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub kind: FieldKind,
    /// Human label, already stripped of translation key prefixes
    pub label: Option<String>,
    /// Validation flags (`eval`), lowercased
    pub eval: BTreeSet<String>,
    pub format: Option<String>,
    pub required: bool,
    /// Static select items, in declaration order. Empty when none are declared.
    pub items: Vec<SelectItem>,
    pub foreign_table: Option<String>,
    /// Many-to-many association table (the TCA `MM` key)
    pub mm_table: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            label: None,
            eval: BTreeSet::new(),
            format: None,
            required: false,
            items: Vec::new(),
            foreign_table: None,
            mm_table: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_eval(mut self, flag: impl Into<String>) -> Self {
        self.eval.insert(flag.into().to_lowercase());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_items(mut self, items: Vec<SelectItem>) -> Self {
        self.items = items;
        self
    }

    pub fn with_foreign_table(mut self, table: impl Into<String>) -> Self {
        self.foreign_table = Some(table.into());
        self
    }

    pub fn with_mm_table(mut self, table: impl Into<String>) -> Self {
        self.mm_table = Some(table.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Required either explicitly or through the `required` eval flag
    pub fn is_required(&self) -> bool {
        self.required || self.eval.contains("required")
    }

    pub fn has_eval(&self, flag: &str) -> bool {
        self.eval.contains(flag)
    }

    /// A `select` or `category` column joined through an MM association table
    pub fn is_mm_relation(&self) -> bool {
        matches!(self.kind, FieldKind::Select | FieldKind::Category)
            && self.foreign_table.is_some()
            && self.mm_table.is_some()
    }
}

/// A named column of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub descriptor: ColumnDescriptor,
}

/// Decoded metadata of one storage table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub title: Option<String>,
    /// Columns in declaration order
    pub columns: Vec<Column>,
}

impl TableMetadata {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.descriptor)
    }

    pub fn with_column(mut self, name: impl Into<String>, descriptor: ColumnDescriptor) -> Self {
        self.columns.push(Column {
            name: name.into(),
            descriptor,
        });
        self
    }
}

/// How a filter narrows its path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Discrete,
    Range,
}

/// Filter declared for a content type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub name: String,
    /// Table the path starts from; defaults to the content type's table
    #[serde(default)]
    pub table: String,
    pub path: String,
    pub kind: FilterKind,
    #[serde(default)]
    pub unit: Option<String>,
}

/// An exposed content type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentTypeDefinition {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub table: String,
    #[serde(default)]
    pub model_class: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

/// On-disk layout of a metadata file. Table entries stay loosely typed
/// until [tca::decode_table] turns them into [TableMetadata].
#[derive(Debug, Deserialize)]
struct MetadataFile {
    #[serde(default)]
    content_types: Vec<ContentTypeDefinition>,
    #[serde(default)]
    tables: BTreeMap<String, serde_yaml::Value>,
}

/// All metadata one schema generation cycle reads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataSet {
    pub tables: BTreeMap<String, TableMetadata>,
    pub content_types: Vec<ContentTypeDefinition>,
}

impl MetadataSet {
    /// Parse a YAML (or JSON) metadata document
    pub fn from_yaml_str(source: &str) -> Result<Self, MetadataError> {
        let file: MetadataFile = serde_yaml::from_str(source)?;

        let mut tables = BTreeMap::new();
        for (name, raw) in &file.tables {
            tables.insert(name.clone(), tca::decode_table(name, raw)?);
        }

        let mut content_types = file.content_types;
        for content_type in &mut content_types {
            if !tables.contains_key(&content_type.table) {
                return Err(MetadataError::UnknownTable {
                    content_type: content_type.id.clone(),
                    table: content_type.table.clone(),
                });
            }
            for filter in &mut content_type.filters {
                if filter.table.is_empty() {
                    filter.table = content_type.table.clone();
                }
            }
        }

        Ok(Self {
            tables,
            content_types,
        })
    }

    /// Read and decode a metadata file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MetadataError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&source)
    }

    pub fn table(&self, name: &str) -> Option<&TableMetadata> {
        self.tables.get(name)
    }

    pub fn content_type(&self, id: &str) -> Option<&ContentTypeDefinition> {
        self.content_types.iter().find(|c| c.id == id)
    }

    /// Content types in the allow-list, in declaration order. An empty
    /// allow-list enables every declared content type.
    pub fn enabled_content_types<'a>(
        &'a self,
        allow_list: &'a [String],
    ) -> impl Iterator<Item = &'a ContentTypeDefinition> + 'a {
        self.content_types
            .iter()
            .filter(move |c| allow_list.is_empty() || allow_list.contains(&c.id))
    }

    /// SHA-256 over the canonical serialization; identifies a schema generation input
    pub fn content_hash(&self) -> String {
        hash_json(self)
    }

    /// Per-table hashes, covering the table's columns and the content types stored in it
    pub fn table_hashes(&self) -> BTreeMap<String, String> {
        self.tables
            .iter()
            .map(|(name, table)| {
                let content_types: Vec<&ContentTypeDefinition> = self
                    .content_types
                    .iter()
                    .filter(|c| &c.table == name)
                    .collect();
                (name.clone(), hash_json(&(table, content_types)))
            })
            .collect()
    }
}

fn hash_json<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}
