//! GraphQL API generated from content metadata
//!
//! There is no hand-written schema. [schema::generate_schema] derives every
//! type, enum, connection and root field from the enabled content types, and
//! [cache::SchemaCache] keeps the result until the metadata changes.

pub mod builtins;
pub mod cache;
pub mod error;
pub mod filters;
pub mod loaders;
pub mod mapper;
pub mod naming;
pub mod pagination;
pub mod registry;
pub mod resolvers;
pub mod schema;
pub mod service;

pub use cache::{CacheTags, CachedSchema, InvalidationEvent, ResponseCache, SchemaCache};
pub use error::GraphqlError;
pub use pagination::PageSettings;
pub use schema::{GenerateOptions, GeneratedSchema, generate_schema};
