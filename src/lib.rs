//! Content Graph - GraphQL endpoint generated from TCA content metadata
//!
//! The schema is derived at runtime from table metadata and content type
//! definitions; see [graphql::schema::generate_schema].

pub mod app;
pub mod config;
pub mod db;
pub mod graphql;
pub mod jobs;
pub mod metadata;
pub mod persistence;

pub use app::{AppState, build_app};
