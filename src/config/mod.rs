//! Application configuration management

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::graphql::{GenerateOptions, PageSettings};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Server host (for generating URLs)
    pub host: Option<String>,

    /// Server port
    pub port: u16,

    /// SQLite database URL (`sqlite://` prefix optional)
    pub database_url: String,

    /// Maximum pool connections
    pub database_max_connections: u32,

    /// Path of the YAML/JSON metadata file
    pub metadata_path: String,

    /// Content type ids to expose; empty exposes everything in the metadata file
    pub enabled_content_types: Vec<String>,

    /// Path the GraphQL endpoint is served on
    pub graphql_path: String,

    pub default_page_size: i64,

    pub max_page_size: i64,

    /// Cache error-free responses
    pub response_cache: bool,

    /// How long a cached response is served before it is re-executed
    pub response_cache_ttl: Duration,

    /// Cron expression (with seconds) for polling the metadata file
    pub metadata_poll_cron: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_PATH")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| "sqlite://./data/content.db".to_string());

        let config = Self {
            host: env::var("HOST").ok(),

            port: parse_var("PORT", 3001).context("Invalid PORT")?,

            database_url,

            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10)
                .context("Invalid DATABASE_MAX_CONNECTIONS")?,

            metadata_path: env::var("METADATA_PATH")
                .unwrap_or_else(|_| "./metadata.yaml".to_string()),

            enabled_content_types: env::var("ENABLED_CONTENT_TYPES")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),

            graphql_path: env::var("GRAPHQL_PATH").unwrap_or_else(|_| "/graphql".to_string()),

            default_page_size: parse_var("DEFAULT_PAGE_SIZE", 25)
                .context("Invalid DEFAULT_PAGE_SIZE")?,

            max_page_size: parse_var("MAX_PAGE_SIZE", 100).context("Invalid MAX_PAGE_SIZE")?,

            response_cache: parse_var("RESPONSE_CACHE", true).context("Invalid RESPONSE_CACHE")?,

            response_cache_ttl: Duration::from_secs(
                parse_var("RESPONSE_CACHE_TTL_SECS", 30).context("Invalid RESPONSE_CACHE_TTL_SECS")?,
            ),

            metadata_poll_cron: env::var("METADATA_POLL_CRON")
                .unwrap_or_else(|_| "0 * * * * *".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.graphql_path.starts_with('/') {
            anyhow::bail!("GRAPHQL_PATH must start with '/'");
        }
        if self.default_page_size < 1 || self.max_page_size < self.default_page_size {
            anyhow::bail!("page sizes must satisfy 1 <= DEFAULT_PAGE_SIZE <= MAX_PAGE_SIZE");
        }
        Ok(())
    }

    /// Page size limits for connection fields
    pub fn page_settings(&self) -> PageSettings {
        PageSettings {
            default_size: self.default_page_size,
            max_size: self.max_page_size,
        }
    }

    /// Options for schema generation
    pub fn generate_options(&self) -> GenerateOptions {
        GenerateOptions {
            enabled_content_types: self.enabled_content_types.clone(),
            page: self.page_settings(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: None,
            port: 3001,
            database_url: "sqlite://./data/content.db".to_string(),
            database_max_connections: 10,
            metadata_path: "./metadata.yaml".to_string(),
            enabled_content_types: Vec::new(),
            graphql_path: "/graphql".to_string(),
            default_page_size: 25,
            max_page_size: 100,
            response_cache: true,
            response_cache_ttl: Duration::from_secs(30),
            metadata_poll_cron: "0 * * * * *".to_string(),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name}={raw:?} cannot be parsed")),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated list, dropping blanks
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
