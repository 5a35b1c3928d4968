//! Content Graph server entry point.
//!
//! Queries are served via GraphQL at the configured path (default /graphql).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use contentgraph::config::Config;
use contentgraph::db::Database;
use contentgraph::graphql::{ResponseCache, SchemaCache};
use contentgraph::jobs::{self, MetadataWatcher};
use contentgraph::metadata::MetadataSet;
use contentgraph::persistence::Persistence;
use contentgraph::{AppState, build_app};

/// Upper bound on cached responses
const RESPONSE_CACHE_CAPACITY: usize = 10_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "contentgraph=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting Content Graph");

    let config = Arc::new(Config::from_env()?);
    tracing::info!("Configuration loaded");

    let metadata = MetadataSet::load(&config.metadata_path)
        .with_context(|| format!("Failed to load metadata from {}", config.metadata_path))?;
    tracing::info!(
        tables = metadata.tables.len(),
        content_types = metadata.content_types.len(),
        "Metadata loaded"
    );

    let db = Database::connect(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database connected");

    let store: Arc<dyn Persistence> = Arc::new(db);
    let schema_cache = Arc::new(SchemaCache::new(
        Arc::new(metadata),
        store,
        config.generate_options(),
    ));
    let response_cache = Arc::new(ResponseCache::new(
        config.response_cache,
        RESPONSE_CACHE_CAPACITY,
        config.response_cache_ttl,
    ));

    // Generate eagerly so metadata errors surface at startup
    let cached = schema_cache.schema().await?;
    tracing::info!(hash = %cached.hash, "GraphQL schema generated");

    let watcher = Arc::new(MetadataWatcher::new(
        config.metadata_path.clone(),
        schema_cache.clone(),
        response_cache.clone(),
    ));
    let _scheduler = jobs::start_scheduler(watcher, &config.metadata_poll_cron).await?;

    let state = AppState {
        config: config.clone(),
        schema_cache,
        response_cache,
    };
    let app = build_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);
    tracing::info!(
        "GraphQL playground: http://{}:{}{}",
        config.host.as_deref().unwrap_or("localhost"),
        config.port,
        config.graphql_path
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
