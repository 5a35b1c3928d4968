//! Metadata reload job
//!
//! Re-reads the metadata file, works out which tables changed and drops the
//! cached schema and responses that depend on them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::graphql::{InvalidationEvent, ResponseCache, SchemaCache};
use crate::metadata::MetadataSet;

pub struct MetadataWatcher {
    path: PathBuf,
    schema_cache: Arc<SchemaCache>,
    response_cache: Arc<ResponseCache>,
}

impl MetadataWatcher {
    pub fn new(
        path: impl Into<PathBuf>,
        schema_cache: Arc<SchemaCache>,
        response_cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            path: path.into(),
            schema_cache,
            response_cache,
        }
    }

    /// Reload the metadata file and publish it when it differs from the
    /// current set. A file that fails to load leaves the current set in place.
    pub async fn check(&self) -> Result<Option<InvalidationEvent>> {
        let path = self.path.clone();
        let reloaded = tokio::task::spawn_blocking(move || MetadataSet::load(&path))
            .await
            .context("Metadata reload task failed")?
            .with_context(|| format!("Failed to reload metadata from {}", self.path.display()))?;

        let current = self.schema_cache.metadata();
        let tables = changed_tables(&current.table_hashes(), &reloaded.table_hashes());
        if tables.is_empty() && current.content_hash() == reloaded.content_hash() {
            debug!(path = %self.path.display(), "Metadata unchanged");
            return Ok(None);
        }

        info!(tables = ?tables, "Metadata changed, invalidating caches");
        let event = InvalidationEvent::MetadataChanged { tables };
        self.schema_cache.set_metadata(Arc::new(reloaded));
        self.schema_cache.handle(&event).await;
        self.response_cache.handle(&event);

        Ok(Some(event))
    }
}

/// Tables added, removed or altered between two hash snapshots
pub fn changed_tables(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> BTreeSet<String> {
    before
        .keys()
        .chain(after.keys())
        .filter(|table| before.get(*table) != after.get(*table))
        .cloned()
        .collect()
}
