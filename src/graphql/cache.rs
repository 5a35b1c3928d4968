//! Schema and response caching
//!
//! The [SchemaCache] keeps the schema generated from the current metadata
//! and regenerates it when the metadata hash changes. The [ResponseCache]
//! keeps serialized responses tagged with the tables they were read from.
//!
//! Metadata changes invalidate responses by tag. Row changes are not observed,
//! so a cached response is served for at most the cache's time to live.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_graphql::dynamic::Schema;
use parking_lot::Mutex as SyncMutex;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::error::GraphqlError;
use super::schema::{GenerateOptions, generate_schema};
use crate::metadata::MetadataSet;
use crate::persistence::Persistence;

/// Signals that cached state is stale
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationEvent {
    MetadataChanged { tables: BTreeSet<String> },
}

/// A published schema and the metadata it was generated from
#[derive(Clone)]
pub struct CachedSchema {
    pub hash: String,
    pub schema: Schema,
    pub metadata: Arc<MetadataSet>,
}

pub struct SchemaCache {
    metadata: SyncMutex<Arc<MetadataSet>>,
    current: RwLock<Option<CachedSchema>>,
    /// Serializes regeneration
    regenerate: Mutex<()>,
    store: Arc<dyn Persistence>,
    options: GenerateOptions,
}

impl SchemaCache {
    pub fn new(
        metadata: Arc<MetadataSet>,
        store: Arc<dyn Persistence>,
        options: GenerateOptions,
    ) -> Self {
        Self {
            metadata: SyncMutex::new(metadata),
            current: RwLock::new(None),
            regenerate: Mutex::new(()),
            store,
            options,
        }
    }

    pub fn metadata(&self) -> Arc<MetadataSet> {
        self.metadata.lock().clone()
    }

    /// Replace the metadata; the next [Self::schema] call regenerates
    pub fn set_metadata(&self, metadata: Arc<MetadataSet>) {
        *self.metadata.lock() = metadata;
    }

    /// The schema for the current metadata, generating it if needed.
    ///
    /// Readers never wait on a regeneration of a schema they already have.
    /// At most one regeneration runs at a time; the result is published with
    /// a single swap.
    pub async fn schema(&self) -> Result<CachedSchema, GraphqlError> {
        let metadata = self.metadata();
        let hash = metadata.content_hash();

        if let Some(cached) = self.lookup(&hash).await {
            return Ok(cached);
        }

        let _gate = self.regenerate.lock().await;
        if let Some(cached) = self.lookup(&hash).await {
            return Ok(cached);
        }

        let generated = generate_schema(metadata.clone(), self.store.clone(), &self.options)?;
        let cached = CachedSchema {
            hash: hash.clone(),
            schema: generated.schema,
            metadata,
        };
        *self.current.write().await = Some(cached.clone());
        info!(
            hash = %hash,
            types = generated.object_types.len(),
            "Published regenerated GraphQL schema"
        );

        Ok(cached)
    }

    async fn lookup(&self, hash: &str) -> Option<CachedSchema> {
        let guard = self.current.read().await;
        guard.as_ref().filter(|c| c.hash == hash).cloned()
    }

    /// Drop the cached schema
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }

    pub async fn handle(&self, event: &InvalidationEvent) {
        match event {
            InvalidationEvent::MetadataChanged { tables } => {
                debug!(tables = ?tables, "Discarding cached schema");
                self.invalidate().await;
            }
        }
    }
}

/// Tables read while resolving one request
#[derive(Debug, Clone, Default)]
pub struct CacheTags(Arc<SyncMutex<BTreeSet<String>>>);

impl CacheTags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str) {
        self.0.lock().insert(table.to_string());
    }

    pub fn tables(&self) -> BTreeSet<String> {
        self.0.lock().clone()
    }
}

struct CachedResponse {
    body: serde_json::Value,
    tables: BTreeSet<String>,
    stored_at: Instant,
}

/// Serialized responses of error-free requests, each kept for at most `ttl`
pub struct ResponseCache {
    enabled: bool,
    capacity: usize,
    ttl: Duration,
    entries: SyncMutex<HashMap<String, CachedResponse>>,
}

impl ResponseCache {
    pub fn new(enabled: bool, capacity: usize, ttl: Duration) -> Self {
        Self {
            enabled,
            capacity,
            ttl,
            entries: SyncMutex::new(HashMap::new()),
        }
    }

    fn is_fresh(&self, entry: &CachedResponse) -> bool {
        entry.stored_at.elapsed() < self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cache key of a request against the schema with `schema_hash`
    pub fn key(schema_hash: &str, request: &async_graphql::Request) -> String {
        let variables = serde_json::to_string(&request.variables).unwrap_or_default();
        let mut hasher = Sha256::new();
        for part in [
            schema_hash,
            request.query.as_str(),
            variables.as_str(),
            request.operation_name.as_deref().unwrap_or_default(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.entries.lock();
        let fresh = self.is_fresh(entries.get(key)?);
        if fresh {
            entries.get(key).map(|e| e.body.clone())
        } else {
            entries.remove(key);
            None
        }
    }

    /// Store a response; responses with errors are never stored
    pub fn put(&self, key: String, response: &async_graphql::Response, tables: BTreeSet<String>) {
        if !self.enabled || self.capacity == 0 || response.is_err() {
            return;
        }
        let Ok(body) = serde_json::to_value(response) else {
            return;
        };
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            entries.retain(|_, e| self.is_fresh(e));
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.stored_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    debug!(capacity = self.capacity, "Response cache full, evicting oldest entry");
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            CachedResponse {
                body,
                tables,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every entry tagged with one of `tables`; returns how many were dropped
    pub fn invalidate_tables(&self, tables: &BTreeSet<String>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.tables.is_disjoint(tables));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn handle(&self, event: &InvalidationEvent) {
        match event {
            InvalidationEvent::MetadataChanged { tables } => {
                let dropped = self.invalidate_tables(tables);
                debug!(dropped, "Invalidated cached responses");
            }
        }
    }
}
