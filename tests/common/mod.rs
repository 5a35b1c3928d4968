//! Shared fixtures: a metadata document and a seeded in-memory SQLite database

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use contentgraph::db::Database;
use contentgraph::graphql::{GenerateOptions, GraphqlError, SchemaCache, generate_schema};
use contentgraph::metadata::MetadataSet;
use contentgraph::persistence::{GroupedCount, Page, Persistence, QueryPlan, Record};

pub const METADATA: &str = r#"
content_types:
  - id: news
    title: News
    table: tx_news
    filters:
      - name: Category
        path: categories.title
        kind: discrete
      - name: Color
        path: color
        kind: discrete
      - name: Price
        path: price
        kind: range
        unit: EUR
  - id: author
    title: Author
    table: tx_author
tables:
  tx_news:
    ctrl:
      title: News
    columns:
      title:
        label: Title
        config: { type: input, required: true }
      color:
        label: Color
        config:
          type: select
          items:
            - [Red, red]
            - [Sky blue, sky_blue]
            - [Green, green]
      price:
        config: { type: number, format: decimal }
      datetime:
        config: { type: datetime }
      author:
        config: { type: select, foreign_table: tx_author }
      link:
        config: { type: link }
      image:
        config: { type: file }
      categories:
        config: { type: category, foreign_table: sys_category, MM: sys_category_record_mm }
  tx_author:
    columns:
      name:
        config: { type: input }
  sys_category:
    columns:
      title:
        config: { type: input }
"#;

pub const NEWS_COUNT: i64 = 30;

pub fn metadata() -> Arc<MetadataSet> {
    Arc::new(MetadataSet::from_yaml_str(METADATA).expect("fixture metadata parses"))
}

const SCHEMA_SQL: &[&str] = &[
    "CREATE TABLE tx_news (uid INTEGER PRIMARY KEY, pid INTEGER NOT NULL DEFAULT 0, \
     title TEXT NOT NULL, color TEXT, price REAL, datetime INTEGER NOT NULL DEFAULT 0, \
     author INTEGER NOT NULL DEFAULT 0, link TEXT, image INTEGER NOT NULL DEFAULT 0)",
    "CREATE TABLE tx_author (uid INTEGER PRIMARY KEY, pid INTEGER NOT NULL DEFAULT 0, name TEXT)",
    "CREATE TABLE sys_category (uid INTEGER PRIMARY KEY, pid INTEGER NOT NULL DEFAULT 0, title TEXT)",
    "CREATE TABLE sys_category_record_mm (uid_local INTEGER NOT NULL, uid_foreign INTEGER NOT NULL)",
    "CREATE TABLE sys_file_reference (uid INTEGER PRIMARY KEY, pid INTEGER NOT NULL DEFAULT 0, \
     uid_local INTEGER NOT NULL, uid_foreign INTEGER NOT NULL, tablenames TEXT NOT NULL, \
     fieldname TEXT NOT NULL, sorting_foreign INTEGER NOT NULL DEFAULT 0, title TEXT, \
     description TEXT, alternative TEXT, link TEXT)",
];

/// In-memory database holding 30 news records.
///
/// - odd uids are red, even uids green; nothing is sky blue
/// - price is `uid * 1.5`
/// - uids 1..=10 are in "Sports", 5..=15 in "Politics"; "Empty" has no records
/// - uid 1 has an author, a date, a link and two images
pub async fn seeded_database() -> Database {
    let db = Database::connect("sqlite::memory:", 1)
        .await
        .expect("in-memory database");
    let pool = db.pool();

    for statement in SCHEMA_SQL {
        sqlx::query(statement).execute(pool).await.expect("create table");
    }

    for uid in 1..=NEWS_COUNT {
        let color = if uid % 2 == 1 { "red" } else { "green" };
        let (datetime, author, link) = if uid == 1 {
            (1_700_000_000_i64, 1_i64, Some("https://example.com _blank - \"Example\""))
        } else {
            (0, 0, None)
        };
        sqlx::query(
            "INSERT INTO tx_news (uid, pid, title, color, price, datetime, author, link, image) \
             VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(uid)
        .bind(format!("News {uid:02}"))
        .bind(color)
        .bind(uid as f64 * 1.5)
        .bind(datetime)
        .bind(author)
        .bind(link)
        .bind(if uid == 1 { 2_i64 } else { 0 })
        .execute(pool)
        .await
        .expect("insert news");
    }

    sqlx::query("INSERT INTO tx_author (uid, name) VALUES (1, 'Ada')")
        .execute(pool)
        .await
        .expect("insert author");

    for (uid, title) in [(1, "Sports"), (2, "Politics"), (3, "Empty")] {
        sqlx::query("INSERT INTO sys_category (uid, title) VALUES (?1, ?2)")
            .bind(uid)
            .bind(title)
            .execute(pool)
            .await
            .expect("insert category");
    }
    for (category, range) in [(1_i64, 1..=10_i64), (2, 5..=15)] {
        for news in range {
            sqlx::query(
                "INSERT INTO sys_category_record_mm (uid_local, uid_foreign) VALUES (?1, ?2)",
            )
            .bind(news)
            .bind(category)
            .execute(pool)
            .await
            .expect("insert category relation");
        }
    }

    for (uid, file, sorting, title) in [(1, 43, 2, "Detail"), (2, 42, 1, "Cover")] {
        sqlx::query(
            "INSERT INTO sys_file_reference \
             (uid, uid_local, uid_foreign, tablenames, fieldname, sorting_foreign, title) \
             VALUES (?1, ?2, 1, 'tx_news', 'image', ?3, ?4)",
        )
        .bind(uid)
        .bind(file)
        .bind(sorting)
        .bind(title)
        .execute(pool)
        .await
        .expect("insert file reference");
    }

    db
}

pub async fn store() -> Arc<dyn Persistence> {
    Arc::new(seeded_database().await)
}

pub async fn schema() -> async_graphql::dynamic::Schema {
    generate_schema(metadata(), store().await, &GenerateOptions::default())
        .expect("schema generates")
        .schema
}

pub async fn schema_cache() -> Arc<SchemaCache> {
    schema_cache_with_database().await.0
}

/// A schema cache plus a handle on the database it reads
pub async fn schema_cache_with_database() -> (Arc<SchemaCache>, Database) {
    let db = seeded_database().await;
    let cache = Arc::new(SchemaCache::new(
        metadata(),
        Arc::new(db.clone()),
        GenerateOptions::default(),
    ));
    (cache, db)
}

/// Counts the calls made to the wrapped store
pub struct CountingStore {
    inner: Arc<dyn Persistence>,
    pub by_id: AtomicUsize,
    pub fetches: AtomicUsize,
    pub grouped: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn Persistence>) -> Self {
        Self {
            inner,
            by_id: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            grouped: AtomicUsize::new(0),
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Persistence for CountingStore {
    async fn fetch_by_id(&self, table: &str, uid: i64) -> Result<Option<Record>, GraphqlError> {
        self.by_id.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_by_id(table, uid).await
    }

    async fn fetch_all(&self, plan: &QueryPlan) -> Result<Page, GraphqlError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_all(plan).await
    }

    async fn count_grouped_by(
        &self,
        query: &GroupedCount,
    ) -> Result<Vec<(String, i64)>, GraphqlError> {
        self.grouped.fetch_add(1, Ordering::SeqCst);
        self.inner.count_grouped_by(query).await
    }

    async fn range_bounds(
        &self,
        query: &GroupedCount,
    ) -> Result<(Option<f64>, Option<f64>), GraphqlError> {
        self.grouped.fetch_add(1, Ordering::SeqCst);
        self.inner.range_bounds(query).await
    }
}

/// A schema over the seeded database whose store calls are counted
pub async fn counted_schema() -> (async_graphql::dynamic::Schema, Arc<CountingStore>) {
    let store = Arc::new(CountingStore::new(store().await));
    let schema = generate_schema(metadata(), store.clone(), &GenerateOptions::default())
        .expect("schema generates")
        .schema;
    (schema, store)
}

/// Execute `query` and return the response as JSON
pub async fn execute(schema: &async_graphql::dynamic::Schema, query: &str) -> serde_json::Value {
    let response = schema.execute(query).await;
    serde_json::to_value(&response).expect("response serializes")
}
