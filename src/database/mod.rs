use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use serde_json::{Map, Value};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::config::DatabaseConfig;

pub mod filter;
pub mod memory;

pub use filter::{FieldOp, Filter, FilterError, SortSpec, SqlWriter};
pub use memory::MemoryStore;

/// Database connection pool
pub type DbPool = Pool;

/// Keys managed by the store; never persisted inside `body`.
pub const RESERVED_KEYS: &[&str] = &["id", "_id", "createdAt", "updatedAt", "__v"];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("database pool setup error: {0}")]
    Setup(#[from] deadpool_postgres::CreatePoolError),
    #[error("database error: {0}")]
    Query(#[from] tokio_postgres::Error),
    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),
    #[error("insert returned no document")]
    NothingInserted,
}

/// A stored document: store metadata plus a flat JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub body: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.body.get(key).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.body.get(key).and_then(Value::as_i64)
    }

    /// Timestamp field written as RFC 3339 text.
    pub fn get_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get_str(key)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// JSON object as returned to clients: body fields plus `id`, `createdAt`, `updatedAt`.
    pub fn into_json(self) -> Map<String, Value> {
        let mut map = self.body;
        map.insert("id".to_string(), Value::String(self.id.to_string()));
        map.insert("createdAt".to_string(), Value::String(format_time(&self.created_at)));
        map.insert("updatedAt".to_string(), Value::String(format_time(&self.updated_at)));
        map
    }
}

/// RFC 3339 with millisecond precision, the format stored for timestamps inside bodies.
pub fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Drop store-managed keys from a client body.
pub fn strip_reserved(mut body: Map<String, Value>) -> Map<String, Value> {
    for key in RESERVED_KEYS {
        body.remove(*key);
    }
    body
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub limit: i64,
    pub offset: i64,
}

/// Collection-oriented persistence. Implementations must evaluate [`Filter`]s
/// identically; `find_one`, `update_one` and `delete_one` act on the oldest match.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(
        &self,
        collection: &str,
        bodies: Vec<Map<String, Value>>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError>;

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &[SortSpec],
        window: Option<Window>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Shallow merge of `patch` into the first matching body.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> Result<Option<Document>, StoreError>;

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> Result<u64, StoreError>;

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError>;

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Insert a single body.
    async fn insert_one(&self, collection: &str, body: Map<String, Value>) -> Result<Document, StoreError> {
        let docs = self.insert(collection, vec![body]).await?;
        docs.into_iter().next().ok_or(StoreError::NothingInserted)
    }
}

/// Creation timestamps for a batch, strictly increasing so that batch order survives sorting.
pub(crate) fn batch_times(len: usize) -> Vec<DateTime<Utc>> {
    let base = Utc::now();
    (0..len)
        .map(|i| base + Duration::microseconds(i as i64))
        .collect()
}

const DOCUMENT_COLUMNS: &str = "id, body, created_at, updated_at";

fn order_by(sort: &[SortSpec]) -> String {
    let mut keys: Vec<String> = sort.iter().map(SortSpec::to_sql).collect();
    keys.push("created_at ASC".to_string());
    keys.push("id ASC".to_string());
    keys.join(", ")
}

/// PostgreSQL backed store: one JSONB row per document.
pub struct DatabaseService {
    pool: DbPool,
}

impl DatabaseService {
    /// Create a new database service with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool_cfg = PoolConfig::new(config.max_connections);
        let timeout = std::time::Duration::from_secs(config.connect_timeout_seconds);
        pool_cfg.timeouts.wait = Some(timeout);
        pool_cfg.timeouts.create = Some(timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;

        // Test connection
        let client = pool.get().await?;
        client.execute("SELECT 1", &[]).await?;

        log::info!("Database connection established");

        Ok(Self { pool })
    }

    /// Get a database client from the pool
    pub async fn get_client(&self) -> Result<deadpool_postgres::Client, StoreError> {
        Ok(self.pool.get().await?)
    }

    /// Initialize database schema
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let client = self.get_client().await?;

        client
            .execute(
                "CREATE TABLE IF NOT EXISTS documents (\
                    id UUID PRIMARY KEY,\
                    collection VARCHAR(64) NOT NULL,\
                    body JSONB NOT NULL DEFAULT '{}'::jsonb,\
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\
                )",
                &[],
            )
            .await?;

        client
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection, created_at)",
                &[],
            )
            .await?;
        client
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_documents_body ON documents USING GIN (body jsonb_path_ops)",
                &[],
            )
            .await?;

        log::info!("Database schema initialized");
        Ok(())
    }

    fn row_to_document(row: &Row) -> Document {
        let body = match row.get::<_, Value>("body") {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Document {
            id: row.get("id"),
            body,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    /// `WHERE` clause restricted to a collection, binding into `w`.
    fn scoped(w: &mut SqlWriter, collection: &str, filter: &Filter) -> String {
        let coll = w.bind(collection.to_string());
        let cond = filter.to_sql(w);
        format!("collection = {coll} AND {cond}")
    }

    /// Sub-select of the oldest matching id, for single-row writes.
    fn first_match(w: &mut SqlWriter, collection: &str, filter: &Filter) -> String {
        let scope = Self::scoped(w, collection, filter);
        format!("SELECT id FROM documents WHERE {scope} ORDER BY created_at ASC, id ASC LIMIT 1")
    }
}

#[async_trait]
impl DocumentStore for DatabaseService {
    async fn insert(
        &self,
        collection: &str,
        bodies: Vec<Map<String, Value>>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut client = self.get_client().await?;
        let tx = client.transaction().await?;
        let times = batch_times(bodies.len());
        let mut out = Vec::with_capacity(bodies.len());
        for (body, created_at) in bodies.into_iter().zip(times) {
            let id = Uuid::new_v4();
            let body = Value::Object(strip_reserved(body));
            let row = tx
                .query_one(
                    "INSERT INTO documents (id, collection, body, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $4) \
                     RETURNING id, body, created_at, updated_at",
                    &[&id, &collection, &body, &created_at],
                )
                .await?;
            out.push(Self::row_to_document(&row));
        }
        tx.commit().await?;
        Ok(out)
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError> {
        let docs = self
            .find_many(collection, filter, &[], Some(Window { limit: 1, offset: 0 }))
            .await?;
        Ok(docs.into_iter().next())
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &[SortSpec],
        window: Option<Window>,
    ) -> Result<Vec<Document>, StoreError> {
        let client = self.get_client().await?;
        let mut w = SqlWriter::new();
        let scope = Self::scoped(&mut w, collection, filter);
        let mut sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE {scope} ORDER BY {}",
            order_by(sort)
        );
        if let Some(win) = window {
            let limit = w.bind(win.limit);
            let offset = w.bind(win.offset);
            sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
        }
        let rows = client.query(&sql, &w.params()).await?;
        Ok(rows.iter().map(Self::row_to_document).collect())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let client = self.get_client().await?;
        let mut w = SqlWriter::new();
        let scope = Self::scoped(&mut w, collection, filter);
        let sql = format!("SELECT COUNT(*) FROM documents WHERE {scope}");
        let row = client.query_one(&sql, &w.params()).await?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> Result<Option<Document>, StoreError> {
        let client = self.get_client().await?;
        let mut w = SqlWriter::new();
        let patch = w.bind(Value::Object(strip_reserved(patch.clone())));
        let target = Self::first_match(&mut w, collection, filter);
        let sql = format!(
            "UPDATE documents SET body = body || {patch}::jsonb, updated_at = NOW() \
             WHERE id = ({target}) RETURNING {DOCUMENT_COLUMNS}"
        );
        let row = client.query_opt(&sql, &w.params()).await?;
        Ok(row.as_ref().map(Self::row_to_document))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> Result<u64, StoreError> {
        let client = self.get_client().await?;
        let mut w = SqlWriter::new();
        let patch = w.bind(Value::Object(strip_reserved(patch.clone())));
        let scope = Self::scoped(&mut w, collection, filter);
        let sql = format!(
            "UPDATE documents SET body = body || {patch}::jsonb, updated_at = NOW() WHERE {scope}"
        );
        Ok(client.execute(&sql, &w.params()).await?)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError> {
        let client = self.get_client().await?;
        let mut w = SqlWriter::new();
        let target = Self::first_match(&mut w, collection, filter);
        let sql = format!("DELETE FROM documents WHERE id = ({target}) RETURNING {DOCUMENT_COLUMNS}");
        let row = client.query_opt(&sql, &w.params()).await?;
        Ok(row.as_ref().map(Self::row_to_document))
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let client = self.get_client().await?;
        let mut w = SqlWriter::new();
        let scope = Self::scoped(&mut w, collection, filter);
        let sql = format!("DELETE FROM documents WHERE {scope}");
        Ok(client.execute(&sql, &w.params()).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let client = self.get_client().await?;
        client.execute("SELECT 1", &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn into_json_adds_metadata() {
        let t = Utc::now();
        let doc = Document {
            id: Uuid::nil(),
            body: json!({"name": "Hall A"}).as_object().cloned().unwrap(),
            created_at: t,
            updated_at: t,
        };
        let out = doc.into_json();
        assert_eq!(out["id"], json!(Uuid::nil().to_string()));
        assert_eq!(out["name"], json!("Hall A"));
        assert_eq!(out["createdAt"], json!(format_time(&t)));
    }

    #[test]
    fn strip_reserved_removes_store_keys() {
        let body = json!({"id": "x", "_id": "y", "createdAt": "z", "name": "n"});
        let body = strip_reserved(body.as_object().cloned().unwrap());
        assert_eq!(body.len(), 1);
        assert!(body.contains_key("name"));
    }

    #[test]
    fn batch_times_increase() {
        let times = batch_times(3);
        assert!(times[0] < times[1] && times[1] < times[2]);
    }

    #[test]
    fn order_by_appends_tiebreakers() {
        assert_eq!(
            order_by(&[SortSpec::desc("like")]),
            "body #> '{like}' DESC, created_at ASC, id ASC"
        );
    }
}
