#[cfg(any(test, feature = "test-utils"))]
use std::collections::HashMap;
#[cfg(any(test, feature = "test-utils"))]
use std::sync::Arc;

#[cfg(any(test, feature = "test-utils"))]
use tokio::sync::Mutex;

use crate::bail;
use crate::db::base::Database;
use crate::db::memory::MemoryDatabase;
use crate::db::postgres::PgDatabase;
use crate::error::{ErrorKind, TapsResult};
use crate::types::{Cell, IndexDefinition, TableRow, TableSchema};
use crate::url::safe_url;

#[cfg(any(test, feature = "test-utils"))]
const MEMORY_SCHEME: &str = "memory://";

/// Any database adapter reachable through a URL.
#[derive(Debug, Clone)]
pub enum AnyDatabase {
    Postgres(PgDatabase),
    Memory(MemoryDatabase),
}

impl AnyDatabase {
    /// Releases pooled connections. Memory databases are left untouched.
    pub async fn close(&self) {
        if let AnyDatabase::Postgres(db) = self {
            db.close().await;
        }
    }

    /// Checks that the database can be reached.
    pub async fn ping(&self) -> TapsResult<()> {
        match self {
            AnyDatabase::Postgres(db) => db.ping().await,
            AnyDatabase::Memory(_) => Ok(()),
        }
    }
}

/// Resolves database URLs to adapters.
///
/// `postgres://` and `postgresql://` URLs open a lazy PostgreSQL pool. With the
/// `test-utils` feature, `memory://<name>` URLs resolve to in-memory databases shared by
/// name for the lifetime of the connector.
#[derive(Debug, Clone, Default)]
pub struct Connector {
    #[cfg(any(test, feature = "test-utils"))]
    memory: Arc<Mutex<HashMap<String, MemoryDatabase>>>,
}

impl Connector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `db` reachable as `memory://<name>`.
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn register_memory(&self, name: &str, db: MemoryDatabase) {
        self.memory.lock().await.insert(name.to_string(), db);
    }

    pub async fn connect(&self, url: &str) -> TapsResult<AnyDatabase> {
        if let Some(db) = self.connect_memory(url).await {
            return Ok(AnyDatabase::Memory(db));
        }

        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(AnyDatabase::Postgres(PgDatabase::connect_lazy(url)?));
        }

        bail!(
            ErrorKind::ConfigError,
            "Unsupported database URL",
            safe_url(url)
        )
    }

    #[cfg(any(test, feature = "test-utils"))]
    async fn connect_memory(&self, url: &str) -> Option<MemoryDatabase> {
        let name = url.strip_prefix(MEMORY_SCHEME)?;
        let mut memory = self.memory.lock().await;

        Some(memory.entry(name.to_string()).or_default().clone())
    }

    #[cfg(not(any(test, feature = "test-utils")))]
    async fn connect_memory(&self, _url: &str) -> Option<MemoryDatabase> {
        None
    }
}

impl Database for AnyDatabase {
    async fn table_names(&self) -> TapsResult<Vec<String>> {
        match self {
            AnyDatabase::Postgres(db) => db.table_names().await,
            AnyDatabase::Memory(db) => db.table_names().await,
        }
    }

    async fn table_schema(&self, table: &str) -> TapsResult<TableSchema> {
        match self {
            AnyDatabase::Postgres(db) => db.table_schema(table).await,
            AnyDatabase::Memory(db) => db.table_schema(table).await,
        }
    }

    async fn count_rows(&self, table: &str) -> TapsResult<u64> {
        match self {
            AnyDatabase::Postgres(db) => db.count_rows(table).await,
            AnyDatabase::Memory(db) => db.count_rows(table).await,
        }
    }

    async fn fetch_rows_by_offset(
        &self,
        schema: &TableSchema,
        order_by: &[String],
        offset: u64,
        limit: usize,
    ) -> TapsResult<Vec<TableRow>> {
        match self {
            AnyDatabase::Postgres(db) => {
                db.fetch_rows_by_offset(schema, order_by, offset, limit).await
            }
            AnyDatabase::Memory(db) => {
                db.fetch_rows_by_offset(schema, order_by, offset, limit).await
            }
        }
    }

    async fn fetch_rows_after_key(
        &self,
        schema: &TableSchema,
        key: &str,
        after: Option<i64>,
        limit: usize,
    ) -> TapsResult<Vec<TableRow>> {
        match self {
            AnyDatabase::Postgres(db) => db.fetch_rows_after_key(schema, key, after, limit).await,
            AnyDatabase::Memory(db) => db.fetch_rows_after_key(schema, key, after, limit).await,
        }
    }

    async fn max_key(&self, table: &str, key: &str) -> TapsResult<Option<i64>> {
        match self {
            AnyDatabase::Postgres(db) => db.max_key(table, key).await,
            AnyDatabase::Memory(db) => db.max_key(table, key).await,
        }
    }

    async fn insert_rows(
        &self,
        table: &str,
        header: &[String],
        rows: &[Vec<Cell>],
    ) -> TapsResult<()> {
        match self {
            AnyDatabase::Postgres(db) => db.insert_rows(table, header, rows).await,
            AnyDatabase::Memory(db) => db.insert_rows(table, header, rows).await,
        }
    }

    async fn load_schema(&self, schema: &TableSchema) -> TapsResult<()> {
        match self {
            AnyDatabase::Postgres(db) => db.load_schema(schema).await,
            AnyDatabase::Memory(db) => db.load_schema(schema).await,
        }
    }

    async fn dump_indexes(&self) -> TapsResult<Vec<IndexDefinition>> {
        match self {
            AnyDatabase::Postgres(db) => db.dump_indexes().await,
            AnyDatabase::Memory(db) => db.dump_indexes().await,
        }
    }

    async fn load_indexes(&self, indexes: &[IndexDefinition]) -> TapsResult<()> {
        match self {
            AnyDatabase::Postgres(db) => db.load_indexes(indexes).await,
            AnyDatabase::Memory(db) => db.load_indexes(indexes).await,
        }
    }

    async fn reset_sequences(&self) -> TapsResult<()> {
        match self {
            AnyDatabase::Postgres(db) => db.reset_sequences().await,
            AnyDatabase::Memory(db) => db.reset_sequences().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_urls_share_databases_by_name() {
        let connector = Connector::new();
        let db = MemoryDatabase::new();
        db.load_schema(&TableSchema::new("a", vec![])).await.unwrap();
        connector.register_memory("source", db).await;

        let AnyDatabase::Memory(resolved) = connector.connect("memory://source").await.unwrap()
        else {
            panic!("expected a memory database");
        };
        assert_eq!(resolved.table_names().await.unwrap(), vec!["a".to_string()]);

        let AnyDatabase::Memory(other) = connector.connect("memory://other").await.unwrap() else {
            panic!("expected a memory database");
        };
        assert!(other.table_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_schemes_are_rejected() {
        let err = Connector::new()
            .connect("mysql://user:pw@host/db")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert!(err.detail().unwrap().contains("[hidden]"));
    }
}
