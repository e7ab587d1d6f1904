//! Query execution against relational and analytical backends.
//!
//! A [`QueryExecutor`] only accepts [`ValidatedSql`], so nothing that
//! skipped the read-only gate can be executed. Each executor also enforces
//! read-only behavior on its own side (a read-only transaction for
//! Postgres, a read-only handle for SQLite).
//!
//! [`Executors`] holds at most one executor per [`Backend`] and is looked
//! up by tag.

pub mod bigquery;
pub mod postgres;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::DatabasesConfig;
use crate::db;
use crate::models::QueryResult;
use crate::readonly::ValidatedSql;
use crate::schema::Backend;
use crate::tenancy::TenancyContext;

/// Runs validated statements on one backend.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// The backend this executor serves.
    fn backend(&self) -> Backend;

    /// Run a statement and return every row, in backend order.
    ///
    /// On failure no rows are returned.
    async fn execute(&self, ctx: &TenancyContext, sql: &ValidatedSql) -> Result<QueryResult>;
}

/// Executors keyed by backend.
#[derive(Clone, Default)]
pub struct Executors {
    by_backend: BTreeMap<Backend, Arc<dyn QueryExecutor>>,
}

impl Executors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an executor, replacing any previous one for the same backend.
    pub fn register(&mut self, executor: Arc<dyn QueryExecutor>) {
        self.by_backend.insert(executor.backend(), executor);
    }

    pub fn with(mut self, executor: Arc<dyn QueryExecutor>) -> Self {
        self.register(executor);
        self
    }

    pub fn get(&self, backend: Backend) -> Option<&Arc<dyn QueryExecutor>> {
        self.by_backend.get(&backend)
    }

    pub fn backends(&self) -> Vec<Backend> {
        self.by_backend.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_backend.is_empty()
    }

    /// Connect every configured database.
    pub async fn connect(config: &DatabasesConfig) -> Result<Self> {
        let mut executors = Self::new();

        if let Some(rel) = &config.relational {
            if db::is_sqlite_url(&rel.url) {
                let pool = db::connect_sqlite_read_only(rel).await?;
                executors.register(Arc::new(sqlite::SqliteExecutor::new(pool)));
            } else {
                let pool = db::connect_postgres(rel).await?;
                executors.register(Arc::new(postgres::PostgresExecutor::new(pool)));
            }
        }

        if let Some(an) = &config.analytical {
            executors.register(Arc::new(bigquery::BigQueryExecutor::new(an)?));
        }

        tracing::info!(backends = ?executors.backends(), "query executors ready");
        Ok(executors)
    }
}
