use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::RelationalConfig;

/// Whether a relational URL points at SQLite.
pub fn is_sqlite_url(url: &str) -> bool {
    url.starts_with("sqlite:")
}

pub async fn connect_postgres(config: &RelationalConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.url)
        .await
        .context("Failed to connect to Postgres")?;

    Ok(pool)
}

/// Open a SQLite pool that cannot write.
///
/// The file is opened read-only and every connection runs with
/// `query_only` set, so even a statement that slipped past the read-only
/// gate fails inside SQLite.
pub async fn connect_sqlite_read_only(config: &RelationalConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .read_only(true)
        .pragma("query_only", "ON");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open SQLite database {}", config.url))?;

    Ok(pool)
}
