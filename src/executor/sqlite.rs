//! SQLite executor for local deployments.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::time::Instant;

use super::QueryExecutor;
use crate::models::{QueryResult, Row};
use crate::readonly::ValidatedSql;
use crate::schema::Backend;
use crate::tenancy::TenancyContext;

/// Runs statements on a pool from [`crate::db::connect_sqlite_read_only`].
pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    fn backend(&self) -> Backend {
        Backend::Relational
    }

    async fn execute(&self, ctx: &TenancyContext, sql: &ValidatedSql) -> Result<QueryResult> {
        let start = Instant::now();
        let rows = sqlx::query(sql.as_str())
            .fetch_all(&self.pool)
            .await
            .context("SQLite query failed")?;

        let result = rows.iter().map(decode_row).collect::<Result<QueryResult>>()?;
        tracing::info!(
            backend = "sqlite",
            tenant_id = ctx.tenant_id(),
            rows = result.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "query executed"
        );
        Ok(result)
    }
}

fn decode_row(row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let type_name = {
            let raw = row.try_get_raw(i)?;
            if raw.is_null() {
                out.insert(column.name().to_string(), Value::Null);
                continue;
            }
            raw.type_info().name().to_string()
        };

        let value = match type_name.as_str() {
            "INTEGER" => Value::from(row.try_get::<i64, _>(i)?),
            "REAL" => Value::from(row.try_get::<f64, _>(i)?),
            "BLOB" => {
                let bytes = row.try_get::<Vec<u8>, _>(i)?;
                Value::String(format!("<{} bytes>", bytes.len()))
            }
            _ => {
                if let Ok(s) = row.try_get::<String, _>(i) {
                    Value::String(s)
                } else if let Ok(n) = row.try_get::<i64, _>(i) {
                    Value::from(n)
                } else {
                    Value::from(row.try_get::<f64, _>(i)?)
                }
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelationalConfig;
    use crate::db::connect_sqlite_read_only;
    use crate::readonly::validate_read_only;

    async fn seeded_db() -> (tempfile::TempDir, SqliteExecutor) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("app.db");
        let url = format!("sqlite:{}", path.display());

        {
            let options = url
                .parse::<sqlx::sqlite::SqliteConnectOptions>()
                .unwrap()
                .create_if_missing(true);
            let pool = SqlitePool::connect_with(options).await.unwrap();
            sqlx::query(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT, tenant_id TEXT, score REAL, note TEXT)",
            )
            .execute(&pool)
            .await
            .unwrap();
            sqlx::query(
                "INSERT INTO users (email, tenant_id, score, note) VALUES
                 ('a@acme.io', 'acme', 4.5, NULL),
                 ('b@acme.io', 'acme', 3.0, 'vip'),
                 ('c@other.io', 'other', 1.0, NULL)",
            )
            .execute(&pool)
            .await
            .unwrap();
            pool.close().await;
        }

        let pool = connect_sqlite_read_only(&RelationalConfig {
            url,
            max_connections: 1,
        })
        .await
        .unwrap();
        (tmp, SqliteExecutor::new(pool))
    }

    #[tokio::test]
    async fn test_rows_keep_column_order_and_types() {
        let (_tmp, executor) = seeded_db().await;
        let ctx = TenancyContext::new("acme", "u1", Vec::<String>::new()).unwrap();
        let sql = validate_read_only(
            "SELECT email, score, note, id FROM users WHERE tenant_id = 'acme' ORDER BY id",
        )
        .unwrap();

        let rows = executor.execute(&ctx, &sql).await.unwrap();
        assert_eq!(rows.len(), 2);
        let columns: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(columns, vec!["email", "score", "note", "id"]);
        assert_eq!(rows[0]["email"], "a@acme.io");
        assert_eq!(rows[0]["score"], 4.5);
        assert_eq!(rows[0]["note"], Value::Null);
        assert_eq!(rows[1]["note"], "vip");
        assert_eq!(rows[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_aggregate_query() {
        let (_tmp, executor) = seeded_db().await;
        let ctx = TenancyContext::new("acme", "u1", Vec::<String>::new()).unwrap();
        let sql = validate_read_only("SELECT count(*) AS user_count FROM users WHERE tenant_id = 'acme'")
            .unwrap();
        let rows = executor.execute(&ctx, &sql).await.unwrap();
        assert_eq!(rows[0]["user_count"], 2);
    }

    #[tokio::test]
    async fn test_write_refused_even_without_gate() {
        let (_tmp, executor) = seeded_db().await;
        let ctx = TenancyContext::new("acme", "u1", Vec::<String>::new()).unwrap();

        let sql = ValidatedSql::unchecked("DELETE FROM users");
        assert!(executor.execute(&ctx, &sql).await.is_err());

        let check = validate_read_only("SELECT count(*) AS n FROM users").unwrap();
        let rows = executor.execute(&ctx, &check).await.unwrap();
        assert_eq!(rows[0]["n"], 3);
    }

    #[tokio::test]
    async fn test_bad_sql_is_error() {
        let (_tmp, executor) = seeded_db().await;
        let ctx = TenancyContext::new("acme", "u1", Vec::<String>::new()).unwrap();
        let sql = validate_read_only("SELECT * FROM missing_table").unwrap();
        assert!(executor.execute(&ctx, &sql).await.is_err());
    }
}
