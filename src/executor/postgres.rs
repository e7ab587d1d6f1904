//! Postgres executor.
//!
//! Each statement runs in its own transaction that is marked
//! `READ ONLY` before the statement and rolled back afterwards. The
//! caller's tenant is published as the transaction-local setting
//! `app.current_tenant` for row-level security policies to use.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::time::Instant;

use super::QueryExecutor;
use crate::models::{QueryResult, Row};
use crate::readonly::ValidatedSql;
use crate::schema::Backend;
use crate::tenancy::TenancyContext;

/// Statements run before the caller's statement, in order. The second
/// binds the tenant id as `$1`.
const SESSION_PREAMBLE: [&str; 2] = [
    "SET TRANSACTION READ ONLY",
    "SELECT set_config('app.current_tenant', $1, true)",
];

pub struct PostgresExecutor {
    pool: PgPool,
}

impl PostgresExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryExecutor for PostgresExecutor {
    fn backend(&self) -> Backend {
        Backend::Relational
    }

    async fn execute(&self, ctx: &TenancyContext, sql: &ValidatedSql) -> Result<QueryResult> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;

        let [read_only, set_tenant] = SESSION_PREAMBLE;
        sqlx::query(read_only).execute(&mut *tx).await?;
        sqlx::query(set_tenant)
            .bind(ctx.tenant_id())
            .execute(&mut *tx)
            .await?;

        let fetched = sqlx::query(sql.as_str()).fetch_all(&mut *tx).await;
        tx.rollback().await?;
        let rows = fetched.context("Postgres query failed")?;

        let result = rows.iter().map(decode_row).collect::<Result<QueryResult>>()?;
        tracing::info!(
            backend = "postgres",
            tenant_id = ctx.tenant_id(),
            rows = result.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "query executed"
        );
        Ok(result)
    }
}

fn decode_row(row: &PgRow) -> Result<Row> {
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
        out.insert(column.name().to_string(), decode_value(row, i, &type_name)?);
    }
    Ok(out)
}

fn decode_value(row: &PgRow, i: usize, type_name: &str) -> Result<Value> {
    let value = match type_name {
        "BOOL" => Value::from(row.try_get::<bool, _>(i)?),
        "INT2" => Value::from(row.try_get::<i16, _>(i)?),
        "INT4" => Value::from(row.try_get::<i32, _>(i)?),
        "INT8" => Value::from(row.try_get::<i64, _>(i)?),
        "FLOAT4" => Value::from(row.try_get::<f32, _>(i)? as f64),
        "FLOAT8" => Value::from(row.try_get::<f64, _>(i)?),
        "NUMERIC" => {
            let text = row.try_get::<sqlx::types::BigDecimal, _>(i)?.to_string();
            match text.parse::<f64>() {
                Ok(f) if f.is_finite() => Value::from(f),
                _ => Value::String(text),
            }
        }
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            Value::String(row.try_get::<String, _>(i)?)
        }
        "UUID" => Value::String(row.try_get::<sqlx::types::Uuid, _>(i)?.to_string()),
        "TIMESTAMPTZ" => Value::String(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(i)?
                .to_rfc3339(),
        ),
        "TIMESTAMP" => Value::String(row.try_get::<chrono::NaiveDateTime, _>(i)?.to_string()),
        "DATE" => Value::String(row.try_get::<chrono::NaiveDate, _>(i)?.to_string()),
        "TIME" => Value::String(row.try_get::<chrono::NaiveTime, _>(i)?.to_string()),
        "INTERVAL" => Value::String(format_interval(&row.try_get::<PgInterval, _>(i)?)),
        "JSON" | "JSONB" => row.try_get::<Value, _>(i)?,
        "BOOL[]" => Value::from(row.try_get::<Vec<bool>, _>(i)?),
        "INT2[]" => Value::from(row.try_get::<Vec<i16>, _>(i)?),
        "INT4[]" => Value::from(row.try_get::<Vec<i32>, _>(i)?),
        "INT8[]" => Value::from(row.try_get::<Vec<i64>, _>(i)?),
        "FLOAT8[]" => Value::from(row.try_get::<Vec<f64>, _>(i)?),
        "TEXT[]" | "VARCHAR[]" | "NAME[]" => Value::from(row.try_get::<Vec<String>, _>(i)?),
        other => match row.try_get::<String, _>(i) {
            Ok(s) => Value::String(s),
            Err(_) => bail!(
                "column {} has unsupported type {}; cast it to text in the query",
                i,
                other
            ),
        },
    };
    Ok(value)
}

/// ISO 8601 duration, e.g. `P1M2DT3.5S`.
fn format_interval(interval: &PgInterval) -> String {
    let seconds = interval.microseconds as f64 / 1_000_000.0;
    format!("P{}M{}DT{}S", interval.months, interval.days, seconds)
}
