//! BigQuery executor over the v2 REST API.
//!
//! Flow: `jobs.query` submits the statement; while the job reports
//! `jobComplete: false` the executor polls `jobs.getQueryResults`, then
//! follows `pageToken` until every row is fetched. Cell values arrive as
//! strings and are converted using the result schema's field types.
//!
//! Authentication is a bearer token taken from `BIGQUERY_ACCESS_TOKEN`
//! (for example the output of `gcloud auth print-access-token`).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use super::QueryExecutor;
use crate::config::AnalyticalConfig;
use crate::models::{QueryResult, Row};
use crate::readonly::ValidatedSql;
use crate::schema::Backend;
use crate::tenancy::TenancyContext;

/// Server-side wait per request, in milliseconds.
const POLL_WAIT_MS: u64 = 10_000;

pub struct BigQueryExecutor {
    http: reqwest::Client,
    endpoint: String,
    project: String,
    location: Option<String>,
    timeout: Duration,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type", default)]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

impl BigQueryExecutor {
    pub fn new(config: &AnalyticalConfig) -> Result<Self> {
        let token = std::env::var("BIGQUERY_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("BIGQUERY_ACCESS_TOKEN environment variable not set"))?;
        Self::with_token(config, token)
    }

    pub fn with_token(config: &AnalyticalConfig, token: impl Into<String>) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout + Duration::from_millis(POLL_WAIT_MS))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project: config.project.clone(),
            location: config.location.clone(),
            timeout,
            token: token.into(),
        })
    }

    async fn call(&self, builder: reqwest::RequestBuilder) -> Result<QueryResponse> {
        let response = builder
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("BigQuery request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("BigQuery API error {}: {}", status, body_text);
        }
        Ok(response.json().await?)
    }

    async fn get_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let mut params = vec![("timeoutMs", POLL_WAIT_MS.to_string())];
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let url = format!(
            "{}/projects/{}/queries/{}",
            self.endpoint, self.project, job.job_id
        );
        self.call(self.http.get(url).query(&params)).await
    }
}

#[async_trait]
impl QueryExecutor for BigQueryExecutor {
    fn backend(&self) -> Backend {
        Backend::Analytical
    }

    async fn execute(&self, ctx: &TenancyContext, sql: &ValidatedSql) -> Result<QueryResult> {
        let start = Instant::now();
        let deadline = start + self.timeout;

        let mut body = json!({
            "query": sql.as_str(),
            "useLegacySql": false,
            "timeoutMs": POLL_WAIT_MS,
        });
        if let Some(location) = &self.location {
            body["location"] = Value::String(location.clone());
        }

        let url = format!("{}/projects/{}/queries", self.endpoint, self.project);
        let mut response = self.call(self.http.post(url).json(&body)).await?;

        let job = response
            .job_reference
            .take()
            .ok_or_else(|| anyhow::anyhow!("BigQuery response has no jobReference"))?;

        while !response.job_complete {
            if Instant::now() >= deadline {
                bail!(
                    "BigQuery job {} did not complete within {}s",
                    job.job_id,
                    self.timeout.as_secs()
                );
            }
            tracing::debug!(job_id = %job.job_id, "waiting for bigquery job");
            response = self.get_results(&job, None).await?;
        }

        let fields = response
            .schema
            .take()
            .map(|s| s.fields)
            .unwrap_or_default();
        let mut result = convert_rows(&fields, std::mem::take(&mut response.rows));

        while let Some(token) = response.page_token.take() {
            response = self.get_results(&job, Some(&token)).await?;
            result.extend(convert_rows(&fields, std::mem::take(&mut response.rows)));
        }

        tracing::info!(
            backend = "bigquery",
            tenant_id = ctx.tenant_id(),
            job_id = %job.job_id,
            rows = result.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "query executed"
        );
        Ok(result)
    }
}

fn convert_rows(fields: &[FieldSchema], rows: Vec<TableRow>) -> QueryResult {
    rows.into_iter()
        .map(|row| {
            let mut out = Row::new();
            for (field, cell) in fields.iter().zip(row.f) {
                out.insert(field.name.clone(), convert_cell(field, cell.v));
            }
            out
        })
        .collect()
}

/// Convert a BigQuery cell to a JSON scalar.
///
/// Repeated and record fields are passed through in their wire form.
fn convert_cell(field: &FieldSchema, value: Value) -> Value {
    if field.mode.as_deref() == Some("REPEATED") {
        return value;
    }
    let Value::String(text) = value else {
        return value;
    };

    match field.field_type.as_str() {
        "INTEGER" | "INT64" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(text)),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => text
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::from)
            .unwrap_or(Value::String(text)),
        "BOOLEAN" | "BOOL" => Value::Bool(text.eq_ignore_ascii_case("true")),
        "TIMESTAMP" => text
            .parse::<f64>()
            .ok()
            .and_then(|secs| {
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9).round() as u32;
                chrono::DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
            })
            .map(|dt| Value::String(dt.to_rfc3339()))
            .unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}
