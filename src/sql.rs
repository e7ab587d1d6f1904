//! Text-to-SQL generation.
//!
//! [`draft_sql`] asks the model for a statement and extracts it;
//! [`gate_candidate`] runs the extracted statement through the read-only
//! gate and logs any rejection with the SQL. [`generate_sql`] chains the two
//! for callers that do not need to tell an extraction failure from a
//! rejection.

use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;

use crate::llm::{complete_text, ChatMessage, CompletionClient, CompletionRequest};
use crate::readonly::{check_read_only, Rejection, ValidatedSql};

/// Default row cap the model is told to apply.
pub const DEFAULT_ROW_LIMIT: usize = 100;

const SYSTEM_PROMPT: &str = "\
You are a SQL expert. Given a natural language question and database schema context, \
generate a safe, read-only SQL query to answer the question.

Rules:
1. ONLY generate SELECT statements (common table expressions starting with WITH are allowed). \
Never generate INSERT, UPDATE, DELETE, DROP, ALTER, CREATE, TRUNCATE, or any DDL/DML.
2. Always include a WHERE clause for tenant_id = {tenant_literal} if the table has a \
tenant_id column.
3. Use column aliases to make results readable.
4. Limit results to {row_limit} rows unless the user explicitly asks for more.
5. Return ONLY the SQL query, wrapped in a ```sql ... ``` code block. No explanation.";

static FENCED_SQL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```sql\s*\n?(.*?)```").unwrap());

static BARE_SELECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)(SELECT\s.+)").unwrap());

/// Model output and the statement extracted from it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlCandidate {
    pub raw_text: String,
    pub extracted_statement: Option<String>,
}

/// Quote a value as a SQL string literal.
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// System instruction with the caller's tenant embedded as a literal.
pub fn system_prompt(tenant_id: &str) -> String {
    SYSTEM_PROMPT
        .replace("{tenant_literal}", &sql_literal(tenant_id))
        .replace("{row_limit}", &DEFAULT_ROW_LIMIT.to_string())
}

/// Pull a statement out of a model response.
///
/// Prefers the body of a ```sql fenced block; otherwise takes everything
/// from the first `SELECT` token. Returns `None` when neither is present.
pub fn extract_sql(response: &str) -> Option<String> {
    if let Some(cap) = FENCED_SQL.captures(response) {
        return Some(cap[1].trim().to_string());
    }
    BARE_SELECT
        .captures(response)
        .map(|cap| cap[1].trim().to_string())
}

/// Ask the model for a statement and extract it, without validating.
pub async fn draft_sql(
    client: &dyn CompletionClient,
    model: &str,
    question: &str,
    schema_context: &str,
    tenant_id: &str,
) -> Result<SqlCandidate> {
    let request = CompletionRequest::new(
        model,
        vec![
            ChatMessage::system(system_prompt(tenant_id)),
            ChatMessage::user(format!(
                "Schema:\n{}\n\nQuestion: {}",
                schema_context, question
            )),
        ],
    )
    .temperature(0.0);

    let raw_text = complete_text(client, &request).await?;
    let extracted_statement = extract_sql(&raw_text);
    if extracted_statement.is_none() {
        tracing::warn!(question, response = %raw_text, "sql generation failed: no statement found");
    }

    Ok(SqlCandidate {
        raw_text,
        extracted_statement,
    })
}

/// Why a draft produced no runnable statement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("no SQL statement found in the model response")]
    NoStatement,
    #[error("{reason}")]
    Rejected { sql: String, reason: Rejection },
}

/// Pass a candidate through the read-only gate.
///
/// Every rejection is logged at `error` with the offending SQL here, so
/// callers must not log it again.
pub fn gate_candidate(candidate: SqlCandidate) -> Result<ValidatedSql, GateError> {
    let sql = candidate.extracted_statement.ok_or(GateError::NoStatement)?;
    match check_read_only(&sql) {
        Ok(validated) => {
            tracing::info!(sql = %validated, "sql generated");
            Ok(validated)
        }
        Err(reason) => {
            tracing::error!(sql = %sql, %reason, "sql rejected by read-only gate");
            Err(GateError::Rejected { sql, reason })
        }
    }
}

/// Generate a statement and pass it through the read-only gate.
///
/// `Ok(None)` means either nothing could be extracted or the statement was
/// rejected.
pub async fn generate_sql(
    client: &dyn CompletionClient,
    model: &str,
    question: &str,
    schema_context: &str,
    tenant_id: &str,
) -> Result<Option<ValidatedSql>> {
    let candidate = draft_sql(client, model, question, schema_context, tenant_id).await?;
    Ok(gate_candidate(candidate).ok())
}
