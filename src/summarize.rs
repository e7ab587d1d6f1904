//! Natural-language summaries of query results.

use anyhow::Result;

use crate::llm::{complete_text, ChatMessage, CompletionClient, CompletionRequest};
use crate::models::QueryResult;

/// Reply for an empty result set. No model call is made.
pub const NO_RESULTS: &str = "The query returned no results.";

/// Rows shown to the model; the rest are only counted.
pub const MAX_PROMPT_ROWS: usize = 20;

const SUMMARIZE_PROMPT: &str = "\
You are a helpful data analyst. Given the original question and query results, \
provide a clear, concise summary in natural language.

- If the results are empty, say so clearly.
- If there are numbers, present them formatted nicely.
- Keep the summary brief (2-4 sentences).
- Do not include raw SQL or JSON in your response.";

/// Render rows for the prompt: the first [`MAX_PROMPT_ROWS`] as pretty
/// JSON, plus a count of the omitted remainder.
pub fn render_rows(rows: &QueryResult) -> Result<String> {
    let shown = &rows[..rows.len().min(MAX_PROMPT_ROWS)];
    let mut text = serde_json::to_string_pretty(shown)?;
    if rows.len() > MAX_PROMPT_ROWS {
        text.push_str(&format!("\n... and {} more rows", rows.len() - MAX_PROMPT_ROWS));
    }
    Ok(text)
}

pub async fn summarize(
    client: &dyn CompletionClient,
    model: &str,
    question: &str,
    rows: &QueryResult,
    sql: &str,
) -> Result<String> {
    if rows.is_empty() {
        return Ok(NO_RESULTS.to_string());
    }

    let user = format!(
        "Question: {}\n\nSQL executed: {}\n\nResults ({} rows):\n{}",
        question,
        sql,
        rows.len(),
        render_rows(rows)?
    );
    let request = CompletionRequest::new(
        model,
        vec![ChatMessage::system(SUMMARIZE_PROMPT), ChatMessage::user(user)],
    )
    .temperature(0.2);

    complete_text(client, &request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Row;
    use crate::test_support::ScriptedClient;
    use serde_json::json;

    fn rows(n: usize) -> QueryResult {
        (0..n)
            .map(|i| {
                let mut row = Row::new();
                row.insert("id".to_string(), json!(i));
                row
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_results_skip_model() {
        let client = ScriptedClient::silent();
        let text = summarize(&client, "m", "How many?", &Vec::new(), "SELECT 1")
            .await
            .unwrap();
        assert_eq!(text, NO_RESULTS);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_summary_prompt() {
        let client = ScriptedClient::new(["There are 42 users."]);
        let mut row = Row::new();
        row.insert("user_count".to_string(), json!(42));

        let text = summarize(
            &client,
            "m",
            "How many users?",
            &vec![row],
            "SELECT count(*) AS user_count FROM users",
        )
        .await
        .unwrap();
        assert_eq!(text, "There are 42 users.");

        let request = &client.requests()[0];
        assert_eq!(request.temperature, 0.2);
        let user = &request.messages[1].content;
        assert!(user.starts_with("Question: How many users?\n\nSQL executed: SELECT count(*)"));
        assert!(user.contains("Results (1 rows):"));
        assert!(user.contains("\"user_count\": 42"));
    }

    #[test]
    fn test_render_truncates_after_twenty_rows() {
        let text = render_rows(&rows(25)).unwrap();
        assert!(text.ends_with("\n... and 5 more rows"));
        assert!(text.contains("\"id\": 19"));
        assert!(!text.contains("\"id\": 20"));

        let text = render_rows(&rows(20)).unwrap();
        assert!(!text.contains("more rows"));
    }
}
