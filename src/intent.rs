//! Intent classification: structured (SQL) or unstructured (documents).

use anyhow::Result;
use serde::Serialize;
use std::fmt;

use crate::llm::{complete_text, ChatMessage, CompletionClient, CompletionRequest};

const CLASSIFICATION_PROMPT: &str = "\
You are an intent classifier for a backoffice intelligence system.
Classify the user's query into one of two categories:

- STRUCTURED: Questions that can be answered by querying databases (SQL). \
These involve metrics, counts, aggregations, specific records, financial data, \
user statistics, or any quantitative data from structured tables.

- UNSTRUCTURED: Questions that require searching through documents, wikis, \
tickets, conversations, or code. These involve processes, documentation, \
how-to questions, historical context, or qualitative information.

Respond with ONLY the word STRUCTURED or UNSTRUCTURED, nothing else.";

/// Route a question takes through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Structured,
    Unstructured,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Structured => f.write_str("structured"),
            Intent::Unstructured => f.write_str("unstructured"),
        }
    }
}

/// Map a raw model response to an intent.
///
/// Anything that is not recognisably `STRUCTURED` routes to
/// [`Intent::Unstructured`], so a confused model never lands on the SQL path.
pub fn parse_intent(response: &str) -> Intent {
    let normalized = response.trim().to_uppercase();
    if normalized.starts_with("UNSTRUCTURED") {
        Intent::Unstructured
    } else if normalized.starts_with("STRUCTURED") {
        Intent::Structured
    } else {
        Intent::Unstructured
    }
}

/// Classify a question with one deterministic completion call.
pub async fn classify(client: &dyn CompletionClient, model: &str, question: &str) -> Result<Intent> {
    let request = CompletionRequest::new(
        model,
        vec![
            ChatMessage::system(CLASSIFICATION_PROMPT),
            ChatMessage::user(question),
        ],
    )
    .temperature(0.0)
    .max_tokens(20);

    let response = complete_text(client, &request).await?;
    let intent = parse_intent(&response);
    tracing::debug!(%intent, raw = %response.trim(), "intent classified");
    Ok(intent)
}
