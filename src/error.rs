//! Stage-tagged error taxonomy for the answering pipeline.
//!
//! Collaborators (LLM clients, executors, indexes) return `anyhow::Result`.
//! The orchestrator maps each failure into an [`AskError`] variant that
//! records which pipeline [`Stage`] failed, so callers can both log the
//! cause and pick a safe message for the end user.

use std::fmt;

use thiserror::Error;

/// Pipeline stage in which a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Classifying,
    GeneratingSql,
    Validating,
    Executing,
    Summarizing,
    Embedding,
    Searching,
    Composing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::Classifying => "classifying",
            Stage::GeneratingSql => "generating_sql",
            Stage::Validating => "validating",
            Stage::Executing => "executing",
            Stage::Summarizing => "summarizing",
            Stage::Embedding => "embedding",
            Stage::Searching => "searching",
            Stage::Composing => "composing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single `ask` request.
///
/// `Display` output is safe to log but is not meant for end users; use
/// [`AskError::user_message`] for that. In particular the rejected SQL of
/// [`AskError::ValidationRejected`] is only reachable through the field,
/// never through `Display`.
#[derive(Error, Debug)]
pub enum AskError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("tenancy violation: {0}")]
    TenancyViolation(String),

    #[error("intent classification failed: {0:#}")]
    Classification(#[source] anyhow::Error),

    /// The model call failed, or its output held no SQL statement.
    #[error("SQL generation failed: {0:#}")]
    Generation(#[source] anyhow::Error),

    #[error("generated SQL was rejected by the read-only gate")]
    ValidationRejected { sql: String },

    #[error("query execution failed: {0:#}")]
    Execution(#[source] anyhow::Error),

    #[error("result summarization failed: {0:#}")]
    Summarization(#[source] anyhow::Error),

    #[error("embedding failed: {0:#}")]
    Embedding(#[source] anyhow::Error),

    #[error("vector search failed: {0:#}")]
    Retrieval(#[source] anyhow::Error),

    #[error("answer composition failed: {0:#}")]
    Composition(#[source] anyhow::Error),
}

impl AskError {
    /// The stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            AskError::InvalidRequest(_) | AskError::TenancyViolation(_) => Stage::Start,
            AskError::Classification(_) => Stage::Classifying,
            AskError::Generation(_) => Stage::GeneratingSql,
            AskError::ValidationRejected { .. } => Stage::Validating,
            AskError::Execution(_) => Stage::Executing,
            AskError::Summarization(_) => Stage::Summarizing,
            AskError::Embedding(_) => Stage::Embedding,
            AskError::Retrieval(_) => Stage::Searching,
            AskError::Composition(_) => Stage::Composing,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AskError::InvalidRequest(_) => "invalid_request",
            AskError::TenancyViolation(_) => "tenancy_violation",
            AskError::Classification(_) => "classification_failed",
            AskError::Generation(_) => "generation_failed",
            AskError::ValidationRejected { .. } => "validation_rejected",
            AskError::Execution(_) => "execution_failed",
            AskError::Summarization(_) => "summarization_failed",
            AskError::Embedding(_) => "embedding_failed",
            AskError::Retrieval(_) => "retrieval_failed",
            AskError::Composition(_) => "composition_failed",
        }
    }

    /// Message suitable for the person who asked the question.
    pub fn user_message(&self) -> &'static str {
        match self {
            AskError::InvalidRequest(_) => "The question could not be processed.",
            AskError::TenancyViolation(_) => "This request is not associated with a tenant.",
            AskError::Classification(_) => "I could not understand what kind of question this is.",
            AskError::Generation(_) => "I could not generate a query to answer this question.",
            AskError::ValidationRejected { .. } => {
                "I cannot answer this question with a safe, read-only query."
            }
            AskError::Execution(_) => "The query could not be run against the database.",
            AskError::Summarization(_) => "The query ran but its results could not be summarized.",
            AskError::Embedding(_) | AskError::Retrieval(_) => {
                "The document search is currently unavailable."
            }
            AskError::Composition(_) => "An answer could not be composed from the documents found.",
        }
    }
}
