//! Per-request answering state machine.
//!
//! ```text
//! START → CLASSIFYING ─┬─ GENERATING_SQL → VALIDATING → EXECUTING → SUMMARIZING ─┬→ DONE
//!                      └─ EMBEDDING → SEARCHING → COMPOSING ──────────────────────┘
//! any non-terminal state → FAILED
//! ```
//!
//! Transitions only move forward. Every stage failure is terminal for the
//! request and comes back as an [`AskError`] naming the stage. A statement
//! reaches an executor only as a [`ValidatedSql`](crate::readonly::ValidatedSql),
//! and every search runs under a [`PassageFilter`] built from the caller's
//! [`TenancyContext`].

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{Config, LlmConfig};
use crate::embedding::{create_embedder, embed_query, Embedder};
use crate::error::AskError;
use crate::executor::Executors;
use crate::index::{create_index, PassageFilter, VectorIndex};
use crate::intent::{classify, Intent};
use crate::llm::{create_client, CompletionClient};
use crate::models::Answer;
use crate::rag::{self, DEFAULT_TOP_K};
use crate::schema::{Backend, SchemaCatalog};
use crate::sql::{draft_sql, gate_candidate, GateError};
use crate::summarize::summarize;
use crate::tenancy::TenancyContext;

/// Position of a request in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Start,
    Classifying,
    GeneratingSql,
    Validating,
    Executing,
    Summarizing,
    Embedding,
    Searching,
    Composing,
    Done,
    Failed,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Start => "START",
            State::Classifying => "CLASSIFYING",
            State::GeneratingSql => "GENERATING_SQL",
            State::Validating => "VALIDATING",
            State::Executing => "EXECUTING",
            State::Summarizing => "SUMMARIZING",
            State::Embedding => "EMBEDDING",
            State::Searching => "SEARCHING",
            State::Composing => "COMPOSING",
            State::Done => "DONE",
            State::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done | State::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: State) -> bool {
        use State::*;
        match (*self, next) {
            (from, Failed) => !from.is_terminal(),
            (Start, Classifying)
            | (Classifying, GeneratingSql)
            | (Classifying, Embedding)
            | (GeneratingSql, Validating)
            | (Validating, Executing)
            | (Executing, Summarizing)
            | (Summarizing, Done)
            | (Embedding, Searching)
            | (Searching, Composing)
            | (Composing, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one request's progress through [`State`].
#[derive(Debug)]
struct Run {
    state: State,
}

impl Run {
    fn new() -> Self {
        Self {
            state: State::Start,
        }
    }

    fn advance(&mut self, next: State) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
    }
}

/// Outcome of a successful request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "route", rename_all = "lowercase")]
pub enum Reply {
    Structured {
        text: String,
        /// The validated statement that produced the rows.
        sql: String,
        row_count: usize,
    },
    Unstructured(Answer),
}

impl Reply {
    pub fn route(&self) -> Intent {
        match self {
            Reply::Structured { .. } => Intent::Structured,
            Reply::Unstructured(_) => Intent::Unstructured,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Reply::Structured { text, .. } => text,
            Reply::Unstructured(answer) => &answer.text,
        }
    }
}

/// Model names per stage.
#[derive(Debug, Clone)]
struct Models {
    classifier: String,
    sql: String,
    summary: String,
    answer: String,
}

impl From<&LlmConfig> for Models {
    fn from(config: &LlmConfig) -> Self {
        Self {
            classifier: config.classifier_model.clone(),
            sql: config.sql_model.clone(),
            summary: config.summary_model.clone(),
            answer: config.answer_model.clone(),
        }
    }
}

/// Answers questions for authenticated callers.
///
/// Holds only shared, immutable collaborators, so one instance serves any
/// number of concurrent requests.
pub struct Orchestrator {
    client: Arc<dyn CompletionClient>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    catalog: Arc<SchemaCatalog>,
    executors: Executors,
    models: Models,
    top_k: usize,
    default_backend: Backend,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        catalog: Arc<SchemaCatalog>,
        executors: Executors,
    ) -> Self {
        Self {
            client,
            embedder,
            index,
            catalog,
            executors,
            models: Models::from(&LlmConfig::default()),
            top_k: DEFAULT_TOP_K,
            default_backend: Backend::Relational,
        }
    }

    pub fn with_models(mut self, config: &LlmConfig) -> Self {
        self.models = Models::from(config);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_default_backend(mut self, backend: Backend) -> Self {
        self.default_backend = backend;
        self
    }

    /// Build every collaborator from configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let client: Arc<dyn CompletionClient> = Arc::from(create_client(&config.llm)?);
        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
        let index: Arc<dyn VectorIndex> = Arc::from(create_index(&config.vector_store)?);
        let catalog = Arc::new(SchemaCatalog::load_paths(&config.schema.paths)?);
        let executors = Executors::connect(&config.databases).await?;

        Ok(Self::new(client, embedder, index, catalog, executors)
            .with_models(&config.llm)
            .with_top_k(config.retrieval.top_k)
            .with_default_backend(config.structured.default_backend))
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    /// Answer one question on behalf of `ctx`.
    pub async fn ask(&self, ctx: &TenancyContext, question: &str) -> Result<Reply, AskError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "ask",
            %request_id,
            tenant_id = ctx.tenant_id(),
            caller_id = ctx.caller_id()
        );
        self.run(ctx, question).instrument(span).await
    }

    async fn run(&self, ctx: &TenancyContext, question: &str) -> Result<Reply, AskError> {
        let mut run = Run::new();
        let result = self.drive(&mut run, ctx, question).await;

        match &result {
            Ok(reply) => {
                run.advance(State::Done);
                tracing::info!(route = %reply.route(), "question answered");
            }
            Err(err) => {
                run.advance(State::Failed);
                match err {
                    AskError::ValidationRejected { .. } => {}
                    _ => tracing::warn!(
                        stage = %err.stage(),
                        code = err.code(),
                        error = %err,
                        "question failed"
                    ),
                }
            }
        }
        result
    }

    async fn drive(
        &self,
        run: &mut Run,
        ctx: &TenancyContext,
        question: &str,
    ) -> Result<Reply, AskError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AskError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }

        run.advance(State::Classifying);
        let intent = classify(self.client.as_ref(), &self.models.classifier, question)
            .await
            .map_err(AskError::Classification)?;

        match intent {
            Intent::Structured => self.structured(run, ctx, question).await,
            Intent::Unstructured => self.unstructured(run, ctx, question).await,
        }
    }

    async fn structured(
        &self,
        run: &mut Run,
        ctx: &TenancyContext,
        question: &str,
    ) -> Result<Reply, AskError> {
        run.advance(State::GeneratingSql);
        let schema_context = self.catalog.render_context(None);
        let candidate = draft_sql(
            self.client.as_ref(),
            &self.models.sql,
            question,
            &schema_context,
            ctx.tenant_id(),
        )
        .await
        .map_err(AskError::Generation)?;

        run.advance(State::Validating);
        let sql = gate_candidate(candidate).map_err(|err| match err {
            err @ GateError::NoStatement => AskError::Generation(err.into()),
            GateError::Rejected { sql, .. } => AskError::ValidationRejected { sql },
        })?;

        run.advance(State::Executing);
        let backend = self
            .catalog
            .resolve_backend(sql.as_str(), self.default_backend)
            .map_err(AskError::Execution)?;
        let executor = self.executors.get(backend).ok_or_else(|| {
            AskError::Execution(anyhow::anyhow!(
                "no executor configured for backend {}",
                backend
            ))
        })?;
        tracing::debug!(%backend, sql = %sql, "executing validated sql");
        let rows = executor
            .execute(ctx, &sql)
            .await
            .map_err(AskError::Execution)?;

        run.advance(State::Summarizing);
        let text = summarize(
            self.client.as_ref(),
            &self.models.summary,
            question,
            &rows,
            sql.as_str(),
        )
        .await
        .map_err(AskError::Summarization)?;

        Ok(Reply::Structured {
            text,
            sql: sql.into_string(),
            row_count: rows.len(),
        })
    }

    async fn unstructured(
        &self,
        run: &mut Run,
        ctx: &TenancyContext,
        question: &str,
    ) -> Result<Reply, AskError> {
        let filter = PassageFilter::for_context(ctx);

        run.advance(State::Embedding);
        let query = embed_query(self.embedder.as_ref(), question)
            .await
            .map_err(AskError::Embedding)?;

        run.advance(State::Searching);
        let passages = self
            .index
            .search(&query, &filter, self.top_k)
            .await
            .map_err(AskError::Retrieval)?;
        tracing::debug!(hits = passages.len(), "passages retrieved");

        run.advance(State::Composing);
        let answer = rag::compose(self.client.as_ref(), &self.models.answer, question, &passages)
            .await
            .map_err(AskError::Composition)?;

        Ok(Reply::Unstructured(answer))
    }
}
