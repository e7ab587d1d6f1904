//! End-to-end runs of the orchestrator over a SQLite database and an
//! in-memory vector index, with a scripted chat model.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use answer_harness::config::RelationalConfig;
use answer_harness::db::connect_sqlite_read_only;
use answer_harness::embedding::Embedder;
use answer_harness::error::AskError;
use answer_harness::executor::sqlite::SqliteExecutor;
use answer_harness::executor::Executors;
use answer_harness::index::memory::InMemoryIndex;
use answer_harness::index::VectorIndex;
use answer_harness::intent::Intent;
use answer_harness::llm::{Completion, CompletionClient, CompletionRequest, Usage};
use answer_harness::models::{Passage, PassagePayload};
use answer_harness::orchestrator::{Orchestrator, Reply};
use answer_harness::schema::{Backend, SchemaCatalog, TableDescriptor};
use answer_harness::tenancy::TenancyContext;

struct Script {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl Script {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for Script {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.requests.lock().unwrap().push(request.clone());
        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))?;
        Ok(Completion {
            content,
            model: request.model.clone(),
            usage: Usage::default(),
        })
    }
}

struct UnitEmbedder;

#[async_trait]
impl Embedder for UnitEmbedder {
    fn model_name(&self) -> &str {
        "unit"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

fn passage(id: &str, tenant: &str, roles: &[&str], title: &str, vector: [f32; 2]) -> Passage {
    Passage {
        id: id.to_string(),
        vector: vector.to_vec(),
        payload: PassagePayload {
            tenant_id: tenant.to_string(),
            source: "confluence".to_string(),
            allowed_roles: roles.iter().map(|r| r.to_string()).collect(),
            title: title.to_string(),
            text: format!("{} body", title),
        },
    }
}

async fn seeded_sqlite(dir: &tempfile::TempDir) -> SqliteExecutor {
    let path = dir.path().join("warehouse.db");
    let url = format!("sqlite:{}", path.display());

    let options = url
        .parse::<sqlx::sqlite::SqliteConnectOptions>()
        .unwrap()
        .create_if_missing(true);
    let pool = sqlx::SqlitePool::connect_with(options).await.unwrap();
    sqlx::query("CREATE TABLE orders (id INTEGER PRIMARY KEY, tenant_id TEXT, total REAL)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO orders (tenant_id, total) VALUES
         ('acme', 10.0), ('acme', 32.5), ('globex', 99.0)",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let pool = connect_sqlite_read_only(&RelationalConfig {
        url,
        max_connections: 1,
    })
    .await
    .unwrap();
    SqliteExecutor::new(pool)
}

async fn harness(script: Arc<Script>, dir: &tempfile::TempDir) -> Orchestrator {
    let mut catalog = SchemaCatalog::new();
    catalog.register(
        TableDescriptor::new("orders", Backend::Relational)
            .with_description("Customer orders")
            .with_column("id", "INTEGER", "Order id")
            .with_column("tenant_id", "TEXT", "Owning tenant")
            .with_column("total", "REAL", "Order total in EUR"),
    );

    let index = InMemoryIndex::new(2);
    for p in [
        passage("rotate#1", "acme", &[], "Key rotation", [1.0, 0.0]),
        passage("payroll#1", "acme", &["hr"], "Payroll", [0.9, 0.1]),
        passage("rotate#9", "globex", &[], "Globex rotation", [1.0, 0.0]),
    ] {
        index.upsert(&p).await.unwrap();
    }

    let executors = Executors::new().with(Arc::new(seeded_sqlite(dir).await));
    Orchestrator::new(
        script,
        Arc::new(UnitEmbedder),
        Arc::new(index),
        Arc::new(catalog),
        executors,
    )
}

#[tokio::test]
async fn test_structured_question_runs_against_sqlite() {
    let dir = tempfile::TempDir::new().unwrap();
    let script = Script::new(&[
        "STRUCTURED",
        "```sql\nSELECT count(*) AS orders, sum(total) AS revenue FROM orders WHERE tenant_id = 'acme'\n```",
        "Acme has 2 orders totalling 42.5 EUR.",
    ]);
    let orchestrator = harness(script.clone(), &dir).await;
    let ctx = TenancyContext::new("acme", "u1", ["finance"]).unwrap();

    let reply = orchestrator.ask(&ctx, "How much revenue did we make?").await.unwrap();
    assert_eq!(reply.route(), Intent::Structured);
    match &reply {
        Reply::Structured { text, sql, row_count } => {
            assert_eq!(text, "Acme has 2 orders totalling 42.5 EUR.");
            assert!(sql.contains("tenant_id = 'acme'"));
            assert_eq!(*row_count, 1);
        }
        other => panic!("unexpected reply: {:?}", other),
    }

    let requests = script.requests();
    assert_eq!(requests.len(), 3);
    // The summarizer sees the executed rows
    let summary_prompt = &requests[2].messages.last().unwrap().content;
    assert!(summary_prompt.contains("\"revenue\": 42.5"));
    assert!(summary_prompt.contains("Results (1 rows)"));
}

#[tokio::test]
async fn test_destructive_sql_is_rejected_before_execution() {
    let dir = tempfile::TempDir::new().unwrap();
    let script = Script::new(&["STRUCTURED", "DELETE FROM orders WHERE tenant_id = 'acme'"]);
    let orchestrator = harness(script.clone(), &dir).await;
    let ctx = TenancyContext::new("acme", "u1", Vec::<String>::new()).unwrap();

    // Bare DELETE has no SELECT to extract, so generation fails
    let err = orchestrator.ask(&ctx, "Remove my orders").await.unwrap_err();
    assert_eq!(err.code(), "generation_failed");

    let script = Script::new(&[
        "STRUCTURED",
        "```sql\nDROP TABLE orders\n```",
    ]);
    let other_dir = tempfile::TempDir::new().unwrap();
    let orchestrator = harness(script.clone(), &other_dir).await;
    let err = orchestrator.ask(&ctx, "Drop the orders table").await.unwrap_err();
    match &err {
        AskError::ValidationRejected { sql } => assert_eq!(sql, "DROP TABLE orders"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(script.requests().len(), 2);
}

#[tokio::test]
async fn test_unstructured_question_is_tenant_and_role_scoped() {
    let dir = tempfile::TempDir::new().unwrap();
    let script = Script::new(&["UNSTRUCTURED", "Rotate keys quarterly [Source 1]."]);
    let orchestrator = harness(script.clone(), &dir).await;
    let ctx = TenancyContext::new("acme", "u1", ["eng"]).unwrap();

    let reply = orchestrator
        .ask(&ctx, "How do we rotate signing keys?")
        .await
        .unwrap();
    let Reply::Unstructured(answer) = reply else {
        panic!("expected an unstructured reply");
    };

    let ids: Vec<&str> = answer.sources.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["rotate#1"]);
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].title, "Key rotation");

    let requests = script.requests();
    let context = &requests[1].messages.last().unwrap().content;
    assert!(!context.contains("Globex rotation"));
    assert!(!context.contains("Payroll"));
}

#[tokio::test]
async fn test_role_holder_sees_restricted_passage() {
    let dir = tempfile::TempDir::new().unwrap();
    let script = Script::new(&["UNSTRUCTURED", "Payroll runs monthly [Source 2]."]);
    let orchestrator = harness(script, &dir).await;
    let ctx = TenancyContext::new("acme", "u2", ["hr"]).unwrap();

    let reply = orchestrator.ask(&ctx, "When does payroll run?").await.unwrap();
    let Reply::Unstructured(answer) = reply else {
        panic!("expected an unstructured reply");
    };
    let ids: Vec<&str> = answer.sources.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["rotate#1", "payroll#1"]);
    assert_eq!(answer.citations[0].id, "payroll#1");
}

#[tokio::test]
async fn test_reply_serializes_with_route_tag() {
    let dir = tempfile::TempDir::new().unwrap();
    let script = Script::new(&["UNSTRUCTURED", "See [Source 1]."]);
    let orchestrator = harness(script, &dir).await;
    let ctx = TenancyContext::new("acme", "u1", Vec::<String>::new()).unwrap();

    let reply = orchestrator.ask(&ctx, "key rotation?").await.unwrap();
    let json = serde_json::to_value(&reply).unwrap();
    assert_eq!(json["route"], "unstructured");
    assert_eq!(json["text"], "See [Source 1].");
    assert_eq!(json["sources"][0]["id"], "rotate#1");
}
