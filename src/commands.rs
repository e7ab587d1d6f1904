//! Command runners behind the `ask` CLI.
//!
//! Each `run_*` function loads what it needs from the configuration,
//! performs one operation, and prints a human-readable result to stdout.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::error::AskError;
use crate::index::create_index;
use crate::intent::classify;
use crate::llm::create_client;
use crate::orchestrator::{Orchestrator, Reply};
use crate::readonly::check_read_only;
use crate::schema::{Backend, SchemaCatalog};
use crate::sql::{draft_sql, gate_candidate, GateError};
use crate::tenancy::TenancyContext;

/// Answer a question end to end.
pub async fn run_query(
    config: &Config,
    question: &str,
    tenant: &str,
    caller: &str,
    roles: &[String],
    json: bool,
) -> Result<()> {
    let ctx = TenancyContext::new(tenant, caller, roles.iter().cloned())?;
    let orchestrator = Orchestrator::from_config(config).await?;

    match orchestrator.ask(&ctx, question).await {
        Ok(reply) if json => {
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Ok(reply) => print_reply(&reply),
        Err(err) => {
            eprintln!("{}", err.user_message());
            return Err(err.into());
        }
    }
    Ok(())
}

fn print_reply(reply: &Reply) {
    match reply {
        Reply::Structured {
            text,
            sql,
            row_count,
        } => {
            println!("{}", text);
            println!();
            println!("  sql: {}", sql);
            println!("  rows: {}", row_count);
        }
        Reply::Unstructured(answer) => {
            println!("{}", answer.text);
            if !answer.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &answer.sources {
                    let cited = if answer.citations.iter().any(|c| c.index == source.index) {
                        "*"
                    } else {
                        " "
                    };
                    println!(
                        " {}[{}] {} ({}) score={:.2}",
                        cited, source.index, source.title, source.source, source.score
                    );
                }
            }
        }
    }
}

/// Print the route a question would take.
pub async fn run_classify(config: &Config, question: &str) -> Result<()> {
    let client = create_client(&config.llm)?;
    let intent = classify(client.as_ref(), &config.llm.classifier_model, question).await?;
    println!("{}", intent);
    Ok(())
}

/// Generate and validate SQL without executing it.
pub async fn run_sql(config: &Config, question: &str, tenant: &str) -> Result<()> {
    let ctx = TenancyContext::new(tenant, "cli", Vec::<String>::new())?;
    let catalog = SchemaCatalog::load_paths(&config.schema.paths)?;
    let client = create_client(&config.llm)?;

    let candidate = draft_sql(
        client.as_ref(),
        &config.llm.sql_model,
        question,
        &catalog.render_context(None),
        ctx.tenant_id(),
    )
    .await?;

    let sql = match gate_candidate(candidate) {
        Ok(sql) => sql,
        Err(GateError::Rejected { sql, reason }) => bail!("rejected: {}\n{}", reason, sql),
        Err(err @ GateError::NoStatement) => return Err(AskError::Generation(err.into()).into()),
    };
    let backend = catalog.resolve_backend(sql.as_str(), config.structured.default_backend)?;
    println!("{}", sql);
    println!();
    println!("  backend: {}", backend);
    Ok(())
}

/// Run the read-only gate on a statement.
pub fn run_check_sql(sql: &str) -> Result<()> {
    match check_read_only(sql) {
        Ok(_) => {
            println!("ok");
            Ok(())
        }
        Err(reason) => bail!("rejected: {}", reason),
    }
}

/// Print the schema context the SQL generator sees.
pub fn run_schema(config: &Config, backend: Option<Backend>) -> Result<()> {
    let catalog = SchemaCatalog::load_paths(&config.schema.paths)?;
    println!("{}", catalog.render_context(backend));
    Ok(())
}

/// Create the vector collection if it is missing.
pub async fn run_index_init(config: &Config) -> Result<()> {
    let index = create_index(&config.vector_store)?;
    index.ensure_collection().await?;
    println!(
        "Collection '{}' ready ({} dims, {}).",
        config.vector_store.collection, config.vector_store.dims, config.vector_store.provider
    );
    Ok(())
}
