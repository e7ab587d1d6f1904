//! # Answer Harness CLI (`ask`)
//!
//! Operator front end for the answering pipeline. In production the
//! orchestrator sits behind an authenticated service; here the tenant,
//! caller, and roles come from flags.
//!
//! ## Usage
//!
//! ```bash
//! ask --config ./config/ask.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ask query "<question>" --tenant <id>` | Answer a question end to end |
//! | `ask classify "<question>"` | Show the route a question takes |
//! | `ask sql "<question>" --tenant <id>` | Generate and validate SQL only |
//! | `ask check-sql "<sql>"` | Run the read-only gate on a statement |
//! | `ask schema` | Print the schema context given to the SQL model |
//! | `ask index init` | Create the vector collection if missing |
//!
//! ## Examples
//!
//! ```bash
//! ask query "How many users signed up last week?" --tenant acme --role finance
//! ask query "How do we rotate the signing keys?" --tenant acme --role eng --json
//! ask check-sql "SELECT * FROM users; DROP TABLE users"
//! RUST_LOG=answer_harness=debug ask sql "Top 5 customers by revenue" --tenant acme
//! ```

use answer_harness::{commands, config, schema::Backend};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ask",
    about = "Answer Harness: tenant-scoped question answering over SQL tables and documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ask.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question for a tenant.
    Query {
        question: String,

        /// Tenant the caller belongs to.
        #[arg(long)]
        tenant: String,

        /// Caller identifier, recorded in logs.
        #[arg(long, default_value = "cli")]
        caller: String,

        /// Caller role (repeatable).
        #[arg(long = "role")]
        roles: Vec<String>,

        /// Print the reply as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Classify a question as structured or unstructured.
    Classify { question: String },

    /// Generate SQL for a question and validate it, without executing.
    Sql {
        question: String,

        #[arg(long)]
        tenant: String,
    },

    /// Check a SQL statement against the read-only gate.
    CheckSql { sql: String },

    /// Print the schema context.
    Schema {
        /// Only tables of this backend (`relational` or `analytical`).
        #[arg(long, value_parser = parse_backend)]
        backend: Option<Backend>,
    },

    /// Manage the vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Create the collection if it does not exist.
    Init,
}

fn parse_backend(s: &str) -> Result<Backend, String> {
    match s.to_ascii_lowercase().as_str() {
        "relational" | "postgres" | "sqlite" => Ok(Backend::Relational),
        "analytical" | "bigquery" => Ok(Backend::Analytical),
        other => Err(format!(
            "unknown backend '{}': expected relational or analytical",
            other
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // The gate needs no configuration
    if let Commands::CheckSql { sql } = &cli.command {
        return commands::run_check_sql(sql);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Query {
            question,
            tenant,
            caller,
            roles,
            json,
        } => {
            commands::run_query(&cfg, &question, &tenant, &caller, &roles, json).await?;
        }
        Commands::Classify { question } => {
            commands::run_classify(&cfg, &question).await?;
        }
        Commands::Sql { question, tenant } => {
            commands::run_sql(&cfg, &question, &tenant).await?;
        }
        Commands::Schema { backend } => {
            commands::run_schema(&cfg, backend)?;
        }
        Commands::Index { action } => match action {
            IndexAction::Init => {
                commands::run_index_init(&cfg).await?;
            }
        },
        Commands::CheckSql { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
