//! TOML configuration parsing and validation.
//!
//! Every external collaborator (completion service, embedding service,
//! vector store, relational and analytical databases) is configured here.
//! Secrets are never stored in the file; they are read from environment
//! variables by the component that needs them.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::schema::Backend;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub structured: StructuredConfig,
    #[serde(default)]
    pub databases: DatabasesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_chat_model")]
    pub classifier_model: String,
    #[serde(default = "default_chat_model")]
    pub sql_model: String,
    #[serde(default = "default_chat_model")]
    pub summary_model: String,
    #[serde(default = "default_chat_model")]
    pub answer_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            timeout_secs: default_timeout_secs(),
            classifier_model: default_chat_model(),
            sql_model: default_chat_model(),
            summary_model: default_chat_model(),
            answer_model: default_chat_model(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible gateway or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_vector_provider")]
    pub provider: String,
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_vector_dims")]
    pub dims: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            url: default_qdrant_url(),
            collection: default_collection(),
            dims: default_vector_dims(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_vector_provider() -> String {
    "memory".to_string()
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "documents".to_string()
}
fn default_vector_dims() -> usize {
    1536
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SchemaConfig {
    /// Schema definition files or directories, loaded in order.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StructuredConfig {
    /// Backend used when a statement names no catalog table.
    #[serde(default = "default_backend")]
    pub default_backend: Backend,
}

impl Default for StructuredConfig {
    fn default() -> Self {
        Self {
            default_backend: default_backend(),
        }
    }
}

fn default_backend() -> Backend {
    Backend::Relational
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabasesConfig {
    pub relational: Option<RelationalConfig>,
    pub analytical: Option<AnalyticalConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelationalConfig {
    /// `postgres://…` or `sqlite:…`.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticalConfig {
    pub project: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_bigquery_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_analytical_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_bigquery_endpoint() -> String {
    "https://bigquery.googleapis.com/bigquery/v2".to_string()
}
fn default_analytical_timeout_secs() -> u64 {
    120
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;

    // Relative schema paths resolve against the config file's directory
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut config = config;
    config.schema.paths = config
        .schema
        .paths
        .iter()
        .map(|p| if p.is_relative() { base.join(p) } else { p.clone() })
        .collect();

    Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims != Some(config.vector_store.dims) {
            bail!(
                "embedding.dims ({}) must equal vector_store.dims ({})",
                config.embedding.dims.unwrap_or(0),
                config.vector_store.dims
            );
        }
    }

    // Validate vector store
    match config.vector_store.provider.as_str() {
        "memory" | "qdrant" => {}
        other => bail!(
            "Unknown vector store provider: '{}'. Must be memory or qdrant.",
            other
        ),
    }
    if config.vector_store.dims == 0 {
        bail!("vector_store.dims must be > 0");
    }
    if config.vector_store.collection.trim().is_empty() {
        bail!("vector_store.collection must not be empty");
    }

    // Validate databases
    if let Some(rel) = &config.databases.relational {
        if !(rel.url.starts_with("postgres://")
            || rel.url.starts_with("postgresql://")
            || rel.url.starts_with("sqlite:"))
        {
            bail!("databases.relational.url must start with postgres://, postgresql:// or sqlite:");
        }
        if rel.max_connections == 0 {
            bail!("databases.relational.max_connections must be > 0");
        }
    }
    if let Some(an) = &config.databases.analytical {
        if an.project.trim().is_empty() {
            bail!("databases.analytical.project must not be empty");
        }
    }

    Ok(config)
}
