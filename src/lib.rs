//! # Answer Harness
//!
//! Tenant-scoped question answering over SQL tables and indexed documents.
//!
//! Each question is classified and then answered one of two ways:
//! generated SQL (checked by a read-only gate, run on a read-only session,
//! summarized), or retrieval over a vector index filtered by tenant and
//! role, with an answer that cites the passages it used.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌────────────┐
//!  question ────▶ │ Classifier │
//!                 └─────┬──────┘
//!          STRUCTURED   │   UNSTRUCTURED
//!        ┌──────────────┴──────────────┐
//!        ▼                             ▼
//!  ┌───────────┐  ┌──────────┐   ┌──────────┐  ┌────────────┐
//!  │ SQL draft │─▶│ Read-only│   │ Embedder │─▶│ Vector     │
//!  │ + schema  │  │ gate     │   └──────────┘  │ index      │
//!  └───────────┘  └────┬─────┘                 └─────┬──────┘
//!                      ▼                             ▼
//!                ┌──────────┐                  ┌──────────┐
//!                │ Executor │─▶ Summarizer     │ Composer │
//!                └──────────┘                  └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`tenancy`] | Caller tenant and roles |
//! | [`error`] | Stage-tagged request errors |
//! | [`llm`] | Chat completion client |
//! | [`intent`] | Structured / unstructured classification |
//! | [`schema`] | Table catalog and schema context |
//! | [`sql`] | Text-to-SQL generation |
//! | [`readonly`] | Read-only SQL gate |
//! | [`executor`] | Postgres, SQLite, and BigQuery execution |
//! | [`summarize`] | Result summaries |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index (Qdrant, in-memory) |
//! | [`rag`] | Cited answers from passages |
//! | [`orchestrator`] | Per-request state machine |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |

pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod executor;
pub mod index;
pub mod intent;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod rag;
pub mod readonly;
pub mod schema;
pub mod sql;
pub mod summarize;
pub mod tenancy;

#[cfg(test)]
mod test_support;
