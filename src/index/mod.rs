//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait defines the operations the answering pipeline
//! needs from a passage store. Every search takes a [`PassageFilter`], and
//! a filter cannot exist without a tenant id, so an unscoped search is not
//! expressible.
//!
//! Implementations:
//! - [`memory::InMemoryIndex`]: brute-force cosine over an in-process list.
//! - [`qdrant::QdrantIndex`]: Qdrant over its REST API.
//!
//! Both run their hits through the same post-check before returning:
//! anything whose payload tenant differs from the filter's tenant is
//! dropped and logged, whatever the backend claimed to have filtered.

pub mod memory;
pub mod qdrant;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::config::VectorStoreConfig;
use crate::error::AskError;
use crate::models::{Passage, PassagePayload, RetrievedPassage};
use crate::tenancy::TenancyContext;

/// Constraints applied to a similarity search.
///
/// - tenant: must match exactly (always present)
/// - source: must match exactly when set
/// - roles: when set, a passage is visible if it is unrestricted (empty
///   `allowed_roles`) or shares at least one role with the set; when
///   `None`, no role check is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassageFilter {
    tenant_id: String,
    source: Option<String>,
    roles: Option<BTreeSet<String>>,
}

impl PassageFilter {
    /// Filter on a tenant only. Fails on an empty tenant id.
    pub fn new(tenant_id: impl Into<String>) -> Result<Self, AskError> {
        let tenant_id = tenant_id.into().trim().to_string();
        if tenant_id.is_empty() {
            return Err(AskError::TenancyViolation(
                "passage filter requires a tenant_id".to_string(),
            ));
        }
        Ok(Self {
            tenant_id,
            source: None,
            roles: None,
        })
    }

    /// Filter scoped to a caller: their tenant and their role set.
    pub fn for_context(ctx: &TenancyContext) -> Self {
        Self {
            tenant_id: ctx.tenant_id().to_string(),
            source: None,
            roles: Some(ctx.roles().clone()),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn roles(&self) -> Option<&BTreeSet<String>> {
        self.roles.as_ref()
    }

    /// Whether a payload satisfies every clause of the filter.
    pub fn matches(&self, payload: &PassagePayload) -> bool {
        if payload.tenant_id != self.tenant_id {
            return false;
        }
        if let Some(source) = &self.source {
            if &payload.source != source {
                return false;
            }
        }
        match &self.roles {
            Some(roles) => payload.visible_to(roles),
            None => true,
        }
    }
}

/// A passage store searchable by vector similarity.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not exist yet.
    async fn ensure_collection(&self) -> Result<()>;

    /// Insert or replace a passage by id.
    async fn upsert(&self, passage: &Passage) -> Result<()>;

    /// Up to `limit` passages matching `filter`, most similar first,
    /// ranked from 1.
    async fn search(
        &self,
        query: &[f32],
        filter: &PassageFilter,
        limit: usize,
    ) -> Result<Vec<RetrievedPassage>>;

    /// Remove passages by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<()>;
}

/// Turn scored hits (already in similarity order) into ranked results.
///
/// Hits from another tenant are dropped with an error log before ranks
/// are assigned.
pub(crate) fn rank_hits(
    hits: Vec<(String, PassagePayload, f32)>,
    filter: &PassageFilter,
    limit: usize,
) -> Vec<RetrievedPassage> {
    hits.into_iter()
        .filter(|(id, payload, _)| {
            let same_tenant = payload.tenant_id == filter.tenant_id();
            if !same_tenant {
                tracing::error!(
                    passage_id = %id,
                    expected_tenant = filter.tenant_id(),
                    found_tenant = %payload.tenant_id,
                    "dropping cross-tenant search hit"
                );
            }
            same_tenant
        })
        .take(limit)
        .enumerate()
        .map(|(i, (id, payload, score))| RetrievedPassage {
            id,
            payload,
            score,
            rank: i + 1,
        })
        .collect()
}

/// Create the vector index named by `config.provider`.
pub fn create_index(config: &VectorStoreConfig) -> Result<Box<dyn VectorIndex>> {
    match config.provider.as_str() {
        "memory" => Ok(Box::new(memory::InMemoryIndex::new(config.dims))),
        "qdrant" => Ok(Box::new(qdrant::QdrantIndex::new(config)?)),
        other => anyhow::bail!("Unknown vector store provider: {}", other),
    }
}
