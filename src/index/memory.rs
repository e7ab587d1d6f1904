//! In-memory [`VectorIndex`] for local runs and tests.
//!
//! Passages live in a `Vec` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every stored passage that passes
//! the filter.

use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{rank_hits, PassageFilter, VectorIndex};
use crate::embedding::cosine_similarity;
use crate::models::{Passage, RetrievedPassage};

pub struct InMemoryIndex {
    dims: usize,
    passages: RwLock<Vec<Passage>>,
}

impl InMemoryIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            passages: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.passages.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn ensure_collection(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, passage: &Passage) -> Result<()> {
        if passage.vector.len() != self.dims {
            bail!(
                "passage {} has {} dimensions, index expects {}",
                passage.id,
                passage.vector.len(),
                self.dims
            );
        }
        let mut passages = self.passages.write().unwrap();
        passages.retain(|p| p.id != passage.id);
        passages.push(passage.clone());
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        filter: &PassageFilter,
        limit: usize,
    ) -> Result<Vec<RetrievedPassage>> {
        if query.len() != self.dims {
            bail!(
                "query vector has {} dimensions, index expects {}",
                query.len(),
                self.dims
            );
        }

        let passages = self.passages.read().unwrap();
        let mut hits: Vec<_> = passages
            .iter()
            .filter(|p| filter.matches(&p.payload))
            .map(|p| {
                (
                    p.id.clone(),
                    p.payload.clone(),
                    cosine_similarity(query, &p.vector),
                )
            })
            .collect();
        hits.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        Ok(rank_hits(hits, filter, limit))
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut passages = self.passages.write().unwrap();
        passages.retain(|p| !ids.contains(&p.id));
        Ok(())
    }
}
