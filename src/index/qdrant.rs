//! Qdrant [`VectorIndex`] over the REST API.
//!
//! Passage ids are arbitrary strings but Qdrant point ids must be integers
//! or UUIDs, so each point id is a UUID built from the SHA-256 of the
//! passage id. The original id travels in the payload as `passage_id`.
//!
//! Collections use a fixed vector size and cosine distance. An `api-key`
//! header is sent when `QDRANT_API_KEY` is set.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

use super::{rank_hits, PassageFilter, VectorIndex};
use crate::config::VectorStoreConfig;
use crate::models::{Passage, PassagePayload, RetrievedPassage};

pub struct QdrantIndex {
    http: reqwest::Client,
    base_url: String,
    collection: String,
    dims: usize,
    api_key: Option<String>,
}

/// Deterministic Qdrant point id for a passage id.
pub fn point_id(passage_id: &str) -> Uuid {
    let digest = Sha256::digest(passage_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Qdrant filter JSON for a [`PassageFilter`].
///
/// `must` carries tenant and source; the role clause is a `should` that
/// accepts either an overlapping role or an empty `allowed_roles` list.
pub fn build_filter(filter: &PassageFilter) -> Value {
    let mut must = vec![json!({ "key": "tenant_id", "match": { "value": filter.tenant_id() } })];
    if let Some(source) = filter.source() {
        must.push(json!({ "key": "source", "match": { "value": source } }));
    }

    let mut body = json!({ "must": must });
    if let Some(roles) = filter.roles() {
        let mut should = Vec::new();
        if !roles.is_empty() {
            should.push(json!({ "key": "allowed_roles", "match": { "any": roles } }));
        }
        should.push(json!({ "is_empty": { "key": "allowed_roles" } }));
        body["should"] = Value::Array(should);
    }
    body
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

fn parse_hit(point: ScoredPoint) -> Result<(String, PassagePayload, f32)> {
    let payload_json = point
        .payload
        .ok_or_else(|| anyhow::anyhow!("Qdrant hit {} has no payload", point.id))?;
    let id = payload_json
        .get("passage_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| match &point.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    let payload: PassagePayload = serde_json::from_value(payload_json)
        .with_context(|| format!("invalid payload for passage {}", id))?;
    Ok((id, payload, point.score))
}

impl QdrantIndex {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let api_key = std::env::var("QDRANT_API_KEY").ok().filter(|k| !k.is_empty());
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &VectorStoreConfig, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            dims: config.dims,
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, path)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("Qdrant {} request to {} failed", what, self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Qdrant {} error {}: {}", what, status, body_text);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .send(self.request(reqwest::Method::GET, self.url("/exists")), "exists")
            .await?;
        if exists
            .pointer("/result/exists")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            return Ok(());
        }

        let body = json!({ "vectors": { "size": self.dims, "distance": "Cosine" } });
        self.send(
            self.request(reqwest::Method::PUT, self.url("")).json(&body),
            "create collection",
        )
        .await?;
        tracing::info!(collection = %self.collection, dims = self.dims, "created qdrant collection");
        Ok(())
    }

    async fn upsert(&self, passage: &Passage) -> Result<()> {
        if passage.vector.len() != self.dims {
            bail!(
                "passage {} has {} dimensions, collection expects {}",
                passage.id,
                passage.vector.len(),
                self.dims
            );
        }

        let mut payload = serde_json::to_value(&passage.payload)?;
        payload["passage_id"] = Value::String(passage.id.clone());
        let body = json!({
            "points": [{
                "id": point_id(&passage.id).to_string(),
                "vector": passage.vector,
                "payload": payload,
            }]
        });
        self.send(
            self.request(reqwest::Method::PUT, self.url("/points?wait=true"))
                .json(&body),
            "upsert",
        )
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        filter: &PassageFilter,
        limit: usize,
    ) -> Result<Vec<RetrievedPassage>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            bail!(
                "query vector has {} dimensions, collection expects {}",
                query.len(),
                self.dims
            );
        }

        let body = json!({
            "vector": query,
            "filter": build_filter(filter),
            "limit": limit,
            "with_payload": true,
        });
        let json = self
            .send(
                self.request(reqwest::Method::POST, self.url("/points/search"))
                    .json(&body),
                "search",
            )
            .await?;

        let response: SearchResponse = serde_json::from_value(json)?;
        let hits = response
            .result
            .into_iter()
            .map(parse_hit)
            .collect::<Result<Vec<_>>>()?;

        Ok(rank_hits(hits, filter, limit))
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let points: Vec<String> = ids.iter().map(|id| point_id(id).to_string()).collect();
        self.send(
            self.request(reqwest::Method::POST, self.url("/points/delete?wait=true"))
                .json(&json!({ "points": points })),
            "delete",
        )
        .await?;
        Ok(())
    }
}
