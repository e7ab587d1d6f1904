//! Core data models shared across the answering pipeline.
//!
//! These types represent the tabular results of the structured route and
//! the passages, sources, and answers of the unstructured route.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One result row: column name → scalar value, in backend column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Rows in backend result order.
pub type QueryResult = Vec<Row>;

/// Metadata and text stored alongside a passage vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassagePayload {
    pub tenant_id: String,
    /// Origin system tag (e.g. `"confluence"`, `"jira"`).
    #[serde(default = "default_source")]
    pub source: String,
    /// Roles allowed to see the passage; empty means visible to every role.
    #[serde(default)]
    pub allowed_roles: BTreeSet<String>,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub text: String,
}

fn default_source() -> String {
    "unknown".to_string()
}

fn default_title() -> String {
    "Untitled".to_string()
}

impl PassagePayload {
    /// Whether a caller holding `roles` may see this passage.
    pub fn visible_to(&self, roles: &BTreeSet<String>) -> bool {
        self.allowed_roles.is_empty() || !self.allowed_roles.is_disjoint(roles)
    }
}

/// A unit of indexed document text.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PassagePayload,
}

/// A passage returned by a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub id: String,
    pub payload: PassagePayload,
    /// Cosine similarity to the query vector.
    pub score: f32,
    /// 1-based position in result order.
    pub rank: usize,
}

/// Summary of a retrieved passage, numbered as it was shown to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub index: usize,
    pub id: String,
    pub title: String,
    pub source: String,
    pub score: f32,
}

impl From<&RetrievedPassage> for SourceRef {
    fn from(p: &RetrievedPassage) -> Self {
        Self {
            index: p.rank,
            id: p.id.clone(),
            title: p.payload.title.clone(),
            source: p.payload.source.clone(),
            score: p.score,
        }
    }
}

/// A cited answer composed from retrieved passages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
    /// Sources the text actually references, in source order.
    pub citations: Vec<SourceRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(roles: &[&str]) -> PassagePayload {
        PassagePayload {
            tenant_id: "t1".to_string(),
            source: "wiki".to_string(),
            allowed_roles: roles.iter().map(|r| r.to_string()).collect(),
            title: "Refunds".to_string(),
            text: "Refunds are processed within 5 days.".to_string(),
        }
    }

    fn roles(rs: &[&str]) -> BTreeSet<String> {
        rs.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_unrestricted_visible_to_everyone() {
        assert!(payload(&[]).visible_to(&roles(&[])));
        assert!(payload(&[]).visible_to(&roles(&["finance"])));
    }

    #[test]
    fn test_restricted_needs_overlap() {
        let p = payload(&["admin"]);
        assert!(p.visible_to(&roles(&["admin", "finance"])));
        assert!(!p.visible_to(&roles(&["finance"])));
        assert!(!p.visible_to(&roles(&[])));
    }

    #[test]
    fn test_payload_defaults() {
        let p: PassagePayload = serde_json::from_value(serde_json::json!({ "tenant_id": "t1" })).unwrap();
        assert_eq!(p.title, "Untitled");
        assert_eq!(p.source, "unknown");
        assert!(p.allowed_roles.is_empty());
    }
}
