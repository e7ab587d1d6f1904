//! Retrieval-augmented answers with citations.
//!
//! The question is embedded, the index is searched under the caller's
//! [`PassageFilter`], and the hits are numbered `[Source 1]..[Source n]`
//! in the prompt. Citations in the model's answer are kept only when they
//! name one of those numbers.

use anyhow::Result;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::embedding::{embed_query, Embedder};
use crate::index::{PassageFilter, VectorIndex};
use crate::llm::{complete_text, ChatMessage, CompletionClient, CompletionRequest};
use crate::models::{Answer, RetrievedPassage, SourceRef};

/// Reply when the search finds nothing. No model call is made.
pub const NO_DOCUMENTS: &str = "I couldn't find any relevant documents to answer your question.";

pub const DEFAULT_TOP_K: usize = 5;

const RAG_SYSTEM_PROMPT: &str = "\
You are a helpful assistant that answers questions based on provided context documents.

Rules:
1. Only answer based on the provided context. If the context doesn't contain \
enough information, say so. Do not use outside knowledge.
2. Cite your sources using [Source N] notation, where N corresponds to the \
document number in the context.
3. Be concise and direct.
4. If multiple sources agree, mention the most relevant one.";

static CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[Source ([1-9]\d*)\]").unwrap());

/// Numbered context blocks separated by `---` rules.
pub fn build_context(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|p| {
            format!(
                "[Source {}] ({}: {})\n{}",
                p.rank, p.payload.source, p.payload.title, p.payload.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Sources whose number appears as `[Source N]` in `text`, in source order.
pub fn extract_citations(text: &str, sources: &[SourceRef]) -> Vec<SourceRef> {
    let cited: BTreeSet<usize> = CITATION
        .captures_iter(text)
        .filter_map(|cap| cap[1].parse().ok())
        .collect();
    sources
        .iter()
        .filter(|s| cited.contains(&s.index))
        .cloned()
        .collect()
}

/// Compose an answer from passages already retrieved.
pub async fn compose(
    client: &dyn CompletionClient,
    model: &str,
    question: &str,
    passages: &[RetrievedPassage],
) -> Result<Answer> {
    if passages.is_empty() {
        return Ok(Answer {
            text: NO_DOCUMENTS.to_string(),
            sources: Vec::new(),
            citations: Vec::new(),
        });
    }

    let sources: Vec<SourceRef> = passages.iter().map(SourceRef::from).collect();
    let request = CompletionRequest::new(
        model,
        vec![
            ChatMessage::system(RAG_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Context:\n{}\n\nQuestion: {}",
                build_context(passages),
                question
            )),
        ],
    )
    .temperature(0.1);

    let text = complete_text(client, &request).await?;
    let citations = extract_citations(&text, &sources);
    tracing::info!(
        sources = sources.len(),
        citations = citations.len(),
        "rag answer generated"
    );

    Ok(Answer {
        text,
        sources,
        citations,
    })
}

/// Embed, search, and compose in one call.
pub async fn answer(
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    client: &dyn CompletionClient,
    model: &str,
    question: &str,
    filter: &PassageFilter,
    top_k: usize,
) -> Result<Answer> {
    let query = embed_query(embedder, question).await?;
    let passages = index.search(&query, filter, top_k).await?;
    compose(client, model, question, &passages).await
}
