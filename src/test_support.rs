//! Test doubles shared by unit tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::embedding::Embedder;
use crate::llm::{Completion, CompletionClient, CompletionRequest, Usage};

/// Completion client that replays canned responses in order and records
/// every request it receives.
pub(crate) struct ScriptedClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    pub(crate) fn new<'a, I>(responses: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.to_string())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A client with no responses; any call fails.
    pub(crate) fn silent() -> Self {
        Self::new(Vec::<&str>::new())
    }

    /// A client whose every call fails with `message`.
    pub(crate) fn failing(message: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from([Err(message.to_string())])),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.requests.lock().unwrap().push(request.clone());
        let next = {
            let mut responses = self.responses.lock().unwrap();
            // Failures are sticky
            if matches!(responses.front(), Some(Err(_))) {
                responses.front().cloned()
            } else {
                responses.pop_front()
            }
        };
        match next {
            Some(Ok(content)) => Ok(Completion {
                content,
                model: request.model.clone(),
                usage: Usage::default(),
            }),
            Some(Err(message)) => bail!("{}", message),
            None => bail!("scripted client exhausted"),
        }
    }
}

/// Embedder that maps every text to the same vector.
pub(crate) struct FixedEmbedder {
    pub(crate) vector: Vec<f32>,
}

#[async_trait]
impl Embedder for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }
    fn dims(&self) -> usize {
        self.vector.len()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| self.vector.clone()).collect())
    }
}
