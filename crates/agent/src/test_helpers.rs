//! Shared test doubles for pipeline tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use convrag_core::error::{ProviderError, RetrievalError};
use convrag_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use convrag_core::retrieval::{Passage, Retriever};

/// A provider that replays scripted answers and records every prompt.
///
/// Once the script is exhausted the last answer repeats.
pub struct ScriptedProvider {
    answers: Vec<String>,
    prompts: Mutex<Vec<String>>,
    /// Transient failures to emit before the first success.
    failures_left: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|s| s.to_string()).collect(),
            prompts: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(0),
        }
    }

    pub fn single(answer: &str) -> Self {
        Self::new(&[answer])
    }

    /// Fail the first `n` calls with a network error.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.failures_left = AtomicUsize::new(n);
        self
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let index = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(request.prompt.clone());
            prompts.len() - 1
        };

        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Network("connection reset".into()));
        }

        let text = self
            .answers
            .get(index)
            .or_else(|| self.answers.last())
            .cloned()
            .unwrap_or_default();

        Ok(ProviderResponse {
            text,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: request.model,
        })
    }
}

/// A provider whose every call fails with the given error.
pub struct FailingProvider(pub ProviderError);

#[async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(self.0.clone())
    }
}

/// A provider that never answers.
pub struct HangingProvider;

#[async_trait]
impl Provider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        std::future::pending().await
    }
}

/// A retriever over a fixed, pre-ranked passage list.
pub struct StaticRetriever {
    passages: Vec<Passage>,
    calls: Mutex<Vec<(String, usize)>>,
    /// Transient failures to emit before the first success.
    failures_left: AtomicUsize,
}

impl StaticRetriever {
    pub fn new(passages: Vec<Passage>) -> Self {
        Self {
            passages,
            calls: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(0),
        }
    }

    /// Fail the first `n` calls with an embedding network error.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.failures_left = AtomicUsize::new(n);
        self
    }

    /// Passages with contents `texts[i]` and sources `doc{i}.md`.
    pub fn with_texts(texts: &[&str]) -> Self {
        Self::new(
            texts
                .iter()
                .enumerate()
                .map(|(i, t)| Passage::new(format!("doc{i}.md"), *t, i))
                .collect(),
        )
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// `(query, k)` for every call so far.
    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    fn name(&self) -> &str {
        "static"
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Passage>, RetrievalError> {
        self.calls.lock().unwrap().push((query.to_string(), k));

        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RetrievalError::Embedding(ProviderError::Network(
                "connection reset".into(),
            )));
        }

        Ok(self.passages.iter().take(k).cloned().collect())
    }
}

/// A retriever that never answers.
pub struct HangingRetriever;

#[async_trait]
impl Retriever for HangingRetriever {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn similarity_search(&self, _query: &str, _k: usize) -> Result<Vec<Passage>, RetrievalError> {
        std::future::pending().await
    }
}

/// A retriever whose every call fails with the given error.
pub struct FailingRetriever(pub RetrievalError);

#[async_trait]
impl Retriever for FailingRetriever {
    fn name(&self) -> &str {
        "failing"
    }

    async fn similarity_search(&self, _query: &str, _k: usize) -> Result<Vec<Passage>, RetrievalError> {
        Err(self.0.clone())
    }
}
