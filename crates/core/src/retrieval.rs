//! Retriever trait: similarity search over a pre-built document index.
//!
//! The index is populated by an external ingestion pipeline; this side only
//! reads it. Results are request-scoped and never persisted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::RetrievalError;

/// A retrieved unit of corpus text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Origin document (file path or URL)
    pub source: String,

    /// The passage text
    pub content: String,

    /// 0 = most relevant
    pub rank: usize,

    /// Similarity score reported by the index
    #[serde(default)]
    pub score: f32,
}

impl Passage {
    pub fn new(source: impl Into<String>, content: impl Into<String>, rank: usize) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            rank,
            score: 0.0,
        }
    }
}

/// Ranked similarity search.
///
/// Implementations must be deterministic for a fixed index, return at most
/// `k` passages sorted by descending relevance, and have no side effects.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &str;

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> std::result::Result<Vec<Passage>, RetrievalError>;
}
