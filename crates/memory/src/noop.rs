//! No-op retriever: disables retrieval entirely.

use async_trait::async_trait;
use convrag_core::error::RetrievalError;
use convrag_core::retrieval::{Passage, Retriever};

/// A retriever with an empty corpus. Every search returns zero passages.
pub struct NoopRetriever;

#[async_trait]
impl Retriever for NoopRetriever {
    fn name(&self) -> &str {
        "none"
    }

    async fn similarity_search(&self, _query: &str, _k: usize) -> Result<Vec<Passage>, RetrievalError> {
        Ok(Vec::new())
    }
}
