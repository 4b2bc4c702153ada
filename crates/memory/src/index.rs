//! Pre-built vector index reader.
//!
//! The ingestion pipeline writes a JSON document:
//!
//! ```json
//! { "chunks": [ { "id": "...", "source": "...", "content": "...", "embedding": [0.1, ...] } ] }
//! ```
//!
//! The whole index is held in memory and never modified. Queries are
//! embedded through the configured provider and ranked by cosine similarity.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use convrag_core::error::RetrievalError;
use convrag_core::provider::{EmbeddingRequest, Provider};
use convrag_core::retrieval::{Passage, Retriever};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::vector::top_k;

/// One embedded chunk of a source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    chunks: Vec<serde_json::Value>,
}

/// In-memory vector index implementing [`Retriever`].
pub struct VectorIndex {
    chunks: Vec<IndexedChunk>,
    /// Embedding length shared by every kept chunk.
    dim: Option<usize>,
    embedder: Arc<dyn Provider>,
    embedding_model: String,
}

impl VectorIndex {
    /// Load an index file. Malformed chunks, and chunks whose dimension
    /// differs from the first valid one, are skipped with a warning.
    pub fn load(
        path: &Path,
        embedder: Arc<dyn Provider>,
        embedding_model: impl Into<String>,
    ) -> Result<Self, RetrievalError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RetrievalError::IndexUnavailable(format!("{}: {e}", path.display()))
        })?;

        let file: IndexFile = serde_json::from_str(&content).map_err(|e| {
            RetrievalError::IndexUnavailable(format!("{}: {e}", path.display()))
        })?;

        let chunks: Vec<IndexedChunk> = file
            .chunks
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<IndexedChunk>(raw) {
                Ok(chunk) => Some(chunk),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted index chunk");
                    None
                }
            })
            .collect();

        let index = Self::from_chunks(chunks, embedder, embedding_model);
        info!(path = %path.display(), chunks = index.len(), "Vector index loaded");
        Ok(index)
    }

    pub fn from_chunks(
        chunks: Vec<IndexedChunk>,
        embedder: Arc<dyn Provider>,
        embedding_model: impl Into<String>,
    ) -> Self {
        let dim = chunks
            .iter()
            .find(|c| !c.embedding.is_empty())
            .map(|c| c.embedding.len());

        let chunks = chunks
            .into_iter()
            .filter(|c| {
                let ok = Some(c.embedding.len()) == dim;
                if !ok {
                    warn!(id = %c.id, source = %c.source, "Skipping chunk with mismatched embedding");
                }
                ok
            })
            .collect();

        Self {
            chunks,
            dim,
            embedder,
            embedding_model: embedding_model.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RetrievalError> {
        let response = self
            .embedder
            .embed(EmbeddingRequest {
                model: self.embedding_model.clone(),
                inputs: vec![query.to_string()],
            })
            .await?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::IndexUnavailable("embedding response was empty".into()))
    }
}

#[async_trait]
impl Retriever for VectorIndex {
    fn name(&self) -> &str {
        "vector_index"
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Passage>, RetrievalError> {
        if k == 0 {
            return Err(RetrievalError::InvalidQuery("k must be positive".into()));
        }

        // Nothing to rank against: skip the embedding call.
        if self.chunks.is_empty() || query.trim().is_empty() {
            debug!(k, "Empty index or query, returning no passages");
            return Ok(Vec::new());
        }

        let query_embedding = self.embed_query(query).await?;
        if let Some(dim) = self.dim.filter(|&d| d != query_embedding.len()) {
            return Err(RetrievalError::IndexUnavailable(format!(
                "query embedding has {} dimensions but the index has {dim}; \
                 check retrieval.embedding_model",
                query_embedding.len()
            )));
        }

        let ranked = top_k(
            self.chunks.iter().map(|c| c.embedding.as_slice()),
            &query_embedding,
            k,
        );

        Ok(ranked
            .into_iter()
            .enumerate()
            .map(|(rank, (i, score))| {
                let chunk = &self.chunks[i];
                Passage {
                    source: chunk.source.clone(),
                    content: chunk.content.clone(),
                    rank,
                    score,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convrag_core::error::ProviderError;
    use convrag_core::provider::{EmbeddingResponse, ProviderRequest, ProviderResponse};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds "values" as [1,0] and everything else as [0,1], padded with
    /// zeros up to `dims`.
    struct KeywordEmbedder {
        calls: AtomicUsize,
        dims: usize,
    }

    impl KeywordEmbedder {
        fn new() -> Arc<Self> {
            Self::with_dims(2)
        }

        fn with_dims(dims: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                dims,
            })
        }
    }

    #[async_trait]
    impl Provider for KeywordEmbedder {
        fn name(&self) -> &str {
            "keyword"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::NotConfigured("embedding only".into()))
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let embeddings = request
                .inputs
                .iter()
                .map(|t| {
                    let mut v = if t.contains("values") { vec![1.0, 0.0] } else { vec![0.0, 1.0] };
                    v.resize(self.dims, 0.0);
                    v
                })
                .collect();
            Ok(EmbeddingResponse {
                embeddings,
                model: request.model,
                usage: None,
            })
        }
    }

    fn chunk(id: &str, embedding: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            id: id.into(),
            source: format!("docs/{id}.md"),
            content: format!("Content of {id}"),
            embedding,
        }
    }

    fn sample_index(embedder: Arc<KeywordEmbedder>) -> VectorIndex {
        VectorIndex::from_chunks(
            vec![
                chunk("governance", vec![0.0, 1.0]),
                chunk("values", vec![1.0, 0.0]),
                chunk("mixed", vec![0.7, 0.7]),
            ],
            embedder,
            "text-embedding-3-small",
        )
    }

    #[tokio::test]
    async fn ranks_by_similarity_and_assigns_ranks() {
        let index = sample_index(KeywordEmbedder::new());
        let passages = index
            .similarity_search("What are the company values?", 2)
            .await
            .unwrap();

        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].source, "docs/values.md");
        assert_eq!(passages[0].rank, 0);
        assert_eq!(passages[1].source, "docs/mixed.md");
        assert_eq!(passages[1].rank, 1);
        assert!(passages[0].score >= passages[1].score);
    }

    #[tokio::test]
    async fn never_returns_more_than_k() {
        let index = sample_index(KeywordEmbedder::new());
        let passages = index.similarity_search("governance", 30).await.unwrap();
        assert_eq!(passages.len(), 3);
    }

    #[tokio::test]
    async fn deterministic_for_fixed_index() {
        let index = sample_index(KeywordEmbedder::new());
        let a = index.similarity_search("governance", 3).await.unwrap();
        let b = index.similarity_search("governance", 3).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn zero_k_is_invalid() {
        let index = sample_index(KeywordEmbedder::new());
        let err = index.similarity_search("q", 0).await.unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn empty_query_skips_embedding() {
        let embedder = KeywordEmbedder::new();
        let index = sample_index(Arc::clone(&embedder));
        assert!(index.similarity_search("  ", 3).await.unwrap().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn query_from_a_different_embedding_model_is_rejected() {
        let embedder = KeywordEmbedder::with_dims(3);
        let index = sample_index(Arc::clone(&embedder));

        let err = index.similarity_search("values", 3).await.unwrap_err();
        match err {
            RetrievalError::IndexUnavailable(msg) => {
                assert!(msg.contains("3 dimensions"), "{msg}");
                assert!(msg.contains("index has 2"), "{msg}");
            }
            other => panic!("expected IndexUnavailable, got {other:?}"),
        }
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mismatched_dimensions_are_dropped() {
        let index = VectorIndex::from_chunks(
            vec![chunk("a", vec![1.0, 0.0]), chunk("b", vec![1.0]), chunk("c", vec![])],
            KeywordEmbedder::new(),
            "m",
        );
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn load_skips_corrupted_chunks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"chunks": [
                {{"id": "1", "source": "a.md", "content": "alpha", "embedding": [1.0, 0.0]}},
                {{"id": "2", "source": "b.md"}},
                {{"id": "3", "source": "c.md", "content": "gamma", "embedding": [0.0, 1.0]}}
            ]}}"#
        )
        .unwrap();

        let index = VectorIndex::load(file.path(), KeywordEmbedder::new(), "m").unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn missing_file_is_unavailable() {
        let result = VectorIndex::load(
            Path::new("/nonexistent/index.json"),
            KeywordEmbedder::new(),
            "m",
        );
        assert!(matches!(result, Err(RetrievalError::IndexUnavailable(_))));
    }
}
