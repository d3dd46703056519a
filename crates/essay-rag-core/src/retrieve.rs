//! Retriever: query text → top-k essay passages.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::index::VectorIndex;
use crate::models::RetrievalResult;

/// Default number of passages fetched per question.
pub const DEFAULT_K: usize = 3;

/// Embeds a query and searches the vector index with it.
///
/// Read-only: never writes to the index.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Fetch at most `k` documents in descending similarity order.
    ///
    /// Returns `InvalidRequest` for a blank query or `k == 0`, and
    /// `RetrievalUnavailable` if embedding or search fails. Finding
    /// nothing is a successful, empty result.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult, RagError> {
        if query.trim().is_empty() {
            return Err(RagError::invalid("query must not be empty"));
        }
        if k == 0 {
            return Err(RagError::invalid("k must be >= 1"));
        }

        let query_vec = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| RagError::retrieval(e.context("query embedding failed")))?;

        let mut documents = self
            .index
            .search(&query_vec, k)
            .await
            .map_err(|e| {
                RagError::retrieval(e.context(format!("{} search failed", self.index.name())))
            })?;

        // Backends are asked for `k` ordered results; enforce both anyway.
        documents.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        documents.truncate(k);

        debug!(query, found = documents.len(), k, "retrieved documents");
        Ok(RetrievalResult {
            query: query.to_string(),
            documents,
        })
    }
}
