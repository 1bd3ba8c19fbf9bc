//! Top-k retrieval over an opened [`VectorIndex`].

use crate::embedding::{self, Embedder};
use crate::error::Result;
use crate::index::VectorIndex;
use crate::models::RetrievedChunk;

/// Embeds queries with the index's own embedder and ranks chunks by cosine
/// similarity.
pub struct Retriever<'a> {
    embedder: &'a dyn Embedder,
    index: &'a VectorIndex,
}

impl<'a> Retriever<'a> {
    /// Pair an index with the embedder it was built with.
    ///
    /// Fails with `EmbeddingMismatch` when the embedder's model or dimensions
    /// differ from the index manifest.
    pub fn new(embedder: &'a dyn Embedder, index: &'a VectorIndex) -> Result<Self> {
        index.check_embedder(embedder)?;
        Ok(Self { embedder, index })
    }

    /// Up to `k` chunks, best first. Ties keep index insertion order.
    ///
    /// A blank query or `k == 0` returns nothing without calling the embedder.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = embedding::embed_query(self.embedder, query).await?;
        let hits = self.index.search(&vector, k).await?;
        tracing::debug!(
            k,
            hits = hits.len(),
            top_score = hits.first().map(|h| h.score),
            "retrieved"
        );
        Ok(hits)
    }
}
