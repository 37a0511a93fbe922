use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{IndexError, IndexKind, ScoredChunk, VectorIndex, cosine_similarity, rank_top_k};
use crate::database::{LessonChunk, LessonStore, VisibilityFilter};

/// Exact cosine scan over every chunk the requester may see
///
/// Chunks are loaded fresh from the lesson store on each call, so concurrent
/// searches never share candidate buffers.
#[derive(Clone)]
pub struct LocalVectorIndex {
    store: Arc<dyn LessonStore>,
    dimension: usize,
}

impl LocalVectorIndex {
    #[inline]
    pub fn new(store: Arc<dyn LessonStore>, dimension: usize) -> Self {
        Self { store, dimension }
    }

    /// Score `chunks` against `query` and keep the best `top_k`
    ///
    /// Chunks stored with another dimension, or outside `filter`, never become candidates.
    #[inline]
    pub fn scan(
        &self,
        query: &[f32],
        chunks: &[LessonChunk],
        filter: &VisibilityFilter,
        top_k: usize,
    ) -> Vec<ScoredChunk> {
        let mut skipped = 0usize;
        let scored: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|chunk| {
                if chunk.embedding.len() == self.dimension {
                    true
                } else {
                    skipped += 1;
                    false
                }
            })
            .filter(|chunk| filter.allows(&chunk.owner_id, chunk.visibility))
            .map(|chunk| ScoredChunk::new(chunk.id.as_str(), cosine_similarity(query, &chunk.embedding)))
            .collect();

        if skipped > 0 {
            warn!(
                "Skipped {} chunks whose embedding dimension is not {}",
                skipped, self.dimension
            );
        }

        debug!("Local scan scored {} candidates", scored.len());
        rank_top_k(scored, top_k)
    }
}

#[async_trait]
impl VectorIndex for LocalVectorIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Local
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &VisibilityFilter,
        timeout: Duration,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::Unavailable {
                kind: IndexKind::Local,
                message: format!(
                    "query has {} dimensions, index expects {}",
                    query.len(),
                    self.dimension
                ),
            });
        }

        let chunks = tokio::time::timeout(timeout, self.store.fetch_chunks_for_visibility(filter))
            .await
            .map_err(|_| IndexError::Timeout {
                kind: IndexKind::Local,
                timeout,
            })?
            .map_err(|e| IndexError::Unavailable {
                kind: IndexKind::Local,
                message: format!("{e:#}"),
            })?;

        Ok(self.scan(query, &chunks, filter, top_k))
    }

    async fn health_check(&self) -> bool {
        true
    }
}
