use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{IndexError, IndexKind, ScoredChunk, VectorIndex, rank_top_k};
use crate::database::{VectorStore, VisibilityFilter};

/// Attempts per search: the first try plus one retry with identical parameters
const SEARCH_ATTEMPTS: u32 = 2;

/// Extra rows fetched past `top_k` so equal distances at the cut are settled by chunk id
const BOUNDARY_MARGIN: usize = 16;

/// Nearest-neighbour search against the LanceDB vector table
#[derive(Clone)]
pub struct RemoteVectorIndex {
    store: Arc<VectorStore>,
}

impl RemoteVectorIndex {
    #[inline]
    pub fn new(store: Arc<VectorStore>) -> Self {
        Self { store }
    }

    #[inline]
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }
}

#[async_trait]
impl VectorIndex for RemoteVectorIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Remote
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &VisibilityFilter,
        timeout: Duration,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let fetch = top_k.saturating_add(BOUNDARY_MARGIN);
        let hits = retry_search(SEARCH_ATTEMPTS, timeout, || async {
            self.store
                .search_similar(query, fetch, filter)
                .await
                .map_err(|e| e.to_string())
        })
        .await?;

        let scored = hits
            .into_iter()
            .map(|hit| ScoredChunk::new(hit.chunk_id, hit.score))
            .collect();
        Ok(rank_top_k(scored, top_k))
    }

    async fn health_check(&self) -> bool {
        self.store.validate_integrity().await
    }
}

/// Run `search` up to `attempts` times, each bounded by `timeout`
pub(crate) async fn retry_search<T, F, Fut>(
    attempts: u32,
    timeout: Duration,
    mut search: F,
) -> Result<T, IndexError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut attempt = 1;
    loop {
        let error = match tokio::time::timeout(timeout, search()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(message)) => IndexError::Unavailable {
                kind: IndexKind::Remote,
                message,
            },
            Err(_) => IndexError::Timeout {
                kind: IndexKind::Remote,
                timeout,
            },
        };

        if attempt >= attempts {
            debug!("Remote search gave up after {} attempts", attempt);
            return Err(error);
        }

        warn!("Remote search attempt {} failed: {}, retrying", attempt, error);
        attempt += 1;
    }
}
