// Knowledge retrieval
// Embeds a query, searches the remote index with a local fallback, and hydrates ranked lesson chunks


use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, RetrievalConfig};
use crate::database::{
    ChunkMetadata, Database, LessonMetadata, LessonStore, VectorStore, VisibilityFilter,
};
use crate::embeddings::EmbeddingProvider;
use crate::index::{
    IndexKind, LocalVectorIndex, RemoteVectorIndex, ScoredChunk, VectorIndex, score_order,
};
use crate::{CoachError, Result};

/// Where a retrieval gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStage {
    Embedding,
    Searching,
    Hydrating,
}

impl std::fmt::Display for RetrievalStage {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            RetrievalStage::Embedding => write!(f, "embedding"),
            RetrievalStage::Searching => write!(f, "searching"),
            RetrievalStage::Hydrating => write!(f, "hydrating"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Retrieval failed while {stage}: {message}")]
    RetrievalFailed {
        stage: RetrievalStage,
        message: String,
    },
}

impl RetrievalError {
    fn failed(stage: RetrievalStage, error: impl std::fmt::Display) -> Self {
        Self::RetrievalFailed {
            stage,
            message: error.to_string(),
        }
    }
}

/// A ranked lesson chunk with the metadata of its lesson
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    /// Cosine similarity to the query, higher is more relevant
    pub score: f32,
    pub content: String,
    pub heading_path: String,
    #[serde(flatten)]
    pub lesson: LessonMetadata,
}

impl SearchResult {
    fn hydrate(scored: ScoredChunk, metadata: ChunkMetadata) -> Self {
        Self {
            chunk_id: scored.chunk_id,
            score: scored.score,
            content: metadata.content,
            heading_path: metadata.heading_path,
            lesson: metadata.lesson,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResponse {
    pub results: Vec<SearchResult>,
    /// Set when a configured remote index could not serve the request
    pub degraded: bool,
    /// Strategy that produced the results
    pub backend: IndexKind,
}

/// Finds the lesson chunks most relevant to a query
///
/// The remote index serves queries while its last health check passed. Any
/// remote failure switches that single call to the exact local scan and marks
/// the response degraded. Availability only changes through
/// [`KnowledgeRetriever::refresh_availability`], which also opens a configured
/// remote index that could not be opened at startup.
///
/// Every hit is checked against the lesson store's owner and visibility
/// before it is returned, whichever index produced it.
pub struct KnowledgeRetriever {
    provider: EmbeddingProvider,
    store: Arc<dyn LessonStore>,
    local: Arc<dyn VectorIndex>,
    remote: RwLock<Option<Arc<dyn VectorIndex>>>,
    /// Vector index settings to retry while `remote` is still unopened
    reopen: Option<Config>,
    remote_configured: bool,
    remote_available: AtomicBool,
    limits: RetrievalConfig,
}

impl KnowledgeRetriever {
    /// Retriever using only the exact local scan over `store`
    #[inline]
    pub fn new(
        provider: EmbeddingProvider,
        store: Arc<dyn LessonStore>,
        limits: RetrievalConfig,
    ) -> Self {
        let local = Arc::new(LocalVectorIndex::new(
            Arc::clone(&store),
            provider.dimension(),
        ));

        Self {
            provider,
            store,
            local,
            remote: RwLock::new(None),
            reopen: None,
            remote_configured: false,
            remote_available: AtomicBool::new(false),
            limits,
        }
    }

    /// Put a remote index in front of the local scan, assumed available until a health check says otherwise
    #[inline]
    pub fn with_remote_index(mut self, remote: Arc<dyn VectorIndex>) -> Self {
        self.remote = RwLock::new(Some(remote));
        self.reopen = None;
        self.remote_configured = true;
        self.remote_available.store(true, Ordering::Release);
        self
    }

    #[inline]
    pub fn with_local_index(mut self, local: Arc<dyn VectorIndex>) -> Self {
        self.local = local;
        self
    }

    /// Build the embedding provider, lesson store and vector indexes described by `config`
    ///
    /// A remote index that cannot be opened leaves the retriever on the local
    /// scan with responses marked degraded until a later health check opens it.
    /// A dimension mismatch in the remote table is a configuration error and is
    /// returned.
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let provider = EmbeddingProvider::from_config(config)?;
        let database = Database::initialize_from_config_dir(config.get_base_dir()).await?;
        let store: Arc<dyn LessonStore> = Arc::new(database);
        let mut retriever = Self::new(provider, store, config.retrieval.clone());

        if !config.vector_index.enabled {
            info!("Remote vector index disabled, using local similarity scan");
            return Ok(retriever);
        }

        match VectorStore::new(config).await {
            Ok(vector_store) => {
                retriever =
                    retriever.with_remote_index(Arc::new(RemoteVectorIndex::new(Arc::new(vector_store))));
                retriever.refresh_availability().await;
            }
            Err(CoachError::Config(e)) => return Err(CoachError::Config(e)),
            Err(e) => {
                warn!(
                    "Remote vector index at {} could not be opened, serving degraded results: {}",
                    config.vector_index_uri(),
                    e
                );
                retriever.remote_configured = true;
                retriever.reopen = Some(config.clone());
            }
        }

        Ok(retriever)
    }

    #[inline]
    pub fn limits(&self) -> &RetrievalConfig {
        &self.limits
    }

    #[inline]
    pub fn provider(&self) -> &EmbeddingProvider {
        &self.provider
    }

    #[inline]
    pub fn has_remote_index(&self) -> bool {
        self.remote_configured
    }

    #[inline]
    pub fn is_remote_available(&self) -> bool {
        self.remote_available.load(Ordering::Acquire)
    }

    /// Run the remote health check and record the result
    ///
    /// Opens the remote index first if startup could not.
    #[inline]
    pub async fn refresh_availability(&self) -> bool {
        let current = self.remote.read().await.clone();
        let remote = match current {
            Some(remote) => remote,
            None => match self.reopen_remote().await {
                Some(remote) => remote,
                None => return false,
            },
        };

        let healthy = remote.health_check().await;
        let previous = self.remote_available.swap(healthy, Ordering::AcqRel);
        if previous != healthy {
            if healthy {
                info!("Remote vector index is available again");
            } else {
                warn!("Remote vector index failed its health check, using local scan");
            }
        }
        healthy
    }

    async fn reopen_remote(&self) -> Option<Arc<dyn VectorIndex>> {
        let config = self.reopen.as_ref()?;
        match VectorStore::new(config).await {
            Ok(store) => {
                info!(
                    "Opened remote vector index at {}",
                    config.vector_index_uri()
                );
                let opened: Arc<dyn VectorIndex> =
                    Arc::new(RemoteVectorIndex::new(Arc::new(store)));
                let mut slot = self.remote.write().await;
                Some(Arc::clone(slot.get_or_insert(opened)))
            }
            Err(e) => {
                debug!("Remote vector index still cannot be opened: {}", e);
                None
            }
        }
    }

    /// Refresh remote availability every `interval` on a background task
    #[inline]
    pub fn spawn_health_monitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let retriever = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                retriever.refresh_availability().await;
            }
        })
    }

    /// Top `top_k` chunks for `query` visible to `requester_id`, bounded by the configured timeout
    #[inline]
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: i64,
        requester_id: &str,
    ) -> std::result::Result<RetrievalResponse, RetrievalError> {
        self.retrieve_with_timeout(query, top_k, requester_id, self.limits.request_timeout())
            .await
    }

    /// As [`Self::retrieve`], with `timeout` applied to each network call
    #[inline]
    pub async fn retrieve_with_timeout(
        &self,
        query: &str,
        top_k: i64,
        requester_id: &str,
        timeout: Duration,
    ) -> std::result::Result<RetrievalResponse, RetrievalError> {
        let top_k = self.validate_request(query, top_k)?;
        let filter = VisibilityFilter::for_requester(requester_id);

        debug!("Retrieval state: embedding (top_k={})", top_k);
        let vector = self
            .provider
            .embed(query, timeout)
            .await
            .map_err(|e| RetrievalError::failed(RetrievalStage::Embedding, e))?;

        let (scored, backend, degraded) = self.search(&vector, top_k, &filter, timeout).await?;

        debug!(
            "Retrieval state: hydrating {} candidates from {}",
            scored.len(),
            backend
        );
        let results = self.hydrate(scored, top_k, &filter, timeout).await?;

        debug!(
            "Retrieval state: done, {} results (backend={}, degraded={})",
            results.len(),
            backend,
            degraded
        );
        Ok(RetrievalResponse {
            results,
            degraded,
            backend,
        })
    }

    fn validate_request(&self, query: &str, top_k: i64) -> std::result::Result<usize, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidRequest(
                "query must not be blank".to_string(),
            ));
        }

        let max_top_k = i64::from(self.limits.max_top_k);
        if top_k < 1 || top_k > max_top_k {
            return Err(RetrievalError::InvalidRequest(format!(
                "top_k must be between 1 and {max_top_k}, got {top_k}"
            )));
        }

        usize::try_from(top_k).map_err(|e| RetrievalError::InvalidRequest(e.to_string()))
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &VisibilityFilter,
        timeout: Duration,
    ) -> std::result::Result<(Vec<ScoredChunk>, IndexKind, bool), RetrievalError> {
        let remote = if self.is_remote_available() {
            self.remote.read().await.clone()
        } else {
            None
        };

        if let Some(remote) = remote {
            debug!("Retrieval state: searching (remote)");
            match remote.search(vector, top_k, filter, timeout).await {
                Ok(scored) => return Ok((scored, IndexKind::Remote, false)),
                Err(e) => warn!("Remote vector search failed, falling back to local scan: {}", e),
            }
        } else if self.remote_configured {
            debug!("Remote vector index marked unavailable, skipping it");
        }

        debug!("Retrieval state: searching (local)");
        let scored = self
            .local
            .search(vector, top_k, filter, timeout)
            .await
            .map_err(|e| RetrievalError::failed(RetrievalStage::Searching, e))?;

        Ok((scored, IndexKind::Local, self.remote_configured))
    }

    async fn hydrate(
        &self,
        scored: Vec<ScoredChunk>,
        top_k: usize,
        filter: &VisibilityFilter,
        timeout: Duration,
    ) -> std::result::Result<Vec<SearchResult>, RetrievalError> {
        if scored.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_ids: Vec<String> = scored.iter().map(|s| s.chunk_id.clone()).collect();
        let mut metadata: HashMap<String, ChunkMetadata> =
            tokio::time::timeout(timeout, self.store.fetch_metadata(&chunk_ids))
                .await
                .map_err(|_| {
                    RetrievalError::failed(
                        RetrievalStage::Hydrating,
                        format!("lesson store timed out after {timeout:?}"),
                    )
                })?
                .map_err(|e| RetrievalError::failed(RetrievalStage::Hydrating, format!("{e:#}")))?;

        let mut results: Vec<SearchResult> = scored
            .into_iter()
            .filter_map(|candidate| match metadata.remove(&candidate.chunk_id) {
                // The index copy of owner and visibility can lag the lesson store
                Some(meta) if !filter.allows(&meta.lesson.owner_id, meta.lesson.visibility) => {
                    warn!(
                        "Dropping index entry {}: lesson {} is not visible to this requester",
                        candidate.chunk_id, meta.lesson.lesson_id
                    );
                    None
                }
                Some(meta) => Some(SearchResult::hydrate(candidate, meta)),
                None => {
                    warn!(
                        "Dropping stale index entry {}: no such chunk in the lesson store",
                        candidate.chunk_id
                    );
                    None
                }
            })
            .collect();

        results.sort_by(|a, b| score_order(a.score, &a.chunk_id, b.score, &b.chunk_id));
        results.truncate(top_k);
        Ok(results)
    }
}
