// Vector index strategies
// A remote LanceDB index and an exact in-process scan over the lesson store

pub mod local;
pub mod remote;


use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;
use std::time::Duration;
use thiserror::Error;

use crate::database::VisibilityFilter;

pub use local::LocalVectorIndex;
pub use remote::RemoteVectorIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Remote,
    Local,
}

impl std::fmt::Display for IndexKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            IndexKind::Remote => write!(f, "remote"),
            IndexKind::Local => write!(f, "local"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("{kind} vector index unavailable: {message}")]
    Unavailable { kind: IndexKind, message: String },

    #[error("{kind} vector index timed out after {timeout:?}")]
    Timeout { kind: IndexKind, timeout: Duration },
}

/// A candidate chunk and its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f32,
}

impl ScoredChunk {
    #[inline]
    pub fn new(chunk_id: impl Into<String>, score: f32) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            score,
        }
    }
}

/// Nearest-neighbour search restricted to the chunks a requester may see
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn kind(&self) -> IndexKind;

    /// At most `top_k` chunks, ordered by score descending then chunk id ascending
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &VisibilityFilter,
        timeout: Duration,
    ) -> Result<Vec<ScoredChunk>, IndexError>;

    async fn health_check(&self) -> bool;
}

/// `dot(a, b) / (|a| |b|)`, accumulated in f64
///
/// Returns 0 when either vector has zero norm or the lengths differ.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot = x.mul_add(y, dot);
        norm_a = x.mul_add(x, norm_a);
        norm_b = y.mul_add(y, norm_b);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Result ordering: higher score first, ties by ascending chunk id
#[inline]
pub fn score_order(a_score: f32, a_id: &str, b_score: f32, b_id: &str) -> Ordering {
    b_score.total_cmp(&a_score).then_with(|| a_id.cmp(b_id))
}

#[inline]
pub fn compare_scored(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    score_order(a.score, &a.chunk_id, b.score, &b.chunk_id)
}

/// Keep the best `k` candidates in result order
///
/// Selects the k-th element first so only the kept prefix is sorted.
#[inline]
pub fn rank_top_k(mut scored: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    if k == 0 {
        return Vec::new();
    }
    if scored.len() > k {
        scored.select_nth_unstable_by(k - 1, compare_scored);
        scored.truncate(k);
    }
    scored.sort_unstable_by(compare_scored);
    scored
}
