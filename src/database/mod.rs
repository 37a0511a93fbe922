// Database module
// SQLite holds lessons and chunk embeddings, LanceDB holds the remote vector index

pub mod lancedb;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

pub use self::lancedb::VectorRecord;
pub use self::lancedb::vector_store::VectorStore;
pub use sqlite::Database;
pub use sqlite::models::{
    ChunkMetadata, Lesson, LessonChunk, LessonMetadata, NewLesson, NewLessonChunk, Visibility,
};

/// Which lessons a requester may see: every public lesson plus their own
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityFilter {
    /// `None` for anonymous requests, which see public lessons only
    pub requester_id: Option<String>,
}

impl VisibilityFilter {
    #[inline]
    pub fn for_requester(requester_id: &str) -> Self {
        let requester_id = requester_id.trim();
        Self {
            requester_id: (!requester_id.is_empty()).then(|| requester_id.to_string()),
        }
    }

    #[inline]
    pub fn allows(&self, owner_id: &str, visibility: Visibility) -> bool {
        visibility == Visibility::Public || self.requester_id.as_deref() == Some(owner_id)
    }

    /// LanceDB `only_if` expression with single quotes escaped
    #[inline]
    pub fn to_predicate(&self) -> String {
        match &self.requester_id {
            Some(requester) => format!(
                "visibility = 'public' OR owner_id = '{}'",
                requester.replace('\'', "''")
            ),
            None => "visibility = 'public'".to_string(),
        }
    }
}

/// Read access to lesson chunks used by retrieval
#[async_trait]
pub trait LessonStore: Send + Sync {
    /// Every chunk visible under `filter`, with its embedding
    async fn fetch_chunks_for_visibility(&self, filter: &VisibilityFilter)
    -> Result<Vec<LessonChunk>>;

    /// Metadata for the given chunk ids. Ids with no stored chunk are absent from the map.
    async fn fetch_metadata(&self, chunk_ids: &[String]) -> Result<HashMap<String, ChunkMetadata>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_requester_is_anonymous() {
        assert_eq!(VisibilityFilter::for_requester("  ").requester_id, None);
        assert_eq!(
            VisibilityFilter::for_requester(" alice ").requester_id.as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn filter_allows_public_and_own_lessons() {
        let filter = VisibilityFilter::for_requester("alice");
        assert!(filter.allows("bob", Visibility::Public));
        assert!(filter.allows("alice", Visibility::Private));
        assert!(!filter.allows("bob", Visibility::Private));

        let anonymous = VisibilityFilter::default();
        assert!(anonymous.allows("bob", Visibility::Public));
        assert!(!anonymous.allows("", Visibility::Private));
    }

    #[test]
    fn predicate_escapes_quotes() {
        assert_eq!(
            VisibilityFilter::for_requester("o'brien").to_predicate(),
            "visibility = 'public' OR owner_id = 'o''brien'"
        );
        assert_eq!(
            VisibilityFilter::default().to_predicate(),
            "visibility = 'public'"
        );
    }
}
