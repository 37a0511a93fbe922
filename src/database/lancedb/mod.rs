// LanceDB vector index
// One row per lesson chunk, carrying the fields needed to filter by visibility


pub mod vector_store;

use serde::{Deserialize, Serialize};

use super::sqlite::models::{LessonChunk, Visibility};

/// Row stored in the `lesson_vectors` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Chunk id, shared with the SQLite `lesson_chunks` row
    pub id: String,
    pub vector: Vec<f32>,
    pub lesson_id: String,
    pub owner_id: String,
    pub visibility: Visibility,
}

impl From<&LessonChunk> for VectorRecord {
    #[inline]
    fn from(chunk: &LessonChunk) -> Self {
        Self {
            id: chunk.id.clone(),
            vector: chunk.embedding.clone(),
            lesson_id: chunk.lesson_id.clone(),
            owner_id: chunk.owner_id.clone(),
            visibility: chunk.visibility,
        }
    }
}
