#[cfg(test)]
mod tests;

use anyhow::{Result, bail};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl std::fmt::Display for Visibility {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Visibility {
    type Err = anyhow::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => bail!("Unknown visibility '{other}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Lesson {
    pub id: String,
    pub title: String,
    pub subject: Option<String>,
    pub level: Option<String>,
    pub owner_id: String,
    pub visibility: Visibility,
    pub content: String,
    pub created_date: NaiveDateTime,
    pub updated_date: NaiveDateTime,
}

impl Lesson {
    #[inline]
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    #[inline]
    pub fn metadata(&self) -> LessonMetadata {
        LessonMetadata {
            lesson_id: self.id.clone(),
            title: self.title.clone(),
            subject: self.subject.clone(),
            level: self.level.clone(),
            owner_id: self.owner_id.clone(),
            visibility: self.visibility,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLesson {
    pub title: String,
    pub subject: Option<String>,
    pub level: Option<String>,
    pub owner_id: String,
    pub visibility: Visibility,
    pub content: String,
}

/// Lesson fields copied onto every search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LessonMetadata {
    pub lesson_id: String,
    pub title: String,
    pub subject: Option<String>,
    pub level: Option<String>,
    pub owner_id: String,
    pub visibility: Visibility,
}

/// A stored chunk joined with its lesson, used to hydrate search hits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChunkMetadata {
    pub chunk_id: String,
    pub content: String,
    pub heading_path: String,
    #[sqlx(flatten)]
    pub lesson: LessonMetadata,
}

/// A chunk with its embedding and the access fields of its lesson
#[derive(Debug, Clone, PartialEq)]
pub struct LessonChunk {
    pub id: String,
    pub lesson_id: String,
    pub chunk_index: i64,
    pub heading_path: String,
    pub content: String,
    pub token_count: i64,
    pub owner_id: String,
    pub visibility: Visibility,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLessonChunk {
    pub chunk_index: i64,
    pub heading_path: String,
    pub content: String,
    pub token_count: i64,
    pub embedding: Vec<f32>,
}

#[derive(Debug, FromRow)]
pub(crate) struct LessonChunkRow {
    pub id: String,
    pub lesson_id: String,
    pub chunk_index: i64,
    pub heading_path: String,
    pub content: String,
    pub token_count: i64,
    pub owner_id: String,
    pub visibility: Visibility,
    pub embedding: Vec<u8>,
    pub dimension: i64,
}

impl TryFrom<LessonChunkRow> for LessonChunk {
    type Error = anyhow::Error;

    fn try_from(row: LessonChunkRow) -> Result<Self> {
        let embedding = decode_embedding(&row.embedding)?;
        if embedding.len() as i64 != row.dimension {
            bail!(
                "Chunk {} stores {} values but declares dimension {}",
                row.id,
                embedding.len(),
                row.dimension
            );
        }

        Ok(LessonChunk {
            id: row.id,
            lesson_id: row.lesson_id,
            chunk_index: row.chunk_index,
            heading_path: row.heading_path,
            content: row.content,
            token_count: row.token_count,
            owner_id: row.owner_id,
            visibility: row.visibility,
            embedding,
        })
    }
}

/// Stable chunk identifier derived from the lesson and chunk position
#[inline]
pub fn chunk_id(lesson_id: &str, chunk_index: i64) -> String {
    format!("{lesson_id}-{chunk_index:04}")
}

/// Little-endian f32 encoding used for the `embedding` BLOB column
#[inline]
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[inline]
pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        bail!("Embedding blob length {} is not a multiple of 4", bytes.len());
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
