#[cfg(test)]
mod tests;

use super::models::*;
use crate::database::VisibilityFilter;
use anyhow::{Context, Result, bail};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

const LESSON_COLUMNS: &str = "SELECT id, title, subject, level, owner_id, visibility, content, \
     created_date, updated_date FROM lessons";

const CHUNK_COLUMNS: &str = "SELECT c.id, c.lesson_id, c.chunk_index, c.heading_path, c.content, \
     c.token_count, c.embedding, c.dimension, l.owner_id, l.visibility \
     FROM lesson_chunks c JOIN lessons l ON l.id = c.lesson_id";

const METADATA_COLUMNS: &str = "SELECT c.id AS chunk_id, c.content, c.heading_path, \
     l.id AS lesson_id, l.title, l.subject, l.level, l.owner_id, l.visibility \
     FROM lesson_chunks c JOIN lessons l ON l.id = c.lesson_id";

// Stays well below SQLite's bound parameter limit
const METADATA_BATCH_SIZE: usize = 500;

pub struct LessonQueries;

impl LessonQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_lesson: NewLesson) -> Result<Lesson> {
        if new_lesson.owner_id.trim().is_empty() {
            bail!("Lesson owner must not be empty");
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO lessons (id, title, subject, level, owner_id, visibility, content, created_date, updated_date) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new_lesson.title)
        .bind(&new_lesson.subject)
        .bind(&new_lesson.level)
        .bind(&new_lesson.owner_id)
        .bind(new_lesson.visibility)
        .bind(&new_lesson.content)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create lesson")?;

        Self::get_by_id(pool, &id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created lesson"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Lesson>> {
        let lesson = sqlx::query_as::<_, Lesson>(&format!("{LESSON_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get lesson by id")?;

        Ok(lesson)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Lesson>> {
        let lessons = sqlx::query_as::<_, Lesson>(&format!(
            "{LESSON_COLUMNS} ORDER BY created_date DESC, id"
        ))
        .fetch_all(pool)
        .await
        .context("Failed to list lessons")?;

        Ok(lessons)
    }

    #[inline]
    pub async fn list_by_owner(pool: &SqlitePool, owner_id: &str) -> Result<Vec<Lesson>> {
        let lessons = sqlx::query_as::<_, Lesson>(&format!(
            "{LESSON_COLUMNS} WHERE owner_id = ? ORDER BY created_date DESC, id"
        ))
        .bind(owner_id)
        .fetch_all(pool)
        .await
        .context("Failed to list lessons by owner")?;

        Ok(lessons)
    }

    #[inline]
    pub async fn update_content(
        pool: &SqlitePool,
        id: &str,
        content: &str,
    ) -> Result<Option<Lesson>> {
        let result = sqlx::query("UPDATE lessons SET content = ?, updated_date = ? WHERE id = ?")
            .bind(content)
            .bind(Utc::now().naive_utc())
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to update lesson content")?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Self::get_by_id(pool, id).await
    }

    #[inline]
    pub async fn update_visibility(
        pool: &SqlitePool,
        id: &str,
        visibility: Visibility,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE lessons SET visibility = ?, updated_date = ? WHERE id = ?")
                .bind(visibility)
                .bind(Utc::now().naive_utc())
                .bind(id)
                .execute(pool)
                .await
                .context("Failed to update lesson visibility")?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a lesson; its chunks go with it through the foreign key cascade
    #[inline]
    pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM lessons WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete lesson")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM lessons")
            .fetch_one(pool)
            .await
            .context("Failed to count lessons")
    }
}

pub struct LessonChunkQueries;

impl LessonChunkQueries {
    /// Replace every chunk of a lesson in one transaction
    #[inline]
    pub async fn replace_for_lesson(
        pool: &SqlitePool,
        lesson_id: &str,
        chunks: Vec<NewLessonChunk>,
    ) -> Result<usize> {
        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for chunk replacement")?;

        sqlx::query("DELETE FROM lesson_chunks WHERE lesson_id = ?")
            .bind(lesson_id)
            .execute(&mut *transaction)
            .await
            .context("Failed to delete existing lesson chunks")?;

        let count = chunks.len();
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO lesson_chunks (id, lesson_id, chunk_index, heading_path, content, token_count, embedding, dimension) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(chunk_id(lesson_id, chunk.chunk_index))
            .bind(lesson_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.heading_path)
            .bind(&chunk.content)
            .bind(chunk.token_count)
            .bind(encode_embedding(&chunk.embedding))
            .bind(chunk.embedding.len() as i64)
            .execute(&mut *transaction)
            .await
            .context("Failed to insert lesson chunk")?;
        }

        transaction
            .commit()
            .await
            .context("Failed to commit chunk replacement")?;

        debug!("Stored {} chunks for lesson {}", count, lesson_id);
        Ok(count)
    }

    #[inline]
    pub async fn list_by_lesson(pool: &SqlitePool, lesson_id: &str) -> Result<Vec<LessonChunk>> {
        let rows = sqlx::query_as::<_, LessonChunkRow>(&format!(
            "{CHUNK_COLUMNS} WHERE c.lesson_id = ? ORDER BY c.chunk_index"
        ))
        .bind(lesson_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chunks by lesson")?;

        Ok(decode_rows(rows))
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<LessonChunk>> {
        let rows = sqlx::query_as::<_, LessonChunkRow>(&format!("{CHUNK_COLUMNS} ORDER BY c.id"))
            .fetch_all(pool)
            .await
            .context("Failed to list chunks")?;

        Ok(decode_rows(rows))
    }

    /// Chunks of public lessons plus the requester's own lessons
    #[inline]
    pub async fn list_visible(
        pool: &SqlitePool,
        filter: &VisibilityFilter,
    ) -> Result<Vec<LessonChunk>> {
        // Owners are never empty, so an anonymous requester only matches public lessons
        let requester = filter.requester_id.as_deref().unwrap_or_default();

        let rows = sqlx::query_as::<_, LessonChunkRow>(&format!(
            "{CHUNK_COLUMNS} WHERE l.visibility = 'public' OR l.owner_id = ? ORDER BY c.id"
        ))
        .bind(requester)
        .fetch_all(pool)
        .await
        .context("Failed to list visible chunks")?;

        Ok(decode_rows(rows))
    }

    /// Chunk and lesson metadata keyed by chunk id; unknown ids are absent from the map
    #[inline]
    pub async fn fetch_metadata(
        pool: &SqlitePool,
        chunk_ids: &[String],
    ) -> Result<HashMap<String, ChunkMetadata>> {
        let mut metadata = HashMap::with_capacity(chunk_ids.len());

        for batch in chunk_ids.chunks(METADATA_BATCH_SIZE) {
            let mut builder = QueryBuilder::<Sqlite>::new(METADATA_COLUMNS);
            builder.push(" WHERE c.id IN (");
            let mut separated = builder.separated(", ");
            for id in batch {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");

            let rows = builder
                .build_query_as::<ChunkMetadata>()
                .fetch_all(pool)
                .await
                .context("Failed to fetch chunk metadata")?;

            metadata.extend(rows.into_iter().map(|row| (row.chunk_id.clone(), row)));
        }

        Ok(metadata)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM lesson_chunks")
            .fetch_one(pool)
            .await
            .context("Failed to count lesson chunks")
    }

    #[inline]
    pub async fn count_by_lesson(pool: &SqlitePool, lesson_id: &str) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM lesson_chunks WHERE lesson_id = ?")
            .bind(lesson_id)
            .fetch_one(pool)
            .await
            .context("Failed to count lesson chunks by lesson")
    }
}

fn decode_rows(rows: Vec<LessonChunkRow>) -> Vec<LessonChunk> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            LessonChunk::try_from(row)
                .inspect_err(|e| warn!("Skipping unreadable chunk {}: {}", id, e))
                .ok()
        })
        .collect()
}
