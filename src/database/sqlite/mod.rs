use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::models::{
    ChunkMetadata, Lesson, LessonChunk, NewLesson, NewLessonChunk, Visibility,
};
use crate::database::sqlite::queries::{LessonChunkQueries, LessonQueries};
use crate::database::{LessonStore, VisibilityFilter};


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

const DATABASE_FILE_NAME: &str = "lessons.db";

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join(DATABASE_FILE_NAME)).await
    }

    // Lesson operations
    #[inline]
    pub async fn create_lesson(&self, lesson: NewLesson) -> Result<Lesson> {
        LessonQueries::create(&self.pool, lesson).await
    }

    #[inline]
    pub async fn get_lesson(&self, id: &str) -> Result<Option<Lesson>> {
        LessonQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn list_lessons(&self, owner_id: Option<&str>) -> Result<Vec<Lesson>> {
        match owner_id {
            Some(owner) => LessonQueries::list_by_owner(&self.pool, owner).await,
            None => LessonQueries::list_all(&self.pool).await,
        }
    }

    #[inline]
    pub async fn update_lesson_content(&self, id: &str, content: &str) -> Result<Option<Lesson>> {
        LessonQueries::update_content(&self.pool, id, content).await
    }

    #[inline]
    pub async fn set_lesson_visibility(&self, id: &str, visibility: Visibility) -> Result<bool> {
        LessonQueries::update_visibility(&self.pool, id, visibility).await
    }

    #[inline]
    pub async fn delete_lesson(&self, id: &str) -> Result<bool> {
        LessonQueries::delete(&self.pool, id).await
    }

    #[inline]
    pub async fn count_lessons(&self) -> Result<i64> {
        LessonQueries::count(&self.pool).await
    }

    // Chunk operations
    #[inline]
    pub async fn replace_lesson_chunks(
        &self,
        lesson_id: &str,
        chunks: Vec<NewLessonChunk>,
    ) -> Result<usize> {
        LessonChunkQueries::replace_for_lesson(&self.pool, lesson_id, chunks).await
    }

    #[inline]
    pub async fn get_chunks_for_lesson(&self, lesson_id: &str) -> Result<Vec<LessonChunk>> {
        LessonChunkQueries::list_by_lesson(&self.pool, lesson_id).await
    }

    #[inline]
    pub async fn list_all_chunks(&self) -> Result<Vec<LessonChunk>> {
        LessonChunkQueries::list_all(&self.pool).await
    }

    #[inline]
    pub async fn count_chunks(&self) -> Result<i64> {
        LessonChunkQueries::count(&self.pool).await
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("Failed to vacuum database")?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}

#[async_trait]
impl LessonStore for Database {
    async fn fetch_chunks_for_visibility(
        &self,
        filter: &VisibilityFilter,
    ) -> Result<Vec<LessonChunk>> {
        LessonChunkQueries::list_visible(&self.pool, filter).await
    }

    async fn fetch_metadata(&self, chunk_ids: &[String]) -> Result<HashMap<String, ChunkMetadata>> {
        LessonChunkQueries::fetch_metadata(&self.pool, chunk_ids).await
    }
}
