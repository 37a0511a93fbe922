// Ingest module
// Turns lesson markdown into embedded chunks in SQLite and the LanceDB vector index

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError};
use crate::database::{
    Database, Lesson, NewLesson, NewLessonChunk, VectorRecord, VectorStore, Visibility,
};
use crate::embeddings::{ChunkingConfig, ContentChunk, EmbeddingProvider, chunk_lesson};

/// Chunks embedded per provider call, each call bounded by the request timeout
const EMBED_BATCH_SIZE: usize = 32;

/// Records written to LanceDB per batch when rebuilding the index
const REBUILD_BATCH_SIZE: usize = 256;

/// Outcome of ingesting one lesson
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub lesson: Lesson,
    pub chunk_count: usize,
}

/// Writes lessons to the lesson store and keeps the vector index in step
pub struct LessonIngestor {
    database: Database,
    provider: EmbeddingProvider,
    vector_store: Option<Arc<VectorStore>>,
    chunking: ChunkingConfig,
    timeout: Duration,
}

impl LessonIngestor {
    /// Refuses a vector store whose dimension differs from the provider's
    #[inline]
    pub fn new(
        database: Database,
        provider: EmbeddingProvider,
        vector_store: Option<Arc<VectorStore>>,
        chunking: ChunkingConfig,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if let Some(store) = vector_store.as_ref() {
            if store.dimension() != provider.dimension() {
                return Err(ConfigError::DimensionMismatch {
                    backend: "lancedb".to_string(),
                    expected: provider.dimension(),
                    actual: store.dimension(),
                });
            }
        }

        Ok(Self {
            database,
            provider,
            vector_store,
            chunking,
            timeout,
        })
    }

    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let database = Database::initialize_from_config_dir(config.get_base_dir())
            .await
            .context("Failed to initialize lesson database")?;
        let provider = EmbeddingProvider::from_config(config)?;

        let vector_store = if config.vector_index.enabled {
            let store = VectorStore::new(config)
                .await
                .context("Failed to open LanceDB vector index")?;
            Some(Arc::new(store))
        } else {
            None
        };

        Ok(Self::new(
            database,
            provider,
            vector_store,
            config.chunking.clone(),
            config.retrieval.request_timeout(),
        )?)
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub fn vector_store(&self) -> Option<&Arc<VectorStore>> {
        self.vector_store.as_ref()
    }

    /// Chunk, embed and store a new lesson
    ///
    /// Embedding happens before anything is written, so a failed embedding
    /// leaves no partial lesson behind. A lesson whose chunks or vectors cannot
    /// be stored is removed again, so retrying does not create a duplicate.
    #[inline]
    pub async fn add_lesson(&self, new_lesson: NewLesson) -> Result<IngestReport> {
        let chunks = chunk_lesson(&new_lesson.title, &new_lesson.content, &self.chunking)
            .context("Failed to chunk lesson")?;
        let embedded = self.embed_chunks(chunks).await?;

        let lesson = self.database.create_lesson(new_lesson).await?;
        let stored = async {
            let chunk_count = self
                .database
                .replace_lesson_chunks(&lesson.id, embedded)
                .await?;
            self.sync_lesson_vectors(&lesson.id).await?;
            Ok::<_, anyhow::Error>(chunk_count)
        }
        .await;

        let chunk_count = match stored {
            Ok(count) => count,
            Err(e) => {
                warn!("Rolling back lesson {} after a failed write: {:#}", lesson.id, e);
                self.rollback_lesson(&lesson.id).await;
                return Err(e);
            }
        };

        info!(
            "Ingested lesson {} ({}) as {} chunks",
            lesson.id, lesson.title, chunk_count
        );
        Ok(IngestReport {
            lesson,
            chunk_count,
        })
    }

    /// Replace a lesson's content and re-embed it. Returns `None` for an unknown lesson.
    #[inline]
    pub async fn update_lesson_content(
        &self,
        lesson_id: &str,
        content: &str,
    ) -> Result<Option<IngestReport>> {
        let Some(existing) = self.database.get_lesson(lesson_id).await? else {
            return Ok(None);
        };

        let chunks = chunk_lesson(&existing.title, content, &self.chunking)
            .context("Failed to chunk lesson")?;
        let embedded = self.embed_chunks(chunks).await?;

        let Some(lesson) = self
            .database
            .update_lesson_content(lesson_id, content)
            .await?
        else {
            return Ok(None);
        };
        let chunk_count = self
            .database
            .replace_lesson_chunks(lesson_id, embedded)
            .await?;
        self.sync_lesson_vectors(lesson_id).await?;

        info!("Re-embedded lesson {} as {} chunks", lesson_id, chunk_count);
        Ok(Some(IngestReport {
            lesson,
            chunk_count,
        }))
    }

    /// Returns whether the lesson exists
    ///
    /// The store being narrowed is written first: the vector index when a
    /// lesson turns private, SQLite when it turns public. A failure between
    /// the two writes leaves the lesson less visible, never more.
    #[inline]
    pub async fn set_visibility(&self, lesson_id: &str, visibility: Visibility) -> Result<bool> {
        if self.database.get_lesson(lesson_id).await?.is_none() {
            return Ok(false);
        }

        if visibility == Visibility::Private {
            self.update_index_visibility(lesson_id, visibility).await?;
        }
        if !self
            .database
            .set_lesson_visibility(lesson_id, visibility)
            .await?
        {
            return Ok(false);
        }
        if visibility == Visibility::Public {
            self.update_index_visibility(lesson_id, visibility).await?;
        }

        info!("Lesson {} is now {}", lesson_id, visibility);
        Ok(true)
    }

    /// Remove a lesson, its chunks and its vectors. Returns whether the lesson existed.
    #[inline]
    pub async fn delete_lesson(&self, lesson_id: &str) -> Result<bool> {
        let deleted = self.database.delete_lesson(lesson_id).await?;

        // Vectors are removed even when SQLite has no such lesson, to clear stale entries
        if let Some(store) = self.vector_store.as_ref() {
            store
                .delete_lesson(lesson_id)
                .await
                .context("Failed to delete lesson vectors")?;
        }

        if deleted {
            info!("Deleted lesson {}", lesson_id);
        }
        Ok(deleted)
    }

    /// Recreate the vector table from the chunks stored in SQLite
    ///
    /// Returns the number of vectors written.
    #[inline]
    pub async fn rebuild_vector_index(&self) -> Result<usize> {
        let Some(store) = self.vector_store.as_ref() else {
            anyhow::bail!("Remote vector index is disabled in the configuration");
        };

        let chunks = self.database.list_all_chunks().await?;
        let dimension = store.dimension();
        let (records, mismatched): (Vec<VectorRecord>, Vec<VectorRecord>) = chunks
            .iter()
            .map(VectorRecord::from)
            .partition(|record| record.vector.len() == dimension);
        if !mismatched.is_empty() {
            warn!(
                "Skipping {} chunks whose embedding dimension is not {}; re-embed their lessons",
                mismatched.len(),
                dimension
            );
        }

        store.reset().await.context("Failed to reset vector table")?;

        let bar = if console::user_attended_stderr() {
            ProgressBar::new(records.len() as u64).with_style(
                ProgressStyle::with_template("{bar:40} [{pos}/{len}] Indexing {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            )
        } else {
            ProgressBar::hidden()
        };

        for batch in records.chunks(REBUILD_BATCH_SIZE) {
            store
                .add_records(batch)
                .await
                .context("Failed to write vectors")?;
            bar.inc(batch.len() as u64);
        }
        bar.finish_with_message("done");

        if store.create_vector_index().await? {
            info!("Built ANN index over {} vectors", records.len());
        }
        store.optimize().await?;

        info!("Rebuilt vector index with {} vectors", records.len());
        Ok(records.len())
    }

    async fn update_index_visibility(&self, lesson_id: &str, visibility: Visibility) -> Result<()> {
        if let Some(store) = self.vector_store.as_ref() {
            store
                .update_visibility(lesson_id, visibility)
                .await
                .context("Failed to update visibility in vector index")?;
        }
        Ok(())
    }

    /// Best effort: the original write error is what the caller sees
    async fn rollback_lesson(&self, lesson_id: &str) {
        if let Err(e) = self.database.delete_lesson(lesson_id).await {
            warn!("Failed to remove lesson {} from SQLite: {:#}", lesson_id, e);
        }
        if let Some(store) = self.vector_store.as_ref() {
            if let Err(e) = store.delete_lesson(lesson_id).await {
                warn!("Failed to remove vectors of lesson {}: {}", lesson_id, e);
            }
        }
    }

    async fn embed_chunks(&self, chunks: Vec<ContentChunk>) -> Result<Vec<NewLessonChunk>> {
        let mut embedded = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(embedding_text).collect();
            let vectors = self
                .provider
                .embed_batch(&texts, self.timeout)
                .await
                .context("Failed to embed lesson chunks")?;

            for (chunk, embedding) in batch.iter().zip(vectors) {
                embedded.push(NewLessonChunk {
                    chunk_index: chunk.chunk_index as i64,
                    heading_path: chunk.heading_path.clone(),
                    content: chunk.content.clone(),
                    token_count: chunk.token_count as i64,
                    embedding,
                });
            }
        }

        debug!("Embedded {} chunks", embedded.len());
        Ok(embedded)
    }

    async fn sync_lesson_vectors(&self, lesson_id: &str) -> Result<()> {
        let Some(store) = self.vector_store.as_ref() else {
            return Ok(());
        };

        let records: Vec<VectorRecord> = self
            .database
            .get_chunks_for_lesson(lesson_id)
            .await?
            .iter()
            .map(VectorRecord::from)
            .collect();

        store
            .delete_lesson(lesson_id)
            .await
            .context("Failed to clear previous lesson vectors")?;
        store
            .add_records(&records)
            .await
            .context("Failed to store lesson vectors")?;

        debug!("Synced {} vectors for lesson {}", records.len(), lesson_id);
        Ok(())
    }
}

/// Heading path and content, so section context contributes to the embedding
fn embedding_text(chunk: &ContentChunk) -> String {
    if chunk.heading_path.is_empty() {
        chunk.content.clone()
    } else {
        format!("{}\n\n{}", chunk.heading_path, chunk.content)
    }
}
