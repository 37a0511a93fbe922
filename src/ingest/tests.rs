use super::*;
use crate::database::VisibilityFilter;
use crate::embeddings::{EmbeddingBackend, EmbeddingError};
use async_trait::async_trait;
use tempfile::TempDir;

const DIMENSION: usize = 8;

/// Bag-of-bytes embedding: stable for equal text, non-zero for any non-empty text
struct ByteEmbedder {
    fail: bool,
}

#[async_trait]
impl EmbeddingBackend for ByteEmbedder {
    fn name(&self) -> &str {
        "bytes"
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        if self.fail {
            return Err(EmbeddingError::unavailable("bytes", "model not loaded"));
        }
        let mut vector = vec![0.0; DIMENSION];
        for byte in text.bytes() {
            vector[usize::from(byte) % DIMENSION] += 1.0;
        }
        Ok(vector)
    }

    async fn health_check(&self) -> std::result::Result<(), EmbeddingError> {
        Ok(())
    }
}

fn provider(fail: bool) -> EmbeddingProvider {
    EmbeddingProvider::new(Arc::new(ByteEmbedder { fail }), None, DIMENSION)
        .expect("dimensions match")
}

async fn create_ingestor(fail: bool) -> Result<(LessonIngestor, TempDir)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    let uri = temp_dir.path().join("vectors");
    let store = VectorStore::open(&uri.to_string_lossy(), "lesson_vectors", DIMENSION).await?;

    let ingestor = LessonIngestor::new(
        database,
        provider(fail),
        Some(Arc::new(store)),
        ChunkingConfig::default(),
        Duration::from_secs(5),
    )?;
    Ok((ingestor, temp_dir))
}

fn new_lesson(owner: &str, visibility: Visibility) -> NewLesson {
    NewLesson {
        title: "Fractions".to_string(),
        subject: Some("math".to_string()),
        level: Some("grade 4".to_string()),
        owner_id: owner.to_string(),
        visibility,
        content: "# Adding\n\nLine up the denominators before adding.\n\n\
                  # Comparing\n\nCross multiply to compare two fractions."
            .to_string(),
    }
}

fn vector_store(ingestor: &LessonIngestor) -> &Arc<VectorStore> {
    ingestor
        .vector_store()
        .expect("test ingestor has a vector store")
}

#[tokio::test]
async fn add_lesson_writes_both_stores() -> Result<()> {
    let (ingestor, _temp_dir) = create_ingestor(false).await?;

    let report = ingestor
        .add_lesson(new_lesson("alice", Visibility::Private))
        .await?;

    assert_eq!(report.chunk_count, 2);
    let chunks = ingestor
        .database()
        .get_chunks_for_lesson(&report.lesson.id)
        .await?;
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].id, format!("{}-0000", report.lesson.id));
    assert!(chunks.iter().all(|c| c.embedding.len() == DIMENSION));
    assert_eq!(vector_store(&ingestor).count().await?, 2);

    let hits = vector_store(&ingestor)
        .search_similar(&chunks[0].embedding, 5, &VisibilityFilter::for_requester("alice"))
        .await?;
    assert_eq!(hits[0].chunk_id, chunks[0].id);
    Ok(())
}

#[tokio::test]
async fn embedding_failure_leaves_no_lesson() -> Result<()> {
    let (ingestor, _temp_dir) = create_ingestor(true).await?;

    assert!(
        ingestor
            .add_lesson(new_lesson("alice", Visibility::Public))
            .await
            .is_err()
    );
    assert_eq!(ingestor.database().count_lessons().await?, 0);
    assert_eq!(vector_store(&ingestor).count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn update_content_replaces_chunks_and_vectors() -> Result<()> {
    let (ingestor, _temp_dir) = create_ingestor(false).await?;
    let report = ingestor
        .add_lesson(new_lesson("alice", Visibility::Public))
        .await?;

    let updated = ingestor
        .update_lesson_content(&report.lesson.id, "A single paragraph about halves.")
        .await?
        .expect("lesson exists");

    assert_eq!(updated.chunk_count, 1);
    assert_eq!(updated.lesson.content, "A single paragraph about halves.");
    assert_eq!(vector_store(&ingestor).count().await?, 1);
    assert_eq!(ingestor.database().count_chunks().await?, 1);

    assert!(
        ingestor
            .update_lesson_content("missing", "text")
            .await?
            .is_none()
    );
    Ok(())
}

#[tokio::test]
async fn visibility_change_reaches_vector_index() -> Result<()> {
    let (ingestor, _temp_dir) = create_ingestor(false).await?;
    let report = ingestor
        .add_lesson(new_lesson("alice", Visibility::Private))
        .await?;
    let query = vec![1.0; DIMENSION];

    let anonymous = VisibilityFilter::default();
    assert!(
        vector_store(&ingestor)
            .search_similar(&query, 5, &anonymous)
            .await?
            .is_empty()
    );

    assert!(
        ingestor
            .set_visibility(&report.lesson.id, Visibility::Public)
            .await?
    );
    assert_eq!(
        vector_store(&ingestor)
            .search_similar(&query, 5, &anonymous)
            .await?
            .len(),
        2
    );

    let lesson = ingestor
        .database()
        .get_lesson(&report.lesson.id)
        .await?
        .expect("lesson exists");
    assert_eq!(lesson.visibility, Visibility::Public);

    assert!(!ingestor.set_visibility("missing", Visibility::Public).await?);
    Ok(())
}

#[tokio::test]
async fn delete_lesson_clears_both_stores() -> Result<()> {
    let (ingestor, _temp_dir) = create_ingestor(false).await?;
    let report = ingestor
        .add_lesson(new_lesson("alice", Visibility::Public))
        .await?;

    assert!(ingestor.delete_lesson(&report.lesson.id).await?);
    assert_eq!(ingestor.database().count_chunks().await?, 0);
    assert_eq!(vector_store(&ingestor).count().await?, 0);

    assert!(!ingestor.delete_lesson(&report.lesson.id).await?);
    Ok(())
}

#[tokio::test]
async fn rebuild_restores_vectors_from_sqlite() -> Result<()> {
    let (ingestor, _temp_dir) = create_ingestor(false).await?;
    ingestor
        .add_lesson(new_lesson("alice", Visibility::Public))
        .await?;
    ingestor
        .add_lesson(new_lesson("bob", Visibility::Private))
        .await?;

    vector_store(&ingestor).reset().await?;
    assert_eq!(vector_store(&ingestor).count().await?, 0);

    assert_eq!(ingestor.rebuild_vector_index().await?, 4);
    assert_eq!(vector_store(&ingestor).count().await?, 4);
    Ok(())
}

#[tokio::test]
async fn vector_store_dimension_must_match_provider() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    let uri = temp_dir.path().join("vectors");
    let store = VectorStore::open(&uri.to_string_lossy(), "lesson_vectors", 4).await?;

    let result = LessonIngestor::new(
        database,
        provider(false),
        Some(Arc::new(store)),
        ChunkingConfig::default(),
        Duration::from_secs(5),
    );
    assert!(matches!(
        result,
        Err(ConfigError::DimensionMismatch {
            expected: DIMENSION,
            actual: 4,
            ..
        })
    ));
    Ok(())
}

#[tokio::test]
async fn rebuild_requires_vector_store() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    let ingestor = LessonIngestor::new(
        database,
        provider(false),
        None,
        ChunkingConfig::default(),
        Duration::from_secs(5),
    )?;

    let report = ingestor
        .add_lesson(new_lesson("alice", Visibility::Public))
        .await?;
    assert_eq!(report.chunk_count, 2);
    assert!(ingestor.rebuild_vector_index().await.is_err());
    Ok(())
}

/// Put a regular file where the LanceDB directory was so every table operation fails
fn break_vector_store(temp_dir: &TempDir) {
    let uri = temp_dir.path().join("vectors");
    std::fs::remove_dir_all(&uri).expect("should remove vector directory");
    std::fs::write(&uri, "not a directory").expect("should write blocker");
}

#[tokio::test]
async fn failed_vector_sync_rolls_back_new_lesson() -> Result<()> {
    let (ingestor, temp_dir) = create_ingestor(false).await?;
    break_vector_store(&temp_dir);

    assert!(
        ingestor
            .add_lesson(new_lesson("alice", Visibility::Public))
            .await
            .is_err()
    );
    assert_eq!(ingestor.database().count_lessons().await?, 0);
    assert_eq!(ingestor.database().count_chunks().await?, 0);
    Ok(())
}

#[tokio::test]
async fn making_private_touches_vector_index_before_sqlite() -> Result<()> {
    let (ingestor, temp_dir) = create_ingestor(false).await?;
    let report = ingestor
        .add_lesson(new_lesson("alice", Visibility::Public))
        .await?;
    break_vector_store(&temp_dir);

    assert!(
        ingestor
            .set_visibility(&report.lesson.id, Visibility::Private)
            .await
            .is_err()
    );

    // Both stores still agree the lesson is public
    let lesson = ingestor
        .database()
        .get_lesson(&report.lesson.id)
        .await?
        .expect("lesson exists");
    assert_eq!(lesson.visibility, Visibility::Public);
    Ok(())
}
