use super::*;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

async fn create_test_pool() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true)
                .foreign_keys(true),
        )
        .await
        .expect("Failed to create test pool");

    sqlx::raw_sql(include_str!("../migrations/001_initial_schema.sql"))
        .execute(&pool)
        .await
        .expect("Failed to run migrations");

    (temp_dir, pool)
}

fn new_lesson(title: &str, owner: &str, visibility: Visibility) -> NewLesson {
    NewLesson {
        title: title.to_string(),
        subject: Some("science".to_string()),
        level: Some("beginner".to_string()),
        owner_id: owner.to_string(),
        visibility,
        content: format!("# {title}\n\nBody"),
    }
}

fn new_chunk(index: i64, embedding: Vec<f32>) -> NewLessonChunk {
    NewLessonChunk {
        chunk_index: index,
        heading_path: "Intro".to_string(),
        content: format!("chunk {index}"),
        token_count: 2,
        embedding,
    }
}

#[tokio::test]
async fn lesson_crud_operations() {
    let (_temp_dir, pool) = create_test_pool().await;

    let lesson = LessonQueries::create(&pool, new_lesson("Cells", "alice", Visibility::Private))
        .await
        .expect("Failed to create lesson");
    assert_eq!(lesson.title, "Cells");
    assert_eq!(lesson.visibility, Visibility::Private);
    assert!(Uuid::parse_str(&lesson.id).is_ok());

    let updated = LessonQueries::update_content(&pool, &lesson.id, "# Cells\n\nNew body")
        .await
        .expect("Failed to update content")
        .expect("Lesson should exist");
    assert_eq!(updated.content, "# Cells\n\nNew body");
    assert!(updated.updated_date >= lesson.updated_date);

    assert!(
        LessonQueries::update_visibility(&pool, &lesson.id, Visibility::Public)
            .await
            .expect("Failed to update visibility")
    );
    let fetched = LessonQueries::get_by_id(&pool, &lesson.id)
        .await
        .expect("Failed to get lesson")
        .expect("Lesson should exist");
    assert!(fetched.is_public());

    assert!(
        LessonQueries::delete(&pool, &lesson.id)
            .await
            .expect("Failed to delete")
    );
    assert!(
        !LessonQueries::delete(&pool, &lesson.id)
            .await
            .expect("Second delete should not fail")
    );
    assert!(
        LessonQueries::update_content(&pool, &lesson.id, "x")
            .await
            .expect("Update of missing lesson should not fail")
            .is_none()
    );
}

#[tokio::test]
async fn empty_owner_is_rejected() {
    let (_temp_dir, pool) = create_test_pool().await;
    let result = LessonQueries::create(&pool, new_lesson("Orphan", "  ", Visibility::Public)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn list_by_owner_filters() {
    let (_temp_dir, pool) = create_test_pool().await;
    for (title, owner) in [("A", "alice"), ("B", "bob"), ("C", "alice")] {
        LessonQueries::create(&pool, new_lesson(title, owner, Visibility::Private))
            .await
            .expect("Failed to create lesson");
    }

    let alice = LessonQueries::list_by_owner(&pool, "alice")
        .await
        .expect("Failed to list");
    assert_eq!(alice.len(), 2);
    assert!(alice.iter().all(|l| l.owner_id == "alice"));
    assert_eq!(
        LessonQueries::list_all(&pool).await.expect("Failed to list").len(),
        3
    );
    assert_eq!(LessonQueries::count(&pool).await.expect("Failed to count"), 3);
}

#[tokio::test]
async fn chunk_replacement_and_cascade() {
    let (_temp_dir, pool) = create_test_pool().await;
    let lesson = LessonQueries::create(&pool, new_lesson("Atoms", "alice", Visibility::Public))
        .await
        .expect("Failed to create lesson");

    let stored = LessonChunkQueries::replace_for_lesson(
        &pool,
        &lesson.id,
        vec![new_chunk(0, vec![1.0, 0.0]), new_chunk(1, vec![0.0, 1.0])],
    )
    .await
    .expect("Failed to store chunks");
    assert_eq!(stored, 2);

    LessonChunkQueries::replace_for_lesson(&pool, &lesson.id, vec![new_chunk(0, vec![0.6, 0.8])])
        .await
        .expect("Failed to replace chunks");

    let chunks = LessonChunkQueries::list_by_lesson(&pool, &lesson.id)
        .await
        .expect("Failed to list chunks");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].id, format!("{}-0000", lesson.id));
    assert_eq!(chunks[0].embedding, vec![0.6, 0.8]);
    assert_eq!(chunks[0].owner_id, "alice");
    assert_eq!(chunks[0].visibility, Visibility::Public);

    LessonQueries::delete(&pool, &lesson.id)
        .await
        .expect("Failed to delete lesson");
    assert_eq!(
        LessonChunkQueries::count(&pool).await.expect("Failed to count"),
        0
    );
}

#[tokio::test]
async fn visible_chunks_respect_ownership() {
    let (_temp_dir, pool) = create_test_pool().await;

    let public = LessonQueries::create(&pool, new_lesson("Public", "alice", Visibility::Public))
        .await
        .expect("Failed to create lesson");
    let alice_private =
        LessonQueries::create(&pool, new_lesson("Alice notes", "alice", Visibility::Private))
            .await
            .expect("Failed to create lesson");
    let bob_private =
        LessonQueries::create(&pool, new_lesson("Bob notes", "bob", Visibility::Private))
            .await
            .expect("Failed to create lesson");

    for lesson in [&public, &alice_private, &bob_private] {
        LessonChunkQueries::replace_for_lesson(&pool, &lesson.id, vec![new_chunk(0, vec![1.0])])
            .await
            .expect("Failed to store chunks");
    }

    let lesson_ids = |chunks: Vec<LessonChunk>| {
        let mut ids: Vec<String> = chunks.into_iter().map(|c| c.lesson_id).collect();
        ids.sort();
        ids
    };

    let for_bob = LessonChunkQueries::list_visible(&pool, &VisibilityFilter::for_requester("bob"))
        .await
        .expect("Failed to list visible");
    let mut expected = vec![public.id.clone(), bob_private.id.clone()];
    expected.sort();
    assert_eq!(lesson_ids(for_bob), expected);

    let anonymous = LessonChunkQueries::list_visible(&pool, &VisibilityFilter::for_requester(""))
        .await
        .expect("Failed to list visible");
    assert_eq!(lesson_ids(anonymous), vec![public.id.clone()]);
}

#[tokio::test]
async fn metadata_lookup_skips_unknown_ids() {
    let (_temp_dir, pool) = create_test_pool().await;
    let lesson = LessonQueries::create(&pool, new_lesson("Waves", "carol", Visibility::Public))
        .await
        .expect("Failed to create lesson");
    LessonChunkQueries::replace_for_lesson(&pool, &lesson.id, vec![new_chunk(0, vec![1.0])])
        .await
        .expect("Failed to store chunks");

    let known = chunk_id(&lesson.id, 0);
    let metadata =
        LessonChunkQueries::fetch_metadata(&pool, &[known.clone(), "missing-0000".to_string()])
            .await
            .expect("Failed to fetch metadata");

    assert_eq!(metadata.len(), 1);
    let entry = &metadata[&known];
    assert_eq!(entry.lesson.lesson_id, lesson.id);
    assert_eq!(entry.lesson.title, "Waves");
    assert_eq!(entry.lesson.subject.as_deref(), Some("science"));
    assert_eq!(entry.heading_path, "Intro");
    assert_eq!(entry.content, "chunk 0");

    assert!(
        LessonChunkQueries::fetch_metadata(&pool, &[])
            .await
            .expect("Empty lookup should succeed")
            .is_empty()
    );
}
