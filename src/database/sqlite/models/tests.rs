use chrono::Utc;

use super::*;

#[test]
fn visibility_display_and_parse() {
    assert_eq!(Visibility::Public.to_string(), "public");
    assert_eq!(Visibility::Private.to_string(), "private");
    assert_eq!(
        "Public".parse::<Visibility>().expect("should parse"),
        Visibility::Public
    );
    assert_eq!(
        " private ".parse::<Visibility>().expect("should parse"),
        Visibility::Private
    );
    assert!("shared".parse::<Visibility>().is_err());
}

#[test]
fn lesson_metadata_copies_access_fields() {
    let now = Utc::now().naive_utc();
    let lesson = Lesson {
        id: "lesson-1".to_string(),
        title: "Fractions".to_string(),
        subject: Some("math".to_string()),
        level: None,
        owner_id: "teacher-7".to_string(),
        visibility: Visibility::Public,
        content: "# Fractions".to_string(),
        created_date: now,
        updated_date: now,
    };

    let metadata = lesson.metadata();
    assert!(lesson.is_public());
    assert_eq!(metadata.lesson_id, "lesson-1");
    assert_eq!(metadata.owner_id, "teacher-7");
    assert_eq!(metadata.subject.as_deref(), Some("math"));
    assert_eq!(metadata.visibility, Visibility::Public);
}

#[test]
fn chunk_ids_are_zero_padded() {
    assert_eq!(chunk_id("abc", 0), "abc-0000");
    assert_eq!(chunk_id("abc", 12), "abc-0012");
    assert!(chunk_id("abc", 2) < chunk_id("abc", 10));
}

#[test]
fn embedding_blob_layout() {
    let bytes = encode_embedding(&[1.0, -0.5]);
    assert_eq!(bytes.len(), 8);
    assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());

    let decoded = decode_embedding(&bytes).expect("should decode");
    assert_eq!(decoded, vec![1.0, -0.5]);

    assert!(decode_embedding(&[0, 0, 0]).is_err());
    assert!(decode_embedding(&[]).expect("empty is valid").is_empty());
}

#[test]
fn chunk_row_dimension_must_match_blob() {
    let row = LessonChunkRow {
        id: "abc-0000".to_string(),
        lesson_id: "abc".to_string(),
        chunk_index: 0,
        heading_path: "Intro".to_string(),
        content: "text".to_string(),
        token_count: 1,
        owner_id: "owner".to_string(),
        visibility: Visibility::Private,
        embedding: encode_embedding(&[0.1, 0.2, 0.3]),
        dimension: 4,
    };
    assert!(LessonChunk::try_from(row).is_err());
}
