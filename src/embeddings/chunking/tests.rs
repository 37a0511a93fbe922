use super::*;

const LESSON: &str = "# Photosynthesis

Plants convert light into chemical energy.

## Light reactions

The light reactions happen in the thylakoid membranes.

## Calvin cycle

Carbon dioxide is fixed into sugars.
";

#[test]
fn token_estimate() {
    assert_eq!(estimate_token_count("hello world"), 2);
    assert_eq!(estimate_token_count("This is a test."), 5);
    assert_eq!(estimate_token_count(""), 0);
}

#[test]
fn sections_follow_heading_hierarchy() {
    let chunks = chunk_lesson("Biology", LESSON, &ChunkingConfig::default())
        .expect("chunking should succeed");

    let paths: Vec<&str> = chunks.iter().map(|c| c.heading_path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "Photosynthesis",
            "Photosynthesis > Light reactions",
            "Photosynthesis > Calvin cycle",
        ]
    );
    assert!(chunks[1].content.contains("thylakoid"));
    assert_eq!(
        chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[test]
fn content_without_headings_uses_title() {
    let chunks = chunk_lesson(
        "Fractions",
        "Add the numerators when denominators match.",
        &ChunkingConfig::default(),
    )
    .expect("chunking should succeed");

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].heading_path, "Fractions");
    assert_eq!(chunks[0].content, "Add the numerators when denominators match.");
}

#[test]
fn empty_lesson_has_no_chunks() {
    let chunks = chunk_lesson("Empty", "   \n\n", &ChunkingConfig::default())
        .expect("chunking should succeed");
    assert!(chunks.is_empty());
}

#[test]
fn long_section_is_split_near_target() {
    let config = ChunkingConfig {
        target_chunk_size: 60,
        max_chunk_size: 100,
        min_chunk_size: 10,
        overlap_size: 0,
        preserve_code_blocks: true,
    };
    let paragraph = "Mitochondria produce energy for the cell. ".repeat(8);
    let markdown = format!("# Cells\n\n{}\n\n{}\n\n{}", paragraph, paragraph, paragraph);

    let chunks = chunk_lesson("Biology", &markdown, &config).expect("chunking should succeed");

    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(
            chunk.token_count <= config.max_chunk_size,
            "chunk too large: {}",
            chunk.token_count
        );
        assert_eq!(chunk.heading_path, "Cells");
    }
}

#[test]
fn oversized_paragraph_falls_back_to_sentences() {
    let config = ChunkingConfig {
        target_chunk_size: 50,
        max_chunk_size: 100,
        min_chunk_size: 10,
        overlap_size: 0,
        preserve_code_blocks: true,
    };
    let paragraph = "Water evaporates from the ocean surface. ".repeat(30);

    let chunks = chunk_lesson("Water cycle", &paragraph, &config).expect("chunking should succeed");

    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.token_count <= config.max_chunk_size));
    assert!(chunks[0].content.ends_with('.'));
}

#[test]
fn code_blocks_stay_whole() {
    let config = ChunkingConfig {
        target_chunk_size: 50,
        max_chunk_size: 100,
        min_chunk_size: 10,
        overlap_size: 0,
        preserve_code_blocks: true,
    };
    let code: String = (0..40).map(|i| format!("let x{i} = {i};\n")).collect();
    let markdown = format!(
        "# Variables\n\n{}\n\n```rust\n{}```\n\n{}",
        "Bindings are immutable by default. ".repeat(10),
        code,
        "Use mut to allow mutation. ".repeat(10)
    );

    let chunks = chunk_lesson("Rust", &markdown, &config).expect("chunking should succeed");

    let with_code: Vec<_> = chunks.iter().filter(|c| c.content.contains("let x0")).collect();
    assert_eq!(with_code.len(), 1);
    assert!(with_code[0].content.contains("let x39 = 39;"));
}

#[test]
fn small_chunks_merge_within_section() {
    let merged = merge_small_chunks(
        vec![
            ContentChunk {
                content: "first".to_string(),
                heading_path: "A".to_string(),
                chunk_index: 0,
                token_count: 40,
            },
            ContentChunk {
                content: "tiny".to_string(),
                heading_path: "A".to_string(),
                chunk_index: 1,
                token_count: 5,
            },
            ContentChunk {
                content: "other".to_string(),
                heading_path: "B".to_string(),
                chunk_index: 2,
                token_count: 5,
            },
        ],
        &ChunkingConfig::default(),
    );

    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].content, "first\n\ntiny");
    assert_eq!(merged[0].token_count, 45);
    assert_eq!(merged[1].heading_path, "B");
}

#[test]
fn overlap_repeats_tail_of_previous_chunk() {
    let mut chunks = vec![
        ContentChunk {
            content: "one two three four five six seven eight".to_string(),
            heading_path: "A".to_string(),
            chunk_index: 0,
            token_count: 10,
        },
        ContentChunk {
            content: "nine ten".to_string(),
            heading_path: "A".to_string(),
            chunk_index: 1,
            token_count: 2,
        },
        ContentChunk {
            content: "eleven".to_string(),
            heading_path: "B".to_string(),
            chunk_index: 2,
            token_count: 1,
        },
    ];

    add_overlap(&mut chunks, 4);

    assert_eq!(chunks[0].content, "one two three four five six seven eight");
    assert_eq!(chunks[1].content, "six seven eight\n\nnine ten");
    assert_eq!(chunks[2].content, "eleven");
}

#[test]
fn sentence_split_keeps_decimals() {
    let sentences = split_sentences("Pi is about 3.14 in value. Is that exact? No!");
    assert_eq!(
        sentences,
        vec!["Pi is about 3.14 in value.", "Is that exact?", "No!"]
    );
}

#[test]
fn rejects_invalid_sizes() {
    let config = ChunkingConfig {
        target_chunk_size: 200,
        max_chunk_size: 100,
        ..ChunkingConfig::default()
    };
    assert!(chunk_lesson("T", "text", &config).is_err());
}
