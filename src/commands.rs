use anyhow::{Context, Result, bail};
use console::style;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::{Database, NewLesson, VectorStore, Visibility};
use crate::embeddings::EmbeddingProvider;
use crate::ingest::LessonIngestor;
use crate::retriever::{KnowledgeRetriever, RetrievalResponse};

/// Length of the content preview printed for each search result
const SNIPPET_CHARS: usize = 160;

fn load_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir).context("Failed to load configuration")
}

fn read_lesson_file(file: &Path) -> Result<String> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read lesson file: {}", file.display()))?;
    if content.trim().is_empty() {
        bail!("Lesson file is empty: {}", file.display());
    }
    Ok(content)
}

/// Options for `add`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddLessonArgs {
    pub title: Option<String>,
    pub owner: String,
    pub subject: Option<String>,
    pub level: Option<String>,
    pub public: bool,
}

/// Ingest a markdown lesson file
#[inline]
pub async fn add_lesson(config_dir: &Path, file: &Path, args: AddLessonArgs) -> Result<()> {
    let config = load_config(config_dir)?;
    let content = read_lesson_file(file)?;

    let title = args.title.unwrap_or_else(|| {
        file.file_stem()
            .map(|stem| stem.to_string_lossy().replace(['-', '_'], " "))
            .unwrap_or_else(|| "Untitled lesson".to_string())
    });

    let ingestor = LessonIngestor::from_config(&config).await?;
    let report = ingestor
        .add_lesson(NewLesson {
            title,
            subject: args.subject,
            level: args.level,
            owner_id: args.owner,
            visibility: if args.public {
                Visibility::Public
            } else {
                Visibility::Private
            },
            content,
        })
        .await?;

    println!(
        "Added lesson: {} (ID: {})",
        report.lesson.title, report.lesson.id
    );
    println!("   Owner: {}", report.lesson.owner_id);
    println!("   Visibility: {}", report.lesson.visibility);
    println!("   Chunks: {}", report.chunk_count);
    Ok(())
}

/// Replace a lesson's content from a markdown file and re-embed it
#[inline]
pub async fn update_lesson(config_dir: &Path, lesson_id: &str, file: &Path) -> Result<()> {
    let config = load_config(config_dir)?;
    let content = read_lesson_file(file)?;

    let ingestor = LessonIngestor::from_config(&config).await?;
    match ingestor.update_lesson_content(lesson_id, &content).await? {
        Some(report) => {
            println!(
                "Updated lesson: {} ({} chunks)",
                report.lesson.title, report.chunk_count
            );
            Ok(())
        }
        None => bail!("Lesson not found: {}", lesson_id),
    }
}

/// Make a lesson public, or private again
#[inline]
pub async fn publish_lesson(config_dir: &Path, lesson_id: &str, private: bool) -> Result<()> {
    let config = load_config(config_dir)?;
    let visibility = if private {
        Visibility::Private
    } else {
        Visibility::Public
    };

    let ingestor = LessonIngestor::from_config(&config).await?;
    if !ingestor.set_visibility(lesson_id, visibility).await? {
        bail!("Lesson not found: {}", lesson_id);
    }

    println!("Lesson {} is now {}", lesson_id, visibility);
    Ok(())
}

#[inline]
pub async fn delete_lesson(config_dir: &Path, lesson_id: &str) -> Result<()> {
    let config = load_config(config_dir)?;
    let ingestor = LessonIngestor::from_config(&config).await?;

    if ingestor.delete_lesson(lesson_id).await? {
        println!("Deleted lesson {}", lesson_id);
    } else {
        warn!("Lesson {} not found, removed any leftover vectors", lesson_id);
        println!("Lesson not found: {}", lesson_id);
    }
    Ok(())
}

/// List lessons, optionally only those of one owner
#[inline]
pub async fn list_lessons(config_dir: &Path, owner: Option<&str>) -> Result<()> {
    let config = load_config(config_dir)?;
    let database = Database::initialize_from_config_dir(config.get_base_dir()).await?;

    let lessons = database.list_lessons(owner).await?;
    if lessons.is_empty() {
        println!("No lessons have been added yet.");
        println!("Use 'coach-retrieval add <file> --owner <id>' to add one.");
        return Ok(());
    }

    println!("Lessons ({} total):", lessons.len());
    println!();
    for lesson in &lessons {
        let chunks = database.get_chunks_for_lesson(&lesson.id).await?;
        println!("📘 {} (ID: {})", lesson.title, lesson.id);
        println!("   Owner: {}", lesson.owner_id);
        println!("   Visibility: {}", lesson.visibility);
        if let Some(subject) = &lesson.subject {
            println!("   Subject: {}", subject);
        }
        if let Some(level) = &lesson.level {
            println!("   Level: {}", level);
        }
        println!("   Chunks: {}", chunks.len());
        println!(
            "   Updated: {}",
            lesson.updated_date.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }
    Ok(())
}

/// Run a retrieval and print the ranked chunks
#[inline]
pub async fn search(
    config_dir: &Path,
    query: &str,
    requester: Option<&str>,
    top_k: Option<i64>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_dir)?;
    let retriever = KnowledgeRetriever::from_config(&config).await?;
    let top_k = top_k.unwrap_or_else(|| i64::from(config.retrieval.default_top_k));

    let response = retriever
        .retrieve(query, top_k, requester.unwrap_or_default())
        .await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).context("Failed to serialize results")?
        );
    } else {
        print_results(&response);
    }
    Ok(())
}

fn print_results(response: &RetrievalResponse) {
    if response.degraded {
        eprintln!(
            "{}",
            style("⚠️  Remote vector index unavailable, results come from the local scan").yellow()
        );
    }

    if response.results.is_empty() {
        println!("No matching lesson content found.");
        return;
    }

    for (rank, result) in response.results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} > {}",
            rank + 1,
            result.score,
            result.lesson.title,
            result.heading_path
        );
        println!(
            "   Lesson: {} | Chunk: {} | {}",
            result.lesson.lesson_id, result.chunk_id, result.lesson.visibility
        );
        println!("   {}", snippet(&result.content));
        println!();
    }
}

fn snippet(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SNIPPET_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(SNIPPET_CHARS).collect();
        format!("{cut}…")
    }
}

/// Report the health of the lesson store, the embedding backends and the vector index
#[inline]
pub async fn show_status(config_dir: &Path) -> Result<()> {
    let config = load_config(config_dir)?;

    println!("📊 Coach Retrieval Status Report");
    println!("{}", "=".repeat(50));
    println!("   Config directory: {}", config.get_base_dir().display());
    println!();

    println!("🗄️  Lesson Store:");
    let database = match Database::initialize_from_config_dir(config.get_base_dir()).await {
        Ok(db) => {
            println!("   ✅ SQLite: Connected");
            Some(db)
        }
        Err(e) => {
            println!("   ❌ SQLite: Failed to open - {:#}", e);
            None
        }
    };
    let mut sqlite_chunks = None;
    if let Some(database) = &database {
        let lessons = database.count_lessons().await?;
        let chunks = database.count_chunks().await?;
        println!("   📚 Lessons: {}", lessons);
        println!("   🧩 Chunks: {}", chunks);
        sqlite_chunks = Some(chunks);
    }

    println!();
    println!("🤖 Embedding Backends (dimension {}):", config.embedding_dimension());
    match EmbeddingProvider::from_config(&config) {
        Ok(provider) => {
            for (name, health) in provider.health_report().await {
                match health {
                    Ok(()) => println!("   ✅ {}: Healthy", name),
                    Err(e) => println!("   ⚠️  {}: {}", name, e),
                }
            }
        }
        Err(e) => println!("   ❌ Failed to configure embeddings - {:#}", e),
    }

    println!();
    println!("🔍 Vector Index:");
    if !config.vector_index.enabled {
        println!("   💤 Remote index disabled, searches use the local scan");
        return Ok(());
    }

    match VectorStore::new(&config).await {
        Ok(store) => {
            let healthy = store.validate_integrity().await;
            let vectors = store.count().await?;
            if healthy {
                println!("   ✅ LanceDB: {} ({})", config.vector_index_uri(), store.table_name());
            } else {
                println!("   ⚠️  LanceDB: integrity check failed");
            }
            println!("   📊 Vectors: {}", vectors);

            if let Some(chunks) = sqlite_chunks {
                if usize::try_from(chunks).ok() == Some(vectors) {
                    println!("   ✅ Index matches the lesson store");
                } else {
                    println!(
                        "   ⚠️  Index holds {} vectors for {} stored chunks, run 'coach-retrieval reindex'",
                        vectors, chunks
                    );
                }
            }
        }
        Err(e) => println!("   ❌ LanceDB: Failed to open - {}", e),
    }

    Ok(())
}

/// Rebuild the vector index from the lesson store
#[inline]
pub async fn reindex(config_dir: &Path) -> Result<()> {
    let config = load_config(config_dir)?;
    let ingestor = LessonIngestor::from_config(&config).await?;

    info!("Rebuilding vector index from the lesson store");
    let count = ingestor.rebuild_vector_index().await?;
    println!("Rebuilt vector index with {} vectors", count);
    Ok(())
}
