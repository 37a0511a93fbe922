#[cfg(test)]
mod tests;

use anyhow::{Result, bail};
use itertools::Itertools;
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A piece of lesson content ready for embedding
#[derive(Debug, Clone, PartialEq)]
pub struct ContentChunk {
    pub content: String,
    /// Headings leading to this chunk, joined with " > "
    pub heading_path: String,
    /// Position of this chunk within the lesson
    pub chunk_index: usize,
    /// Estimated token count
    pub token_count: usize,
}

/// Token budgets used when splitting lessons
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens
    pub target_chunk_size: usize,
    /// Maximum chunk size in tokens before forced splitting
    pub max_chunk_size: usize,
    /// Chunks below this size are merged into their predecessor
    pub min_chunk_size: usize,
    /// Tokens repeated from the previous chunk of the same section
    pub overlap_size: usize,
    /// Keep fenced code blocks in one piece
    pub preserve_code_blocks: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_chunk_size: 256,
            max_chunk_size: 512,
            min_chunk_size: 32,
            overlap_size: 32,
            preserve_code_blocks: true,
        }
    }
}

#[derive(Debug, Default)]
struct Section {
    heading_path: String,
    content: String,
    has_code_blocks: bool,
}

/// Split a markdown lesson into heading-aware chunks
///
/// Each section under a heading is chunked separately. Sections larger than
/// the target size are split on paragraphs, then sentences, then words.
/// Undersized chunks are merged with their predecessor in the same section,
/// and consecutive chunks of a section share `overlap_size` tokens.
#[inline]
pub fn chunk_lesson(
    title: &str,
    markdown: &str,
    config: &ChunkingConfig,
) -> Result<Vec<ContentChunk>> {
    if config.target_chunk_size == 0 || config.max_chunk_size < config.target_chunk_size {
        bail!(
            "Invalid chunk sizes: target {} max {}",
            config.target_chunk_size,
            config.max_chunk_size
        );
    }

    let mut chunks = Vec::new();
    for section in split_sections(title, markdown) {
        let pieces = if section.has_code_blocks && config.preserve_code_blocks {
            split_preserving_code(&section.content, config)
        } else {
            split_section(&section.content, config)
        };

        chunks.extend(pieces.into_iter().map(|content| ContentChunk {
            token_count: estimate_token_count(&content),
            content,
            heading_path: section.heading_path.clone(),
            chunk_index: 0,
        }));
    }

    let mut chunks = merge_small_chunks(chunks, config);
    if config.overlap_size > 0 {
        add_overlap(&mut chunks, config.overlap_size);
    }
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.chunk_index = i;
    }

    debug!(
        "Chunked lesson '{}' into {} chunks ({} tokens total)",
        title,
        chunks.len(),
        chunks.iter().map(|c| c.token_count).sum::<usize>()
    );

    Ok(chunks)
}

/// Walk the markdown and cut it at every heading
fn split_sections(title: &str, markdown: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut headings: Vec<(HeadingLevel, String)> = Vec::new();
    let mut current = Section::default();
    let mut heading_text: Option<String> = None;

    let heading_path = |headings: &[(HeadingLevel, String)]| {
        if headings.is_empty() {
            title.to_string()
        } else {
            headings.iter().map(|(_, text)| text).join(" > ")
        }
    };

    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                if !current.content.trim().is_empty() {
                    current.heading_path = heading_path(&headings);
                    sections.push(std::mem::take(&mut current));
                }
                current = Section::default();
                heading_text = Some(String::new());
            }
            Event::End(TagEnd::Heading(level)) => {
                if let Some(text) = heading_text.take() {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        headings.retain(|(existing, _)| *existing < level);
                        headings.push((level, text));
                    }
                }
            }
            Event::Start(Tag::CodeBlock(_)) => {
                current.has_code_blocks = true;
                current.content.push_str("\n```\n");
            }
            Event::End(TagEnd::CodeBlock) => current.content.push_str("```\n\n"),
            Event::Start(Tag::Item) => current.content.push_str("- "),
            Event::End(TagEnd::Paragraph | TagEnd::Item) => current.content.push_str("\n\n"),
            Event::Text(text) | Event::Code(text) => match heading_text.as_mut() {
                Some(heading) => heading.push_str(&text),
                None => current.content.push_str(&text),
            },
            Event::SoftBreak | Event::HardBreak => match heading_text.as_mut() {
                Some(heading) => heading.push(' '),
                None => current.content.push('\n'),
            },
            _ => {}
        }
    }

    if !current.content.trim().is_empty() {
        current.heading_path = heading_path(&headings);
        sections.push(current);
    }

    for section in &mut sections {
        section.content = section.content.trim().to_string();
    }
    sections
}

/// Paragraph-level split, descending to sentences then words for oversized paragraphs
fn split_section(content: &str, config: &ChunkingConfig) -> Vec<String> {
    if estimate_token_count(content) <= config.target_chunk_size {
        return vec![content.to_string()];
    }

    let mut pieces = Vec::new();
    for paragraph in content.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if estimate_token_count(paragraph) <= config.max_chunk_size {
            pieces.push(paragraph.to_string());
            continue;
        }

        let mut sentences = Vec::new();
        for sentence in split_sentences(paragraph) {
            if estimate_token_count(&sentence) <= config.max_chunk_size {
                sentences.push(sentence);
            } else {
                sentences.extend(pack(
                    sentence.split_whitespace().map(str::to_string),
                    " ",
                    config.target_chunk_size,
                ));
            }
        }
        pieces.extend(pack(sentences, " ", config.target_chunk_size));
    }

    pack(pieces, "\n\n", config.target_chunk_size)
}

/// Line-level split that never cuts inside a fenced code block
fn split_preserving_code(content: &str, config: &ChunkingConfig) -> Vec<String> {
    if estimate_token_count(content) <= config.target_chunk_size {
        return vec![content.to_string()];
    }

    let mut splits = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0;
    let mut in_code_block = false;

    for line in content.lines() {
        let is_fence = line.trim_start().starts_with("```");
        let line_tokens = estimate_token_count(line);
        if !in_code_block
            && current_tokens + line_tokens > config.max_chunk_size
            && !current.trim().is_empty()
        {
            splits.push(current.trim().to_string());
            current.clear();
            current_tokens = 0;
        }

        current.push_str(line);
        current.push('\n');
        current_tokens += line_tokens;

        if is_fence {
            in_code_block = !in_code_block;
        }
    }

    if !current.trim().is_empty() {
        splits.push(current.trim().to_string());
    }
    splits
}

/// Greedily join pieces until the next one would exceed `target` tokens
fn pack(pieces: impl IntoIterator<Item = String>, separator: &str, target: usize) -> Vec<String> {
    let mut packed = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0;

    for piece in pieces {
        let tokens = estimate_token_count(&piece);
        if current_tokens + tokens > target && !current.is_empty() {
            packed.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        if !current.is_empty() {
            current.push_str(separator);
        }
        current.push_str(&piece);
        current_tokens += tokens;
    }

    if !current.is_empty() {
        packed.push(current);
    }
    packed
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let end = i + c.len_utf8();
            let at_boundary = text[end..].chars().next().is_none_or(char::is_whitespace);
            if at_boundary {
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = end;
            }
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

fn merge_small_chunks(chunks: Vec<ContentChunk>, config: &ChunkingConfig) -> Vec<ContentChunk> {
    let mut merged: Vec<ContentChunk> = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        if let Some(previous) = merged.last_mut() {
            if chunk.token_count < config.min_chunk_size
                && previous.heading_path == chunk.heading_path
                && previous.token_count + chunk.token_count <= config.max_chunk_size
            {
                previous.content.push_str("\n\n");
                previous.content.push_str(&chunk.content);
                previous.token_count += chunk.token_count;
                continue;
            }
        }
        merged.push(chunk);
    }

    merged
}

fn add_overlap(chunks: &mut [ContentChunk], overlap_tokens: usize) {
    // Roughly 0.75 words per token
    let overlap_words = overlap_tokens * 3 / 4;

    for i in (1..chunks.len()).rev() {
        if chunks[i - 1].heading_path != chunks[i].heading_path {
            continue;
        }

        let words: Vec<&str> = chunks[i - 1].content.split_whitespace().collect();
        if words.len() <= overlap_words {
            continue;
        }

        let overlap = words[words.len() - overlap_words..].join(" ");
        let chunk = &mut chunks[i];
        chunk.token_count += estimate_token_count(&overlap);
        chunk.content = format!("{overlap}\n\n{}", chunk.content);
    }
}

/// Rough token estimate: words scaled by 4/3 plus a tenth of a token per punctuation mark
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
