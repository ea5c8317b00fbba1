use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::content::BookContent;
use crate::error::IngestError;
use crate::models::{Chunk, ChunkMetadata, ContentKind, SourceMetadata};

/// Characters kept by text cleaning: word characters, whitespace and a small
/// allow-list of punctuation. Everything else becomes a space.
const DISALLOWED_PATTERN: &str = r#"[^\w\s.,!?()\-:;'"“”‘’]"#;

/// Chunks larger than this multiple of `chunk_size` are flagged by
/// [`TextChunker::validate_chunks`].
const OVERSIZE_FACTOR: f64 = 1.5;

/// Chunks shorter than this are flagged as undersized.
const MIN_HEALTHY_CHARS: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
        }
    }
}

pub struct TextChunker {
    config: ChunkingConfig,
    disallowed: Regex,
}

impl TextChunker {
    /// Build a chunker, rejecting configurations whose sliding window could
    /// fail to advance.
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        if config.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                config.chunk_overlap, config.chunk_size
            )));
        }

        Ok(Self {
            config,
            disallowed: Regex::new(DISALLOWED_PATTERN)?,
        })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Normalize whitespace and strip characters outside the allow-list so
    /// control and markup noise never reaches the embedding provider.
    pub fn clean_text(&self, text: &str) -> String {
        let stripped = self.disallowed.replace_all(text, " ");
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Chunk free-form text, attaching provenance and positional metadata.
    /// Empty or noise-only input yields no chunks.
    pub fn chunk_text(&self, text: &str, source: SourceMetadata) -> Vec<Chunk> {
        let cleaned = self.clean_text(text);
        if cleaned.is_empty() {
            return Vec::new();
        }

        let pieces = self.split_into_pieces(&cleaned);
        let total = pieces.len();

        pieces
            .into_iter()
            .enumerate()
            .map(|(index, content)| Chunk {
                metadata: ChunkMetadata {
                    chunk_id: index,
                    chunk_size: content.chars().count(),
                    total_chunks: total,
                    position: index as f64 / total as f64,
                    source: source.clone(),
                },
                content,
            })
            .collect()
    }

    /// Walk chapters and sections, merging chapter-level and section-level
    /// provenance (section fields win on collision) and chunking each
    /// section body.
    pub fn chunk_book_content(&self, book: &BookContent) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for (chapter_index, chapter) in book.chapters.iter().enumerate() {
            for (section_index, section) in chapter.sections.iter().enumerate() {
                let source = SourceMetadata {
                    kind: ContentKind::Section,
                    chapter: Some(
                        chapter
                            .title
                            .clone()
                            .unwrap_or_else(|| format!("Chapter {}", chapter_index + 1)),
                    ),
                    chapter_id: Some(
                        chapter
                            .id
                            .clone()
                            .unwrap_or_else(|| format!("chapter_{chapter_index}")),
                    ),
                    chapter_number: Some(chapter_index as u32 + 1),
                    section: Some(
                        section
                            .title
                            .clone()
                            .unwrap_or_else(|| format!("Section {}", section_index + 1)),
                    ),
                    section_id: Some(
                        section
                            .id
                            .clone()
                            .unwrap_or_else(|| format!("section_{section_index}")),
                    ),
                    section_number: Some(section_index as u32 + 1),
                    extra: BTreeMap::new(),
                };

                chunks.extend(self.chunk_text(&section.content, source));
            }
        }

        info!(chunk_count = chunks.len(), "chunked book content");
        chunks
    }

    /// Slide a window of `chunk_size` characters, preferring sentence
    /// boundaries, then word boundaries, then a hard cut. Consecutive pieces
    /// overlap by `chunk_overlap` characters.
    fn split_into_pieces(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.config.chunk_size {
            return vec![text.to_string()];
        }

        let mut pieces = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = start + self.config.chunk_size;
            if end >= chars.len() {
                pieces.push(chars[start..].iter().collect());
                break;
            }

            let window = &chars[start..end];
            let break_at = last_sentence_boundary(window)
                .or_else(|| last_word_boundary(window))
                .unwrap_or(window.len());
            let actual_end = start + break_at;

            pieces.push(chars[start..actual_end].iter().collect());

            // The boundary can land inside the overlap region; never let the
            // window move backwards or stall.
            let next = actual_end.saturating_sub(self.config.chunk_overlap);
            start = if next > start { next } else { actual_end };
        }

        pieces
    }

    /// Diagnostic, non-blocking quality check over produced chunks.
    pub fn validate_chunks(&self, chunks: &[Chunk]) -> ChunkValidation {
        let mut report = ChunkValidation::default();

        for (index, chunk) in chunks.iter().enumerate() {
            if chunk.content.trim().is_empty() {
                report.invalid_chunks += 1;
                report.issues.push(format!("chunk {index}: empty content"));
                continue;
            }

            if chunk.metadata == ChunkMetadata::default() {
                report.issues.push(format!("chunk {index}: missing metadata"));
            }

            let size = chunk.content.chars().count();
            if size as f64 > self.config.chunk_size as f64 * OVERSIZE_FACTOR {
                report.issues.push(format!("chunk {index}: too large ({size} chars)"));
                report
                    .recommendations
                    .push("consider reducing chunk_size".to_string());
            }
            if size < MIN_HEALTHY_CHARS {
                report.issues.push(format!("chunk {index}: too small ({size} chars)"));
                report
                    .recommendations
                    .push("consider reducing chunk_overlap".to_string());
            }

            report.valid_chunks += 1;
        }

        report
    }
}

/// End of the last sentence-terminal run (`.`, `!`, `?`) that is followed by
/// whitespace inside the window.
fn last_sentence_boundary(window: &[char]) -> Option<usize> {
    let mut boundary = None;
    for (index, ch) in window.iter().enumerate() {
        if matches!(ch, '.' | '!' | '?')
            && window.get(index + 1).is_some_and(|next| next.is_whitespace())
        {
            boundary = Some(index + 1);
        }
    }
    boundary.filter(|&at| at > 0 && at < window.len())
}

/// Start of the last whitespace run inside the window.
fn last_word_boundary(window: &[char]) -> Option<usize> {
    let mut last = None;
    for (index, ch) in window.iter().enumerate() {
        if ch.is_whitespace() && window.get(index.wrapping_sub(1)).is_some_and(|p| !p.is_whitespace())
        {
            last = Some(index);
        }
    }
    last.filter(|&at| at > 0)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkValidation {
    pub valid_chunks: usize,
    pub invalid_chunks: usize,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkStats {
    pub total_chunks: usize,
    pub total_characters: usize,
    pub avg_chunk_size: f64,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub kind_counts: BTreeMap<String, usize>,
}

/// Summarize chunk sizes and per-kind counts for ingestion diagnostics.
pub fn chunk_stats(chunks: &[Chunk]) -> ChunkStats {
    if chunks.is_empty() {
        return ChunkStats::default();
    }

    let sizes: Vec<usize> = chunks.iter().map(|chunk| chunk.content.chars().count()).collect();
    let total_characters: usize = sizes.iter().sum();

    let mut kind_counts = BTreeMap::new();
    for chunk in chunks {
        *kind_counts
            .entry(chunk.metadata.source.kind.as_str().to_string())
            .or_insert(0) += 1;
    }

    ChunkStats {
        total_chunks: chunks.len(),
        total_characters,
        avg_chunk_size: total_characters as f64 / chunks.len() as f64,
        min_chunk_size: sizes.iter().copied().min().unwrap_or(0),
        max_chunk_size: sizes.iter().copied().max().unwrap_or(0),
        kind_counts,
    }
}
