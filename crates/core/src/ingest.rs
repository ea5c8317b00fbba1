use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunking::TextChunker;
use crate::content::{parse_json_content, parse_markdown_content, BookContent};
use crate::error::IngestError;
use crate::models::{Chunk, CollectionInfo, Point, PointPayload};
use crate::traits::{EmbeddingProvider, VectorIndex};

/// Texts sent to the embedding provider per request.
const EMBED_BATCH_SIZE: usize = 10;

/// Pause between embedding batches to stay under provider rate limits.
const EMBED_BATCH_PAUSE: Duration = Duration::from_millis(100);

const SOURCE_TYPE: &str = "book_content";

/// Recursively collect structured-content files (`.json` and `.md`), sorted
/// for deterministic processing order.
pub fn discover_content_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                ext.eq_ignore_ascii_case("json") || ext.eq_ignore_ascii_case("md")
            });

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// At least one file was chunked, embedded and stored.
    Success,
    /// Files were found but none made it into the index.
    Partial,
    NoFiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Success,
    NoChunks,
}

#[derive(Debug, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct IngestionReport {
    pub status: IngestStatus,
    pub processed_files: usize,
    pub total_chunks: usize,
    pub skipped: Vec<SkippedFile>,
    pub collection: Option<CollectionInfo>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FileReport {
    pub status: FileStatus,
    pub path: PathBuf,
    pub chunks: usize,
    pub stored: bool,
}

/// Orchestrates chunking, embedding and storage for a content directory.
pub struct IngestionPipeline<E, V> {
    embedder: E,
    index: V,
    chunker: TextChunker,
    content_dir: PathBuf,
}

impl<E, V> IngestionPipeline<E, V>
where
    E: EmbeddingProvider + Send + Sync,
    V: VectorIndex + Send + Sync,
{
    pub fn new(embedder: E, index: V, chunker: TextChunker, content_dir: PathBuf) -> Self {
        Self {
            embedder,
            index,
            chunker,
            content_dir,
        }
    }

    /// Ingest every content file under the configured directory. A failing
    /// file is logged and skipped; the pipeline continues and reports
    /// partial success.
    pub async fn ingest_all(&self) -> Result<IngestionReport, IngestError> {
        let files = discover_content_files(&self.content_dir);
        if files.is_empty() {
            warn!(dir = %self.content_dir.display(), "no content files found");
            return Ok(IngestionReport {
                status: IngestStatus::NoFiles,
                processed_files: 0,
                total_chunks: 0,
                skipped: Vec::new(),
                collection: None,
                finished_at: Utc::now(),
            });
        }

        self.index.ensure_collection().await?;

        let mut processed_files = 0;
        let mut total_chunks = 0;
        let mut skipped = Vec::new();

        for path in files {
            match self.ingest_one(&path).await {
                Ok(report) if report.stored => {
                    processed_files += 1;
                    total_chunks += report.chunks;
                    info!(path = %path.display(), chunks = report.chunks, "ingested file");
                }
                Ok(_) => {
                    warn!(path = %path.display(), "file produced no chunks");
                }
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipping file");
                    skipped.push(SkippedFile {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        let status = if processed_files > 0 {
            IngestStatus::Success
        } else {
            IngestStatus::Partial
        };

        let collection = match self.index.collection_info().await {
            Ok(info) => Some(info),
            Err(error) => {
                warn!(error = %error, "collection info unavailable after ingestion");
                None
            }
        };

        info!(processed_files, total_chunks, "ingestion finished");
        Ok(IngestionReport {
            status,
            processed_files,
            total_chunks,
            skipped,
            collection,
            finished_at: Utc::now(),
        })
    }

    /// Ingest a single file: parse → chunk → embed in batches → upsert.
    pub async fn ingest_one(&self, path: &Path) -> Result<FileReport, IngestError> {
        let book = load_content(path)?;
        let chunks = self.chunker.chunk_book_content(&book);

        if chunks.is_empty() {
            return Ok(FileReport {
                status: FileStatus::NoChunks,
                path: path.to_path_buf(),
                chunks: 0,
                stored: false,
            });
        }

        let embeddings = self.embed_chunks(&chunks).await?;
        let points = build_points(path, &chunks, embeddings)?;
        self.index.upsert(&points).await?;

        Ok(FileReport {
            status: FileStatus::Success,
            path: path.to_path_buf(),
            chunks: chunks.len(),
            stored: true,
        })
    }

    /// Batch-embed chunk contents, preserving chunk order across batches.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, IngestError> {
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let mut embeddings = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(EMBED_BATCH_SIZE).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(EMBED_BATCH_PAUSE).await;
            }
            embeddings.extend(self.embedder.embed_batch(batch).await?);
        }

        if embeddings.len() != chunks.len() {
            return Err(IngestError::Embedding(
                crate::error::EmbeddingError::BadResponse(format!(
                    "embedded {} chunks, expected {}",
                    embeddings.len(),
                    chunks.len()
                )),
            ));
        }

        Ok(embeddings)
    }
}

fn load_content(path: &Path) -> Result<BookContent, IngestError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let raw = fs::read_to_string(path)?;

    match extension.as_str() {
        "json" => parse_json_content(&raw),
        "md" => {
            let stem = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
            Ok(parse_markdown_content(&raw, stem))
        }
        other => Err(IngestError::UnsupportedFormat(other.to_string())),
    }
}

fn build_points(
    path: &Path,
    chunks: &[Chunk],
    embeddings: Vec<Vec<f32>>,
) -> Result<Vec<Point>, IngestError> {
    let source_key = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    Ok(chunks
        .iter()
        .zip(embeddings)
        .enumerate()
        .map(|(index, (chunk, vector))| Point {
            id: point_id(source_key, index, &chunk.content),
            vector,
            payload: PointPayload {
                content: chunk.content.clone(),
                metadata: chunk.metadata.clone(),
                source_type: SOURCE_TYPE.to_string(),
            },
        })
        .collect())
}

/// Content-addressed point id: a digest over the source file key, the chunk
/// index and the entire chunk content, folded into a UUID (the id format the
/// index accepts). Re-ingesting identical content yields identical ids, so
/// upserts stay idempotent.
pub fn point_id(source_key: &str, index: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_key.as_bytes());
    hasher.update((index as u64).to_le_bytes());
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::error::{EmbeddingError, IndexError};
    use crate::models::{CollectionInfo, MetadataFilter, ScoredPoint};
    use async_trait::async_trait;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct FakeEmbedder {
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl FakeEmbedder {
        fn new() -> Self {
            Self {
                batch_sizes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        fn dimensions(&self) -> usize {
            4
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.batch_sizes.lock().unwrap().push(texts.len());
            Ok(texts.iter().map(|_| vec![0.0, 0.1, 0.2, 0.3]).collect())
        }

        async fn embed_one(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.0, 0.1, 0.2, 0.3])
        }
    }

    #[derive(Default)]
    struct RecordingIndex {
        upserted: Mutex<Vec<Point>>,
        ensured: Mutex<bool>,
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn ensure_collection(&self) -> Result<(), IndexError> {
            *self.ensured.lock().unwrap() = true;
            Ok(())
        }

        async fn upsert(&self, points: &[Point]) -> Result<(), IndexError> {
            self.upserted.lock().unwrap().extend_from_slice(points);
            Ok(())
        }

        async fn search(
            &self,
            _query_vector: &[f32],
            _limit: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<ScoredPoint>, IndexError> {
            Ok(Vec::new())
        }

        async fn recommend(
            &self,
            _positive: &[String],
            _negative: &[String],
            _limit: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<ScoredPoint>, IndexError> {
            Ok(Vec::new())
        }

        async fn collection_info(&self) -> Result<CollectionInfo, IndexError> {
            Ok(CollectionInfo {
                name: "test".to_string(),
                vector_count: 0,
                point_count: 0,
                distance: "Cosine".to_string(),
                dimension: 4,
            })
        }
    }

    fn pipeline(dir: PathBuf) -> IngestionPipeline<FakeEmbedder, RecordingIndex> {
        let chunker = TextChunker::new(ChunkingConfig {
            chunk_size: 200,
            chunk_overlap: 40,
        })
        .unwrap();
        IngestionPipeline::new(FakeEmbedder::new(), RecordingIndex::default(), chunker, dir)
    }

    fn write_file(dir: &Path, name: &str, body: &str) {
        File::create(dir.join(name))
            .and_then(|mut file| file.write_all(body.as_bytes()))
            .unwrap();
    }

    #[test]
    fn discovery_is_recursive_and_filters_extensions() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();

        write_file(dir.path(), "b.json", "{}");
        write_file(&nested, "a.md", "## C\n### S\nbody\n");
        write_file(dir.path(), "notes.txt", "ignored");

        let files = discover_content_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("b.json"));
        assert!(files[1].ends_with("a.md"));
    }

    #[test]
    fn point_ids_are_deterministic_and_content_addressed() {
        let first = point_id("book", 0, "some chunk text");
        let second = point_id("book", 0, "some chunk text");
        assert_eq!(first, second);

        assert_ne!(first, point_id("book", 1, "some chunk text"));
        assert_ne!(first, point_id("book", 0, "different text"));
        assert_ne!(first, point_id("other", 0, "some chunk text"));
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[tokio::test]
    async fn markdown_file_is_chunked_embedded_and_stored() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "intro.md",
            "## Basics\n\n### What is ML\nMachine learning infers patterns from data. \
             Models generalize beyond their training set when regularized well.\n",
        );

        let pipeline = pipeline(dir.path().to_path_buf());
        let report = pipeline.ingest_all().await.unwrap();

        assert_eq!(report.status, IngestStatus::Success);
        assert_eq!(report.processed_files, 1);
        assert!(report.total_chunks > 0);
        assert!(report.skipped.is_empty());
        assert_eq!(report.collection.as_ref().map(|info| info.name.as_str()), Some("test"));
        assert!(*pipeline.index.ensured.lock().unwrap());

        let stored = pipeline.index.upserted.lock().unwrap();
        assert_eq!(stored.len(), report.total_chunks);
        assert_eq!(stored[0].payload.source_type, "book_content");
        assert_eq!(stored[0].payload.metadata.source.chapter.as_deref(), Some("Basics"));
    }

    #[tokio::test]
    async fn broken_file_is_skipped_and_reported() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "broken.json", "{ not json");

        let pipeline = pipeline(dir.path().to_path_buf());
        let report = pipeline.ingest_all().await.unwrap();

        assert_eq!(report.status, IngestStatus::Partial);
        assert_eq!(report.processed_files, 0);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("broken.json"));
    }

    #[tokio::test]
    async fn empty_directory_reports_no_files() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path().to_path_buf());
        let report = pipeline.ingest_all().await.unwrap();
        assert_eq!(report.status, IngestStatus::NoFiles);
    }

    #[tokio::test]
    async fn embedding_runs_in_bounded_batches() {
        let dir = tempdir().unwrap();
        let sections: String = (0..30)
            .map(|index| {
                format!(
                    "### Section {index}\nEvery section carries enough text to produce at \
                     least one chunk of content for the embedding batch test. Padding \
                     sentence to stay above the cleaner's floor.\n\n"
                )
            })
            .collect();
        write_file(dir.path(), "big.md", &format!("## Chapter\n\n{sections}"));

        let pipeline = pipeline(dir.path().to_path_buf());
        let report = pipeline.ingest_all().await.unwrap();
        assert_eq!(report.status, IngestStatus::Success);
        assert!(report.total_chunks >= 30);

        let batch_sizes = pipeline.index.upserted.lock().unwrap().len();
        assert_eq!(batch_sizes, report.total_chunks);
        for size in pipeline.embedder.batch_sizes.lock().unwrap().iter() {
            assert!(*size <= EMBED_BATCH_SIZE);
        }
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "notes.txt", "plain text");

        let pipeline = pipeline(dir.path().to_path_buf());
        let result = pipeline.ingest_one(&dir.path().join("notes.txt")).await;
        assert!(matches!(result, Err(IngestError::UnsupportedFormat(_))));
    }
}
