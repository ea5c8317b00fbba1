pub mod chunking;
pub mod content;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod models;
pub mod providers;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_stats, ChunkStats, ChunkValidation, ChunkingConfig, TextChunker};
pub use content::{parse_json_content, parse_markdown_content, BookContent, Chapter, Section};
pub use engine::{EngineConfig, RagEngine};
pub use error::{
    EmbeddingError, EngineError, GenerationError, IndexError, IngestError,
};
pub use ingest::{
    discover_content_files, point_id, FileReport, FileStatus, IngestStatus, IngestionPipeline,
    IngestionReport, SkippedFile,
};
pub use models::{
    Answer, AskRequest, Chunk, ChunkMetadata, Citation, CollectionInfo, ContentKind, ContextLevel,
    EngineStats, Generation, MetadataFilter, ModelInfo, Point, PointPayload, RagResult,
    ScoredPoint, SourceMetadata, MAX_MESSAGE_CHARS,
};
pub use providers::{OpenAiChat, OpenAiConfig, OpenAiEmbedder};
pub use stores::QdrantStore;
pub use traits::{
    ChatModel, ConfidenceScorer, EmbeddingProvider, FinishReasonConfidence, VectorIndex,
};
