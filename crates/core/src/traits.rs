use async_trait::async_trait;

use crate::error::{EmbeddingError, GenerationError, IndexError};
use crate::models::{CollectionInfo, Generation, MetadataFilter, ModelInfo, Point, ScoredPoint};

/// Turns text into fixed-length vectors. Batch output preserves input
/// order 1:1.
#[async_trait]
pub trait EmbeddingProvider {
    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Stores (vector, payload) points in a named collection and answers
/// nearest-neighbor queries, score-descending.
#[async_trait]
pub trait VectorIndex {
    /// Create the collection if it does not exist yet. A no-op when it does.
    async fn ensure_collection(&self) -> Result<(), IndexError>;

    async fn upsert(&self, points: &[Point]) -> Result<(), IndexError>;

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredPoint>, IndexError>;

    /// Nearest neighbors of the stored vectors behind `positive` ids, pushed
    /// away from `negative` ids.
    async fn recommend(
        &self,
        positive: &[String],
        negative: &[String],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredPoint>, IndexError>;

    async fn collection_info(&self) -> Result<CollectionInfo, IndexError>;
}

/// Language-model surface consumed by the answer engine.
#[async_trait]
pub trait ChatModel {
    /// Answer `prompt`, optionally grounded in `context`.
    async fn generate(
        &self,
        prompt: &str,
        context: Option<&str>,
    ) -> Result<Generation, GenerationError>;

    /// Step-by-step code explanation anchored on `question`.
    async fn explain(
        &self,
        code: &str,
        question: &str,
        context: Option<&str>,
    ) -> Result<Generation, GenerationError>;

    /// Ask the model to score how well `answer` is grounded in `context`,
    /// returning its raw output (expected to be a bare decimal in [0, 1]).
    async fn evaluate(&self, answer: &str, context: &str) -> Result<Generation, GenerationError>;

    /// Identify the configured models for diagnostics.
    fn model_info(&self) -> ModelInfo;
}

/// Strategy turning a finished generation into a confidence score. The
/// default derives it from whether the output was truncated; better
/// calibrations can replace it without touching orchestration.
pub trait ConfidenceScorer: Send + Sync {
    fn score(&self, generation: &Generation) -> f64;
}

/// Confidence 1.0 when the model stopped on its own, 0.0 when the output
/// was cut off.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinishReasonConfidence;

impl ConfidenceScorer for FinishReasonConfidence {
    fn score(&self, generation: &Generation) -> f64 {
        if generation.finish_reason == "stop" {
            1.0
        } else {
            0.0
        }
    }
}
