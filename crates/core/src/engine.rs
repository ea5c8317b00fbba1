use tracing::{info, warn};

use crate::error::EngineError;
use crate::models::{
    Answer, AskRequest, Citation, ContextLevel, EngineStats, MetadataFilter, RagResult,
    ScoredPoint,
};
use crate::traits::{ChatModel, ConfidenceScorer, EmbeddingProvider, FinishReasonConfidence, VectorIndex};

/// Retrieval query for code explanation keeps only this many leading code
/// characters, so the embedding input stays bounded while still anchoring
/// on the code.
const CODE_QUERY_CHARS: usize = 200;

const EXPLAIN_TOP_K: usize = 3;
const RECOMMEND_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Retrieved chunks actually fed into generation (the context cap).
    pub context_limit: usize,
    /// Results requested from the index per answer (the retrieval cap).
    pub top_k: usize,
    /// Results requested for pure search / diagnostic calls.
    pub search_top_k: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_limit: 3,
            top_k: 5,
            search_top_k: 10,
        }
    }
}

/// The retrieval-and-answer orchestrator. Takes its collaborators as
/// constructor-supplied capabilities; holds no other state between requests.
pub struct RagEngine<E, V, C>
where
    E: EmbeddingProvider,
    V: VectorIndex,
    C: ChatModel,
{
    embedder: E,
    index: V,
    chat: C,
    config: EngineConfig,
    confidence: Box<dyn ConfidenceScorer>,
}

impl<E, V, C> RagEngine<E, V, C>
where
    E: EmbeddingProvider + Send + Sync,
    V: VectorIndex + Send + Sync,
    C: ChatModel + Send + Sync,
{
    pub fn new(embedder: E, index: V, chat: C) -> Self {
        Self {
            embedder,
            index,
            chat,
            config: EngineConfig::default(),
            confidence: Box::new(FinishReasonConfidence),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_confidence_scorer(mut self, scorer: Box<dyn ConfidenceScorer>) -> Self {
        self.confidence = scorer;
        self
    }

    /// Embed the query and search the index. An embedding failure aborts the
    /// request; an index failure degrades to "no context found" so the
    /// caller can still attempt ungrounded generation.
    pub async fn retrieve_context(
        &self,
        query: &str,
        filter: Option<&MetadataFilter>,
        top_k: usize,
    ) -> Result<Vec<RagResult>, EngineError> {
        let query_vector = self.embedder.embed_one(query).await?;

        let hits = match self.index.search(&query_vector, top_k, filter).await {
            Ok(hits) => hits,
            Err(error) => {
                warn!(error = %error, "vector search failed, continuing without context");
                Vec::new()
            }
        };

        let results: Vec<RagResult> = hits.into_iter().map(ScoredPoint::into_result).collect();
        info!(result_count = results.len(), "retrieved context chunks");
        Ok(results)
    }

    /// Unfiltered retrieval at the diagnostic result count, no generation.
    pub async fn search(&self, query: &str) -> Result<Vec<RagResult>, EngineError> {
        self.retrieve_context(query, None, self.config.search_top_k).await
    }

    /// Entry point mirroring the inbound request contract: dispatches to
    /// code explanation when code is attached, plain answering otherwise.
    pub async fn ask(&self, request: &AskRequest) -> Result<Answer, EngineError> {
        request.validate()?;
        match request.code_content.as_deref() {
            Some(code) => {
                self.explain_code(code, &request.message, request.context_level).await
            }
            None => self.answer(&request.message, request.context_level).await,
        }
    }

    /// The full query → embed → search → assemble → generate → cite loop.
    pub async fn answer(
        &self,
        query: &str,
        level: ContextLevel,
    ) -> Result<Answer, EngineError> {
        let filter = level.retrieval_filter();
        let results = self
            .retrieve_context(query, filter.as_ref(), self.config.top_k)
            .await?;

        if results.is_empty() {
            return self.answer_ungrounded(query).await;
        }

        self.generate_grounded(query, &results, level).await
    }

    /// Deliberate degrade path: no retrieved context, answer from the model
    /// alone with an empty citation list.
    async fn answer_ungrounded(&self, query: &str) -> Result<Answer, EngineError> {
        info!("no context found, generating ungrounded answer");
        let generation = self.chat.generate(query, None).await?;
        let confidence = self.confidence.score(&generation);
        Ok(Answer {
            response: generation.text,
            citations: Vec::new(),
            confidence,
            tokens_used: generation.total_tokens,
        })
    }

    /// Cap results at `context_limit`, assemble the ordinal-labelled context
    /// string, generate, and project citations for the requested level.
    async fn generate_grounded(
        &self,
        query: &str,
        results: &[RagResult],
        level: ContextLevel,
    ) -> Result<Answer, EngineError> {
        let selected = &results[..results.len().min(self.config.context_limit)];

        let context = selected
            .iter()
            .enumerate()
            .map(|(index, result)| format!("Relevant content {}: {}", index + 1, result.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let generation = self.chat.generate(query, Some(&context)).await?;
        let citations = selected
            .iter()
            .map(|result| Citation::from_result(result, level))
            .collect();
        let confidence = self.confidence.score(&generation);

        info!(tokens_used = generation.total_tokens, "generated grounded answer");
        Ok(Answer {
            response: generation.text,
            citations,
            confidence,
            tokens_used: generation.total_tokens,
        })
    }

    /// Same pipeline anchored on code semantics: the retrieval query is the
    /// question plus the leading code characters, with a fixed top_k and the
    /// specialized explanation template.
    pub async fn explain_code(
        &self,
        code: &str,
        question: &str,
        level: ContextLevel,
    ) -> Result<Answer, EngineError> {
        let snippet: String = code.chars().take(CODE_QUERY_CHARS).collect();
        let retrieval_query = format!("{question} {snippet}");
        let results = self.retrieve_context(&retrieval_query, None, EXPLAIN_TOP_K).await?;

        let context = if results.is_empty() {
            None
        } else {
            Some(
                results
                    .iter()
                    .map(|result| format!("Context: {}", result.content))
                    .collect::<Vec<_>>()
                    .join("\n\n"),
            )
        };

        let generation = self.chat.explain(code, question, context.as_deref()).await?;
        let citations = results
            .iter()
            .map(|result| Citation::from_result(result, level))
            .collect();
        let confidence = self.confidence.score(&generation);

        Ok(Answer {
            response: generation.text,
            citations,
            confidence,
            tokens_used: generation.total_tokens,
        })
    }

    /// Answer grounded in example-based recommendations instead of an
    /// embedded query.
    pub async fn recommend(
        &self,
        query: &str,
        positive_ids: &[String],
        level: ContextLevel,
    ) -> Result<Answer, EngineError> {
        let hits = match self.index.recommend(positive_ids, &[], RECOMMEND_LIMIT, None).await {
            Ok(hits) => hits,
            Err(error) => {
                warn!(error = %error, "recommendation lookup failed, continuing without context");
                Vec::new()
            }
        };

        let results: Vec<RagResult> = hits.into_iter().map(ScoredPoint::into_result).collect();
        if results.is_empty() {
            return self.answer_ungrounded(query).await;
        }

        self.generate_grounded(query, &results, level).await
    }

    /// Score an already-produced answer's groundedness in its cited context.
    /// Returns `(parseable, score)`; an empty context list short-circuits to
    /// `(false, 0.0)` without calling the model, and any model-side problem
    /// recovers to the neutral `(false, 0.5)`.
    pub async fn validate_answer(&self, answer: &str, results: &[RagResult]) -> (bool, f64) {
        if results.is_empty() {
            return (false, 0.0);
        }

        let context = results
            .iter()
            .map(|result| result.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let generation = match self.chat.evaluate(answer, &context).await {
            Ok(generation) => generation,
            Err(error) => {
                warn!(error = %error, "answer validation call failed");
                return (false, 0.5);
            }
        };

        match generation.text.trim().parse::<f64>() {
            Ok(score) if score.is_finite() => (true, score.clamp(0.0, 1.0)),
            _ => {
                warn!(output = %generation.text, "validator output is not a score");
                (false, 0.5)
            }
        }
    }

    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        let collection = self.index.collection_info().await?;
        Ok(EngineStats {
            collection,
            model: self.chat.model_info(),
            context_limit: self.config.context_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EmbeddingError, GenerationError, IndexError};
    use crate::models::{
        ChunkMetadata, CollectionInfo, ContentKind, Generation, ModelInfo, Point, PointPayload,
        SourceMetadata,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeEmbedder {
        fail: bool,
        queries: Mutex<Vec<String>>,
    }

    impl FakeEmbedder {
        fn new() -> Self {
            Self {
                fail: false,
                queries: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        fn dimensions(&self) -> usize {
            4
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if self.fail {
                return Err(EmbeddingError::BadResponse("unavailable".to_string()));
            }
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3, 0.4]).collect())
        }

        async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if self.fail {
                return Err(EmbeddingError::BadResponse("unavailable".to_string()));
            }
            self.queries.lock().unwrap().push(text.to_string());
            Ok(vec![0.1, 0.2, 0.3, 0.4])
        }
    }

    #[derive(Default)]
    struct FakeIndex {
        hits: Vec<ScoredPoint>,
        fail_search: bool,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn ensure_collection(&self) -> Result<(), IndexError> {
            Ok(())
        }

        async fn upsert(&self, _points: &[Point]) -> Result<(), IndexError> {
            Ok(())
        }

        async fn search(
            &self,
            _query_vector: &[f32],
            limit: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<ScoredPoint>, IndexError> {
            if self.fail_search {
                return Err(IndexError::Request("search exploded".to_string()));
            }
            Ok(self.hits.iter().take(limit).cloned().collect())
        }

        async fn recommend(
            &self,
            _positive: &[String],
            _negative: &[String],
            limit: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<ScoredPoint>, IndexError> {
            Ok(self.hits.iter().take(limit).cloned().collect())
        }

        async fn collection_info(&self) -> Result<CollectionInfo, IndexError> {
            Ok(CollectionInfo {
                name: "test".to_string(),
                vector_count: self.hits.len() as u64,
                point_count: self.hits.len() as u64,
                distance: "Cosine".to_string(),
                dimension: 4,
            })
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum ChatCall {
        Generate { context: Option<String> },
        Explain,
        Evaluate,
    }

    struct FakeChat {
        reply: String,
        evaluate_reply: String,
        calls: Mutex<Vec<ChatCall>>,
    }

    impl FakeChat {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                evaluate_reply: "0.8".to_string(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_evaluate_reply(mut self, reply: &str) -> Self {
            self.evaluate_reply = reply.to_string();
            self
        }

        fn generation(&self, text: &str) -> Generation {
            Generation {
                text: text.to_string(),
                total_tokens: 42,
                finish_reason: "stop".to_string(),
            }
        }
    }

    #[async_trait]
    impl ChatModel for FakeChat {
        async fn generate(
            &self,
            _prompt: &str,
            context: Option<&str>,
        ) -> Result<Generation, GenerationError> {
            self.calls.lock().unwrap().push(ChatCall::Generate {
                context: context.map(str::to_string),
            });
            Ok(self.generation(&self.reply))
        }

        async fn explain(
            &self,
            _code: &str,
            _question: &str,
            _context: Option<&str>,
        ) -> Result<Generation, GenerationError> {
            self.calls.lock().unwrap().push(ChatCall::Explain);
            Ok(self.generation(&self.reply))
        }

        async fn evaluate(
            &self,
            _answer: &str,
            _context: &str,
        ) -> Result<Generation, GenerationError> {
            self.calls.lock().unwrap().push(ChatCall::Evaluate);
            Ok(self.generation(&self.evaluate_reply))
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                chat_model: "fake".to_string(),
                embedding_model: "fake".to_string(),
                temperature: 0.7,
                max_tokens: 1_000,
            }
        }
    }

    fn hit(id: &str, score: f64, content: &str) -> ScoredPoint {
        ScoredPoint {
            id: id.to_string(),
            score,
            payload: PointPayload {
                content: content.to_string(),
                metadata: ChunkMetadata {
                    source: SourceMetadata {
                        kind: ContentKind::Section,
                        chapter: Some("1".to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                source_type: "book_content".to_string(),
            },
        }
    }

    fn engine(
        embedder: FakeEmbedder,
        index: FakeIndex,
        chat: FakeChat,
    ) -> RagEngine<FakeEmbedder, FakeIndex, FakeChat> {
        RagEngine::new(embedder, index, chat)
    }

    #[tokio::test]
    async fn grounded_answer_cites_the_retrieved_point() {
        let index = FakeIndex {
            hits: vec![hit("point-1", 0.95, "ML is...")],
            ..Default::default()
        };
        let engine = engine(
            FakeEmbedder::new(),
            index,
            FakeChat::new("ML is the study of learning from data."),
        );

        let answer = engine
            .answer("What is machine learning?", ContextLevel::Medium)
            .await
            .unwrap();

        assert!(answer.response.contains("ML"));
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].source_id(), "point-1");
        assert_eq!(answer.tokens_used, 42);
        assert_eq!(answer.confidence, 1.0);
    }

    #[tokio::test]
    async fn empty_search_falls_back_to_ungrounded_generation() {
        let engine = engine(FakeEmbedder::new(), FakeIndex::default(), FakeChat::new("best guess"));

        let answer = engine.answer("anything", ContextLevel::Medium).await.unwrap();

        assert!(!answer.response.is_empty());
        assert!(answer.citations.is_empty());

        let calls = engine.chat.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ChatCall::Generate { context: None });
    }

    #[tokio::test]
    async fn index_failure_degrades_to_the_ungrounded_path() {
        let index = FakeIndex {
            fail_search: true,
            ..Default::default()
        };
        let engine = engine(FakeEmbedder::new(), index, FakeChat::new("still answering"));

        let answer = engine.answer("anything", ContextLevel::Medium).await.unwrap();
        assert_eq!(answer.response, "still answering");
        assert!(answer.citations.is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_aborts_the_request() {
        let engine = engine(FakeEmbedder::failing(), FakeIndex::default(), FakeChat::new("x"));
        let result = engine.answer("anything", ContextLevel::Medium).await;
        assert!(matches!(result, Err(EngineError::Embedding(_))));
    }

    #[tokio::test]
    async fn context_is_capped_at_the_context_limit() {
        let hits: Vec<ScoredPoint> = (0..10)
            .map(|index| {
                hit(
                    &format!("point-{index}"),
                    0.95 - index as f64 * 0.05,
                    &format!("content number {index}"),
                )
            })
            .collect();
        let engine = engine(FakeEmbedder::new(), FakeIndex { hits, ..Default::default() }, FakeChat::new("ok"));

        let answer = engine.answer("query", ContextLevel::Medium).await.unwrap();

        assert_eq!(answer.citations.len(), 3);
        // The three highest-scored results, in index order.
        let ids: Vec<&str> = answer.citations.iter().map(Citation::source_id).collect();
        assert_eq!(ids, vec!["point-0", "point-1", "point-2"]);

        let calls = engine.chat.calls.lock().unwrap();
        let ChatCall::Generate { context: Some(context) } = &calls[0] else {
            panic!("expected grounded generation");
        };
        assert!(context.contains("Relevant content 1: content number 0"));
        assert!(context.contains("Relevant content 3: content number 2"));
        assert!(!context.contains("Relevant content 4"));
    }

    #[tokio::test]
    async fn explain_query_is_truncated_to_the_code_prefix() {
        let index = FakeIndex {
            hits: vec![hit("point-1", 0.9, "gradient descent background")],
            ..Default::default()
        };
        let engine = engine(FakeEmbedder::new(), index, FakeChat::new("explanation"));

        let code = "x".repeat(500);
        let answer = engine
            .explain_code(&code, "what does this do?", ContextLevel::Basic)
            .await
            .unwrap();

        assert_eq!(answer.response, "explanation");
        assert_eq!(answer.citations.len(), 1);

        let queries = engine.embedder.queries.lock().unwrap();
        let expected_len = "what does this do? ".chars().count() + 200;
        assert_eq!(queries[0].chars().count(), expected_len);

        let calls = engine.chat.calls.lock().unwrap();
        assert_eq!(calls[0], ChatCall::Explain);
    }

    #[tokio::test]
    async fn ask_dispatches_on_attached_code() {
        let engine = engine(FakeEmbedder::new(), FakeIndex::default(), FakeChat::new("reply"));

        let mut request = AskRequest::new("explain this");
        request.code_content = Some("fn main() {}".to_string());
        engine.ask(&request).await.unwrap();

        let calls = engine.chat.calls.lock().unwrap();
        assert_eq!(calls[0], ChatCall::Explain);
    }

    #[tokio::test]
    async fn ask_rejects_oversized_messages() {
        let engine = engine(FakeEmbedder::new(), FakeIndex::default(), FakeChat::new("reply"));
        let request = AskRequest::new("y".repeat(2_001));
        let result = engine.ask(&request).await;
        assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn validation_with_empty_context_skips_the_model() {
        let engine = engine(FakeEmbedder::new(), FakeIndex::default(), FakeChat::new("x"));

        let verdict = engine.validate_answer("2+2=4", &[]).await;
        assert_eq!(verdict, (false, 0.0));
        assert!(engine.chat.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn validation_parses_and_clamps_the_score() {
        let chat = FakeChat::new("x").with_evaluate_reply("1.7");
        let engine = engine(FakeEmbedder::new(), FakeIndex::default(), chat);

        let results = vec![hit("p", 0.9, "context").into_result()];
        let verdict = engine.validate_answer("an answer", &results).await;
        assert_eq!(verdict, (true, 1.0));
    }

    #[tokio::test]
    async fn unparsable_validator_output_is_neutral() {
        let chat = FakeChat::new("x").with_evaluate_reply("definitely valid");
        let engine = engine(FakeEmbedder::new(), FakeIndex::default(), chat);

        let results = vec![hit("p", 0.9, "context").into_result()];
        let verdict = engine.validate_answer("an answer", &results).await;
        assert_eq!(verdict, (false, 0.5));
    }

    #[tokio::test]
    async fn recommendations_reuse_the_grounded_tail() {
        let index = FakeIndex {
            hits: vec![hit("liked-1", 0.88, "related passage")],
            ..Default::default()
        };
        let engine = engine(FakeEmbedder::new(), index, FakeChat::new("you may like"));

        let answer = engine
            .recommend("more like this", &["liked-0".to_string()], ContextLevel::Detailed)
            .await
            .unwrap();

        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].source_id(), "liked-1");
    }

    #[tokio::test]
    async fn injected_confidence_scorer_replaces_the_default() {
        struct Flat;
        impl ConfidenceScorer for Flat {
            fn score(&self, _generation: &Generation) -> f64 {
                0.25
            }
        }

        let index = FakeIndex {
            hits: vec![hit("point-1", 0.9, "passage")],
            ..Default::default()
        };
        let engine = engine(FakeEmbedder::new(), index, FakeChat::new("ok"))
            .with_confidence_scorer(Box::new(Flat));

        let answer = engine.answer("query", ContextLevel::Medium).await.unwrap();
        assert_eq!(answer.confidence, 0.25);
    }

    #[tokio::test]
    async fn stats_report_collection_and_models() {
        let engine = engine(FakeEmbedder::new(), FakeIndex::default(), FakeChat::new("x"));
        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.collection.name, "test");
        assert_eq!(stats.model.chat_model, "fake");
        assert_eq!(stats.context_limit, 3);
    }
}
