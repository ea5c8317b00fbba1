use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::EngineError;

/// Maximum accepted length of an inbound question, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2_000;

const FAILURE_MESSAGE: &str =
    "I apologize, but I encountered an error while processing your request.";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContextLevel {
    Basic,
    #[default]
    Medium,
    Detailed,
}

impl ContextLevel {
    /// Metadata filter applied during retrieval for this level.
    ///
    /// `basic` narrows to chapter-level content, `detailed` to section-level
    /// content, `medium` searches the whole collection.
    pub fn retrieval_filter(self) -> Option<MetadataFilter> {
        match self {
            ContextLevel::Basic => Some(MetadataFilter::equals("type", "chapter")),
            ContextLevel::Medium => None,
            ContextLevel::Detailed => Some(MetadataFilter::equals("type", "section")),
        }
    }
}

impl FromStr for ContextLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "basic" => Ok(ContextLevel::Basic),
            "medium" => Ok(ContextLevel::Medium),
            "detailed" => Ok(ContextLevel::Detailed),
            other => Err(format!(
                "unknown context level '{other}', expected basic, medium or detailed"
            )),
        }
    }
}

/// Conjunction of exact-value equality conditions over payload metadata keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: BTreeMap<String, Value>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().and(key, value)
    }

    pub fn and(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.conditions.iter().map(|(key, value)| (key.as_str(), value))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Chapter,
    Section,
    #[default]
    Unknown,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Chapter => "chapter",
            ContentKind::Section => "section",
            ContentKind::Unknown => "unknown",
        }
    }
}

/// Provenance of a chunk: a fixed core of known fields plus an open
/// extension map, so filters stay expressible without giving up typing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceMetadata {
    #[serde(rename = "type", default)]
    pub kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_number: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Per-chunk bookkeeping attached to every stored unit. Source fields are
/// flattened into the same object so index filters can address them as
/// `metadata.<key>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub chunk_id: usize,
    #[serde(default)]
    pub chunk_size: usize,
    #[serde(default)]
    pub total_chunks: usize,
    /// chunk_id / total_chunks, in [0.0, 1.0).
    #[serde(default)]
    pub position: f64,
    #[serde(flatten)]
    pub source: SourceMetadata,
}

/// One unit of embeddable text with its provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// One retrieved chunk, enriched with its runtime similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResult {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub score: f64,
    pub source_id: String,
}

/// Projection of a [`RagResult`], narrowed by [`ContextLevel`]. Derived per
/// response, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Citation {
    Detailed {
        source_id: String,
        score: f64,
        metadata: ChunkMetadata,
    },
    Medium {
        source_id: String,
        score: f64,
        chapter: String,
    },
    Basic {
        source_id: String,
    },
}

impl Citation {
    pub fn from_result(result: &RagResult, level: ContextLevel) -> Self {
        match level {
            ContextLevel::Basic => Citation::Basic {
                source_id: result.source_id.clone(),
            },
            ContextLevel::Medium => Citation::Medium {
                source_id: result.source_id.clone(),
                score: result.score,
                chapter: result
                    .metadata
                    .source
                    .chapter
                    .clone()
                    .unwrap_or_else(|| "Unknown".to_string()),
            },
            ContextLevel::Detailed => Citation::Detailed {
                source_id: result.source_id.clone(),
                score: result.score,
                metadata: result.metadata.clone(),
            },
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            Citation::Basic { source_id }
            | Citation::Medium { source_id, .. }
            | Citation::Detailed { source_id, .. } => source_id,
        }
    }
}

/// Persisted unit in the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPayload {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub source_type: String,
}

/// One nearest-neighbor hit as returned by the index, score-descending.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f64,
    pub payload: PointPayload,
}

impl ScoredPoint {
    pub fn into_result(self) -> RagResult {
        RagResult {
            content: self.payload.content,
            metadata: self.payload.metadata,
            score: self.score,
            source_id: self.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub vector_count: u64,
    pub point_count: u64,
    pub distance: String,
    pub dimension: usize,
}

/// Output of a chat-model call before confidence scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub total_tokens: u32,
    pub finish_reason: String,
}

/// The engine's entry contract, mirroring what the HTTP layer would post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub context_level: ContextLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_content: Option<String>,
}

impl AskRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
            context_level: ContextLevel::default(),
            code_content: None,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let chars = self.message.chars().count();
        if chars == 0 || self.message.trim().is_empty() {
            return Err(EngineError::InvalidRequest("message is empty".to_string()));
        }
        if chars > MAX_MESSAGE_CHARS {
            return Err(EngineError::InvalidRequest(format!(
                "message is {chars} characters, maximum is {MAX_MESSAGE_CHARS}"
            )));
        }
        Ok(())
    }
}

/// Final response tuple. Either fully populated from a completed request or
/// the uniform failure shape, never a partial mix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub response: String,
    pub citations: Vec<Citation>,
    pub confidence: f64,
    pub tokens_used: u32,
}

impl Answer {
    pub fn failure() -> Self {
        Self {
            response: FAILURE_MESSAGE.to_string(),
            citations: Vec::new(),
            confidence: 0.0,
            tokens_used: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub collection: CollectionInfo,
    pub model: ModelInfo,
    pub context_limit: usize,
}
