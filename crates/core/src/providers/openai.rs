use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::error;

use crate::error::{EmbeddingError, GenerationError};
use crate::models::{Generation, ModelInfo};
use crate::traits::{ChatModel, EmbeddingProvider};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub dimensions: usize,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: api_key.into(),
            chat_model: "gpt-4".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            temperature: 0.7,
            max_tokens: 1_000,
            dimensions: 1_536,
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            chat_model: self.chat_model.clone(),
            embedding_model: self.embedding_model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn request_embeddings(&self, input: Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.embedding_model,
                "input": input,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().to_string();
            let details = response.text().await.unwrap_or_default();
            error!(status = %status, "embedding request rejected");
            return Err(EmbeddingError::Api { status, details });
        }

        let parsed: Value = response.json().await?;
        let data = parsed
            .pointer("/data")
            .and_then(Value::as_array)
            .ok_or_else(|| EmbeddingError::BadResponse("missing data array".to_string()))?;

        data.iter()
            .map(|item| {
                item.pointer("/embedding")
                    .and_then(Value::as_array)
                    .map(|values| {
                        values
                            .iter()
                            .map(|value| value.as_f64().unwrap_or(0.0) as f32)
                            .collect::<Vec<f32>>()
                    })
                    .ok_or_else(|| EmbeddingError::BadResponse("missing embedding".to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.request_embeddings(json!(texts)).await?;
        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::BadResponse(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut embeddings = self.request_embeddings(json!(text)).await?;
        embeddings
            .pop()
            .ok_or_else(|| EmbeddingError::BadResponse("empty embedding response".to_string()))
    }
}

pub struct OpenAiChat {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiChat {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn complete(
        &self,
        prompt: String,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Generation, GenerationError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.chat_model,
                "messages": [{"role": "user", "content": prompt}],
                "temperature": temperature,
                "max_tokens": max_tokens,
                "presence_penalty": 0.1,
                "frequency_penalty": 0.1,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().to_string();
            let details = response.text().await.unwrap_or_default();
            error!(status = %status, "chat completion rejected");
            return Err(GenerationError::Api { status, details });
        }

        let parsed: Value = response.json().await?;
        let text = parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or(GenerationError::EmptyResponse)?
            .to_string();
        let total_tokens = parsed
            .pointer("/usage/total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let finish_reason = parsed
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Generation {
            text,
            total_tokens,
            finish_reason,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn generate(
        &self,
        prompt: &str,
        context: Option<&str>,
    ) -> Result<Generation, GenerationError> {
        let full_prompt = match context {
            Some(context) => format!("Context: {context}\n\nQuestion: {prompt}\n\nAnswer:"),
            None => prompt.to_string(),
        };

        self.complete(full_prompt, self.config.temperature, self.config.max_tokens)
            .await
    }

    async fn explain(
        &self,
        code: &str,
        question: &str,
        context: Option<&str>,
    ) -> Result<Generation, GenerationError> {
        let prompt = format!(
            "Explain the following code step-by-step:\n\n\
             Code:\n{code}\n\n\
             Question: {question}\n\n\
             Provide a detailed explanation that:\n\
             1. Explains what the code does\n\
             2. Breaks down each important step\n\
             3. Relates it to machine learning concepts\n\
             4. Uses simple, educational language\n\n\
             Context: {}",
            context.unwrap_or("No additional context")
        );

        // Lower temperature for factual, reproducible explanations.
        self.complete(prompt, 0.3, 1_500).await
    }

    async fn evaluate(&self, answer: &str, context: &str) -> Result<Generation, GenerationError> {
        let prompt = format!(
            "Evaluate the following response for accuracy and completeness based on \
             the provided context:\n\n\
             Context: {context}\n\n\
             Response: {answer}\n\n\
             Rate the response on a scale of 0.0 to 1.0 where:\n\
             - 1.0 means highly accurate and complete\n\
             - 0.0 means completely inaccurate or irrelevant\n\n\
             Provide only the score as a decimal number."
        );

        self.complete(prompt, 0.1, 50).await
    }

    fn model_info(&self) -> ModelInfo {
        self.config.model_info()
    }
}
