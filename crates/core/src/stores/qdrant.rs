use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::IndexError;
use crate::models::{CollectionInfo, MetadataFilter, Point, PointPayload, ScoredPoint};
use crate::traits::VectorIndex;

pub struct QdrantStore {
    client: Client,
    endpoint: String,
    collection: String,
    vector_size: usize,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            collection: collection.into(),
            vector_size,
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, self.collection, suffix)
    }

    async fn query_points(&self, path: &str, body: Value) -> Result<Vec<ScoredPoint>, IndexError> {
        let response = self
            .authorized(self.client.post(self.collection_url(path)))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut points = Vec::with_capacity(hits.len());
        for hit in hits {
            let id = match hit.pointer("/id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(id)) => id.to_string(),
                _ => String::new(),
            };
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            let payload: PointPayload =
                serde_json::from_value(hit.pointer("/payload").cloned().unwrap_or(Value::Null))?;

            points.push(ScoredPoint { id, score, payload });
        }

        debug!(hit_count = points.len(), path, "qdrant query finished");
        Ok(points)
    }
}

/// Translate a conjunction of equality conditions into Qdrant's `must`
/// filter over `metadata.<key>` payload paths.
fn filter_body(filter: Option<&MetadataFilter>) -> Option<Value> {
    let filter = filter.filter(|conditions| !conditions.is_empty())?;
    let must: Vec<Value> = filter
        .conditions()
        .map(|(key, value)| {
            json!({
                "key": format!("metadata.{key}"),
                "match": {"value": value},
            })
        })
        .collect();
    Some(json!({ "must": must }))
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self
            .authorized(self.client.get(self.collection_url("")))
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(IndexError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        info!(collection = %self.collection, dimension = self.vector_size, "creating collection");
        let response = self
            .authorized(self.client.put(self.collection_url("")))
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::Request(format!(
                "collection setup failed with {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn upsert(&self, points: &[Point]) -> Result<(), IndexError> {
        if points.is_empty() {
            return Ok(());
        }

        for point in points {
            if point.vector.len() != self.vector_size {
                return Err(IndexError::Request(format!(
                    "point {} has dimension {}, collection expects {}",
                    point.id,
                    point.vector.len(),
                    self.vector_size
                )));
            }
        }

        let body = json!({ "points": serde_json::to_value(points)? });
        let response = self
            .authorized(self.client.put(self.collection_url("/points?wait=true")))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        info!(point_count = points.len(), collection = %self.collection, "upserted points");
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        if query_vector.len() != self.vector_size {
            return Err(IndexError::Request(format!(
                "query vector dimension {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let mut body = json!({
            "vector": query_vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(conditions) = filter_body(filter) {
            body["filter"] = conditions;
        }

        self.query_points("/points/search", body).await
    }

    async fn recommend(
        &self,
        positive: &[String],
        negative: &[String],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        if positive.is_empty() {
            return Err(IndexError::Request(
                "recommend requires at least one positive example id".to_string(),
            ));
        }

        let mut body = json!({
            "positive": positive,
            "negative": negative,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(conditions) = filter_body(filter) {
            body["filter"] = conditions;
        }

        self.query_points("/points/recommend", body).await
    }

    async fn collection_info(&self) -> Result<CollectionInfo, IndexError> {
        let response = self
            .authorized(self.client.get(self.collection_url("")))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let result = parsed.pointer("/result").cloned().unwrap_or(Value::Null);

        Ok(CollectionInfo {
            name: self.collection.clone(),
            vector_count: result
                .pointer("/vectors_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            point_count: result
                .pointer("/points_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            distance: result
                .pointer("/config/params/vectors/distance")
                .and_then(Value::as_str)
                .unwrap_or("Cosine")
                .to_string(),
            dimension: result
                .pointer("/config/params/vectors/size")
                .and_then(Value::as_u64)
                .unwrap_or(self.vector_size as u64) as usize,
        })
    }
}
