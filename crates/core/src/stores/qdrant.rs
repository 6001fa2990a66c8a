use crate::error::StoreError;
use crate::models::IndexedRecord;
use crate::store::StoreHit;
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

const BACKEND: &str = "qdrant";

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

/// Qdrant only accepts integers or UUIDs as point ids, so record ids map to a
/// name-based UUID. The record id travels in the payload.
pub fn point_id(record_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, record_id.as_bytes())
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    pub fn vector_size(&self) -> usize {
        self.vector_size
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    /// Creates a cosine collection of `vector_size` dimensions when missing, and
    /// rejects an existing collection with another dimension.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self.client.get(self.collection_url()).send().await?;

        if response.status().is_success() {
            let body: Value = response.json().await?;
            let existing = body
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64);
            return match existing {
                Some(size) if size as usize != self.vector_size => Err(StoreError::Request(format!(
                    "collection {} has vector size {size}, configured {}",
                    self.collection, self.vector_size
                ))),
                _ => {
                    debug!(collection = %self.collection, "collection already exists");
                    Ok(())
                }
            };
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status().to_string()));
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }

        info!(collection = %self.collection, size = self.vector_size, "created collection");
        Ok(())
    }

    pub async fn delete_collection(&self) -> Result<(), StoreError> {
        let response = self.client.delete(self.collection_url()).send().await?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        Err(backend_error(response.status().to_string()))
    }

    fn check_dimension(&self, actual: usize) -> Result<(), StoreError> {
        if actual != self.vector_size {
            return Err(StoreError::Request(format!(
                "vector dimension {actual} != {}",
                self.vector_size
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn upsert_vector_records(&self, records: &[IndexedRecord]) -> Result<(), StoreError> {
        let points = records
            .iter()
            .map(|record| {
                let vector = record.vector.as_ref().ok_or_else(|| {
                    StoreError::Request(format!("record {} has no vector", record.id))
                })?;
                self.check_dimension(vector.len())?;

                Ok(json!({
                    "id": point_id(&record.id).to_string(),
                    "vector": vector,
                    "payload": record.to_document(),
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }

        Ok(())
    }

    async fn search_vector(&self, vector: &[f32], k: usize) -> Result<Vec<StoreHit>, StoreError> {
        self.check_dimension(vector.len())?;

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }

        let parsed: Value = response.json().await?;
        Ok(parse_points(&parsed))
    }

    async fn delete_vector_records(&self, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let points: Vec<String> = ids.iter().map(|id| point_id(id).to_string()).collect();
        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }

        Ok(())
    }
}

fn backend_error(details: String) -> StoreError {
    StoreError::Backend {
        backend: BACKEND.to_string(),
        details,
    }
}

fn parse_points(response: &Value) -> Vec<StoreHit> {
    let hits = response
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    hits.iter()
        .filter_map(|hit| {
            let payload = hit.pointer("/payload")?;
            let record = IndexedRecord::from_document("", payload);
            if record.id.is_empty() {
                return None;
            }
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            Some(StoreHit::new(score, record))
        })
        .collect()
}
