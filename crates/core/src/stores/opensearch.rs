use crate::error::StoreError;
use crate::models::IndexedRecord;
use crate::store::StoreHit;
use crate::traits::KeywordIndex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

const BACKEND: &str = "opensearch";

/// Text fields matched by the lexical query, with boosts.
const SEARCH_FIELDS: [&str; 17] = [
    "content^2",
    "org_name^2",
    "capabilities^1.5",
    "services^1.5",
    "industry",
    "country",
    "address",
    "addresses",
    "projects",
    "awards",
    "members_name",
    "members_title",
    "members_role",
    "facilities_name",
    "facilities_type",
    "facilities_usage",
    "notes",
];

const MAX_ID_LISTING: usize = 10_000;

pub struct OpenSearchStore {
    client: Arc<Client>,
    endpoint: String,
    index_name: String,
}

impl OpenSearchStore {
    pub fn new(endpoint: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            client: Arc::new(Client::new()),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            index_name: index_name.into(),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.index_name)
    }

    /// Creates the index with the chunk mapping unless it already exists.
    pub async fn ensure_index(&self) -> Result<(), StoreError> {
        let response = self.client.head(self.index_url()).send().await?;

        if response.status() == StatusCode::OK {
            debug!(index = %self.index_name, "index already exists");
            return Ok(());
        }

        if !response.status().is_client_error() {
            return Err(backend_error(response.status().to_string()));
        }

        let response = self
            .client
            .put(self.index_url())
            .json(&index_definition())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Request(format!(
                "open-search index setup failed with {status}: {body}"
            )));
        }

        info!(index = %self.index_name, "created index");
        Ok(())
    }

    /// Drops the index if present. Used to rebuild from scratch.
    pub async fn delete_index(&self) -> Result<(), StoreError> {
        let response = self.client.delete(self.index_url()).send().await?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        Err(backend_error(response.status().to_string()))
    }

    async fn bulk(&self, operations: Vec<Value>) -> Result<(), StoreError> {
        if operations.is_empty() {
            return Ok(());
        }

        let payload: String = operations
            .into_iter()
            .map(|value| serde_json::to_string(&value))
            .collect::<Result<Vec<_>, serde_json::Error>>()?
            .join("\n")
            + "\n";

        let response = self
            .client
            .post(format!("{}/_bulk?refresh=true", self.endpoint))
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }

        let body: Value = response.json().await?;
        bulk_failures(&body)
    }
}

#[async_trait]
impl KeywordIndex for OpenSearchStore {
    async fn upsert_keyword_records(&self, records: &[IndexedRecord]) -> Result<(), StoreError> {
        let mut operations = Vec::with_capacity(records.len() * 2);

        for record in records {
            operations.push(json!({
                "index": {
                    "_index": self.index_name,
                    "_id": record.id,
                }
            }));
            operations.push(record.to_document());
        }

        self.bulk(operations).await
    }

    async fn search_keyword(&self, text: &str, k: usize) -> Result<Vec<StoreHit>, StoreError> {
        let body = json!({
            "size": k,
            "query": {
                "multi_match": {
                    "query": text,
                    "fields": SEARCH_FIELDS,
                }
            }
        });

        let response = self
            .client
            .post(format!("{}/_search", self.index_url()))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }

        let response_json: Value = response.json().await?;
        Ok(parse_hits(&response_json))
    }

    async fn delete_keyword_records(&self, ids: &[String]) -> Result<(), StoreError> {
        let operations = ids
            .iter()
            .map(|id| json!({"delete": {"_index": self.index_name, "_id": id}}))
            .collect();

        self.bulk(operations).await
    }

    async fn keyword_record_ids(&self, document_id: &str) -> Result<Vec<String>, StoreError> {
        let response = self
            .client
            .post(format!("{}/_search", self.index_url()))
            .json(&json!({
                "size": MAX_ID_LISTING,
                "_source": false,
                "query": {"term": {"document_id": document_id}}
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }

        let response_json: Value = response.json().await?;
        Ok(response_json
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| hit.pointer("/_id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn backend_error(details: String) -> StoreError {
    StoreError::Backend {
        backend: BACKEND.to_string(),
        details,
    }
}

fn parse_hits(response: &Value) -> Vec<StoreHit> {
    let hits = response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    hits.iter()
        .filter_map(|raw| {
            let id = raw.pointer("/_id").and_then(Value::as_str)?;
            let source = raw.pointer("/_source").cloned().unwrap_or(Value::Null);
            let score = raw.pointer("/_score").and_then(Value::as_f64).unwrap_or(0.0);
            Some(StoreHit::new(score, IndexedRecord::from_document(id, &source)))
        })
        .collect()
}

/// A `_bulk` call can succeed at the HTTP level while individual items fail.
fn bulk_failures(body: &Value) -> Result<(), StoreError> {
    if !body.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(());
    }

    let reasons: Vec<String> = body
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object()?.values().next())
                .filter(|result| {
                    // deleting an absent id is fine
                    let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
                    status >= 300 && status != 404
                })
                .map(|result| {
                    let id = result.get("_id").and_then(Value::as_str).unwrap_or("?");
                    let reason = result
                        .pointer("/error/reason")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    format!("{id}: {reason}")
                })
                .collect()
        })
        .unwrap_or_default();

    if reasons.is_empty() {
        return Ok(());
    }

    Err(backend_error(format!(
        "{} bulk item(s) failed: {}",
        reasons.len(),
        reasons.join("; ")
    )))
}

fn index_definition() -> Value {
    let text = json!({"type": "text", "analyzer": "standard"});
    let keyword = json!({"type": "keyword"});
    let integer = json!({"type": "integer"});

    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0
        },
        "mappings": {
            "properties": {
                "id": keyword,
                "document_id": keyword,
                "chunk_index": integer,
                "filename": keyword,
                "page_from": integer,
                "page_to": integer,
                "content": text,
                "org_name": {"type": "text", "fields": {"raw": {"type": "keyword"}}},
                "country": text,
                "address": text,
                "founded_year": integer,
                "size": keyword,
                "industry": text,
                "is_DU_member": {"type": "boolean"},
                "website": keyword,
                "members_name": text,
                "members_title": text,
                "members_role": text,
                "facilities_name": text,
                "facilities_type": text,
                "facilities_usage": text,
                "capabilities": text,
                "projects": text,
                "awards": text,
                "services": text,
                "contacts_name": text,
                "contacts_email": keyword,
                "contacts_phone": keyword,
                "addresses": text,
                "notes": text
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hits_are_parsed_into_records() {
        let response = json!({
            "hits": {"hits": [
                {"_id": "doc#1", "_score": 4.2, "_source": {
                    "document_id": "doc", "chunk_index": 1, "filename": "a.pdf",
                    "page_from": 2, "page_to": 3, "content": "deep drawing",
                    "org_name": "Forming Lab"
                }},
                {"_score": 1.0, "_source": {}}
            ]}
        });

        let hits = parse_hits(&response);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "doc#1");
        assert_eq!(hits[0].score, 4.2);
        assert_eq!(hits[0].record.text, "deep drawing");
        assert_eq!(hits[0].record.page_to, 3);
        assert_eq!(hits[0].record.fields.get("org_name"), Some(&json!("Forming Lab")));
    }

    #[test]
    fn bulk_item_errors_are_reported() {
        let body = json!({
            "errors": true,
            "items": [
                {"index": {"_id": "doc#0", "status": 201}},
                {"index": {"_id": "doc#1", "status": 400, "error": {"reason": "mapper_parsing_exception"}}}
            ]
        });

        let error = bulk_failures(&body).unwrap_err().to_string();
        assert!(error.contains("doc#1: mapper_parsing_exception"));
    }

    #[test]
    fn missing_ids_on_delete_are_not_failures() {
        let body = json!({
            "errors": true,
            "items": [{"delete": {"_id": "doc#9", "status": 404}}]
        });

        assert!(bulk_failures(&body).is_ok());
        assert!(bulk_failures(&json!({"errors": false})).is_ok());
    }

    #[test]
    fn mapping_covers_flattened_fields() {
        let definition = index_definition();
        for field in ["content", "contacts_email", "members_role", "is_DU_member"] {
            assert!(definition
                .pointer(&format!("/mappings/properties/{field}"))
                .is_some());
        }
    }
}
