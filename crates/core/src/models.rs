use crate::error::SearchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Raw uploaded file handed to the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct DocumentBlob {
    pub filename: String,
    pub bytes: Arc<[u8]>,
}

impl DocumentBlob {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub document_id: String,
    pub filename: String,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Pending,
    Extracting,
    Extracted,
    ExtractionError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Record id shared by every store backend: `"{document_id}#{chunk_index}"`.
pub fn record_id(document_id: &str, chunk_index: u32) -> String {
    format!("{document_id}#{chunk_index}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: u32,
    pub page_from: u32,
    pub page_to: u32,
    pub text: String,
    pub vector: Option<Vec<f32>>,
    pub structured: Option<StructuredRecord>,
}

impl Chunk {
    pub fn record_id(&self) -> String {
        record_id(&self.document_id, self.chunk_index)
    }
}

const SCALAR_FIELDS: [&str; 7] = [
    "org_name", "country", "address", "size", "industry", "website", "notes",
];
const LIST_FIELDS: [&str; 5] = ["capabilities", "projects", "awards", "services", "addresses"];
const OBJECT_LIST_FIELDS: [&str; 3] = ["contacts", "members", "facilities"];

/// Best-effort metadata inferred for a document or chunk.
///
/// Fields are open-ended: anything the extractor returns is kept, and every
/// accessor treats a missing field as a normal state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct StructuredRecord {
    fields: BTreeMap<String, Value>,
}

impl StructuredRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coerces a raw model answer into a record: known list fields accept a single
    /// string, `founded_year` accepts digit strings, `is_DU_member` accepts yes/no
    /// spellings, and nulls or blanks are dropped.
    pub fn from_llm_output(value: Value) -> Self {
        let mut record = Self::new();
        let Value::Object(object) = value else {
            return record;
        };

        for (key, value) in object {
            let coerced = match key.as_str() {
                "founded_year" => coerce_year(&value),
                "is_DU_member" => coerce_bool(&value),
                field if LIST_FIELDS.contains(&field) => coerce_string_list(&value),
                field if OBJECT_LIST_FIELDS.contains(&field) => coerce_object_list(&value),
                field if SCALAR_FIELDS.contains(&field) => coerce_string(&value),
                _ => Some(value),
            };

            if let Some(coerced) = coerced {
                record.insert(key, coerced);
            }
        }

        record
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.fields.get(field).and_then(Value::as_bool)
    }

    /// Strings of a list field; a lone string counts as a one-element list.
    pub fn get_list(&self, field: &str) -> Vec<String> {
        self.fields
            .get(field)
            .and_then(coerce_string_list)
            .and_then(|value| match value {
                Value::Array(items) => Some(
                    items
                        .into_iter()
                        .filter_map(|item| item.as_str().map(str::to_string))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Inserting `null` removes the field.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        if value.is_null() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, value);
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Copies fields from `other` that are absent here. Present fields win.
    pub fn merge_missing(&mut self, other: &StructuredRecord) {
        for (field, value) in &other.fields {
            self.fields
                .entry(field.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Flat, index-friendly view: nested contact/member/facility objects become
    /// parallel string lists, and every known key is present (null or empty list).
    pub fn flatten_for_index(&self) -> Map<String, Value> {
        let mut flat = Map::new();

        for field in SCALAR_FIELDS {
            flat.insert(
                field.to_string(),
                self.get_str(field)
                    .map(|value| Value::String(value.to_string()))
                    .unwrap_or(Value::Null),
            );
        }
        flat.insert(
            "founded_year".to_string(),
            self.get_i64("founded_year").map(Value::from).unwrap_or(Value::Null),
        );
        flat.insert(
            "is_DU_member".to_string(),
            self.get_bool("is_DU_member").map(Value::from).unwrap_or(Value::Null),
        );

        for field in ["capabilities", "projects", "awards", "services"] {
            flat.insert(field.to_string(), Value::from(self.get_list(field)));
        }

        let members = self.object_list("members");
        let facilities = self.object_list("facilities");
        let contacts = self.object_list("contacts");

        flat.insert("members_name".into(), Value::from(pluck(&members, "name")));
        flat.insert("members_title".into(), Value::from(pluck(&members, "title")));
        flat.insert("members_role".into(), Value::from(pluck(&members, "role")));
        flat.insert("facilities_name".into(), Value::from(pluck(&facilities, "name")));
        flat.insert("facilities_type".into(), Value::from(pluck(&facilities, "type")));
        flat.insert("facilities_usage".into(), Value::from(pluck(&facilities, "usage")));
        flat.insert("contacts_name".into(), Value::from(pluck(&contacts, "name")));
        flat.insert(
            "contacts_email".into(),
            Value::from(
                pluck(&contacts, "email")
                    .into_iter()
                    .filter(|email| looks_like_email(email))
                    .collect::<Vec<_>>(),
            ),
        );
        flat.insert("contacts_phone".into(), Value::from(pluck(&contacts, "phone")));

        let mut addresses = Vec::new();
        if let Some(address) = self.get_str("address") {
            addresses.push(address.to_string());
        }
        addresses.extend(self.get_list("addresses"));
        addresses.extend(pluck(&contacts, "address"));
        flat.insert("addresses".into(), Value::from(addresses));

        for (field, value) in &self.fields {
            if !flat.contains_key(field) && !OBJECT_LIST_FIELDS.contains(&field.as_str()) {
                flat.insert(field.clone(), value.clone());
            }
        }

        flat
    }

    fn object_list(&self, field: &str) -> Vec<&Map<String, Value>> {
        self.fields
            .get(field)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default()
    }
}

fn pluck(objects: &[&Map<String, Value>], key: &str) -> Vec<String> {
    objects
        .iter()
        .filter_map(|object| object.get(key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}

fn coerce_string(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| Value::String(trimmed.to_string()))
        }
        Value::Number(_) | Value::Bool(_) => Some(Value::String(value.to_string())),
        _ => None,
    }
}

fn coerce_string_list(value: &Value) -> Option<Value> {
    match value {
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter_map(coerce_string)
                .collect::<Vec<_>>(),
        )),
        Value::String(_) => coerce_string(value).map(|single| Value::Array(vec![single])),
        _ => None,
    }
}

fn coerce_object_list(value: &Value) -> Option<Value> {
    value.as_array().map(|items| {
        Value::Array(
            items
                .iter()
                .filter(|item| item.is_object())
                .cloned()
                .collect(),
        )
    })
}

fn coerce_year(value: &Value) -> Option<Value> {
    match value {
        Value::Number(number) => number.as_i64().map(Value::from),
        Value::String(text) => text.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

fn coerce_bool(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(flag) => Some(Value::Bool(*flag)),
        Value::String(text) => Some(Value::Bool(matches!(
            text.trim().to_lowercase().as_str(),
            "true" | "yes" | "1" | "是"
        ))),
        _ => None,
    }
}

const BASE_FIELDS: [&str; 7] = [
    "id",
    "document_id",
    "chunk_index",
    "filename",
    "page_from",
    "page_to",
    "content",
];

/// What the index store holds for one chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedRecord {
    pub id: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub filename: String,
    pub page_from: u32,
    pub page_to: u32,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl IndexedRecord {
    pub fn from_chunk(chunk: &Chunk, filename: &str) -> Self {
        Self {
            id: chunk.record_id(),
            document_id: chunk.document_id.clone(),
            chunk_index: chunk.chunk_index,
            filename: filename.to_string(),
            page_from: chunk.page_from,
            page_to: chunk.page_to,
            text: chunk.text.clone(),
            vector: chunk.vector.clone(),
            fields: chunk
                .structured
                .as_ref()
                .map(StructuredRecord::flatten_for_index)
                .unwrap_or_default(),
        }
    }

    /// Flat document body used by the remote stores (no vector).
    pub fn to_document(&self) -> Value {
        let mut body = Map::new();
        for (field, value) in &self.fields {
            if !BASE_FIELDS.contains(&field.as_str()) {
                body.insert(field.clone(), value.clone());
            }
        }
        body.insert("id".into(), Value::String(self.id.clone()));
        body.insert("document_id".into(), Value::String(self.document_id.clone()));
        body.insert("chunk_index".into(), Value::from(self.chunk_index));
        body.insert("filename".into(), Value::String(self.filename.clone()));
        body.insert("page_from".into(), Value::from(self.page_from));
        body.insert("page_to".into(), Value::from(self.page_to));
        body.insert("content".into(), Value::String(self.text.clone()));
        Value::Object(body)
    }

    /// Inverse of [`IndexedRecord::to_document`]; missing base fields fall back to
    /// empty values rather than failing.
    pub fn from_document(id: &str, document: &Value) -> Self {
        let read_str = |field: &str| {
            document
                .get(field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let read_u32 = |field: &str| {
            document
                .get(field)
                .and_then(Value::as_u64)
                .and_then(|value| u32::try_from(value).ok())
                .unwrap_or(0)
        };

        let fields = document
            .as_object()
            .map(|object| {
                object
                    .iter()
                    .filter(|(field, _)| !BASE_FIELDS.contains(&field.as_str()))
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let stored_id = read_str("id");
        Self {
            id: if stored_id.is_empty() { id.to_string() } else { stored_id },
            document_id: read_str("document_id"),
            chunk_index: read_u32("chunk_index"),
            filename: read_str("filename"),
            page_from: read_u32("page_from"),
            page_to: read_u32("page_to"),
            text: read_str("content"),
            vector: None,
            fields,
        }
    }

    /// Chunk text plus every textual structured field, for lexical matching.
    pub fn lexical_text(&self) -> String {
        let mut parts = vec![self.text.clone()];
        for value in self.fields.values() {
            match value {
                Value::String(text) => parts.push(text.clone()),
                Value::Array(items) => parts.extend(
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string),
                ),
                _ => {}
            }
        }
        parts.join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub alpha: f64,
    pub k_vec: usize,
    pub k_bm25: usize,
    pub top_n: usize,
    #[serde(default)]
    pub min_score: Option<f64>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            alpha: 0.5,
            k_vec: 10,
            k_bm25: 10,
            top_n: 3,
            min_score: None,
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_candidates(mut self, k_vec: usize, k_bm25: usize) -> Self {
        self.k_vec = k_vec;
        self.k_bm25 = k_bm25;
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_min_score(mut self, min_score: Option<f64>) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.text.trim().is_empty() {
            return Err(SearchError::InvalidParameter("query text is empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(SearchError::InvalidParameter(format!(
                "alpha must be within [0, 1], got {}",
                self.alpha
            )));
        }
        for (name, value) in [
            ("k_vec", self.k_vec),
            ("k_bm25", self.k_bm25),
            ("top_n", self.top_n),
        ] {
            if value == 0 {
                return Err(SearchError::InvalidParameter(format!(
                    "{name} must be positive"
                )));
            }
        }
        if let Some(min_score) = self.min_score {
            if !(0.0..=1.0).contains(&min_score) {
                return Err(SearchError::InvalidParameter(format!(
                    "min_score must be within [0, 1], got {min_score}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedResult {
    pub id: String,
    pub combined_score: f64,
    pub vector_score_raw: Option<f64>,
    pub bm25_score_raw: Option<f64>,
    pub vector_score_norm: f64,
    pub bm25_score_norm: f64,
    pub record: IndexedRecord,
}

/// Per-file snapshot returned by the preview phase and handed back, possibly
/// edited, to the confirm phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedData {
    pub filename: String,
    #[serde(default)]
    pub document_id: String,
    pub status: DocumentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_info: Option<StructuredRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<PageText>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractedData {
    /// Entry for a file that could not be extracted.
    pub fn failed(
        filename: impl Into<String>,
        document_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            document_id: document_id.into(),
            status: DocumentState::ExtractionError,
            text_length: None,
            structured_info: None,
            raw_text_preview: None,
            pages: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    #[serde(rename = "merge_or_upload", alias = "merge_or_upsert")]
    MergeOrUpload,
}

/// What happens to ids of a re-ingested document that no longer produces them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    #[default]
    Delete,
    Keep,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexOptions {
    pub batch_size: usize,
    pub write_mode: WriteMode,
    pub stale_policy: StalePolicy,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            write_mode: WriteMode::MergeOrUpload,
            stale_policy: StalePolicy::Delete,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IndexStatus {
    Indexed {
        chunks: usize,
        degraded: usize,
        stale_removed: usize,
        /// Set when every batch committed but removing stale ids failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stale_error: Option<String>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileIndexStatus {
    pub filename: String,
    pub document_id: String,
    pub status: IndexStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexFailure {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReceipt {
    pub indexed_count: usize,
    pub degraded_count: usize,
    pub stale_removed: usize,
    pub files: Vec<FileIndexStatus>,
    pub failures: Vec<IndexFailure>,
    /// Files that were indexed but whose stale ids could not be removed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanup_failures: Vec<IndexFailure>,
    pub completed_at: DateTime<Utc>,
}

impl IndexReceipt {
    pub fn from_statuses(files: Vec<FileIndexStatus>) -> Self {
        let mut indexed_count = 0;
        let mut degraded_count = 0;
        let mut stale_removed = 0;
        let mut failures = Vec::new();
        let mut cleanup_failures = Vec::new();

        for file in &files {
            match &file.status {
                IndexStatus::Indexed {
                    chunks,
                    degraded,
                    stale_removed: removed,
                    stale_error,
                } => {
                    indexed_count += chunks;
                    degraded_count += degraded;
                    stale_removed += removed;
                    if let Some(error) = stale_error {
                        cleanup_failures.push(IndexFailure {
                            filename: file.filename.clone(),
                            error: error.clone(),
                        });
                    }
                }
                IndexStatus::Failed { error } => failures.push(IndexFailure {
                    filename: file.filename.clone(),
                    error: error.clone(),
                }),
            }
        }

        Self {
            indexed_count,
            degraded_count,
            stale_removed,
            files,
            failures,
            cleanup_failures,
            completed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub min_chunk_chars: usize,
    pub break_search_chars: usize,
    pub adaptive_chunking: bool,
    pub min_text_chars: usize,
    pub preview_chars: usize,
    pub concurrency: usize,
    pub embed_concurrency: usize,
    pub per_chunk_fields: bool,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 5_000,
            chunk_overlap_chars: 200,
            min_chunk_chars: 1_000,
            break_search_chars: 1_000,
            adaptive_chunking: true,
            min_text_chars: 50,
            preview_chars: 500,
            concurrency: 4,
            embed_concurrency: 4,
            per_chunk_fields: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_id_is_document_and_index() {
        assert_eq!(record_id("doc-1", 4), "doc-1#4");
    }

    #[test]
    fn llm_output_is_coerced_into_known_shapes() {
        let record = StructuredRecord::from_llm_output(json!({
            "org_name": "  Forming Lab  ",
            "country": null,
            "founded_year": "1998",
            "is_DU_member": "Yes",
            "capabilities": "metal forming simulation",
            "services": ["testing", "", null],
            "contacts": [{"name": "A. Smith", "email": "a@lab.example"}, "junk"],
            "custom_field": {"anything": true}
        }));

        assert_eq!(record.get_str("org_name"), Some("Forming Lab"));
        assert!(record.get("country").is_none());
        assert_eq!(record.get_i64("founded_year"), Some(1998));
        assert_eq!(record.get_bool("is_DU_member"), Some(true));
        assert_eq!(record.get_list("capabilities"), vec!["metal forming simulation"]);
        assert_eq!(record.get_list("services"), vec!["testing"]);
        assert_eq!(
            record.get("contacts").and_then(Value::as_array).map(Vec::len),
            Some(1)
        );
        assert!(record.get("custom_field").is_some());
    }

    #[test]
    fn missing_fields_are_not_errors() {
        let record = StructuredRecord::new();
        assert!(record.get_str("org_name").is_none());
        assert!(record.get_list("capabilities").is_empty());

        let flat = record.flatten_for_index();
        assert_eq!(flat.get("org_name"), Some(&Value::Null));
        assert_eq!(flat.get("contacts_email"), Some(&json!([])));
    }

    #[test]
    fn flatten_splits_nested_objects_and_filters_emails() {
        let record = StructuredRecord::from_llm_output(json!({
            "address": "1 Main St",
            "contacts": [
                {"name": "Ana", "email": "ana@forming.example", "address": "2 Side St"},
                {"name": "Bo", "email": "not-an-email"}
            ],
            "members": [{"name": "Cy", "role": "lead"}]
        }));

        let flat = record.flatten_for_index();
        assert_eq!(flat["contacts_name"], json!(["Ana", "Bo"]));
        assert_eq!(flat["contacts_email"], json!(["ana@forming.example"]));
        assert_eq!(flat["members_role"], json!(["lead"]));
        assert_eq!(flat["addresses"], json!(["1 Main St", "2 Side St"]));
        assert!(!flat.contains_key("contacts"));
    }

    #[test]
    fn merge_missing_keeps_present_fields() {
        let mut edited = StructuredRecord::from_llm_output(json!({"org_name": "Edited"}));
        let inferred =
            StructuredRecord::from_llm_output(json!({"org_name": "Inferred", "country": "AT"}));
        edited.merge_missing(&inferred);

        assert_eq!(edited.get_str("org_name"), Some("Edited"));
        assert_eq!(edited.get_str("country"), Some("AT"));
    }

    #[test]
    fn indexed_record_document_round_trip_keeps_fields() {
        let record = IndexedRecord {
            id: "doc#0".to_string(),
            document_id: "doc".to_string(),
            chunk_index: 0,
            filename: "a.pdf".to_string(),
            page_from: 1,
            page_to: 2,
            text: "press brake".to_string(),
            vector: Some(vec![1.0, 0.0]),
            fields: json!({"org_name": "Lab"}).as_object().cloned().unwrap_or_default(),
        };

        let restored = IndexedRecord::from_document("ignored", &record.to_document());
        assert_eq!(restored.id, "doc#0");
        assert_eq!(restored.page_to, 2);
        assert_eq!(restored.text, "press brake");
        assert_eq!(restored.fields.get("org_name"), Some(&json!("Lab")));
        assert!(restored.vector.is_none());
    }

    #[test]
    fn query_validation_rejects_out_of_range_values() {
        assert!(SearchQuery::new("q").validate().is_ok());
        assert!(SearchQuery::new("q").with_alpha(1.5).validate().is_err());
        assert!(SearchQuery::new("q").with_alpha(f64::NAN).validate().is_err());
        assert!(SearchQuery::new("q").with_candidates(0, 5).validate().is_err());
        assert!(SearchQuery::new("q").with_top_n(0).validate().is_err());
        assert!(SearchQuery::new("q")
            .with_min_score(Some(-0.1))
            .validate()
            .is_err());
    }

    #[test]
    fn receipt_collects_failures_and_counts() {
        let receipt = IndexReceipt::from_statuses(vec![
            FileIndexStatus {
                filename: "a.pdf".into(),
                document_id: "a".into(),
                status: IndexStatus::Indexed {
                    chunks: 3,
                    degraded: 1,
                    stale_removed: 2,
                    stale_error: None,
                },
            },
            FileIndexStatus {
                filename: "c.pdf".into(),
                document_id: "c".into(),
                status: IndexStatus::Indexed {
                    chunks: 2,
                    degraded: 0,
                    stale_removed: 0,
                    stale_error: Some("listing down".into()),
                },
            },
            FileIndexStatus {
                filename: "b.pdf".into(),
                document_id: "b".into(),
                status: IndexStatus::Failed {
                    error: "boom".into(),
                },
            },
        ]);

        assert_eq!(receipt.indexed_count, 5);
        assert_eq!(receipt.degraded_count, 1);
        assert_eq!(receipt.stale_removed, 2);
        assert_eq!(
            receipt.failures,
            vec![IndexFailure {
                filename: "b.pdf".into(),
                error: "boom".into()
            }]
        );
        assert_eq!(receipt.cleanup_failures.len(), 1);
        assert_eq!(receipt.cleanup_failures[0].filename, "c.pdf");
    }

    #[test]
    fn write_mode_accepts_both_spellings() {
        let upload: IndexOptions =
            serde_json::from_str(r#"{"write_mode": "merge_or_upload"}"#).unwrap();
        let upsert: IndexOptions =
            serde_json::from_str(r#"{"write_mode": "merge_or_upsert"}"#).unwrap();

        assert_eq!(upload.write_mode, WriteMode::MergeOrUpload);
        assert_eq!(upsert.write_mode, WriteMode::MergeOrUpload);
        assert_eq!(upsert.batch_size, IndexOptions::default().batch_size);
    }
}
