//! Application configuration.
//!
//! Loaded from a JSON file where every section is optional, then secrets and
//! endpoints are overridden from the environment:
//! - `EMBEDDING_API_KEY`
//! - `CHAT_API_KEY`
//! - `LLM_OCR_ENDPOINT` / `LLM_OCR_API_KEY`

use crate::chunking::ChunkingConfig;
use crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS;
use crate::error::ConfigError;
use crate::extractor::OcrEndpointConfig;
use crate::models::{IndexOptions, IngestionOptions, SearchQuery};
use crate::retry::RetryPolicy;
use crate::structured::DEFAULT_MAX_INPUT_CHARS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

const EMBEDDING_API_KEY_ENV: &str = "EMBEDDING_API_KEY";
const CHAT_API_KEY_ENV: &str = "CHAT_API_KEY";
const OCR_ENDPOINT_ENV: &str = "LLM_OCR_ENDPOINT";
const OCR_API_KEY_ENV: &str = "LLM_OCR_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenSearchConfig {
    pub url: String,
    pub index_name: String,
}

impl Default for OpenSearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            index_name: "pdf_chunks".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            collection: "pdf_chunks".to_string(),
        }
    }
}

/// Without an endpoint the offline character n-gram embedder is used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

/// Without an endpoint no structured fields are inferred.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_input_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "deepseek-chat".to_string(),
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OcrConfig {
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchDefaults {
    pub alpha: f64,
    pub k_vec: usize,
    pub k_bm25: usize,
    pub top_n: usize,
    pub min_score: Option<f64>,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        let query = SearchQuery::new("");
        Self {
            alpha: query.alpha,
            k_vec: query.k_vec,
            k_bm25: query.k_bm25,
            top_n: query.top_n,
            min_score: query.min_score,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub opensearch: OpenSearchConfig,
    pub qdrant: QdrantConfig,
    pub embedding: EmbeddingConfig,
    pub chat: ChatConfig,
    pub ocr: OcrConfig,
    pub ingestion: IngestionOptions,
    pub indexing: IndexOptions,
    pub retry: RetryPolicy,
    pub search: SearchDefaults,
}

impl AppConfig {
    /// Reads `path` when given, otherwise starts from defaults, then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_json_str(&raw)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Non-blank values returned by `lookup` replace the configured ones.
    pub fn apply_overrides<L>(&mut self, lookup: L)
    where
        L: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(key) = read(EMBEDDING_API_KEY_ENV) {
            self.embedding.api_key = Some(key);
        }
        if let Some(key) = read(CHAT_API_KEY_ENV) {
            self.chat.api_key = Some(key);
        }
        if let Some(endpoint) = read(OCR_ENDPOINT_ENV) {
            self.ocr.endpoint = Some(endpoint);
        }
        if let Some(key) = read(OCR_API_KEY_ENV) {
            self.ocr.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("opensearch.url", &self.opensearch.url)?;
        check_url("qdrant.url", &self.qdrant.url)?;
        for (name, endpoint) in [
            ("embedding.endpoint", &self.embedding.endpoint),
            ("chat.endpoint", &self.chat.endpoint),
            ("ocr.endpoint", &self.ocr.endpoint),
        ] {
            if let Some(endpoint) = endpoint {
                check_url(name, endpoint)?;
            }
        }

        if self.opensearch.index_name.trim().is_empty() {
            return Err(ConfigError::Invalid("opensearch.index_name is empty".into()));
        }
        if self.qdrant.collection.trim().is_empty() {
            return Err(ConfigError::Invalid("qdrant.collection is empty".into()));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid("embedding.dimensions must be positive".into()));
        }
        if self.indexing.batch_size == 0 {
            return Err(ConfigError::Invalid("indexing.batch_size must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be positive".into()));
        }

        ChunkingConfig::from(&self.ingestion)
            .validate()
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;
        self.search_query("probe")
            .validate()
            .map_err(|error| ConfigError::Invalid(format!("search defaults: {error}")))?;

        Ok(())
    }

    pub fn search_query(&self, text: impl Into<String>) -> SearchQuery {
        SearchQuery::new(text)
            .with_alpha(self.search.alpha)
            .with_candidates(self.search.k_vec, self.search.k_bm25)
            .with_top_n(self.search.top_n)
            .with_min_score(self.search.min_score)
    }

    pub fn ocr_endpoint(&self) -> Option<OcrEndpointConfig> {
        self.ocr.endpoint.as_ref().map(|endpoint| OcrEndpointConfig {
            endpoint: endpoint.clone(),
            api_key: self.ocr.api_key.clone(),
        })
    }
}

fn check_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(value)
        .map_err(|error| ConfigError::Invalid(format!("{name} is not a valid url ({value}): {error}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "{name} must use http or https, got {}",
            parsed.scheme()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search_query("q"), SearchQuery::new("q"));
        assert!(config.ocr_endpoint().is_none());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = AppConfig::from_json_str(
            r#"{
                "qdrant": {"collection": "brochures"},
                "embedding": {"endpoint": "https://api.example.com/v1", "dimensions": 1536},
                "search": {"alpha": 0.7, "min_score": 0.75},
                "retry": {"timeout_ms": 2000}
            }"#,
        )
        .unwrap();

        assert_eq!(config.qdrant.collection, "brochures");
        assert_eq!(config.qdrant.url, QdrantConfig::default().url);
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.search.alpha, 0.7);
        assert_eq!(config.search.top_n, 3);
        assert_eq!(config.retry.timeout, Duration::from_secs(2));
        assert_eq!(config.ingestion, IngestionOptions::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_secrets() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("EMBEDDING_API_KEY", "emb-key"),
            ("CHAT_API_KEY", "  "),
            ("LLM_OCR_ENDPOINT", "http://ocr.local/extract"),
        ]);
        let mut config = AppConfig::default();
        config.chat.api_key = Some("from-file".into());
        config.apply_overrides(|name| env.get(name).map(|value| value.to_string()));

        assert_eq!(config.embedding.api_key.as_deref(), Some("emb-key"));
        assert_eq!(config.chat.api_key.as_deref(), Some("from-file"));
        assert_eq!(
            config.ocr_endpoint().map(|ocr| ocr.endpoint),
            Some("http://ocr.local/extract".to_string())
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = AppConfig::default();
        config.opensearch.url = "not a url".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.search.alpha = 2.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.ingestion.chunk_overlap_chars = config.ingestion.chunk_max_chars;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.chat.endpoint = Some("ftp://chat.example".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn secrets_are_not_serialized() {
        let mut config = AppConfig::default();
        config.embedding.api_key = Some("secret".into());
        let rendered = serde_json::to_string(&config).unwrap();
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn load_reads_file_and_reports_missing_path() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"indexing": {"batch_size": 16, "stale_policy": "keep"}}"#)?;

        let config = AppConfig::load(Some(path.as_path()))?;
        assert_eq!(config.indexing.batch_size, 16);
        assert_eq!(config.indexing.stale_policy, crate::models::StalePolicy::Keep);

        let missing = AppConfig::load(Some(dir.path().join("absent.json").as_path()));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
        Ok(())
    }
}
