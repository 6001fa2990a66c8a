use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("extracted text too short ({length} characters): {details}")]
    InsufficientText { length: usize, details: String },

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("multimodal OCR failed: {0}")]
    OcrFailed(String),

    #[error("index store error: {0}")]
    Store(#[from] StoreError),

    #[error("upsert of batch {batch}/{batches} failed: {source}")]
    BatchUpsert {
        batch: usize,
        batches: usize,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from embedding endpoint: {0}")]
    Response(String),

    #[error("embedding dimension {actual} != {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("embedding request timed out after {0} ms")]
    Timeout(u128),

    #[error("embedding endpoint returned no vectors")]
    Empty,
}

/// Failures of the structured-field adapter. The pipeline never surfaces these to
/// callers; they are logged and replaced by an empty record.
#[derive(Debug, Error)]
pub enum StructuredExtractionError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from chat endpoint: {0}")]
    Response(String),

    #[error("model output is not a json object: {0}")]
    Json(#[from] serde_json::Error),

    #[error("structured extraction timed out after {0} ms")]
    Timeout(u128),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store request failed: {0}")]
    Request(String),

    #[error("store request timed out after {0} ms")]
    Timeout(u128),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
