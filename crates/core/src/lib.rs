pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod models;
pub mod pipeline;
pub mod ranking;
pub mod retry;
pub mod store;
pub mod stores;
pub mod structured;
pub mod traits;

pub use chunking::{chunk_document, clean_text, normalize_whitespace, ChunkingConfig};
pub use config::AppConfig;
pub use embeddings::{CharacterNgramEmbedder, Embedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    ConfigError, EmbeddingError, IngestError, SearchError, StoreError, StructuredExtractionError,
};
pub use extractor::{DocumentExtractor, LopdfExtractor, OcrEndpointConfig, OcrFallbackExtractor};
pub use models::{
    record_id, Chunk, DocumentBlob, DocumentFingerprint, DocumentState, ExtractedData,
    FileIndexStatus, IndexFailure, IndexOptions, IndexReceipt, IndexStatus, IndexedRecord,
    IngestionOptions, PageText, RankedResult, SearchQuery, StalePolicy, StructuredRecord,
    WriteMode,
};
pub use pipeline::{discover_pdf_files, generate_document_id, read_blob, relative_name, IngestionPipeline};
pub use ranking::{fuse, min_max_normalize, BatchSearchOutcome, HybridSearchEngine};
pub use retry::RetryPolicy;
pub use store::StoreHit;
pub use stores::{DualIndexStore, MemoryIndexStore, OpenSearchStore, QdrantStore};
pub use structured::{ChatCompletionFieldExtractor, NoopFieldExtractor, StructuredFieldExtractor};
pub use traits::{IndexStore, KeywordIndex, VectorIndex};
