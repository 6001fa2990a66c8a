use crate::error::StoreError;
use crate::models::IndexedRecord;
use crate::store::StoreHit;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn upsert_keyword_records(&self, records: &[IndexedRecord]) -> Result<(), StoreError>;

    async fn search_keyword(&self, text: &str, k: usize) -> Result<Vec<StoreHit>, StoreError>;

    async fn delete_keyword_records(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Ids of every record stored for `document_id`.
    async fn keyword_record_ids(&self, document_id: &str) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Every record passed here carries a vector.
    async fn upsert_vector_records(&self, records: &[IndexedRecord]) -> Result<(), StoreError>;

    async fn search_vector(&self, vector: &[f32], k: usize) -> Result<Vec<StoreHit>, StoreError>;

    async fn delete_vector_records(&self, ids: &[String]) -> Result<(), StoreError>;
}

/// The dual-capability store the ingestion pipeline writes to and the ranking
/// engine reads from. Upserts are keyed by record id and replace the whole record.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn upsert(&self, records: &[IndexedRecord]) -> Result<(), StoreError>;

    async fn vector_top_k(&self, vector: &[f32], k: usize) -> Result<Vec<StoreHit>, StoreError>;

    async fn lexical_top_k(&self, text: &str, k: usize) -> Result<Vec<StoreHit>, StoreError>;

    async fn delete(&self, ids: &[String]) -> Result<(), StoreError>;

    async fn record_ids(&self, document_id: &str) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
impl<T: IndexStore + ?Sized> IndexStore for Arc<T> {
    async fn upsert(&self, records: &[IndexedRecord]) -> Result<(), StoreError> {
        (**self).upsert(records).await
    }

    async fn vector_top_k(&self, vector: &[f32], k: usize) -> Result<Vec<StoreHit>, StoreError> {
        (**self).vector_top_k(vector, k).await
    }

    async fn lexical_top_k(&self, text: &str, k: usize) -> Result<Vec<StoreHit>, StoreError> {
        (**self).lexical_top_k(text, k).await
    }

    async fn delete(&self, ids: &[String]) -> Result<(), StoreError> {
        (**self).delete(ids).await
    }

    async fn record_ids(&self, document_id: &str) -> Result<Vec<String>, StoreError> {
        (**self).record_ids(document_id).await
    }
}
