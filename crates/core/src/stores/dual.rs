use crate::error::StoreError;
use crate::models::IndexedRecord;
use crate::store::{partition_by_vector, StoreHit};
use crate::traits::{IndexStore, KeywordIndex, VectorIndex};
use async_trait::async_trait;
use tracing::debug;

/// An [`IndexStore`] backed by one lexical and one vector backend.
///
/// The keyword side holds every record and is the source of truth for listing a
/// document's ids. Degraded records (no vector) are written only to the keyword
/// side and removed from the vector side, so a stale embedding never outlives
/// its text.
pub struct DualIndexStore<K, V> {
    keyword: K,
    vector: V,
}

impl<K, V> DualIndexStore<K, V>
where
    K: KeywordIndex,
    V: VectorIndex,
{
    pub fn new(keyword: K, vector: V) -> Self {
        Self { keyword, vector }
    }

    pub fn keyword(&self) -> &K {
        &self.keyword
    }

    pub fn vector(&self) -> &V {
        &self.vector
    }
}

#[async_trait]
impl<K, V> IndexStore for DualIndexStore<K, V>
where
    K: KeywordIndex,
    V: VectorIndex,
{
    async fn upsert(&self, records: &[IndexedRecord]) -> Result<(), StoreError> {
        let (with_vector, degraded) = partition_by_vector(records);
        debug!(
            records = records.len(),
            degraded = degraded.len(),
            "upserting batch"
        );

        tokio::try_join!(
            self.keyword.upsert_keyword_records(records),
            self.vector.upsert_vector_records(&with_vector),
            self.vector.delete_vector_records(&degraded),
        )?;
        Ok(())
    }

    async fn vector_top_k(&self, vector: &[f32], k: usize) -> Result<Vec<StoreHit>, StoreError> {
        self.vector.search_vector(vector, k).await
    }

    async fn lexical_top_k(&self, text: &str, k: usize) -> Result<Vec<StoreHit>, StoreError> {
        self.keyword.search_keyword(text, k).await
    }

    async fn delete(&self, ids: &[String]) -> Result<(), StoreError> {
        tokio::try_join!(
            self.keyword.delete_keyword_records(ids),
            self.vector.delete_vector_records(ids),
        )?;
        Ok(())
    }

    async fn record_ids(&self, document_id: &str) -> Result<Vec<String>, StoreError> {
        self.keyword.keyword_record_ids(document_id).await
    }
}
