use crate::error::StoreError;
use crate::models::IndexedRecord;
use crate::store::StoreHit;
use crate::traits::IndexStore;
use async_trait::async_trait;
use bm25::{Document, Language, SearchEngine, SearchEngineBuilder};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

struct MemoryState {
    records: BTreeMap<String, IndexedRecord>,
    lexical: SearchEngine<String>,
}

/// In-process [`IndexStore`]: BM25 over each record's lexical text and
/// brute-force cosine similarity over stored vectors.
pub struct MemoryIndexStore {
    state: RwLock<MemoryState>,
}

impl Default for MemoryIndexStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        let empty: Vec<Document<String>> = Vec::new();
        Self {
            state: RwLock::new(MemoryState {
                records: BTreeMap::new(),
                lexical: SearchEngineBuilder::<String>::with_documents(Language::English, empty)
                    .build(),
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get(&self, id: &str) -> Option<IndexedRecord> {
        self.state.read().await.records.get(id).cloned()
    }

    /// Every stored id, ascending.
    pub async fn ids(&self) -> Vec<String> {
        self.state.read().await.records.keys().cloned().collect()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn upsert(&self, records: &[IndexedRecord]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for record in records {
            state.lexical.upsert(Document {
                id: record.id.clone(),
                contents: record.lexical_text(),
            });
            state.records.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn vector_top_k(&self, vector: &[f32], k: usize) -> Result<Vec<StoreHit>, StoreError> {
        let state = self.state.read().await;
        let mut hits = Vec::new();

        for record in state.records.values() {
            let Some(stored) = &record.vector else {
                continue;
            };
            if stored.len() != vector.len() {
                return Err(StoreError::Request(format!(
                    "query vector dimension {} != stored {} for {}",
                    vector.len(),
                    stored.len(),
                    record.id
                )));
            }
            hits.push(StoreHit::new(cosine_similarity(vector, stored), record.clone()));
        }

        hits.sort_by(|left, right| {
            right
                .score
                .partial_cmp(&left.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.id.cmp(&right.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn lexical_top_k(&self, text: &str, k: usize) -> Result<Vec<StoreHit>, StoreError> {
        let state = self.state.read().await;

        Ok(state
            .lexical
            .search(text, k)
            .into_iter()
            .filter(|result| result.score > 0.0)
            .filter_map(|result| {
                state
                    .records
                    .get(&result.document.id)
                    .map(|record| StoreHit::new(f64::from(result.score), record.clone()))
            })
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for id in ids {
            if state.records.remove(id).is_some() {
                state.lexical.remove(id);
            }
        }
        Ok(())
    }

    async fn record_ids(&self, document_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .records
            .values()
            .filter(|record| record.document_id == document_id)
            .map(|record| record.id.clone())
            .collect())
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;

    for (a, b) in left.iter().zip(right) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}
