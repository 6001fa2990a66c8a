use crate::embeddings::Embedder;
use crate::error::SearchError;
use crate::models::{IndexedRecord, RankedResult, SearchQuery};
use crate::store::StoreHit;
use crate::traits::IndexStore;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

const BATCH_CONCURRENCY: usize = 4;

/// Fuses dense-vector and lexical retrieval over one [`IndexStore`].
///
/// Stateless between queries: every call embeds the query, reads both paths
/// concurrently and fuses the two candidate lists.
pub struct HybridSearchEngine<S, E> {
    store: S,
    embedder: E,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSearchOutcome {
    pub query: String,
    pub results: Vec<RankedResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<S, E> HybridSearchEngine<S, E>
where
    S: IndexStore,
    E: Embedder,
{
    pub fn new(store: S, embedder: E) -> Self {
        Self { store, embedder }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[instrument(skip(self, query), fields(alpha = query.alpha, k_vec = query.k_vec, k_bm25 = query.k_bm25))]
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<RankedResult>, SearchError> {
        query.validate()?;

        let query_vector = self.embedder.embed(&query.text).await?;

        let (vector_hits, lexical_hits) = tokio::try_join!(
            self.store.vector_top_k(&query_vector, query.k_vec),
            self.store.lexical_top_k(&query.text, query.k_bm25)
        )?;
        debug!(
            vector_hits = vector_hits.len(),
            lexical_hits = lexical_hits.len(),
            "retrieved candidates"
        );

        let mut ranked = fuse(&vector_hits, &lexical_hits, query.alpha);
        if let Some(min_score) = query.min_score {
            ranked.retain(|result| result.combined_score >= min_score);
        }
        ranked.truncate(query.top_n);

        Ok(ranked)
    }

    /// Runs each text as its own query with the parameters of `template`.
    /// One failing query does not affect the others.
    pub async fn search_batch(
        &self,
        texts: &[String],
        template: &SearchQuery,
    ) -> Vec<BatchSearchOutcome> {
        stream::iter(texts.iter().cloned())
            .map(|text| async move {
                let query = SearchQuery {
                    text: text.clone(),
                    ..template.clone()
                };
                match self.search(&query).await {
                    Ok(results) => BatchSearchOutcome {
                        query: text,
                        results,
                        error: None,
                    },
                    Err(error) => BatchSearchOutcome {
                        query: text,
                        results: Vec::new(),
                        error: Some(error.to_string()),
                    },
                }
            })
            .buffered(BATCH_CONCURRENCY)
            .collect()
            .await
    }
}

/// Rescales scores to `[0, 1]`. When every score is equal, each maps to `1.0`.
pub fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if !range.is_finite() || range <= f64::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| ((score - min) / range).clamp(0.0, 1.0))
        .collect()
}

#[derive(Default)]
struct Candidate {
    record: Option<IndexedRecord>,
    vector_raw: Option<f64>,
    vector_norm: f64,
    bm25_raw: Option<f64>,
    bm25_norm: f64,
}

/// Unions both candidate lists by id; a path that did not return an id
/// contributes 0. Output is sorted by combined score descending; ties go to
/// candidates from the heavier-weighted path, then by id.
pub fn fuse(vector_hits: &[StoreHit], lexical_hits: &[StoreHit], alpha: f64) -> Vec<RankedResult> {
    let mut candidates: BTreeMap<&str, Candidate> = BTreeMap::new();

    let vector_norm = min_max_normalize(&scores_of(vector_hits));
    for (hit, norm) in vector_hits.iter().zip(vector_norm) {
        let candidate = candidates.entry(hit.id.as_str()).or_default();
        if candidate.vector_raw.map_or(true, |seen| hit.score > seen) {
            candidate.vector_raw = Some(hit.score);
            candidate.vector_norm = norm;
        }
        candidate.record.get_or_insert_with(|| hit.record.clone());
    }

    let lexical_norm = min_max_normalize(&scores_of(lexical_hits));
    for (hit, norm) in lexical_hits.iter().zip(lexical_norm) {
        let candidate = candidates.entry(hit.id.as_str()).or_default();
        if candidate.bm25_raw.map_or(true, |seen| hit.score > seen) {
            candidate.bm25_raw = Some(hit.score);
            candidate.bm25_norm = norm;
        }
        candidate.record.get_or_insert_with(|| hit.record.clone());
    }

    let mut ranked: Vec<RankedResult> = candidates
        .into_iter()
        .filter_map(|(id, candidate)| {
            let combined = alpha * candidate.vector_norm + (1.0 - alpha) * candidate.bm25_norm;
            Some(RankedResult {
                id: id.to_string(),
                combined_score: combined.clamp(0.0, 1.0),
                vector_score_raw: candidate.vector_raw,
                bm25_score_raw: candidate.bm25_raw,
                vector_score_norm: candidate.vector_norm,
                bm25_score_norm: candidate.bm25_norm,
                record: candidate.record?,
            })
        })
        .collect();

    ranked.sort_by(|left, right| {
        right
            .combined_score
            .total_cmp(&left.combined_score)
            .then_with(|| dominant_path_rank(left, alpha).cmp(&dominant_path_rank(right, alpha)))
            .then_with(|| left.id.cmp(&right.id))
    });
    ranked
}

/// 0 when the candidate was returned by the path carrying more weight, 1
/// otherwise. Equal weights favour neither path.
fn dominant_path_rank(result: &RankedResult, alpha: f64) -> u8 {
    let retrieved = if alpha > 0.5 {
        result.vector_score_raw.is_some()
    } else if alpha < 0.5 {
        result.bm25_score_raw.is_some()
    } else {
        true
    };
    u8::from(!retrieved)
}

fn scores_of(hits: &[StoreHit]) -> Vec<f64> {
    hits.iter().map(|hit| hit.score).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::{EmbeddingError, StoreError};
    use crate::stores::MemoryIndexStore;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(id: &str) -> IndexedRecord {
        IndexedRecord {
            id: id.to_string(),
            document_id: id.to_string(),
            chunk_index: 0,
            filename: format!("{id}.pdf"),
            page_from: 1,
            page_to: 1,
            text: format!("text of {id}"),
            vector: None,
            fields: Map::new(),
        }
    }

    fn hits(scored: &[(&str, f64)]) -> Vec<StoreHit> {
        scored
            .iter()
            .map(|(id, score)| StoreHit::new(*score, record(id)))
            .collect()
    }

    fn ids(results: &[RankedResult]) -> Vec<&str> {
        results.iter().map(|result| result.id.as_str()).collect()
    }

    #[derive(Default)]
    struct FakeStore {
        vector: Vec<StoreHit>,
        lexical: Vec<StoreHit>,
        fail_lexical: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IndexStore for FakeStore {
        async fn upsert(&self, _records: &[IndexedRecord]) -> Result<(), StoreError> {
            Ok(())
        }

        async fn vector_top_k(&self, _vector: &[f32], k: usize) -> Result<Vec<StoreHit>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.vector.iter().take(k).cloned().collect())
        }

        async fn lexical_top_k(&self, _text: &str, k: usize) -> Result<Vec<StoreHit>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_lexical {
                return Err(StoreError::Request("lexical backend unavailable".into()));
            }
            Ok(self.lexical.iter().take(k).cloned().collect())
        }

        async fn delete(&self, _ids: &[String]) -> Result<(), StoreError> {
            Ok(())
        }

        async fn record_ids(&self, _document_id: &str) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingEmbedder {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EmbeddingError::Response("model unavailable".into()));
            }
            Ok(vec![1.0, 0.0])
        }
    }

    fn sample_store() -> FakeStore {
        FakeStore {
            vector: hits(&[("a", 0.9), ("b", 0.5), ("c", 0.1)]),
            lexical: hits(&[("e", 10.0), ("d", 5.0), ("a", 1.0)]),
            ..Default::default()
        }
    }

    #[test]
    fn equal_scores_normalize_to_one() {
        assert_eq!(min_max_normalize(&[0.4, 0.4, 0.4]), vec![1.0, 1.0, 1.0]);
        assert_eq!(min_max_normalize(&[7.0]), vec![1.0]);
        assert!(min_max_normalize(&[]).is_empty());
        assert_eq!(min_max_normalize(&[2.0, 4.0, 3.0]), vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn missing_path_contributes_zero() {
        let fused = fuse(&hits(&[("a", 0.8), ("b", 0.2)]), &hits(&[("c", 3.0)]), 0.5);
        let c = fused.iter().find(|result| result.id == "c").unwrap();

        assert_eq!(c.vector_score_raw, None);
        assert_eq!(c.vector_score_norm, 0.0);
        assert_eq!(c.bm25_score_norm, 1.0);
        assert!((c.combined_score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn combined_scores_are_bounded_and_non_increasing() {
        let vector = hits(&[("a", 0.91), ("b", 0.77), ("c", 0.52), ("d", 0.11)]);
        let lexical = hits(&[("c", 12.5), ("e", 9.1), ("a", 3.3), ("f", 0.7)]);

        for alpha in [0.0, 0.25, 0.5, 0.7, 1.0] {
            let fused = fuse(&vector, &lexical, alpha);
            assert_eq!(fused.len(), 6);
            assert!(fused
                .iter()
                .all(|result| (0.0..=1.0).contains(&result.combined_score)));
            assert!(fused
                .windows(2)
                .all(|pair| pair[0].combined_score >= pair[1].combined_score));
        }
    }

    #[test]
    fn ties_break_by_id_ascending() {
        let fused = fuse(&hits(&[("b", 1.0), ("a", 1.0)]), &[], 1.0);
        assert_eq!(ids(&fused), vec!["a", "b"]);
    }

    #[test]
    fn weakest_vector_hit_outranks_lexical_only_tie_at_alpha_one() {
        let vector = hits(&[("m", 0.9), ("z", 0.1)]);
        let lexical = hits(&[("b", 5.0)]);

        let mut fused = fuse(&vector, &lexical, 1.0);
        fused.truncate(2);
        assert_eq!(ids(&fused), vec!["m", "z"]);
    }

    #[test]
    fn weakest_lexical_hit_outranks_vector_only_tie_at_alpha_zero() {
        let vector = hits(&[("b", 5.0)]);
        let lexical = hits(&[("m", 9.0), ("z", 1.0)]);

        let fused = fuse(&vector, &lexical, 0.0);
        assert_eq!(ids(&fused), vec!["m", "z", "b"]);
    }

    #[test]
    fn equal_weights_fall_back_to_id_on_ties() {
        let fused = fuse(&hits(&[("z", 1.0)]), &hits(&[("a", 1.0)]), 0.5);
        assert_eq!(ids(&fused), vec!["a", "z"]);
    }

    #[tokio::test]
    async fn alpha_one_follows_vector_ranking() {
        let engine = HybridSearchEngine::new(sample_store(), CountingEmbedder::new(false));
        let results = engine
            .search(&SearchQuery::new("press").with_alpha(1.0))
            .await
            .unwrap();

        assert_eq!(ids(&results), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn alpha_zero_follows_lexical_ranking() {
        let engine = HybridSearchEngine::new(sample_store(), CountingEmbedder::new(false));
        let results = engine
            .search(&SearchQuery::new("press").with_alpha(0.0))
            .await
            .unwrap();

        assert_eq!(ids(&results), vec!["e", "d", "a"]);
    }

    #[tokio::test]
    async fn vector_only_top_hit_scores_alpha() {
        let store = FakeStore {
            vector: hits(&[("a", 0.9), ("b", 0.5), ("c", 0.1)]),
            lexical: hits(&[("e", 10.0), ("d", 5.0)]),
            ..Default::default()
        };
        let engine = HybridSearchEngine::new(store, CountingEmbedder::new(false));
        let results = engine
            .search(&SearchQuery::new("press").with_alpha(0.7).with_top_n(10))
            .await
            .unwrap();

        assert_eq!(results[0].id, "a");
        assert!((results[0].combined_score - 0.7).abs() < 1e-12);
        assert_eq!(results[0].bm25_score_raw, None);
        assert_eq!(results[0].bm25_score_norm, 0.0);

        let b = results.iter().find(|result| result.id == "b").unwrap();
        assert!((b.vector_score_norm - 0.5).abs() < 1e-12);
        assert_eq!(results.len(), 5);
    }

    #[tokio::test]
    async fn min_score_filters_results() {
        let engine = HybridSearchEngine::new(sample_store(), CountingEmbedder::new(false));
        let results = engine
            .search(
                &SearchQuery::new("press")
                    .with_alpha(0.5)
                    .with_top_n(10)
                    .with_min_score(Some(0.5)),
            )
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert!(results.iter().all(|result| result.combined_score >= 0.5));
    }

    #[tokio::test]
    async fn invalid_parameters_are_rejected_before_any_adapter_call() {
        let engine = HybridSearchEngine::new(sample_store(), CountingEmbedder::new(false));

        for query in [
            SearchQuery::new("press").with_alpha(-0.1),
            SearchQuery::new("press").with_candidates(0, 10),
            SearchQuery::new("press").with_candidates(10, 0),
            SearchQuery::new("press").with_top_n(0),
        ] {
            let result = engine.search(&query).await;
            assert!(matches!(result, Err(SearchError::InvalidParameter(_))));
        }

        assert_eq!(engine.embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.store().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn embedding_failure_aborts_without_retrieval() {
        let engine = HybridSearchEngine::new(sample_store(), CountingEmbedder::new(true));
        let result = engine.search(&SearchQuery::new("press")).await;

        assert!(matches!(result, Err(SearchError::Embedding(_))));
        assert_eq!(engine.store().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_failure_is_a_retrieval_error() {
        let store = FakeStore {
            fail_lexical: true,
            ..sample_store()
        };
        let engine = HybridSearchEngine::new(store, CountingEmbedder::new(false));

        let result = engine.search(&SearchQuery::new("press")).await;
        assert!(matches!(result, Err(SearchError::Retrieval(_))));
    }

    #[tokio::test]
    async fn batch_reports_each_query_independently() {
        let engine = HybridSearchEngine::new(sample_store(), CountingEmbedder::new(false));
        let outcomes = engine
            .search_batch(
                &["press".to_string(), "   ".to_string()],
                &SearchQuery::new("").with_top_n(2),
            )
            .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].results.len(), 2);
        assert!(outcomes[0].error.is_none());
        assert!(outcomes[1].error.is_some());
    }

    #[tokio::test]
    async fn searches_the_in_memory_store_end_to_end() {
        let embedder = CharacterNgramEmbedder { dimensions: 64 };
        let store = MemoryIndexStore::new();
        let mut records = Vec::new();
        for (id, text) in [
            ("forming", "deep drawing and stretch forming of sheet metal"),
            ("welding", "laser welding of aluminium tubes"),
            ("training", "apprenticeship and staff training programme"),
        ] {
            let mut record = record(id);
            record.text = text.to_string();
            record.vector = Some(embedder.embed_sync(text));
            records.push(record);
        }
        store.upsert(&records).await.unwrap();

        let engine = HybridSearchEngine::new(store, embedder);
        let results = engine
            .search(&SearchQuery::new("laser welding").with_top_n(1))
            .await
            .unwrap();

        assert_eq!(ids(&results), vec!["welding"]);
        assert!(results[0].combined_score > 0.9);
    }
}
