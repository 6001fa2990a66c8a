use crate::models::IndexedRecord;

/// One candidate returned by a single retrieval path, with its raw backend score.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
    pub id: String,
    pub score: f64,
    pub record: IndexedRecord,
}

impl StoreHit {
    pub fn new(score: f64, record: IndexedRecord) -> Self {
        Self {
            id: record.id.clone(),
            score,
            record,
        }
    }
}

/// Splits records into those carrying a vector and the degraded rest.
pub fn partition_by_vector(records: &[IndexedRecord]) -> (Vec<IndexedRecord>, Vec<String>) {
    let mut with_vector = Vec::new();
    let mut degraded = Vec::new();

    for record in records {
        if record.vector.is_some() {
            with_vector.push(record.clone());
        } else {
            degraded.push(record.id.clone());
        }
    }

    (with_vector, degraded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn record(id: &str, vector: Option<Vec<f32>>) -> IndexedRecord {
        IndexedRecord {
            id: id.to_string(),
            document_id: "doc".to_string(),
            chunk_index: 0,
            filename: "a.pdf".to_string(),
            page_from: 1,
            page_to: 1,
            text: "text".to_string(),
            vector,
            fields: Map::new(),
        }
    }

    #[test]
    fn degraded_records_are_split_out() {
        let records = vec![record("doc#0", Some(vec![1.0])), record("doc#1", None)];
        let (with_vector, degraded) = partition_by_vector(&records);

        assert_eq!(with_vector.len(), 1);
        assert_eq!(with_vector[0].id, "doc#0");
        assert_eq!(degraded, vec!["doc#1".to_string()]);
    }

    #[test]
    fn hit_takes_record_id() {
        let hit = StoreHit::new(0.5, record("doc#3", None));
        assert_eq!(hit.id, "doc#3");
    }
}
