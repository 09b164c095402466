//! Embedding similarity index: cosine top-k over list-of-number properties.

use ordered_float::OrderedFloat;
use plexusdb_api::{NodeId, NodeRecord, PropertyValue};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    vectors: BTreeMap<NodeId, Vec<f64>>,
}

fn as_vector(value: &PropertyValue) -> Option<Vec<f64>> {
    match value {
        PropertyValue::List(items) => items
            .iter()
            .map(|v| match v {
                PropertyValue::Int(i) => Some(*i as f64),
                PropertyValue::Float(f) => Some(*f),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn cosine(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

impl VectorIndex {
    pub fn insert(&mut self, property: &str, record: &NodeRecord) {
        if let Some(vector) = record.property(property).and_then(as_vector) {
            if !vector.is_empty() {
                self.vectors.insert(record.id, vector);
            }
        }
    }

    pub fn remove(&mut self, _property: &str, record: &NodeRecord) {
        self.vectors.remove(&record.id);
    }

    /// The `k` most similar nodes by cosine similarity, best first.
    /// Dimension mismatches and zero vectors are skipped.
    pub fn top_k(&self, query: &[f64], k: usize) -> Vec<(NodeId, f64)> {
        let mut ranked: Vec<(OrderedFloat<f64>, NodeId)> = self
            .vectors
            .iter()
            .filter_map(|(id, v)| cosine(query, v).map(|s| (OrderedFloat(-s), *id)))
            .collect();
        ranked.sort();
        ranked
            .into_iter()
            .take(k)
            .map(|(neg, id)| (id, -neg.0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn node(id: NodeId, embedding: &[f64]) -> NodeRecord {
        let mut properties = BTreeMap::new();
        properties.insert(
            "embedding".to_string(),
            PropertyValue::List(embedding.iter().map(|f| PropertyValue::Float(*f)).collect()),
        );
        NodeRecord {
            id,
            labels: vec!["Document".to_string()],
            properties,
        }
    }

    #[test]
    fn top_k_ranks_by_cosine() {
        let mut idx = VectorIndex::default();
        idx.insert("embedding", &node(1, &[1.0, 0.0]));
        idx.insert("embedding", &node(2, &[0.7, 0.7]));
        idx.insert("embedding", &node(3, &[0.0, 1.0]));

        let hits = idx.top_k(&[1.0, 0.0], 2);
        assert_eq!(hits[0].0, 1);
        assert!(hits[0].1 > 0.99);
        assert_eq!(hits[1].0, 2);
    }

    #[test]
    fn mismatched_dimensions_are_skipped() {
        let mut idx = VectorIndex::default();
        idx.insert("embedding", &node(1, &[1.0, 0.0, 0.0]));
        assert!(idx.top_k(&[1.0, 0.0], 1).is_empty());
    }
}
