//! Ordered property indexes: single-property range and multi-property
//! composite.

use ordered_float::OrderedFloat;
use plexusdb_api::{NodeId, NodeRecord, PropertyValue};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Total-order key over the indexable property values.
///
/// Null, Map and other non-indexable values have no key and are absent from
/// ordered indexes. Values of different types sort by type rank, so a range
/// scan never crosses type boundaries by accident.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    String(String),
    DateTime(i64),
    Point(OrderedFloat<f64>, OrderedFloat<f64>),
    List(Vec<IndexKey>),
}

impl IndexKey {
    pub fn from_value(value: &PropertyValue) -> Option<IndexKey> {
        match value {
            PropertyValue::Null | PropertyValue::Map(_) => None,
            PropertyValue::Bool(b) => Some(IndexKey::Bool(*b)),
            PropertyValue::Int(i) => Some(IndexKey::Int(*i)),
            PropertyValue::Float(f) => Some(IndexKey::Float(OrderedFloat(*f))),
            PropertyValue::String(s) => Some(IndexKey::String(s.clone())),
            PropertyValue::DateTime(t) => Some(IndexKey::DateTime(*t)),
            PropertyValue::Point { x, y } => {
                Some(IndexKey::Point(OrderedFloat(*x), OrderedFloat(*y)))
            }
            PropertyValue::List(items) => items
                .iter()
                .map(IndexKey::from_value)
                .collect::<Option<Vec<_>>>()
                .map(IndexKey::List),
        }
    }
}

/// Single-property ordered index supporting equality and range lookups.
#[derive(Debug, Clone, Default)]
pub struct OrderedIndex {
    map: BTreeMap<IndexKey, BTreeSet<NodeId>>,
}

impl OrderedIndex {
    pub fn insert(&mut self, property: &str, record: &NodeRecord) {
        if let Some(key) = record.property(property).and_then(IndexKey::from_value) {
            self.map.entry(key).or_default().insert(record.id);
        }
    }

    pub fn remove(&mut self, property: &str, record: &NodeRecord) {
        if let Some(key) = record.property(property).and_then(IndexKey::from_value) {
            if let Some(ids) = self.map.get_mut(&key) {
                ids.remove(&record.id);
                if ids.is_empty() {
                    self.map.remove(&key);
                }
            }
        }
    }

    pub fn equality(&self, value: &PropertyValue) -> Vec<NodeId> {
        IndexKey::from_value(value)
            .and_then(|key| self.map.get(&key))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Range scan over `[min, max]`; either bound may be open.
    pub fn range(
        &self,
        min: Option<&PropertyValue>,
        max: Option<&PropertyValue>,
    ) -> Vec<NodeId> {
        let lower = match min.map(IndexKey::from_value) {
            Some(Some(key)) => Bound::Included(key),
            Some(None) => return Vec::new(),
            None => Bound::Unbounded,
        };
        let upper = match max.map(IndexKey::from_value) {
            Some(Some(key)) => Bound::Included(key),
            Some(None) => return Vec::new(),
            None => Bound::Unbounded,
        };
        self.map
            .range((lower, upper))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Multi-property ordered index. Indexed only when every component property
/// is present and indexable.
#[derive(Debug, Clone, Default)]
pub struct CompositeIndex {
    map: BTreeMap<Vec<IndexKey>, BTreeSet<NodeId>>,
}

impl CompositeIndex {
    fn key_for(properties: &[String], record: &NodeRecord) -> Option<Vec<IndexKey>> {
        properties
            .iter()
            .map(|p| record.property(p).and_then(IndexKey::from_value))
            .collect()
    }

    pub fn insert(&mut self, properties: &[String], record: &NodeRecord) {
        if let Some(key) = Self::key_for(properties, record) {
            self.map.entry(key).or_default().insert(record.id);
        }
    }

    pub fn remove(&mut self, properties: &[String], record: &NodeRecord) {
        if let Some(key) = Self::key_for(properties, record) {
            if let Some(ids) = self.map.get_mut(&key) {
                ids.remove(&record.id);
                if ids.is_empty() {
                    self.map.remove(&key);
                }
            }
        }
    }

    pub fn equality(&self, values: &[PropertyValue]) -> Vec<NodeId> {
        let key: Option<Vec<IndexKey>> = values.iter().map(IndexKey::from_value).collect();
        key.and_then(|k| self.map.get(&k))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Equality on the leading component only, used when the executor seeks
    /// on the first property of a composite index.
    pub fn equality_single(&self, value: &PropertyValue) -> Option<Vec<NodeId>> {
        let key = IndexKey::from_value(value)?;
        let mut out = Vec::new();
        for (k, ids) in &self.map {
            if k.first() == Some(&key) {
                out.extend(ids.iter().copied());
            }
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn node(id: NodeId, age: i64) -> NodeRecord {
        let mut properties = BTreeMap::new();
        properties.insert("age".to_string(), PropertyValue::Int(age));
        NodeRecord {
            id,
            labels: vec!["Person".to_string()],
            properties,
        }
    }

    #[test]
    fn equality_and_range() {
        let mut idx = OrderedIndex::default();
        idx.insert("age", &node(1, 30));
        idx.insert("age", &node(2, 40));
        idx.insert("age", &node(3, 40));

        assert_eq!(idx.equality(&PropertyValue::Int(40)), vec![2, 3]);
        assert_eq!(
            idx.range(Some(&PropertyValue::Int(35)), None),
            vec![2, 3]
        );
        assert_eq!(
            idx.range(None, Some(&PropertyValue::Int(35))),
            vec![1]
        );
    }

    #[test]
    fn remove_drops_only_one_node() {
        let mut idx = OrderedIndex::default();
        idx.insert("age", &node(2, 40));
        idx.insert("age", &node(3, 40));
        idx.remove("age", &node(2, 40));
        assert_eq!(idx.equality(&PropertyValue::Int(40)), vec![3]);
    }

    #[test]
    fn null_values_are_not_indexed() {
        let mut idx = OrderedIndex::default();
        let mut record = node(1, 0);
        record.properties.insert("age".to_string(), PropertyValue::Null);
        idx.insert("age", &record);
        assert!(idx.is_empty());
    }

    #[test]
    fn composite_requires_all_components() {
        let mut idx = CompositeIndex::default();
        let props = vec!["age".to_string(), "name".to_string()];

        let mut full = node(1, 30);
        full.properties.insert(
            "name".to_string(),
            PropertyValue::String("Alice".to_string()),
        );
        let partial = node(2, 30);

        idx.insert(&props, &full);
        idx.insert(&props, &partial);

        assert_eq!(
            idx.equality(&[
                PropertyValue::Int(30),
                PropertyValue::String("Alice".to_string())
            ]),
            vec![1]
        );
        assert_eq!(idx.equality_single(&PropertyValue::Int(30)), Some(vec![1]));
    }
}
