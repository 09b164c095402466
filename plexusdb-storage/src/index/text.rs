//! Text indexes: raw-value substring search and tokenized full-text terms.

use plexusdb_api::{NodeId, NodeRecord, PropertyValue};
use std::collections::{BTreeMap, BTreeSet};

/// Splits text into lowercase alphanumeric terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Raw string values keyed verbatim; supports equality and
/// substring/contains queries.
#[derive(Debug, Clone, Default)]
pub struct TextIndex {
    values: BTreeMap<String, BTreeSet<NodeId>>,
}

impl TextIndex {
    pub fn insert(&mut self, property: &str, record: &NodeRecord) {
        if let Some(PropertyValue::String(s)) = record.property(property) {
            self.values.entry(s.clone()).or_default().insert(record.id);
        }
    }

    pub fn remove(&mut self, property: &str, record: &NodeRecord) {
        if let Some(PropertyValue::String(s)) = record.property(property) {
            if let Some(ids) = self.values.get_mut(s) {
                ids.remove(&record.id);
                if ids.is_empty() {
                    self.values.remove(s);
                }
            }
        }
    }

    pub fn equality(&self, value: &PropertyValue) -> Vec<NodeId> {
        match value {
            PropertyValue::String(s) => self
                .values
                .get(s)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// All nodes whose value contains `needle`. Scans distinct values.
    pub fn containing(&self, needle: &str) -> Vec<NodeId> {
        let mut out = BTreeSet::new();
        for (value, ids) in &self.values {
            if value.contains(needle) {
                out.extend(ids.iter().copied());
            }
        }
        out.into_iter().collect()
    }
}

/// Tokenized inverted index: term -> node ids.
#[derive(Debug, Clone, Default)]
pub struct FullTextIndex {
    terms: BTreeMap<String, BTreeSet<NodeId>>,
}

impl FullTextIndex {
    pub fn insert(&mut self, property: &str, record: &NodeRecord) {
        if let Some(PropertyValue::String(s)) = record.property(property) {
            for term in tokenize(s) {
                self.terms.entry(term).or_default().insert(record.id);
            }
        }
    }

    pub fn remove(&mut self, property: &str, record: &NodeRecord) {
        if let Some(PropertyValue::String(s)) = record.property(property) {
            for term in tokenize(s) {
                if let Some(ids) = self.terms.get_mut(&term) {
                    ids.remove(&record.id);
                    if ids.is_empty() {
                        self.terms.remove(&term);
                    }
                }
            }
        }
    }

    /// Nodes matching every term of `query`.
    pub fn matching(&self, query: &str) -> Vec<NodeId> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }
        let mut result: Option<BTreeSet<NodeId>> = None;
        for term in terms {
            let ids = self.terms.get(&term).cloned().unwrap_or_default();
            result = Some(match result {
                None => ids,
                Some(acc) => acc.intersection(&ids).copied().collect(),
            });
            if result.as_ref().is_some_and(BTreeSet::is_empty) {
                break;
            }
        }
        result.unwrap_or_default().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn node(id: NodeId, bio: &str) -> NodeRecord {
        let mut properties = BTreeMap::new();
        properties.insert("bio".to_string(), PropertyValue::String(bio.to_string()));
        NodeRecord {
            id,
            labels: vec!["Person".to_string()],
            properties,
        }
    }

    #[test]
    fn substring_search() {
        let mut idx = TextIndex::default();
        idx.insert("bio", &node(1, "graph databases"));
        idx.insert("bio", &node(2, "relational databases"));
        idx.insert("bio", &node(3, "compilers"));

        assert_eq!(idx.containing("databases"), vec![1, 2]);
        assert_eq!(idx.containing("graph"), vec![1]);
        assert!(idx.containing("parser").is_empty());
    }

    #[test]
    fn full_text_requires_all_terms() {
        let mut idx = FullTextIndex::default();
        idx.insert("bio", &node(1, "Graph databases are fun"));
        idx.insert("bio", &node(2, "Databases at scale"));

        assert_eq!(idx.matching("databases"), vec![1, 2]);
        assert_eq!(idx.matching("graph databases"), vec![1]);
        assert!(idx.matching("graph scale").is_empty());
    }

    #[test]
    fn remove_updates_postings() {
        let mut idx = FullTextIndex::default();
        let n = node(1, "graph databases");
        idx.insert("bio", &n);
        idx.remove("bio", &n);
        assert!(idx.matching("graph").is_empty());
    }
}
