//! Spatial index over 2D points.

use ordered_float::OrderedFloat;
use plexusdb_api::{NodeId, NodeRecord, PropertyValue};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct PointIndex {
    points: BTreeMap<NodeId, (f64, f64)>,
}

impl PointIndex {
    pub fn insert(&mut self, property: &str, record: &NodeRecord) {
        if let Some(PropertyValue::Point { x, y }) = record.property(property) {
            self.points.insert(record.id, (*x, *y));
        }
    }

    pub fn remove(&mut self, _property: &str, record: &NodeRecord) {
        self.points.remove(&record.id);
    }

    /// Nodes whose point lies inside the closed box [min_x, max_x] x [min_y, max_y].
    pub fn within(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<NodeId> {
        self.points
            .iter()
            .filter(|(_, (x, y))| *x >= min_x && *x <= max_x && *y >= min_y && *y <= max_y)
            .map(|(id, _)| *id)
            .collect()
    }

    /// The `k` nodes closest to (x, y) by euclidean distance, nearest first.
    pub fn nearest(&self, x: f64, y: f64, k: usize) -> Vec<NodeId> {
        let mut ranked: Vec<(OrderedFloat<f64>, NodeId)> = self
            .points
            .iter()
            .map(|(id, (px, py))| {
                let dx = px - x;
                let dy = py - y;
                (OrderedFloat(dx * dx + dy * dy), *id)
            })
            .collect();
        ranked.sort();
        ranked.into_iter().take(k).map(|(_, id)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn node(id: NodeId, x: f64, y: f64) -> NodeRecord {
        let mut properties = BTreeMap::new();
        properties.insert("location".to_string(), PropertyValue::Point { x, y });
        NodeRecord {
            id,
            labels: vec!["Place".to_string()],
            properties,
        }
    }

    #[test]
    fn containment_and_nearest() {
        let mut idx = PointIndex::default();
        idx.insert("location", &node(1, 0.0, 0.0));
        idx.insert("location", &node(2, 5.0, 5.0));
        idx.insert("location", &node(3, 10.0, 10.0));

        assert_eq!(idx.within(-1.0, -1.0, 6.0, 6.0), vec![1, 2]);
        assert_eq!(idx.nearest(4.0, 4.0, 2), vec![2, 1]);
    }
}
