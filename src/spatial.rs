use std::collections::HashSet;

use nalgebra::Point3;
use rstar::{primitives::GeomWithData, RTree};

use crate::{
    datatypes::NodeId,
    error::{Diagnostics, Reference, Warning},
    model::Model,
};

type IndexedNode = GeomWithData<[f64; 3], NodeId>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub node: NodeId,
    pub distance: f64,
}

/// Candidate coupling nodes with an R-tree over their positions.
///
/// Every query breaks distance ties on the lower node id so results do not
/// depend on tree layout.
#[derive(Clone)]
pub struct TargetSet {
    name: &'static str,
    ids: HashSet<NodeId>,
    tree: RTree<IndexedNode>,
}

impl std::fmt::Debug for TargetSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetSet")
            .field("name", &self.name)
            .field("nodes", &self.ids.len())
            .finish()
    }
}

impl TargetSet {
    pub fn from_points(name: &'static str, points: Vec<(NodeId, Point3<f64>)>) -> TargetSet {
        let ids = points.iter().map(|(id, _)| *id).collect();
        let entries = points
            .into_iter()
            .map(|(id, p)| GeomWithData::new([p.x, p.y, p.z], id))
            .collect();

        TargetSet {
            name,
            ids,
            tree: RTree::bulk_load(entries),
        }
    }

    /// Looks up node positions in `model`. Ids without a node are skipped
    /// with a warning.
    pub fn from_model(
        name: &'static str,
        model: &Model,
        ids: impl IntoIterator<Item = NodeId>,
        diagnostics: &mut Diagnostics,
    ) -> TargetSet {
        let mut seen = HashSet::new();
        let mut points = Vec::new();
        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            match model.node(id) {
                Some(node) => points.push((id, node.position)),
                None => diagnostics.push(Warning::ReferentialIntegrity {
                    owner: Reference::TargetSet(name),
                    target: Reference::Node(id),
                }),
            }
        }

        log::debug!("{name} target set: {} nodes", points.len());
        TargetSet::from_points(name, points)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.ids.contains(&id)
    }

    pub fn nearest(&self, point: &Point3<f64>) -> Option<Neighbor> {
        let query = [point.x, point.y, point.z];
        let mut best: Option<(f64, NodeId)> = None;

        for (entry, d2) in self.tree.nearest_neighbor_iter_with_distance_2(&query) {
            match best {
                None => best = Some((d2, entry.data)),
                Some((best_d2, best_id)) if d2 == best_d2 => {
                    best = Some((d2, best_id.min(entry.data)));
                }
                Some(_) => break,
            }
        }

        best.map(|(d2, node)| Neighbor {
            node,
            distance: d2.sqrt(),
        })
    }

    /// Up to `k` nodes within `radius`, nearest first
    pub fn k_nearest_within(&self, point: &Point3<f64>, k: usize, radius: f64) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }

        let query = [point.x, point.y, point.z];
        let radius_2 = radius * radius;
        let mut found: Vec<(f64, NodeId)> = Vec::new();

        for (entry, d2) in self.tree.nearest_neighbor_iter_with_distance_2(&query) {
            if d2 > radius_2 {
                break;
            }
            // keep collecting equal distances past k so ties resolve on id
            if found.len() >= k && found.last().is_some_and(|&(last, _)| d2 > last) {
                break;
            }
            found.push((d2, entry.data));
        }

        found.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        found.truncate(k);
        found
            .into_iter()
            .map(|(d2, node)| Neighbor {
                node,
                distance: d2.sqrt(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid() -> TargetSet {
        let mut points = Vec::new();
        let mut id = 1;
        for x in 0..4 {
            for y in 0..4 {
                points.push((id, Point3::new(x as f64, y as f64, 0.0)));
                id += 1;
            }
        }
        TargetSet::from_points("surface", points)
    }

    #[test]
    fn nearest_matches_linear_scan() {
        let set = grid();
        let query = Point3::new(2.2, 0.9, 0.4);
        let found = set.nearest(&query).unwrap();

        // node at (2, 1) is id 2 * 4 + 1 + 1
        assert_eq!(found.node, 10);
        assert_relative_eq!(found.distance, 0.21f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn ties_break_on_lowest_id() {
        let set = TargetSet::from_points(
            "surface",
            vec![
                (7, Point3::new(1.0, 0.0, 0.0)),
                (3, Point3::new(-1.0, 0.0, 0.0)),
                (5, Point3::new(0.0, 1.0, 0.0)),
            ],
        );
        assert_eq!(set.nearest(&Point3::origin()).unwrap().node, 3);

        let two = set.k_nearest_within(&Point3::origin(), 2, 5.0);
        assert_eq!(two.iter().map(|n| n.node).collect::<Vec<_>>(), vec![3, 5]);
    }

    #[test]
    fn radius_limits_neighbors() {
        let set = grid();
        let found = set.k_nearest_within(&Point3::new(0.0, 0.0, 0.0), 8, 1.0);
        let ids: Vec<_> = found.iter().map(|n| n.node).collect();
        assert_eq!(ids, vec![1, 2, 5]);
        assert!(found.windows(2).all(|w| w[0].distance <= w[1].distance));

        assert!(set.k_nearest_within(&Point3::new(10.0, 10.0, 10.0), 8, 1.0).is_empty());
        assert!(set.k_nearest_within(&Point3::origin(), 0, 1.0).is_empty());
    }

    #[test]
    fn empty_set_has_no_nearest() {
        let set = TargetSet::from_points("volume", Vec::new());
        assert!(set.is_empty());
        assert_eq!(set.nearest(&Point3::origin()), None);
    }
}
