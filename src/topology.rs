use std::collections::{HashMap, VecDeque};

use crate::{
    datatypes::{ElementId, ElementKind, MaterialId, NodeId, PrestressLoad},
    model::Model,
};

/// Undirected graph over the nodes of reinforcement elements.
///
/// Nodes live in an arena indexed by position; adjacency lists hold arena
/// indices and are sorted and free of duplicates.
#[derive(Debug, Clone, Default)]
pub struct AnchorGraph {
    material: MaterialId,
    ids: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    adjacency: Vec<Vec<usize>>,
    /// Rod elements kept as edges, as arena index pairs
    edges: Vec<(ElementId, usize, usize)>,
    self_loops: usize,
    dangling: usize,
}

impl AnchorGraph {
    /// Builds the graph from the two-node rod elements of `material`.
    ///
    /// Elements flagged as dangling by the assembler are skipped and
    /// counted, as are self-loops.
    pub fn build(model: &Model, material: MaterialId) -> AnchorGraph {
        let mut graph = AnchorGraph {
            material,
            ..AnchorGraph::default()
        };

        for element in model.elements().values() {
            if element.kind() != ElementKind::Rod || element.material != material {
                continue;
            }
            if element.dangling {
                graph.dangling += 1;
                continue;
            }
            let [a, b] = element.nodes[..] else {
                continue;
            };
            if a == b {
                graph.self_loops += 1;
                continue;
            }

            let ia = graph.intern(a);
            let ib = graph.intern(b);
            graph.adjacency[ia].push(ib);
            graph.adjacency[ib].push(ia);
            graph.edges.push((element.id, ia, ib));
        }

        for neighbors in &mut graph.adjacency {
            neighbors.sort_unstable();
            neighbors.dedup();
        }

        log::debug!(
            "anchor graph for material {material}: {} nodes, {} rod elements, {} self-loops, {} dangling",
            graph.ids.len(),
            graph.edges.len(),
            graph.self_loops,
            graph.dangling
        );
        graph
    }

    fn intern(&mut self, id: NodeId) -> usize {
        if let Some(&i) = self.index.get(&id) {
            return i;
        }
        let i = self.ids.len();
        self.ids.push(id);
        self.index.insert(id, i);
        self.adjacency.push(Vec::new());
        i
    }

    pub fn material(&self) -> MaterialId {
        self.material
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    pub fn element_count(&self) -> usize {
        self.edges.len()
    }

    pub fn self_loops(&self) -> usize {
        self.self_loops
    }

    pub fn dangling_elements(&self) -> usize {
        self.dangling
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    /// Distinct neighbors of `id`; zero for nodes outside the graph
    pub fn degree(&self, id: NodeId) -> usize {
        self.index
            .get(&id)
            .map(|&i| self.adjacency[i].len())
            .unwrap_or(0)
    }

    pub fn neighbors(&self, id: NodeId) -> Vec<NodeId> {
        match self.index.get(&id) {
            Some(&i) => self.adjacency[i].iter().map(|&j| self.ids[j]).collect(),
            None => Vec::new(),
        }
    }

    /// Degree-1 nodes in ascending id order
    pub fn endpoints(&self) -> Vec<NodeId> {
        let mut endpoints: Vec<NodeId> = (0..self.ids.len())
            .filter(|&i| self.adjacency[i].len() == 1)
            .map(|i| self.ids[i])
            .collect();
        endpoints.sort_unstable();
        endpoints
    }

    /// Splits the graph into connected components.
    ///
    /// Traversal is seeded from endpoints first (ascending id), then from
    /// any node still unvisited, which only happens for components without
    /// a degree-1 node.
    pub fn components(&self) -> RodDecomposition {
        let mut order: Vec<usize> = (0..self.ids.len()).collect();
        order.sort_by_key(|&i| (self.adjacency[i].len() != 1, self.ids[i]));

        let mut visited = vec![false; self.ids.len()];
        let mut component_of = vec![usize::MAX; self.ids.len()];
        let mut rods: Vec<AnchorRod> = Vec::new();
        let mut queue = VecDeque::new();

        for seed in order {
            if visited[seed] {
                continue;
            }

            let index = rods.len();
            let mut members = Vec::new();
            visited[seed] = true;
            queue.push_back(seed);
            while let Some(current) = queue.pop_front() {
                component_of[current] = index;
                members.push(current);
                for &next in &self.adjacency[current] {
                    if !visited[next] {
                        visited[next] = true;
                        queue.push_back(next);
                    }
                }
            }

            rods.push(AnchorRod {
                index,
                endpoints: members
                    .iter()
                    .filter(|&&i| self.adjacency[i].len() == 1)
                    .map(|&i| self.ids[i])
                    .collect(),
                nodes: members.iter().map(|&i| self.ids[i]).collect(),
                elements: Vec::new(),
                prestress: None,
            });
        }

        for &(element, a, _) in &self.edges {
            rods[component_of[a]].elements.push(element);
        }

        let decomposition = RodDecomposition { rods };
        let cycles = decomposition.anomalies().count();
        if cycles > 0 {
            log::warn!("{cycles} anchor component(s) have no endpoint (closed loop)");
        }
        decomposition
    }
}

/// One physical rod: a connected component of the anchor graph
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorRod {
    pub index: usize,
    /// Members in traversal order
    pub nodes: Vec<NodeId>,
    /// Members with degree 1 in the whole graph
    pub endpoints: Vec<NodeId>,
    pub elements: Vec<ElementId>,
    /// Axial prestress applied to the whole rod
    pub prestress: Option<f64>,
}

impl AnchorRod {
    pub fn is_anomaly(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Members that are not endpoints
    pub fn interior_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .copied()
            .filter(|n| !self.endpoints.contains(n))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RodDecomposition {
    pub rods: Vec<AnchorRod>,
}

impl RodDecomposition {
    /// Components with no endpoint
    pub fn anomalies(&self) -> impl Iterator<Item = &AnchorRod> {
        self.rods.iter().filter(|rod| rod.is_anomaly())
    }

    /// Spreads each prestress load over the whole rod owning its element.
    ///
    /// The first load in file order wins; later conflicting values are
    /// logged and ignored.
    ///
    /// # Returns
    /// The number of rods that received a prestress value
    pub fn attach_prestress(&mut self, loads: &[PrestressLoad]) -> usize {
        let mut rod_of: HashMap<ElementId, usize> = HashMap::new();
        for rod in &self.rods {
            for &element in &rod.elements {
                rod_of.insert(element, rod.index);
            }
        }

        let mut attached = 0;
        for load in loads {
            let Some(&index) = rod_of.get(&load.element) else {
                continue;
            };
            let rod = &mut self.rods[index];
            match rod.prestress {
                None => {
                    rod.prestress = Some(load.force);
                    attached += 1;
                }
                Some(existing) if existing != load.force => log::debug!(
                    "rod {index}: ignoring prestress {} on element {}, already {existing}",
                    load.force,
                    load.element
                ),
                Some(_) => {}
            }
        }
        attached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;
    use crate::model::ModelBuilder;
    use crate::offset::CoordinateOffset;
    use crate::record::Record;
    use crate::datatypes::ElementShape;
    use nalgebra::Point3;

    fn rod_model(edges: &[(ElementId, NodeId, NodeId)], material: MaterialId) -> Model {
        let mut diagnostics = Diagnostics::new();
        let mut builder = ModelBuilder::new(CoordinateOffset::zero());
        let mut line = 0;
        let mut nodes: Vec<NodeId> = edges.iter().flat_map(|&(_, a, b)| [a, b]).collect();
        nodes.sort_unstable();
        nodes.dedup();
        for id in nodes {
            line += 1;
            builder.insert(
                Record::Node {
                    id,
                    position: Point3::new(id as f64, 0.0, 0.0),
                },
                line,
                &mut diagnostics,
            );
        }
        for &(id, a, b) in edges {
            line += 1;
            builder.insert(
                Record::Element {
                    id,
                    shape: ElementShape::Line,
                    material,
                    nodes: vec![a, b],
                },
                line,
                &mut diagnostics,
            );
        }
        builder.finish(&mut diagnostics)
    }

    #[test]
    fn chain_with_self_loop() {
        let model = rod_model(&[(1, 1, 2), (2, 2, 3), (3, 4, 4)], 15);
        let graph = AnchorGraph::build(&model, 15);

        assert_eq!(graph.self_loops(), 1);
        assert!(!graph.contains(4));
        assert_eq!(graph.degree(2), 2);
        assert_eq!(graph.endpoints(), vec![1, 3]);

        let decomposition = graph.components();
        assert_eq!(decomposition.rods.len(), 1);
        let rod = &decomposition.rods[0];
        assert_eq!(rod.nodes, vec![1, 2, 3]);
        assert_eq!(rod.endpoints, vec![1, 3]);
        assert_eq!(rod.elements, vec![1, 2]);
        assert_eq!(rod.interior_nodes().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn other_materials_are_ignored() {
        let model = rod_model(&[(1, 1, 2)], 7);
        let graph = AnchorGraph::build(&model, 15);
        assert_eq!(graph.node_count(), 0);
        assert!(graph.components().rods.is_empty());
    }

    #[test]
    fn duplicate_edges_do_not_raise_degree() {
        let model = rod_model(&[(1, 1, 2), (2, 2, 1)], 15);
        let graph = AnchorGraph::build(&model, 15);
        assert_eq!(graph.degree(1), 1);
        assert_eq!(graph.degree(2), 1);
        assert_eq!(graph.element_count(), 2);
    }

    #[test]
    fn cycle_is_kept_as_anomaly() {
        let model = rod_model(&[(1, 1, 2), (2, 2, 3), (3, 3, 1), (4, 10, 11)], 15);
        let decomposition = AnchorGraph::build(&model, 15).components();

        assert_eq!(decomposition.rods.len(), 2);
        assert_eq!(decomposition.rods[0].endpoints, vec![10, 11]);
        let anomalies: Vec<_> = decomposition.anomalies().collect();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].nodes.len(), 3);
    }

    #[test]
    fn junction_leaves_partial_endpoints() {
        // a T: 1-2-3 with a branch 2-4, plus a loop hanging off 5
        let model = rod_model(
            &[(1, 1, 2), (2, 2, 3), (3, 2, 4), (4, 5, 6), (5, 6, 7), (6, 7, 5), (7, 5, 8)],
            15,
        );
        let decomposition = AnchorGraph::build(&model, 15).components();

        assert_eq!(decomposition.rods.len(), 2);
        assert_eq!(decomposition.rods[0].endpoints, vec![1, 3, 4]);
        assert_eq!(decomposition.rods[1].endpoints, vec![8]);
    }

    #[test]
    fn prestress_spreads_over_rod() {
        let model = rod_model(&[(1, 1, 2), (2, 2, 3), (3, 10, 11)], 15);
        let mut decomposition = AnchorGraph::build(&model, 15).components();

        let loads = vec![
            PrestressLoad {
                group: 1,
                element: 2,
                force: 150.0,
            },
            PrestressLoad {
                group: 1,
                element: 1,
                force: 90.0,
            },
            PrestressLoad {
                group: 1,
                element: 99,
                force: 5.0,
            },
        ];
        assert_eq!(decomposition.attach_prestress(&loads), 1);

        let chain = decomposition
            .rods
            .iter()
            .find(|rod| rod.nodes.contains(&2))
            .unwrap();
        assert_eq!(chain.prestress, Some(150.0));
        let single = decomposition
            .rods
            .iter()
            .find(|rod| rod.nodes.contains(&10))
            .unwrap();
        assert_eq!(single.prestress, None);
    }
}
