use std::collections::{BTreeSet, HashSet};

use crate::{
    constraints::{Confidence, ConstraintRecord, ConstraintSynthesizer},
    datatypes::{ElementKind, MaterialId, MeshSetId, NodeId},
    error::{Diagnostics, GeoanchorError, Warning},
    head_selector::{HeadResolution, HeadSelection, HeadSelector, ToleranceSchedule},
    model::Model,
    spatial::TargetSet,
    topology::{AnchorGraph, AnchorRod},
};

pub const DEFAULT_NEAREST_K: usize = 8;
pub const DEFAULT_SEARCH_RADIUS: f64 = 20.0;

/// Picks the nodes of a target region from element kind, material and
/// mesh-set membership
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSelector {
    pub kind: ElementKind,
    pub materials: Option<BTreeSet<MaterialId>>,
    /// Restricts to elements listed in these mesh sets, and adds the nodes
    /// the sets list directly
    pub mesh_sets: Option<Vec<MeshSetId>>,
}

impl NodeSelector {
    pub fn of_kind(kind: ElementKind) -> NodeSelector {
        NodeSelector {
            kind,
            materials: None,
            mesh_sets: None,
        }
    }

    pub fn select(&self, model: &Model) -> BTreeSet<NodeId> {
        let mut nodes = BTreeSet::new();

        let allowed_elements: Option<HashSet<u32>> = self.mesh_sets.as_ref().map(|sets| {
            sets.iter()
                .filter_map(|id| model.mesh_sets().get(id))
                .flat_map(|set| set.elements.iter().copied())
                .collect()
        });

        for element in model.elements().values() {
            if element.dangling || element.kind() != self.kind {
                continue;
            }
            if let Some(materials) = &self.materials {
                if !materials.contains(&element.material) {
                    continue;
                }
            }
            if let Some(allowed) = &allowed_elements {
                if !allowed.contains(&element.id) {
                    continue;
                }
            }
            nodes.extend(element.nodes.iter().copied());
        }

        if let Some(sets) = &self.mesh_sets {
            for set in sets.iter().filter_map(|id| model.mesh_sets().get(id)) {
                nodes.extend(set.nodes.iter().copied().filter(|n| model.node(*n).is_some()));
            }
        }
        nodes
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CouplingConfig {
    /// Material id of the reinforcement rod elements
    pub anchor_material: MaterialId,
    pub tolerances: ToleranceSchedule,
    pub nearest_k: usize,
    pub search_radius: f64,
    pub surface: NodeSelector,
    pub volume: NodeSelector,
    /// Mesh sets holding the bonded (grouted) part of each anchor
    pub bonded_mesh_sets: Vec<MeshSetId>,
    /// Mesh sets holding the free length. When any is present, heads are
    /// picked from the rod endpoints they contain.
    pub free_mesh_sets: Vec<MeshSetId>,
    /// Embed every non-endpoint rod node when no bonded set exists
    pub interior_fallback: bool,
}

impl CouplingConfig {
    pub fn new(anchor_material: MaterialId, tolerances: ToleranceSchedule) -> CouplingConfig {
        CouplingConfig {
            anchor_material,
            tolerances,
            nearest_k: DEFAULT_NEAREST_K,
            search_radius: DEFAULT_SEARCH_RADIUS,
            surface: NodeSelector::of_kind(ElementKind::Shell),
            volume: NodeSelector::of_kind(ElementKind::Solid),
            bonded_mesh_sets: Vec::new(),
            free_mesh_sets: Vec::new(),
            interior_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DistanceSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl DistanceSummary {
    fn from_distances(distances: &[f64]) -> DistanceSummary {
        if distances.is_empty() {
            return DistanceSummary::default();
        }
        DistanceSummary {
            count: distances.len(),
            min: distances.iter().copied().fold(f64::INFINITY, f64::min),
            max: distances.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean: distances.iter().sum::<f64>() / distances.len() as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CouplingStats {
    pub rods: usize,
    pub anchor_nodes: usize,
    pub anchor_elements: usize,
    pub self_loops: usize,
    pub dangling_rod_elements: usize,
    /// Components without an endpoint
    pub anomalies: usize,
    pub prestressed_rods: usize,
    pub surface_nodes: usize,
    pub volume_nodes: usize,
    pub shared_heads: usize,
    /// (tolerance, rods resolved at that tier)
    pub resolved_per_tier: Vec<(f64, usize)>,
    pub uncovered: usize,
    pub head_distance: DistanceSummary,
    pub head_constraints: usize,
    pub embedded_constraints: usize,
    /// Bonded nodes already part of the volume, left unconstrained
    pub embedded_in_volume: usize,
    pub low_confidence: usize,
    pub fallback_records: usize,
}

/// Everything produced for the external solver
#[derive(Debug, Clone)]
pub struct ConstraintDataset {
    pub rods: Vec<AnchorRod>,
    pub selections: Vec<HeadSelection>,
    pub head_constraints: Vec<ConstraintRecord>,
    pub embedded_constraints: Vec<ConstraintRecord>,
    pub stats: CouplingStats,
    pub warnings: Vec<Warning>,
}

/// Derives target sets from `config` and synthesizes the dataset
pub fn synthesize(model: &Model, config: &CouplingConfig) -> Result<ConstraintDataset, GeoanchorError> {
    let mut diagnostics = Diagnostics::new();
    let surface = TargetSet::from_model("surface", model, config.surface.select(model), &mut diagnostics);
    let volume = TargetSet::from_model("volume", model, config.volume.select(model), &mut diagnostics);

    synthesize_with_targets(model, config, &surface, &volume, diagnostics)
}

/// Anchor nodes of the configured free-length mesh sets, or `None` when
/// the model has none of them
fn free_length_nodes(model: &Model, config: &CouplingConfig, graph: &AnchorGraph) -> Option<HashSet<NodeId>> {
    let mut present = config
        .free_mesh_sets
        .iter()
        .filter_map(|id| model.mesh_set_nodes(*id))
        .peekable();
    present.peek()?;

    Some(present.flatten().filter(|n| graph.contains(*n)).collect())
}

/// Slaves to embed, and whether they came from the interior fallback
fn embedded_slaves(
    model: &Model,
    config: &CouplingConfig,
    graph: &AnchorGraph,
    rods: &[AnchorRod],
    heads: &HashSet<NodeId>,
    diagnostics: &mut Diagnostics,
) -> (Vec<NodeId>, bool) {
    let present: Vec<MeshSetId> = config
        .bonded_mesh_sets
        .iter()
        .copied()
        .filter(|id| model.mesh_sets().contains_key(id))
        .collect();

    if !present.is_empty() {
        let mut bonded = BTreeSet::new();
        for id in &present {
            if let Some(nodes) = model.mesh_set_nodes(*id) {
                bonded.extend(nodes.into_iter().filter(|n| graph.contains(*n)));
            }
        }
        let slaves = rods
            .iter()
            .flat_map(|rod| rod.nodes.iter().copied())
            .filter(|n| bonded.contains(n) && !heads.contains(n))
            .collect();
        return (slaves, false);
    }

    if config.interior_fallback {
        log::info!("no bonded mesh set found; embedding every interior rod node");
        let slaves = rods.iter().flat_map(|rod| rod.interior_nodes()).collect();
        return (slaves, true);
    }

    diagnostics.push(Warning::GroupingUnavailable(format!(
        "none of the bonded mesh sets {:?} exist and interior fallback is disabled; no embedded constraints",
        config.bonded_mesh_sets
    )));
    (Vec::new(), false)
}

/// Runs topology, head selection and constraint synthesis against
/// caller-supplied target sets.
///
/// # Arguments
/// * `model` - The assembled model
/// * `config` - Coupling parameters
/// * `surface` - Candidate head coupling nodes
/// * `volume` - Candidate embedding nodes
/// * `diagnostics` - Warnings collected so far in this phase
pub fn synthesize_with_targets(
    model: &Model,
    config: &CouplingConfig,
    surface: &TargetSet,
    volume: &TargetSet,
    mut diagnostics: Diagnostics,
) -> Result<ConstraintDataset, GeoanchorError> {
    let synthesizer = ConstraintSynthesizer::new(config.nearest_k, config.search_radius)?;

    let graph = AnchorGraph::build(model, config.anchor_material);
    let mut decomposition = graph.components();
    let prestressed_rods = decomposition.attach_prestress(model.prestress_loads());
    let rods = decomposition.rods;
    log::info!(
        "anchor material {}: {} rod(s) from {} element(s)",
        config.anchor_material,
        rods.len(),
        graph.element_count()
    );

    let free_nodes = free_length_nodes(model, config, &graph);
    let mut selector = HeadSelector::new(model, surface, &config.tolerances);
    if let Some(free) = &free_nodes {
        log::info!("restricting head candidates to {} free-length node(s)", free.len());
        selector = selector.with_candidates(free);
    }
    let selections = selector.select_all(&rods, &mut diagnostics);

    let mut stats = CouplingStats {
        rods: rods.len(),
        anchor_nodes: graph.node_count(),
        anchor_elements: graph.element_count(),
        self_loops: graph.self_loops(),
        dangling_rod_elements: graph.dangling_elements(),
        anomalies: rods.iter().filter(|rod| rod.is_anomaly()).count(),
        prestressed_rods,
        surface_nodes: surface.len(),
        volume_nodes: volume.len(),
        resolved_per_tier: config.tolerances.tiers().iter().map(|&t| (t, 0)).collect(),
        ..CouplingStats::default()
    };

    let mut head_constraints = Vec::new();
    let mut head_distances = Vec::new();
    for selection in &selections {
        match selection.resolution {
            HeadResolution::Shared { .. } => stats.shared_heads += 1,
            HeadResolution::Matched {
                endpoint,
                distance,
                tier,
                ..
            } => {
                stats.resolved_per_tier[tier].1 += 1;
                head_distances.push(distance);
                let Some(node) = model.node(endpoint) else {
                    continue;
                };
                if let Some(record) = synthesizer.couple(endpoint, &node.position, surface, &mut diagnostics) {
                    head_constraints.push(record);
                }
            }
            HeadResolution::Uncovered { .. } => stats.uncovered += 1,
        }
    }
    stats.head_distance = DistanceSummary::from_distances(&head_distances);

    let heads: HashSet<NodeId> = selections.iter().filter_map(|s| s.head()).collect();
    let (slaves, fallback) = embedded_slaves(model, config, &graph, &rods, &heads, &mut diagnostics);

    let mut embedded_constraints = Vec::new();
    for slave in slaves {
        if volume.contains(slave) {
            stats.embedded_in_volume += 1;
            continue;
        }
        let Some(node) = model.node(slave) else {
            continue;
        };
        if let Some(mut record) = synthesizer.couple(slave, &node.position, volume, &mut diagnostics) {
            record.fallback = fallback;
            embedded_constraints.push(record);
        }
    }

    stats.head_constraints = head_constraints.len();
    stats.embedded_constraints = embedded_constraints.len();
    let all_records = || head_constraints.iter().chain(embedded_constraints.iter());
    stats.low_confidence = all_records()
        .filter(|r| r.confidence == Confidence::LowConfidence)
        .count();
    stats.fallback_records = all_records().filter(|r| r.fallback).count();

    log::info!(
        "coupling: {} head constraint(s), {} embedded constraint(s), {} shared head(s), {} uncovered rod(s)",
        stats.head_constraints,
        stats.embedded_constraints,
        stats.shared_heads,
        stats.uncovered
    );
    diagnostics.summarize("coupling");

    Ok(ConstraintDataset {
        rods,
        selections,
        head_constraints,
        embedded_constraints,
        stats,
        warnings: diagnostics.into_warnings(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::ElementShape;
    use crate::error::WarningKind;
    use crate::model::ModelBuilder;
    use crate::offset::CoordinateOffset;
    use crate::record::{MemberKind, Record};
    use nalgebra::Point3;

    /// A horizontal anchor 1-2-3 with a wall at x = 0 and soil around it
    fn anchored_wall(bonded_set: bool) -> Model {
        let mut diagnostics = Diagnostics::new();
        let mut builder = ModelBuilder::new(CoordinateOffset::zero());
        let mut line = 0;
        let mut insert = |record: Record, builder: &mut ModelBuilder| {
            line += 1;
            builder.insert(record, line, &mut diagnostics);
        };
        let node = |id, x: f64, y: f64, z: f64| Record::Node {
            id,
            position: Point3::new(x, y, z),
        };

        // anchor
        insert(node(1, 0.5, 0.0, 0.0), &mut builder);
        insert(node(2, 5.0, 0.0, 0.0), &mut builder);
        insert(node(3, 10.0, 0.0, 0.0), &mut builder);
        // wall panel
        insert(node(10, 0.0, -1.0, -1.0), &mut builder);
        insert(node(11, 0.0, 1.0, -1.0), &mut builder);
        insert(node(12, 0.0, 1.0, 1.0), &mut builder);
        insert(node(13, 0.0, -1.0, 1.0), &mut builder);
        // soil block around the bonded length
        let soil = [
            (20, 4.0, -1.0, -1.0),
            (21, 6.0, -1.0, -1.0),
            (22, 6.0, 1.0, -1.0),
            (23, 4.0, 1.0, -1.0),
            (24, 4.0, -1.0, 1.0),
            (25, 6.0, -1.0, 1.0),
            (26, 6.0, 1.0, 1.0),
            (27, 4.0, 1.0, 1.0),
        ];
        for (id, x, y, z) in soil {
            insert(node(id, x, y, z), &mut builder);
        }

        let element = |id, shape, material, nodes: Vec<NodeId>| Record::Element {
            id,
            shape,
            material,
            nodes,
        };
        insert(element(1, ElementShape::Line, 15, vec![1, 2]), &mut builder);
        insert(element(2, ElementShape::Line, 15, vec![2, 3]), &mut builder);
        insert(element(3, ElementShape::Quad, 13, vec![10, 11, 12, 13]), &mut builder);
        insert(
            element(4, ElementShape::Hexa, 1, (20..=27).collect()),
            &mut builder,
        );
        if bonded_set {
            insert(
                Record::MeshSetMembers {
                    set: 1710,
                    kind: MemberKind::Nodes,
                    ids: vec![2, 3],
                },
                &mut builder,
            );
        }

        builder.finish(&mut diagnostics)
    }

    fn config() -> CouplingConfig {
        let mut config = CouplingConfig::new(
            15,
            ToleranceSchedule::new(vec![2.0, 5.0, 10.0]).unwrap(),
        );
        config.nearest_k = 4;
        config.search_radius = 3.0;
        config.bonded_mesh_sets = vec![1710];
        config
    }

    #[test]
    fn selectors_pick_region_nodes() {
        let model = anchored_wall(false);
        let surface = NodeSelector::of_kind(ElementKind::Shell).select(&model);
        assert_eq!(surface, BTreeSet::from([10, 11, 12, 13]));

        let filtered = NodeSelector {
            kind: ElementKind::Solid,
            materials: Some(BTreeSet::from([99])),
            mesh_sets: None,
        };
        assert!(filtered.select(&model).is_empty());
    }

    #[test]
    fn head_and_bonded_nodes_are_coupled() {
        let model = anchored_wall(true);
        let dataset = synthesize(&model, &config()).unwrap();

        assert_eq!(dataset.stats.rods, 1);
        assert_eq!(dataset.stats.resolved_per_tier, vec![(2.0, 1), (5.0, 0), (10.0, 0)]);
        assert_eq!(dataset.head_constraints.len(), 1);
        let head = &dataset.head_constraints[0];
        assert_eq!(head.slave, 1);
        assert_eq!(head.masters.len(), 4);
        assert!((head.weight_sum() - 1.0).abs() < 1e-12);

        // node 2 sits in the soil block, node 3 is out of range of it
        let slaves: Vec<_> = dataset.embedded_constraints.iter().map(|r| r.slave).collect();
        assert_eq!(slaves, vec![2, 3]);
        assert_eq!(dataset.embedded_constraints[0].confidence, Confidence::Full);
        assert_eq!(dataset.embedded_constraints[1].confidence, Confidence::LowConfidence);
        assert_eq!(dataset.stats.low_confidence, 1);
        assert_eq!(dataset.stats.fallback_records, 0);
    }

    #[test]
    fn missing_grouping_is_reported_or_falls_back() {
        let model = anchored_wall(false);
        let dataset = synthesize(&model, &config()).unwrap();
        assert!(dataset.embedded_constraints.is_empty());
        assert!(dataset
            .warnings
            .iter()
            .any(|w| w.kind() == WarningKind::GroupingUnavailable));

        let mut fallback = config();
        fallback.interior_fallback = true;
        let dataset = synthesize(&model, &fallback).unwrap();
        assert_eq!(dataset.embedded_constraints.len(), 1);
        assert_eq!(dataset.embedded_constraints[0].slave, 2);
        assert!(dataset.embedded_constraints[0].fallback);
        assert_eq!(dataset.stats.fallback_records, 1);
    }
}
