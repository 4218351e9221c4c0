use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    datatypes::{
        ActiveGroups, AnalysisStage, BoundaryGroup, Element, ElementId, GroupFamily, GroupId,
        LoadGroup, MaterialDef, MaterialGroup, MaterialId, MeshSet, MeshSetId, ModelInfo, Node,
        NodeConstraint, NodeId, PrestressLoad, SectionProperty, ShellProperty, StageId,
    },
    error::{Diagnostics, GeoanchorError, Reference, Warning},
    offset::CoordinateOffset,
    record::{MemberKind, Record},
};

/// What to do with a stage whose replayed active-material set is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StagePolicy {
    #[default]
    Warn,
    Fatal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageSummary {
    pub id: StageId,
    pub name: String,
    pub kind: i32,
    pub active: ActiveGroups,
}

/// The assembled, append-only model
#[derive(Debug, Clone, Default)]
pub struct Model {
    info: ModelInfo,
    offset: CoordinateOffset,
    nodes: BTreeMap<NodeId, Node>,
    elements: BTreeMap<ElementId, Element>,
    materials: BTreeMap<MaterialId, MaterialDef>,
    material_groups: BTreeMap<MaterialId, MaterialGroup>,
    truss_sections: BTreeMap<u32, SectionProperty>,
    shell_sections: BTreeMap<u32, ShellProperty>,
    load_groups: BTreeMap<GroupId, LoadGroup>,
    boundary_groups: BTreeMap<GroupId, BoundaryGroup>,
    mesh_sets: BTreeMap<MeshSetId, MeshSet>,
    stages: Vec<AnalysisStage>,
    /// Every prestress record in file order
    prestress: Vec<PrestressLoad>,
}

impl Model {
    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    pub fn offset(&self) -> &CoordinateOffset {
        &self.offset
    }

    pub fn nodes(&self) -> &BTreeMap<NodeId, Node> {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn elements(&self) -> &BTreeMap<ElementId, Element> {
        &self.elements
    }

    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    pub fn materials(&self) -> &BTreeMap<MaterialId, MaterialDef> {
        &self.materials
    }

    pub fn material_groups(&self) -> &BTreeMap<MaterialId, MaterialGroup> {
        &self.material_groups
    }

    pub fn truss_sections(&self) -> &BTreeMap<u32, SectionProperty> {
        &self.truss_sections
    }

    pub fn shell_sections(&self) -> &BTreeMap<u32, ShellProperty> {
        &self.shell_sections
    }

    pub fn load_groups(&self) -> &BTreeMap<GroupId, LoadGroup> {
        &self.load_groups
    }

    pub fn boundary_groups(&self) -> &BTreeMap<GroupId, BoundaryGroup> {
        &self.boundary_groups
    }

    pub fn mesh_sets(&self) -> &BTreeMap<MeshSetId, MeshSet> {
        &self.mesh_sets
    }

    pub fn stages(&self) -> &[AnalysisStage] {
        &self.stages
    }

    pub fn prestress_loads(&self) -> &[PrestressLoad] {
        &self.prestress
    }

    /// Position of a stage id in file order
    pub fn stage_position(&self, id: StageId) -> Option<usize> {
        self.stages.iter().position(|s| s.id == id)
    }

    /// Nodes listed in a mesh set plus the nodes of its listed elements
    pub fn mesh_set_nodes(&self, id: MeshSetId) -> Option<BTreeSet<NodeId>> {
        let set = self.mesh_sets.get(&id)?;
        let mut nodes: BTreeSet<NodeId> = set.nodes.iter().copied().collect();
        for element_id in &set.elements {
            if let Some(element) = self.elements.get(element_id) {
                nodes.extend(element.nodes.iter().copied());
            }
        }
        Some(nodes)
    }

    /// Replays every group command from the first stage through
    /// `stage_index` (0-based, file order).
    ///
    /// # Returns
    /// `None` if `stage_index` is out of range
    pub fn active_groups(&self, stage_index: usize) -> Option<ActiveGroups> {
        let stages = self.stages.get(..=stage_index)?;
        Some(ActiveGroups::replay(
            stages.iter().flat_map(|stage| stage.commands.iter()),
        ))
    }

    pub fn stage_summary(&self) -> Vec<StageSummary> {
        let mut active = ActiveGroups::default();
        self.stages
            .iter()
            .map(|stage| {
                for command in &stage.commands {
                    active.apply(command);
                }
                StageSummary {
                    id: stage.id,
                    name: stage.name.clone(),
                    kind: stage.kind,
                    active: active.clone(),
                }
            })
            .collect()
    }

    /// Flags every stage whose replayed active-material set is empty.
    ///
    /// # Arguments
    /// * `policy` - Whether an empty stage is a warning or aborts
    /// * `diagnostics` - Receives the warnings under [`StagePolicy::Warn`]
    pub fn validate_stages(
        &self,
        policy: StagePolicy,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), GeoanchorError> {
        for summary in self.stage_summary() {
            if !summary.active.materials.is_empty() {
                continue;
            }

            match policy {
                StagePolicy::Fatal => {
                    return Err(GeoanchorError::DefinitionGap {
                        stage: summary.id,
                        name: summary.name,
                    })
                }
                StagePolicy::Warn => diagnostics.push(Warning::DefinitionGap {
                    stage: summary.id,
                    name: summary.name,
                }),
            }
        }
        Ok(())
    }
}

/// Accumulates records into a [`Model`].
///
/// Insertion only does cheap bookkeeping; cross-references are checked
/// once in [`ModelBuilder::finish`].
#[derive(Debug, Default)]
pub struct ModelBuilder {
    model: Model,
    stage_index: HashMap<StageId, usize>,
}

impl ModelBuilder {
    pub fn new(offset: CoordinateOffset) -> ModelBuilder {
        ModelBuilder {
            model: Model {
                offset,
                ..Model::default()
            },
            stage_index: HashMap::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.model.nodes.len()
    }

    pub fn element_count(&self) -> usize {
        self.model.elements.len()
    }

    pub fn set_source(&mut self, encoding: &'static str, decode_fallback: bool, total_lines: usize) {
        self.model.info.encoding = encoding;
        self.model.info.decode_fallback = decode_fallback;
        self.model.info.total_lines = total_lines;
    }

    fn duplicate(diagnostics: &mut Diagnostics, line: usize, what: &str, id: u32) {
        diagnostics.push(Warning::MalformedRecord {
            line,
            reason: format!("duplicate {what} id {id}; first definition kept"),
        });
    }

    /// Inserts one record. Node positions must already be normalized.
    pub fn insert(&mut self, record: Record, line: usize, diagnostics: &mut Diagnostics) {
        let model = &mut self.model;
        match record {
            Record::Version(version) => model.info.version = Some(version),
            Record::Units(units) => model.info.units = units,
            Record::Node { id, position } => {
                if model.nodes.contains_key(&id) {
                    return Self::duplicate(diagnostics, line, "node", id);
                }
                model.nodes.insert(id, Node { id, position });
            }
            Record::Element {
                id,
                shape,
                material,
                nodes,
            } => {
                if model.elements.contains_key(&id) {
                    return Self::duplicate(diagnostics, line, "element", id);
                }
                model
                    .material_groups
                    .entry(material)
                    .or_insert_with(|| MaterialGroup {
                        id: material,
                        elements: Vec::new(),
                    })
                    .elements
                    .push(id);
                model.elements.insert(
                    id,
                    Element {
                        id,
                        shape,
                        material,
                        nodes,
                        dangling: false,
                    },
                );
            }
            Record::MaterialElastic {
                id,
                young_modulus,
                poisson_ratio,
                unit_weight,
            } => {
                let material = model.materials.entry(id).or_insert_with(|| MaterialDef {
                    id,
                    ..MaterialDef::default()
                });
                material.young_modulus = young_modulus;
                material.poisson_ratio = poisson_ratio;
                material.unit_weight = unit_weight;
            }
            Record::MaterialMohrCoulomb {
                id,
                friction_angle,
                cohesion,
            } => {
                let material = model.materials.entry(id).or_insert_with(|| MaterialDef {
                    id,
                    ..MaterialDef::default()
                });
                material.friction_angle = friction_angle;
                material.cohesion = cohesion;
            }
            Record::TrussSection(section) => {
                if model.truss_sections.contains_key(&section.id) {
                    return Self::duplicate(diagnostics, line, "truss section", section.id);
                }
                model.truss_sections.insert(section.id, section);
            }
            Record::ShellSection(section) => {
                if model.shell_sections.contains_key(&section.id) {
                    return Self::duplicate(diagnostics, line, "shell section", section.id);
                }
                model.shell_sections.insert(section.id, section);
            }
            Record::LoadSet { id, name } => {
                load_group(&mut model.load_groups, id).name = name;
            }
            Record::Gravity { group, vector } => {
                load_group(&mut model.load_groups, group).gravity = Some(vector);
            }
            Record::Prestress(load) => {
                load_group(&mut model.load_groups, load.group)
                    .prestress
                    .push(load.clone());
                model.prestress.push(load);
            }
            Record::BoundarySet { id, name } => {
                boundary_group(&mut model.boundary_groups, id).name = name;
            }
            Record::NodeConstraint { group, node, dofs } => {
                boundary_group(&mut model.boundary_groups, group)
                    .constraints
                    .push(NodeConstraint { node, dofs });
            }
            Record::MeshSet { id, name } => {
                mesh_set(&mut model.mesh_sets, id).name = name;
            }
            Record::MeshSetMembers { set, kind, ids } => {
                let set = mesh_set(&mut model.mesh_sets, set);
                match kind {
                    MemberKind::Elements => set.elements.extend(ids),
                    MemberKind::Nodes => set.nodes.extend(ids),
                }
            }
            Record::Stage { id, kind, name } => {
                if self.stage_index.contains_key(&id) {
                    return Self::duplicate(diagnostics, line, "stage", id);
                }
                self.stage_index.insert(id, model.stages.len());
                model.stages.push(AnalysisStage {
                    id,
                    name,
                    kind,
                    commands: Vec::new(),
                });
            }
            Record::Command { stage, command } => match self.stage_index.get(&stage) {
                Some(&index) => model.stages[index].commands.push(command),
                None => diagnostics.push(Warning::ReferentialIntegrity {
                    owner: Reference::Line(line),
                    target: Reference::Stage(stage),
                }),
            },
        }
    }

    /// Runs the referential post-pass and returns the finished model
    pub fn finish(self, diagnostics: &mut Diagnostics) -> Model {
        let mut model = self.model;

        let mut dangling = 0;
        for element in model.elements.values_mut() {
            let missing = element
                .nodes
                .iter()
                .find(|node| !model.nodes.contains_key(*node));
            if let Some(&node) = missing {
                element.dangling = true;
                dangling += 1;
                diagnostics.push(Warning::ReferentialIntegrity {
                    owner: Reference::Element(element.id),
                    target: Reference::Node(node),
                });
            }
        }
        if dangling > 0 {
            log::info!("{dangling} element(s) reference missing nodes and are excluded from coupling");
        }

        for load in &model.prestress {
            if !model.elements.contains_key(&load.element) {
                diagnostics.push(Warning::ReferentialIntegrity {
                    owner: Reference::LoadGroup(load.group),
                    target: Reference::Element(load.element),
                });
            }
        }

        for group in model.boundary_groups.values() {
            for constraint in &group.constraints {
                if !model.nodes.contains_key(&constraint.node) {
                    diagnostics.push(Warning::ReferentialIntegrity {
                        owner: Reference::BoundaryGroup(group.id),
                        target: Reference::Node(constraint.node),
                    });
                }
            }
        }

        if !model.materials.is_empty() {
            let truss = model.truss_sections.values().map(|s| (s.id, s.material));
            let shell = model.shell_sections.values().map(|s| (s.id, s.material));
            for (section, material) in truss.chain(shell) {
                if !model.materials.contains_key(&material) {
                    diagnostics.push(Warning::ReferentialIntegrity {
                        owner: Reference::Section(section),
                        target: Reference::Material(material),
                    });
                }
            }
        }

        for set in model.mesh_sets.values() {
            if let Some(&element) = set.elements.iter().find(|e| !model.elements.contains_key(*e)) {
                diagnostics.push(Warning::ReferentialIntegrity {
                    owner: Reference::MeshSet(set.id),
                    target: Reference::Element(element),
                });
            }
            if let Some(&node) = set.nodes.iter().find(|n| !model.nodes.contains_key(*n)) {
                diagnostics.push(Warning::ReferentialIntegrity {
                    owner: Reference::MeshSet(set.id),
                    target: Reference::Node(node),
                });
            }
        }

        for stage in &model.stages {
            for command in &stage.commands {
                for &group in &command.group_ids {
                    let target = match command.kind.family() {
                        GroupFamily::Material => {
                            let known = model.materials.contains_key(&group)
                                || model.material_groups.contains_key(&group)
                                || model.mesh_sets.contains_key(&group);
                            (!known).then_some(Reference::Material(group))
                        }
                        GroupFamily::Load => (!model.load_groups.contains_key(&group))
                            .then_some(Reference::LoadGroup(group)),
                        GroupFamily::Boundary => (!model.boundary_groups.contains_key(&group))
                            .then_some(Reference::BoundaryGroup(group)),
                    };
                    if let Some(target) = target {
                        diagnostics.push(Warning::ReferentialIntegrity {
                            owner: Reference::Stage(stage.id),
                            target,
                        });
                    }
                }
            }
        }

        model
    }
}

fn load_group(groups: &mut BTreeMap<GroupId, LoadGroup>, id: GroupId) -> &mut LoadGroup {
    groups.entry(id).or_insert_with(|| LoadGroup {
        id,
        ..LoadGroup::default()
    })
}

fn boundary_group(groups: &mut BTreeMap<GroupId, BoundaryGroup>, id: GroupId) -> &mut BoundaryGroup {
    groups.entry(id).or_insert_with(|| BoundaryGroup {
        id,
        ..BoundaryGroup::default()
    })
}

fn mesh_set(sets: &mut BTreeMap<MeshSetId, MeshSet>, id: MeshSetId) -> &mut MeshSet {
    sets.entry(id).or_insert_with(|| MeshSet {
        id,
        ..MeshSet::default()
    })
}
