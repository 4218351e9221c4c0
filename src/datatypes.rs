use std::collections::BTreeSet;

use nalgebra::{Point3, Vector3};

pub type NodeId = u32;
pub type ElementId = u32;
pub type MaterialId = u32;
pub type GroupId = u32;
pub type StageId = u32;
pub type MeshSetId = u32;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// Position relative to the model's coordinate offset
    pub position: Point3<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    Rod,
    Shell,
    Solid,
}

impl ElementKind {
    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Rod => "rod",
            ElementKind::Shell => "shell",
            ElementKind::Solid => "solid",
        }
    }

    pub fn from_name(name: &str) -> Option<ElementKind> {
        match name.trim().to_ascii_lowercase().as_str() {
            "rod" | "truss" | "line" => Some(ElementKind::Rod),
            "shell" | "plate" | "surface" => Some(ElementKind::Shell),
            "solid" | "volume" => Some(ElementKind::Solid),
            _ => None,
        }
    }
}

/// Element topology as written in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementShape {
    Line,
    Tria,
    Quad,
    Tetra,
    Penta,
    Hexa,
}

impl ElementShape {
    pub fn from_token(token: &str) -> Option<ElementShape> {
        match token {
            "LINE" | "TRUSS" => Some(ElementShape::Line),
            "TRIA" => Some(ElementShape::Tria),
            "QUAD" => Some(ElementShape::Quad),
            "TETRA" => Some(ElementShape::Tetra),
            "PENTA" => Some(ElementShape::Penta),
            "HEXA" => Some(ElementShape::Hexa),
            _ => None,
        }
    }

    pub fn node_count(&self) -> usize {
        match self {
            ElementShape::Line => 2,
            ElementShape::Tria => 3,
            ElementShape::Quad | ElementShape::Tetra => 4,
            ElementShape::Penta => 6,
            ElementShape::Hexa => 8,
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            ElementShape::Line => ElementKind::Rod,
            ElementShape::Tria | ElementShape::Quad => ElementKind::Shell,
            ElementShape::Tetra | ElementShape::Penta | ElementShape::Hexa => ElementKind::Solid,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub id: ElementId,
    pub shape: ElementShape,
    pub material: MaterialId,
    pub nodes: Vec<NodeId>,
    /// Set by the assembler's post-pass when a referenced node does not exist.
    /// Dangling elements stay in the model but are ignored by constraint logic.
    pub dangling: bool,
}

impl Element {
    pub fn kind(&self) -> ElementKind {
        self.shape.kind()
    }
}

/// Elastic and Mohr-Coulomb parameters, merged from `MATGEN` and `MNLMC`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MaterialDef {
    pub id: MaterialId,
    pub young_modulus: Option<f64>,
    pub poisson_ratio: Option<f64>,
    pub unit_weight: Option<f64>,
    pub friction_angle: Option<f64>,
    pub cohesion: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionProperty {
    pub id: u32,
    pub name: String,
    pub material: MaterialId,
    pub area: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShellProperty {
    pub id: u32,
    pub name: String,
    pub material: MaterialId,
    pub thickness: f64,
}

/// Elements sharing a material id. Built from element back-references.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MaterialGroup {
    pub id: MaterialId,
    pub elements: Vec<ElementId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrestressLoad {
    pub group: GroupId,
    pub element: ElementId,
    pub force: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadGroup {
    pub id: GroupId,
    pub name: Option<String>,
    pub gravity: Option<Vector3<f64>>,
    pub prestress: Vec<PrestressLoad>,
}

/// Degree of freedom in the order used by boundary codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dof6 {
    Ux,
    Uy,
    Uz,
    Rx,
    Ry,
    Rz,
}

impl Dof6 {
    pub const ALL: [Dof6; 6] = [Dof6::Ux, Dof6::Uy, Dof6::Uz, Dof6::Rx, Dof6::Ry, Dof6::Rz];
}

/// Fixed-DOF bitmask, one bit per [`Dof6`] in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DofMask(u8);

impl DofMask {
    /// Parses a code such as `111000` (UX UY UZ RX RY RZ). Shorter codes
    /// leave the remaining DOFs free.
    pub fn from_code(code: &str) -> Option<DofMask> {
        let code = code.trim();
        if code.is_empty() || code.len() > 6 {
            return None;
        }

        let mut bits = 0u8;
        for (i, c) in code.chars().enumerate() {
            match c {
                '1' => bits |= 1 << i,
                '0' => {}
                _ => return None,
            }
        }
        Some(DofMask(bits))
    }

    pub fn is_fixed(&self, dof: Dof6) -> bool {
        self.0 & (1 << dof as u8) != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn code(&self) -> String {
        Dof6::ALL
            .iter()
            .map(|d| if self.is_fixed(*d) { '1' } else { '0' })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConstraint {
    pub node: NodeId,
    pub dofs: DofMask,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundaryGroup {
    pub id: GroupId,
    pub name: Option<String>,
    pub constraints: Vec<NodeConstraint>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshSet {
    pub id: MeshSetId,
    pub name: Option<String>,
    pub elements: Vec<ElementId>,
    pub nodes: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupFamily {
    Material,
    Load,
    Boundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupCommandKind {
    MaterialAdd,
    MaterialDel,
    LoadAdd,
    LoadDel,
    BoundaryAdd,
    BoundaryDel,
}

impl GroupCommandKind {
    pub fn from_token(token: &str) -> Option<GroupCommandKind> {
        match token {
            "MADD" => Some(GroupCommandKind::MaterialAdd),
            "MDEL" => Some(GroupCommandKind::MaterialDel),
            "LADD" => Some(GroupCommandKind::LoadAdd),
            "LDEL" => Some(GroupCommandKind::LoadDel),
            "BADD" => Some(GroupCommandKind::BoundaryAdd),
            "BDEL" => Some(GroupCommandKind::BoundaryDel),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            GroupCommandKind::MaterialAdd => "MADD",
            GroupCommandKind::MaterialDel => "MDEL",
            GroupCommandKind::LoadAdd => "LADD",
            GroupCommandKind::LoadDel => "LDEL",
            GroupCommandKind::BoundaryAdd => "BADD",
            GroupCommandKind::BoundaryDel => "BDEL",
        }
    }

    pub fn family(&self) -> GroupFamily {
        match self {
            GroupCommandKind::MaterialAdd | GroupCommandKind::MaterialDel => GroupFamily::Material,
            GroupCommandKind::LoadAdd | GroupCommandKind::LoadDel => GroupFamily::Load,
            GroupCommandKind::BoundaryAdd | GroupCommandKind::BoundaryDel => GroupFamily::Boundary,
        }
    }

    pub fn is_add(&self) -> bool {
        matches!(
            self,
            GroupCommandKind::MaterialAdd | GroupCommandKind::LoadAdd | GroupCommandKind::BoundaryAdd
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupCommand {
    pub kind: GroupCommandKind,
    pub group_ids: Vec<GroupId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisStage {
    pub id: StageId,
    pub name: String,
    pub kind: i32,
    /// Commands in file order
    pub commands: Vec<GroupCommand>,
}

/// Groups active at a stage after replaying every command up to it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActiveGroups {
    pub materials: BTreeSet<GroupId>,
    pub loads: BTreeSet<GroupId>,
    pub boundaries: BTreeSet<GroupId>,
}

impl ActiveGroups {
    pub fn apply(&mut self, command: &GroupCommand) {
        let set = match command.kind.family() {
            GroupFamily::Material => &mut self.materials,
            GroupFamily::Load => &mut self.loads,
            GroupFamily::Boundary => &mut self.boundaries,
        };

        if command.kind.is_add() {
            set.extend(command.group_ids.iter().copied());
        } else {
            for id in &command.group_ids {
                set.remove(id);
            }
        }
    }

    /// Folds `commands` in order, starting from nothing active
    pub fn replay<'a>(commands: impl IntoIterator<Item = &'a GroupCommand>) -> ActiveGroups {
        let mut active = ActiveGroups::default();
        for command in commands {
            active.apply(command);
        }
        active
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelInfo {
    pub version: Option<String>,
    pub units: Vec<String>,
    pub encoding: &'static str,
    pub decode_fallback: bool,
    pub total_lines: usize,
}
