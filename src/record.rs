use nalgebra::{Point3, Vector3};

use crate::datatypes::{
    DofMask, ElementId, ElementShape, GroupCommand, GroupCommandKind, GroupId, MaterialId,
    MeshSetId, NodeId, PrestressLoad, SectionProperty, ShellProperty, StageId,
};

/// Labelled span of the source, delimited by `$$` comment markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Section {
    #[default]
    Header,
    Nodes,
    Elements,
    Properties,
    Loads,
    Boundaries,
    MeshSets,
    Stages,
}

impl Section {
    pub fn label(&self) -> &'static str {
        match self {
            Section::Header => "header",
            Section::Nodes => "nodes",
            Section::Elements => "elements",
            Section::Properties => "properties",
            Section::Loads => "loads",
            Section::Boundaries => "boundaries",
            Section::MeshSets => "mesh sets",
            Section::Stages => "stages",
        }
    }

    /// Recognises marker comments such as `$$ Node` or `$$ Stage Data`
    fn from_marker(text: &str) -> Option<Section> {
        let text = text.to_ascii_lowercase();
        if text.contains("mesh set") || text.contains("meshset") {
            Some(Section::MeshSets)
        } else if text.contains("node") {
            Some(Section::Nodes)
        } else if text.contains("element") {
            Some(Section::Elements)
        } else if text.contains("material") || text.contains("property") {
            Some(Section::Properties)
        } else if text.contains("load") {
            Some(Section::Loads)
        } else if text.contains("boundary") || text.contains("constraint") {
            Some(Section::Boundaries)
        } else if text.contains("stage") || text.contains("analysis") {
            Some(Section::Stages)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Elements,
    Nodes,
}

/// One fully parsed record. Coordinates are raw (not yet offset).
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Version(String),
    Units(Vec<String>),
    Node {
        id: NodeId,
        position: Point3<f64>,
    },
    Element {
        id: ElementId,
        shape: ElementShape,
        material: MaterialId,
        nodes: Vec<NodeId>,
    },
    MaterialElastic {
        id: MaterialId,
        young_modulus: Option<f64>,
        poisson_ratio: Option<f64>,
        unit_weight: Option<f64>,
    },
    MaterialMohrCoulomb {
        id: MaterialId,
        friction_angle: Option<f64>,
        cohesion: Option<f64>,
    },
    TrussSection(SectionProperty),
    ShellSection(ShellProperty),
    LoadSet {
        id: GroupId,
        name: Option<String>,
    },
    Gravity {
        group: GroupId,
        vector: Vector3<f64>,
    },
    Prestress(PrestressLoad),
    BoundarySet {
        id: GroupId,
        name: Option<String>,
    },
    NodeConstraint {
        group: GroupId,
        node: NodeId,
        dofs: DofMask,
    },
    MeshSet {
        id: MeshSetId,
        name: Option<String>,
    },
    MeshSetMembers {
        set: MeshSetId,
        kind: MemberKind,
        ids: Vec<u32>,
    },
    Stage {
        id: StageId,
        kind: i32,
        name: String,
    },
    Command {
        stage: StageId,
        command: GroupCommand,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListHead {
    MeshSet { set: MeshSetId, kind: MemberKind },
    Command { stage: StageId, kind: GroupCommandKind },
}

/// A counted id list whose ids may run onto continuation lines
#[derive(Debug, Clone, PartialEq)]
pub struct PendingList {
    pub head: ListHead,
    pub expected: usize,
    pub ids: Vec<u32>,
}

impl PendingList {
    pub fn is_complete(&self) -> bool {
        self.ids.len() >= self.expected
    }

    /// Appends continuation ids, refusing any that overrun the declared count
    pub fn extend(&mut self, ids: &[u32]) -> Result<(), String> {
        if self.ids.len() + ids.len() > self.expected {
            return Err(format!(
                "continuation carries {} id(s) but only {} remain of {}",
                ids.len(),
                self.expected - self.ids.len(),
                self.expected
            ));
        }
        self.ids.extend_from_slice(ids);
        Ok(())
    }

    pub fn into_record(self) -> Record {
        match self.head {
            ListHead::MeshSet { set, kind } => Record::MeshSetMembers {
                set,
                kind,
                ids: self.ids,
            },
            ListHead::Command { stage, kind } => Record::Command {
                stage,
                command: GroupCommand {
                    kind,
                    group_ids: self.ids,
                },
            },
        }
    }
}

/// Classification of a single source line
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Blank,
    Comment(Option<Section>),
    Record(Record),
    List(PendingList),
    Continuation(Vec<u32>),
    Unknown(String),
}

/// Cursor over the fields of one line
struct Fields<'a> {
    token: &'a str,
    fields: Vec<&'a str>,
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(fields: Vec<&'a str>) -> Fields<'a> {
        Fields {
            token: fields.first().copied().unwrap_or(""),
            fields,
            pos: 1,
        }
    }

    fn next_raw(&mut self) -> Option<&'a str> {
        let field = self.fields.get(self.pos).copied();
        self.pos += 1;
        field
    }

    fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    fn id(&mut self, what: &str) -> Result<u32, String> {
        match self.next_raw() {
            Some(raw) if !raw.is_empty() => raw
                .parse()
                .map_err(|_| format!("{} {what} '{raw}' is not an integer id", self.token)),
            _ => Err(format!("{} is missing {what}", self.token)),
        }
    }

    fn int(&mut self, what: &str) -> Result<i32, String> {
        match self.next_raw() {
            Some(raw) if !raw.is_empty() => raw
                .parse()
                .map_err(|_| format!("{} {what} '{raw}' is not an integer", self.token)),
            _ => Err(format!("{} is missing {what}", self.token)),
        }
    }

    fn float(&mut self, what: &str) -> Result<f64, String> {
        match self.opt_float(what)? {
            Some(value) => Ok(value),
            None => Err(format!("{} is missing {what}", self.token)),
        }
    }

    /// Empty or absent fields read as `None`
    fn opt_float(&mut self, what: &str) -> Result<Option<f64>, String> {
        match self.next_raw() {
            Some(raw) if !raw.is_empty() => {
                let value: f64 = raw
                    .parse()
                    .map_err(|_| format!("{} {what} '{raw}' is not a number", self.token))?;
                if !value.is_finite() {
                    return Err(format!("{} {what} is not finite", self.token));
                }
                Ok(Some(value))
            }
            _ => Ok(None),
        }
    }

    fn text(&mut self) -> Option<String> {
        self.next_raw()
            .filter(|raw| !raw.is_empty())
            .map(|raw| raw.to_owned())
    }

    /// Every remaining non-empty field as an id
    fn rest_ids(&mut self) -> Result<Vec<u32>, String> {
        let mut ids = Vec::new();
        while let Some(raw) = self.next_raw() {
            if raw.is_empty() {
                continue;
            }
            let id = raw
                .parse()
                .map_err(|_| format!("{} list entry '{raw}' is not an integer id", self.token))?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn rest_text(&mut self) -> Vec<String> {
        let mut values = Vec::new();
        while let Some(raw) = self.next_raw() {
            if !raw.is_empty() {
                values.push(raw.to_owned());
            }
        }
        values
    }
}

/// Comma separated when the line has a comma, whitespace separated otherwise
fn split_fields(line: &str) -> Vec<&str> {
    if line.contains(',') {
        line.split(',').map(|f| f.trim()).collect()
    } else {
        line.split_whitespace().collect()
    }
}

/// Classifies one decoded line and parses its fields.
///
/// # Arguments
/// * `text` - A single line without its terminator
///
/// # Returns
/// The classified line, or the reason it is malformed
pub fn parse_line(text: &str) -> Result<Line, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Line::Blank);
    }
    if let Some(comment) = trimmed.strip_prefix('$') {
        return Ok(Line::Comment(Section::from_marker(comment.trim_start_matches('$'))));
    }

    let mut fields = Fields::new(split_fields(trimmed));
    let token = fields.token;

    if token.is_empty() || token.bytes().all(|b| b.is_ascii_digit()) {
        fields.pos = 0;
        return Ok(Line::Continuation(fields.rest_ids()?));
    }

    if let Some(shape) = ElementShape::from_token(token) {
        return parse_element(&mut fields, shape).map(Line::Record);
    }
    if let Some(kind) = GroupCommandKind::from_token(token) {
        let stage = fields.id("stage id")?;
        return parse_list(&mut fields, ListHead::Command { stage, kind });
    }

    let record = match token {
        "VER" => Record::Version(fields.text().unwrap_or_default()),
        "UNIT" => Record::Units(fields.rest_text()),
        "NODE" => {
            let id = fields.id("node id")?;
            let x = fields.float("x")?;
            let y = fields.float("y")?;
            let z = fields.float("z")?;
            Record::Node {
                id,
                position: Point3::new(x, y, z),
            }
        }
        "MATGEN" => {
            let id = fields.id("material id")?;
            let young_modulus = fields.opt_float("elastic modulus")?;
            fields.skip(2);
            let poisson_ratio = fields.opt_float("poisson ratio")?;
            let unit_weight = fields.opt_float("unit weight")?;
            Record::MaterialElastic {
                id,
                young_modulus,
                poisson_ratio,
                unit_weight,
            }
        }
        "MNLMC" => {
            let id = fields.id("material id")?;
            let friction_angle = fields.opt_float("friction angle")?;
            fields.skip(2);
            let cohesion = fields.opt_float("cohesion")?;
            Record::MaterialMohrCoulomb {
                id,
                friction_angle,
                cohesion,
            }
        }
        "PETRUSS" => {
            let id = fields.id("property id")?;
            let name = fields.text().unwrap_or_default();
            fields.skip(1);
            let material = fields.id("material id")?;
            let area = fields.float("area")?;
            Record::TrussSection(SectionProperty {
                id,
                name,
                material,
                area,
            })
        }
        "PSHELL" => {
            let id = fields.id("property id")?;
            let name = fields.text().unwrap_or_default();
            fields.skip(1);
            let material = fields.id("material id")?;
            let thickness = fields.float("thickness")?;
            Record::ShellSection(ShellProperty {
                id,
                name,
                material,
                thickness,
            })
        }
        "LSET" => Record::LoadSet {
            id: fields.id("load group id")?,
            name: fields.text(),
        },
        "GRAV" => {
            let group = fields.id("load group id")?;
            fields.skip(2);
            let gx = fields.float("gx")?;
            let gy = fields.float("gy")?;
            let gz = fields.float("gz")?;
            Record::Gravity {
                group,
                vector: Vector3::new(gx, gy, gz),
            }
        }
        "PSTRST" => Record::Prestress(PrestressLoad {
            group: fields.id("load group id")?,
            element: fields.id("element id")?,
            force: fields.float("force")?,
        }),
        "BSET" => Record::BoundarySet {
            id: fields.id("boundary group id")?,
            name: fields.text(),
        },
        "CONST" => {
            let group = fields.id("boundary group id")?;
            let node = fields.id("node id")?;
            let code = fields.text().unwrap_or_default();
            let dofs = DofMask::from_code(&code)
                .ok_or_else(|| format!("CONST dof code '{code}' is not a 0/1 flag code"))?;
            Record::NodeConstraint { group, node, dofs }
        }
        "MSET" => Record::MeshSet {
            id: fields.id("mesh set id")?,
            name: fields.text(),
        },
        "MSETE" | "MSETN" => {
            let set = fields.id("mesh set id")?;
            let kind = if token == "MSETE" {
                MemberKind::Elements
            } else {
                MemberKind::Nodes
            };
            return parse_list(&mut fields, ListHead::MeshSet { set, kind });
        }
        "STAGE" => {
            let id = fields.id("stage id")?;
            let kind = fields.int("stage type")?;
            let name = fields.text().unwrap_or_else(|| format!("Stage {id}"));
            Record::Stage { id, kind, name }
        }
        _ => return Ok(Line::Unknown(token.to_owned())),
    };

    Ok(Line::Record(record))
}

fn parse_element(fields: &mut Fields, shape: ElementShape) -> Result<Record, String> {
    let id = fields.id("element id")?;
    let material = fields.id("material id")?;
    let mut nodes = fields.rest_ids()?;
    if nodes.len() < shape.node_count() {
        return Err(format!(
            "{} needs {} node ids, found {}",
            fields.token,
            shape.node_count(),
            nodes.len()
        ));
    }
    // trailing columns past the topology are not node ids
    nodes.truncate(shape.node_count());

    Ok(Record::Element {
        id,
        shape,
        material,
        nodes,
    })
}

fn parse_list(fields: &mut Fields, head: ListHead) -> Result<Line, String> {
    let expected = fields.id("count")? as usize;
    let ids = fields.rest_ids()?;
    if ids.len() > expected {
        return Err(format!(
            "{} declares {expected} id(s) but lists {}",
            fields.token,
            ids.len()
        ));
    }

    Ok(Line::List(PendingList {
        head,
        expected,
        ids,
    }))
}
