use std::fmt::Display;

use thiserror::Error;

use crate::datatypes::{ElementId, GroupId, MaterialId, MeshSetId, NodeId, StageId};

/// Fatal errors. Everything recoverable is reported as a [`Warning`] instead.
#[derive(Debug, Error)]
pub enum GeoanchorError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Stage {stage} ('{name}') has no active material after replaying its group commands")]
    DefinitionGap { stage: StageId, name: String },

    #[error("Parse cancelled by observer after {processed_lines} lines")]
    Cancelled { processed_lines: usize },

    #[error("Post processor error: {0}")]
    PostProcessor(String),
}

/// An entity named in a referential-integrity warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    Line(usize),
    Node(NodeId),
    Element(ElementId),
    Material(MaterialId),
    Section(u32),
    LoadGroup(GroupId),
    BoundaryGroup(GroupId),
    MeshSet(MeshSetId),
    Stage(StageId),
    TargetSet(&'static str),
}

impl Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reference::Line(v) => write!(f, "line {v}"),
            Reference::Node(v) => write!(f, "node {v}"),
            Reference::Element(v) => write!(f, "element {v}"),
            Reference::Material(v) => write!(f, "material {v}"),
            Reference::Section(v) => write!(f, "section {v}"),
            Reference::LoadGroup(v) => write!(f, "load group {v}"),
            Reference::BoundaryGroup(v) => write!(f, "boundary group {v}"),
            Reference::MeshSet(v) => write!(f, "mesh set {v}"),
            Reference::Stage(v) => write!(f, "stage {v}"),
            Reference::TargetSet(v) => write!(f, "{v} target set"),
        }
    }
}

/// Non-fatal diagnostics, collected per phase and surfaced once at its end.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Warning {
    #[error("decoding as {encoding} with replacement ({replaced_lines} line(s) replaced)")]
    DecodeFallback {
        encoding: &'static str,
        replaced_lines: usize,
    },

    #[error("line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("{owner} references unknown {target}")]
    ReferentialIntegrity { owner: Reference, target: Reference },

    #[error("stage {stage} ('{name}') replays to an empty active material set")]
    DefinitionGap { stage: StageId, name: String },

    #[error("rod {rod} has no head within {max_tolerance} m (nearest surface node: {nearest:?})")]
    CoverageGap {
        rod: usize,
        max_tolerance: f64,
        nearest: Option<f64>,
    },

    #[error("node {slave} is coupled to only {masters} master node(s)")]
    DegenerateConstraint { slave: NodeId, masters: usize },

    #[error("{0}")]
    GroupingUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WarningKind {
    DecodeFallback,
    MalformedRecord,
    ReferentialIntegrity,
    DefinitionGap,
    CoverageGap,
    DegenerateConstraint,
    GroupingUnavailable,
}

impl WarningKind {
    pub const ALL: [WarningKind; 7] = [
        WarningKind::DecodeFallback,
        WarningKind::MalformedRecord,
        WarningKind::ReferentialIntegrity,
        WarningKind::DefinitionGap,
        WarningKind::CoverageGap,
        WarningKind::DegenerateConstraint,
        WarningKind::GroupingUnavailable,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WarningKind::DecodeFallback => "decode fallback",
            WarningKind::MalformedRecord => "malformed record",
            WarningKind::ReferentialIntegrity => "referential integrity",
            WarningKind::DefinitionGap => "definition gap",
            WarningKind::CoverageGap => "coverage gap",
            WarningKind::DegenerateConstraint => "degenerate constraint",
            WarningKind::GroupingUnavailable => "grouping unavailable",
        }
    }
}

impl Warning {
    pub fn kind(&self) -> WarningKind {
        match self {
            Warning::DecodeFallback { .. } => WarningKind::DecodeFallback,
            Warning::MalformedRecord { .. } => WarningKind::MalformedRecord,
            Warning::ReferentialIntegrity { .. } => WarningKind::ReferentialIntegrity,
            Warning::DefinitionGap { .. } => WarningKind::DefinitionGap,
            Warning::CoverageGap { .. } => WarningKind::CoverageGap,
            Warning::DegenerateConstraint { .. } => WarningKind::DegenerateConstraint,
            Warning::GroupingUnavailable(_) => WarningKind::GroupingUnavailable,
        }
    }
}

/// Accumulates warnings for one phase. Individual warnings go to the debug
/// log as they arrive; [`Diagnostics::summarize`] logs the aggregate once.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    pub fn push(&mut self, warning: Warning) {
        log::debug!("{warning}");
        self.warnings.push(warning);
    }

    pub fn extend(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        for warning in warnings {
            self.push(warning);
        }
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn count(&self, kind: WarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind() == kind).count()
    }

    /// Logs one line per warning kind seen during `phase`
    pub fn summarize(&self, phase: &str) {
        if self.warnings.is_empty() {
            log::info!("{phase}: no warnings");
            return;
        }

        for kind in WarningKind::ALL {
            let count = self.count(kind);
            if count == 0 {
                continue;
            }
            let first = self
                .warnings
                .iter()
                .find(|w| w.kind() == kind)
                .map(|w| w.to_string())
                .unwrap_or_default();
            log::warn!("{phase}: {count} {} warning(s), first: {first}", kind.name());
        }
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_kind() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Warning::MalformedRecord {
            line: 3,
            reason: "bad".to_owned(),
        });
        diagnostics.push(Warning::MalformedRecord {
            line: 9,
            reason: "worse".to_owned(),
        });
        diagnostics.push(Warning::DegenerateConstraint {
            slave: 4,
            masters: 1,
        });

        assert_eq!(diagnostics.count(WarningKind::MalformedRecord), 2);
        assert_eq!(diagnostics.count(WarningKind::DegenerateConstraint), 1);
        assert_eq!(diagnostics.count(WarningKind::CoverageGap), 0);
        assert_eq!(diagnostics.into_warnings().len(), 3);
    }

    #[test]
    fn referential_message_names_both_sides() {
        let warning = Warning::ReferentialIntegrity {
            owner: Reference::Element(12),
            target: Reference::Node(99),
        };
        assert_eq!(warning.to_string(), "element 12 references unknown node 99");
    }
}
