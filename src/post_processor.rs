use std::collections::BTreeSet;
use std::path::Path;

use json::JsonValue;

use crate::{
    constraints::{Confidence, ConstraintRecord},
    coupling::{ConstraintDataset, CouplingStats},
    datatypes::ActiveGroups,
    error::{GeoanchorError, Warning},
    head_selector::{HeadResolution, HeadSelection},
    model::Model,
    topology::AnchorRod,
};

fn id_array(ids: &BTreeSet<u32>) -> JsonValue {
    JsonValue::Array(ids.iter().map(|&id| id.into()).collect())
}

fn point(model: &Model, node: u32) -> JsonValue {
    match model.node(node) {
        Some(n) => {
            let p = model.offset().denormalize(&n.position);
            JsonValue::Array(vec![p.x.into(), p.y.into(), p.z.into()])
        }
        None => JsonValue::Null,
    }
}

fn record_json(model: &Model, record: &ConstraintRecord) -> JsonValue {
    let mut out = JsonValue::new_object();
    out["slave"] = record.slave.into();
    out["position"] = point(model, record.slave);
    out["dofs"] = JsonValue::Array(record.dofs.iter().map(|d| d.name().into()).collect());
    out["masters"] = JsonValue::Array(
        record
            .masters
            .iter()
            .map(|&(node, weight)| {
                let mut master = JsonValue::new_object();
                master["node"] = node.into();
                master["weight"] = weight.into();
                master
            })
            .collect(),
    );
    out["confidence"] = match record.confidence {
        Confidence::Full => "full",
        Confidence::LowConfidence => "low",
    }
    .into();
    out["fallback"] = record.fallback.into();
    out
}

fn rod_json(rod: &AnchorRod, selection: Option<&HeadSelection>, tiers: &[(f64, usize)]) -> JsonValue {
    let mut out = JsonValue::new_object();
    out["index"] = rod.index.into();
    out["nodes"] = rod.nodes.len().into();
    out["elements"] = rod.elements.len().into();
    out["endpoints"] = JsonValue::Array(rod.endpoints.iter().map(|&n| n.into()).collect());
    if let Some(force) = rod.prestress {
        out["prestress"] = force.into();
    }

    match selection.map(|s| s.resolution) {
        Some(HeadResolution::Shared { node }) => {
            out["head"] = node.into();
            out["resolution"] = "shared".into();
        }
        Some(HeadResolution::Matched {
            endpoint,
            target,
            distance,
            tier,
        }) => {
            out["head"] = endpoint.into();
            out["resolution"] = "matched".into();
            out["surface_node"] = target.into();
            out["distance"] = distance.into();
            if let Some(&(tolerance, _)) = tiers.get(tier) {
                out["tolerance"] = tolerance.into();
            }
        }
        Some(HeadResolution::Uncovered { nearest }) => {
            out["resolution"] = "uncovered".into();
            if let Some(d) = nearest {
                out["nearest_distance"] = d.into();
            }
        }
        None => out["resolution"] = "unselected".into(),
    }
    out
}

fn stats_json(stats: &CouplingStats) -> JsonValue {
    let mut out = JsonValue::new_object();
    out["rods"] = stats.rods.into();
    out["anchor_nodes"] = stats.anchor_nodes.into();
    out["anchor_elements"] = stats.anchor_elements.into();
    out["self_loops"] = stats.self_loops.into();
    out["dangling_rod_elements"] = stats.dangling_rod_elements.into();
    out["anomalies"] = stats.anomalies.into();
    out["prestressed_rods"] = stats.prestressed_rods.into();
    out["surface_nodes"] = stats.surface_nodes.into();
    out["volume_nodes"] = stats.volume_nodes.into();
    out["shared_heads"] = stats.shared_heads.into();
    out["resolved_per_tier"] = JsonValue::Array(
        stats
            .resolved_per_tier
            .iter()
            .map(|&(tolerance, count)| {
                let mut tier = JsonValue::new_object();
                tier["tolerance"] = tolerance.into();
                tier["rods"] = count.into();
                tier
            })
            .collect(),
    );
    out["uncovered"] = stats.uncovered.into();

    let mut distance = JsonValue::new_object();
    distance["count"] = stats.head_distance.count.into();
    distance["min"] = stats.head_distance.min.into();
    distance["max"] = stats.head_distance.max.into();
    distance["mean"] = stats.head_distance.mean.into();
    out["head_distance"] = distance;

    out["head_constraints"] = stats.head_constraints.into();
    out["embedded_constraints"] = stats.embedded_constraints.into();
    out["embedded_in_volume"] = stats.embedded_in_volume.into();
    out["low_confidence"] = stats.low_confidence.into();
    out["fallback_records"] = stats.fallback_records.into();
    out
}

fn active_json(active: &ActiveGroups) -> JsonValue {
    let mut out = JsonValue::new_object();
    out["materials"] = id_array(&active.materials);
    out["loads"] = id_array(&active.loads);
    out["boundaries"] = id_array(&active.boundaries);
    out
}

fn warning_json(warning: &Warning) -> JsonValue {
    let mut out = JsonValue::new_object();
    out["kind"] = warning.kind().name().into();
    out["message"] = warning.to_string().into();
    out
}

/// Builds the JSON document for a constraint dataset
///
/// # Arguments
/// * `model` - The model the dataset was synthesized from
/// * `dataset` - The synthesized constraints and statistics
/// * `parse_warnings` - Warnings collected while parsing the model
///
/// # Returns
/// The document as a JsonValue object
pub fn dataset_json(model: &Model, dataset: &ConstraintDataset, parse_warnings: &[Warning]) -> JsonValue {
    let info = model.info();
    let origin = model.offset().origin();

    let mut source = JsonValue::new_object();
    source["version"] = match &info.version {
        Some(v) => v.as_str().into(),
        None => JsonValue::Null,
    };
    source["units"] = JsonValue::Array(info.units.iter().map(|u| u.as_str().into()).collect());
    source["encoding"] = info.encoding.into();
    source["decode_fallback"] = info.decode_fallback.into();
    source["total_lines"] = info.total_lines.into();
    source["nodes"] = model.nodes().len().into();
    source["elements"] = model.elements().len().into();
    source["offset"] = JsonValue::Array(vec![origin.x.into(), origin.y.into(), origin.z.into()]);

    let mut document = JsonValue::new_object();
    document["source"] = source;
    document["statistics"] = stats_json(&dataset.stats);
    document["rods"] = JsonValue::Array(
        dataset
            .rods
            .iter()
            .map(|rod| {
                let selection = dataset.selections.get(rod.index).filter(|s| s.rod == rod.index);
                rod_json(rod, selection, &dataset.stats.resolved_per_tier)
            })
            .collect(),
    );
    document["head_constraints"] = JsonValue::Array(
        dataset
            .head_constraints
            .iter()
            .map(|r| record_json(model, r))
            .collect(),
    );
    document["embedded_constraints"] = JsonValue::Array(
        dataset
            .embedded_constraints
            .iter()
            .map(|r| record_json(model, r))
            .collect(),
    );
    document["stages"] = JsonValue::Array(
        model
            .stage_summary()
            .iter()
            .map(|stage| {
                let mut out = JsonValue::new_object();
                out["id"] = stage.id.into();
                out["name"] = stage.name.as_str().into();
                out["kind"] = stage.kind.into();
                out["active"] = active_json(&stage.active);
                out
            })
            .collect(),
    );
    document["warnings"] = JsonValue::Array(
        parse_warnings
            .iter()
            .chain(dataset.warnings.iter())
            .map(warning_json)
            .collect(),
    );
    document
}

/// Writes the constraint dataset to a JSON file
///
/// # Arguments
/// * `path` - Destination file
/// * `model` - The model the dataset was synthesized from
/// * `dataset` - The synthesized constraints and statistics
/// * `parse_warnings` - Warnings collected while parsing the model
pub fn write_dataset(
    path: &Path,
    model: &Model,
    dataset: &ConstraintDataset,
    parse_warnings: &[Warning],
) -> Result<(), GeoanchorError> {
    let document = dataset_json(model, dataset, parse_warnings);

    if let Err(err) = std::fs::write(path, document.pretty(2)) {
        return Err(GeoanchorError::PostProcessor(format!(
            "Failed to write {}: {err}",
            path.display()
        )));
    }

    log::info!("wrote constraint dataset to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::ElementShape;
    use crate::constraints::Dof;
    use crate::error::Diagnostics;
    use crate::model::ModelBuilder;
    use crate::offset::CoordinateOffset;
    use crate::record::Record;
    use nalgebra::{Point3, Vector3};

    fn small_model() -> Model {
        let mut diagnostics = Diagnostics::new();
        let mut builder = ModelBuilder::new(CoordinateOffset::new(Vector3::new(1000.0, 2000.0, 0.0)));
        builder.insert(
            Record::Node {
                id: 1,
                position: Point3::new(1.0, 2.0, 3.0),
            },
            1,
            &mut diagnostics,
        );
        builder.insert(
            Record::Node {
                id: 2,
                position: Point3::new(2.0, 2.0, 3.0),
            },
            2,
            &mut diagnostics,
        );
        builder.insert(
            Record::Element {
                id: 1,
                shape: ElementShape::Line,
                material: 15,
                nodes: vec![1, 2],
            },
            3,
            &mut diagnostics,
        );
        builder.finish(&mut diagnostics)
    }

    fn dataset() -> ConstraintDataset {
        ConstraintDataset {
            rods: vec![AnchorRod {
                index: 0,
                nodes: vec![1, 2],
                endpoints: vec![1, 2],
                elements: vec![1],
                prestress: Some(150.0),
            }],
            selections: vec![HeadSelection {
                rod: 0,
                resolution: HeadResolution::Matched {
                    endpoint: 1,
                    target: 2,
                    distance: 1.0,
                    tier: 0,
                },
            }],
            head_constraints: vec![ConstraintRecord {
                slave: 1,
                dofs: Dof::TRANSLATIONAL.to_vec(),
                masters: vec![(2, 1.0)],
                confidence: Confidence::LowConfidence,
                fallback: false,
            }],
            embedded_constraints: Vec::new(),
            stats: CouplingStats {
                rods: 1,
                resolved_per_tier: vec![(2.0, 1)],
                ..CouplingStats::default()
            },
            warnings: vec![Warning::DegenerateConstraint { slave: 1, masters: 1 }],
        }
    }

    #[test]
    fn document_carries_absolute_positions() {
        let model = small_model();
        let document = dataset_json(&model, &dataset(), &[]);

        assert_eq!(document["source"]["offset"][0], 1000.0);
        let head = &document["head_constraints"][0];
        assert_eq!(head["slave"], 1);
        assert_eq!(head["position"][0], 1001.0);
        assert_eq!(head["position"][1], 2002.0);
        assert_eq!(head["confidence"], "low");
        assert_eq!(head["dofs"].len(), 3);

        let rod = &document["rods"][0];
        assert_eq!(rod["resolution"], "matched");
        assert_eq!(rod["tolerance"], 2.0);
        assert_eq!(rod["prestress"], 150.0);
        assert_eq!(document["warnings"][0]["kind"], "degenerate constraint");
    }

    #[test]
    fn each_rod_reports_its_own_resolution() {
        let model = small_model();
        let mut dataset = dataset();
        dataset.rods.push(AnchorRod {
            index: 1,
            nodes: vec![2, 3],
            endpoints: vec![2, 3],
            elements: vec![2],
            prestress: None,
        });
        dataset.selections.push(HeadSelection {
            rod: 1,
            resolution: HeadResolution::Shared { node: 2 },
        });

        let document = dataset_json(&model, &dataset, &[]);
        assert_eq!(document["rods"].len(), 2);
        assert_eq!(document["rods"][0]["resolution"], "matched");
        assert_eq!(document["rods"][1]["resolution"], "shared");
    }

    #[test]
    fn writes_pretty_json() {
        let model = small_model();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_dataset(&path, &model, &dataset(), &[]).unwrap();

        let written = json::parse(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["statistics"]["rods"], 1);
        assert_eq!(written["statistics"]["resolved_per_tier"][0]["rods"], 1);
    }

    #[test]
    fn unwritable_path_is_post_processor_error() {
        let model = small_model();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.json");
        let err = write_dataset(&path, &model, &dataset(), &[]).unwrap_err();
        assert!(matches!(err, GeoanchorError::PostProcessor(_)));
    }
}
