use nalgebra::Point3;

use crate::{
    datatypes::NodeId,
    error::{Diagnostics, GeoanchorError, Warning},
    spatial::TargetSet,
};

/// Distances at or below this are treated as coincident
pub const COINCIDENT_DISTANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dof {
    DisplacementX,
    DisplacementY,
    DisplacementZ,
}

impl Dof {
    pub const TRANSLATIONAL: [Dof; 3] = [Dof::DisplacementX, Dof::DisplacementY, Dof::DisplacementZ];

    pub fn name(&self) -> &'static str {
        match self {
            Dof::DisplacementX => "DISPLACEMENT_X",
            Dof::DisplacementY => "DISPLACEMENT_Y",
            Dof::DisplacementZ => "DISPLACEMENT_Z",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Full,
    /// Fewer than two masters were found within the search radius
    LowConfidence,
}

/// Ties the slave's DOFs to a weighted combination of master nodes
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintRecord {
    pub slave: NodeId,
    pub dofs: Vec<Dof>,
    /// Weights sum to 1
    pub masters: Vec<(NodeId, f64)>,
    pub confidence: Confidence,
    /// Slave chosen by the interior-node fallback instead of mesh-set data
    pub fallback: bool,
}

impl ConstraintRecord {
    pub fn weight_sum(&self) -> f64 {
        self.masters.iter().map(|(_, w)| w).sum()
    }
}

/// Normalised inverse-distance weights. Distances are floored at
/// [`COINCIDENT_DISTANCE`].
pub fn inverse_distance_weights(distances: &[f64]) -> Vec<f64> {
    let inverse: Vec<f64> = distances
        .iter()
        .map(|d| 1.0 / d.max(COINCIDENT_DISTANCE))
        .collect();
    let total: f64 = inverse.iter().sum();
    inverse.iter().map(|w| w / total).collect()
}

/// Builds multi-point constraints from k-nearest neighbors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstraintSynthesizer {
    nearest_k: usize,
    search_radius: f64,
}

impl ConstraintSynthesizer {
    pub fn new(nearest_k: usize, search_radius: f64) -> Result<ConstraintSynthesizer, GeoanchorError> {
        if nearest_k == 0 {
            return Err(GeoanchorError::Config(
                "nearest_k must be at least 1".to_owned(),
            ));
        }
        if !search_radius.is_finite() || search_radius <= 0.0 {
            return Err(GeoanchorError::Config(format!(
                "search_radius {search_radius} must be finite and positive"
            )));
        }

        Ok(ConstraintSynthesizer {
            nearest_k,
            search_radius,
        })
    }

    pub fn nearest_k(&self) -> usize {
        self.nearest_k
    }

    pub fn search_radius(&self) -> f64 {
        self.search_radius
    }

    /// Couples `slave` at `position` to nodes of `targets`.
    ///
    /// A coincident master gets the whole weight. With fewer than two
    /// masters in range the record degrades to a single master, the
    /// nearest in range or else the nearest overall, and a
    /// [`Warning::DegenerateConstraint`] is raised.
    ///
    /// # Returns
    /// `None` only when `targets` is empty
    pub fn couple(
        &self,
        slave: NodeId,
        position: &Point3<f64>,
        targets: &TargetSet,
        diagnostics: &mut Diagnostics,
    ) -> Option<ConstraintRecord> {
        if targets.is_empty() {
            return None;
        }
        let neighbors = targets.k_nearest_within(position, self.nearest_k, self.search_radius);

        let single = |master: NodeId, confidence: Confidence| ConstraintRecord {
            slave,
            dofs: Dof::TRANSLATIONAL.to_vec(),
            masters: vec![(master, 1.0)],
            confidence,
            fallback: false,
        };

        match neighbors.first() {
            Some(first) if first.distance <= COINCIDENT_DISTANCE => {
                return Some(single(first.node, Confidence::Full));
            }
            _ => {}
        }

        if neighbors.len() < 2 {
            diagnostics.push(Warning::DegenerateConstraint {
                slave,
                masters: neighbors.len(),
            });
            let master = match neighbors.first() {
                Some(neighbor) => neighbor.node,
                None => targets.nearest(position)?.node,
            };
            return Some(single(master, Confidence::LowConfidence));
        }

        let distances: Vec<f64> = neighbors.iter().map(|n| n.distance).collect();
        let weights = inverse_distance_weights(&distances);
        Some(ConstraintRecord {
            slave,
            dofs: Dof::TRANSLATIONAL.to_vec(),
            masters: neighbors.iter().map(|n| n.node).zip(weights).collect(),
            confidence: Confidence::Full,
            fallback: false,
        })
    }
}
