use std::collections::HashSet;

use nalgebra::Point3;

use crate::{
    datatypes::NodeId,
    error::{Diagnostics, GeoanchorError, Warning},
    model::Model,
    spatial::TargetSet,
    topology::AnchorRod,
};

/// Ordered search radii. The first tier a head's distance fits in is the
/// tier it resolves at.
#[derive(Debug, Clone, PartialEq)]
pub struct ToleranceSchedule {
    tiers: Vec<f64>,
}

impl ToleranceSchedule {
    /// # Arguments
    /// * `tiers` - Radii, non-empty, finite, positive and strictly increasing
    pub fn new(tiers: Vec<f64>) -> Result<ToleranceSchedule, GeoanchorError> {
        if tiers.is_empty() {
            return Err(GeoanchorError::Config(
                "Tolerance schedule needs at least one tier".to_owned(),
            ));
        }
        if let Some(bad) = tiers.iter().find(|t| !t.is_finite() || **t <= 0.0) {
            return Err(GeoanchorError::Config(format!(
                "Tolerance {bad} must be finite and positive"
            )));
        }
        if tiers.windows(2).any(|w| w[1] <= w[0]) {
            return Err(GeoanchorError::Config(format!(
                "Tolerance schedule {tiers:?} must be strictly increasing"
            )));
        }

        Ok(ToleranceSchedule { tiers })
    }

    pub fn tiers(&self) -> &[f64] {
        &self.tiers
    }

    pub fn max(&self) -> f64 {
        self.tiers[self.tiers.len() - 1]
    }

    pub fn tier_for(&self, distance: f64) -> Option<usize> {
        self.tiers.iter().position(|&t| distance <= t)
    }

    /// The first `count` tiers, or `None` if that leaves nothing
    pub fn truncated(&self, count: usize) -> Option<ToleranceSchedule> {
        if count == 0 {
            return None;
        }
        Some(ToleranceSchedule {
            tiers: self.tiers[..count.min(self.tiers.len())].to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeadResolution {
    /// An endpoint is itself a surface node
    Shared { node: NodeId },
    /// Closest endpoint to the surface, accepted at `tier`
    Matched {
        endpoint: NodeId,
        target: NodeId,
        distance: f64,
        tier: usize,
    },
    /// Nothing within the largest tier. `nearest` is the best distance
    /// found, if any surface node was reachable at all.
    Uncovered { nearest: Option<f64> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadSelection {
    pub rod: usize,
    pub resolution: HeadResolution,
}

impl HeadSelection {
    pub fn head(&self) -> Option<NodeId> {
        match self.resolution {
            HeadResolution::Shared { node } => Some(node),
            HeadResolution::Matched { endpoint, .. } => Some(endpoint),
            HeadResolution::Uncovered { .. } => None,
        }
    }

    pub fn is_covered(&self) -> bool {
        !matches!(self.resolution, HeadResolution::Uncovered { .. })
    }
}

/// Picks the head node of each rod against a surface target set
pub struct HeadSelector<'a> {
    model: &'a Model,
    surface: &'a TargetSet,
    schedule: &'a ToleranceSchedule,
    candidates: Option<&'a HashSet<NodeId>>,
}

impl<'a> HeadSelector<'a> {
    pub fn new(
        model: &'a Model,
        surface: &'a TargetSet,
        schedule: &'a ToleranceSchedule,
    ) -> HeadSelector<'a> {
        HeadSelector {
            model,
            surface,
            schedule,
            candidates: None,
        }
    }

    /// Only endpoints in `candidates` may become heads. Rods with no
    /// endpoint in the set keep all of their endpoints.
    pub fn with_candidates(mut self, candidates: &'a HashSet<NodeId>) -> HeadSelector<'a> {
        self.candidates = Some(candidates);
        self
    }

    fn head_candidates(&self, rod: &AnchorRod) -> Vec<NodeId> {
        if let Some(allowed) = self.candidates {
            let restricted: Vec<NodeId> = rod
                .endpoints
                .iter()
                .copied()
                .filter(|n| allowed.contains(n))
                .collect();
            if !restricted.is_empty() {
                return restricted;
            }
        }
        rod.endpoints.clone()
    }

    fn position(&self, node: NodeId) -> Option<&'a Point3<f64>> {
        self.model.node(node).map(|n| &n.position)
    }

    /// Selects the head of one rod.
    ///
    /// Shared endpoints win without a search. Otherwise the endpoint with
    /// the closest surface node is kept and graded against the schedule.
    pub fn select(&self, rod: &AnchorRod) -> HeadSelection {
        let endpoints = self.head_candidates(rod);
        if let Some(&node) = endpoints.iter().find(|&&n| self.surface.contains(n)) {
            return HeadSelection {
                rod: rod.index,
                resolution: HeadResolution::Shared { node },
            };
        }

        let mut best: Option<(NodeId, NodeId, f64)> = None;
        for &endpoint in &endpoints {
            let Some(position) = self.position(endpoint) else {
                continue;
            };
            let Some(neighbor) = self.surface.nearest(position) else {
                continue;
            };
            if best.map_or(true, |(_, _, d)| neighbor.distance < d) {
                best = Some((endpoint, neighbor.node, neighbor.distance));
            }
        }

        let resolution = match best {
            Some((endpoint, target, distance)) => match self.schedule.tier_for(distance) {
                Some(tier) => HeadResolution::Matched {
                    endpoint,
                    target,
                    distance,
                    tier,
                },
                None => HeadResolution::Uncovered {
                    nearest: Some(distance),
                },
            },
            None => HeadResolution::Uncovered { nearest: None },
        };

        HeadSelection {
            rod: rod.index,
            resolution,
        }
    }

    /// Selects heads for every rod, warning once per uncovered rod
    pub fn select_all(&self, rods: &[AnchorRod], diagnostics: &mut Diagnostics) -> Vec<HeadSelection> {
        rods.iter()
            .map(|rod| {
                let selection = self.select(rod);
                if let HeadResolution::Uncovered { nearest } = selection.resolution {
                    diagnostics.push(Warning::CoverageGap {
                        rod: rod.index,
                        max_tolerance: self.schedule.max(),
                        nearest,
                    });
                }
                selection
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;
    use crate::offset::CoordinateOffset;
    use crate::record::Record;

    fn schedule() -> ToleranceSchedule {
        ToleranceSchedule::new(vec![2.0, 5.0, 10.0, 20.0, 50.0]).unwrap()
    }

    fn model_with(points: &[(NodeId, f64, f64, f64)]) -> Model {
        let mut diagnostics = Diagnostics::new();
        let mut builder = ModelBuilder::new(CoordinateOffset::zero());
        for (line, &(id, x, y, z)) in points.iter().enumerate() {
            builder.insert(
                Record::Node {
                    id,
                    position: Point3::new(x, y, z),
                },
                line + 1,
                &mut diagnostics,
            );
        }
        builder.finish(&mut diagnostics)
    }

    fn rod(endpoints: Vec<NodeId>) -> AnchorRod {
        AnchorRod {
            index: 0,
            nodes: endpoints.clone(),
            endpoints,
            elements: Vec::new(),
            prestress: None,
        }
    }

    #[test]
    fn schedule_validation() {
        assert!(ToleranceSchedule::new(Vec::new()).is_err());
        assert!(ToleranceSchedule::new(vec![2.0, 2.0]).is_err());
        assert!(ToleranceSchedule::new(vec![5.0, 2.0]).is_err());
        assert!(ToleranceSchedule::new(vec![-1.0, 2.0]).is_err());
        assert!(ToleranceSchedule::new(vec![f64::NAN]).is_err());

        let schedule = schedule();
        assert_eq!(schedule.tier_for(0.0), Some(0));
        assert_eq!(schedule.tier_for(2.0), Some(0));
        assert_eq!(schedule.tier_for(7.5), Some(2));
        assert_eq!(schedule.tier_for(50.1), None);
        assert_eq!(schedule.truncated(2).unwrap().tiers(), &[2.0, 5.0]);
        assert_eq!(schedule.truncated(0), None);
    }

    #[test]
    fn shared_endpoint_wins() {
        let model = model_with(&[(1, 0.0, 0.0, 0.0), (2, 10.0, 0.0, 0.0), (100, 0.0, 0.0, 0.0)]);
        let surface = TargetSet::from_points("surface", vec![(2, Point3::new(10.0, 0.0, 0.0))]);
        let schedule = schedule();
        let selector = HeadSelector::new(&model, &surface, &schedule);

        let selection = selector.select(&rod(vec![1, 2]));
        assert_eq!(selection.resolution, HeadResolution::Shared { node: 2 });
        assert_eq!(selection.head(), Some(2));
    }

    #[test]
    fn closest_endpoint_graded_by_tier() {
        let model = model_with(&[(1, 0.0, 0.0, 0.0), (2, 30.0, 0.0, 0.0)]);
        let surface = TargetSet::from_points(
            "surface",
            vec![(50, Point3::new(-7.0, 0.0, 0.0)), (51, Point3::new(33.0, 4.0, 0.0))],
        );
        let schedule = schedule();
        let selector = HeadSelector::new(&model, &surface, &schedule);

        // endpoint 2 is 5 m from node 51, endpoint 1 is 7 m from node 50
        assert_eq!(
            selector.select(&rod(vec![1, 2])).resolution,
            HeadResolution::Matched {
                endpoint: 2,
                target: 51,
                distance: 5.0,
                tier: 1
            }
        );
    }

    #[test]
    fn beyond_last_tier_is_uncovered() {
        let model = model_with(&[(1, 0.0, 0.0, 0.0), (2, 1.0, 0.0, 0.0)]);
        let surface = TargetSet::from_points("surface", vec![(9, Point3::new(0.0, 80.0, 0.0))]);
        let schedule = schedule();
        let selector = HeadSelector::new(&model, &surface, &schedule);

        let mut diagnostics = Diagnostics::new();
        let selections = selector.select_all(&[rod(vec![1, 2])], &mut diagnostics);
        assert_eq!(
            selections[0].resolution,
            HeadResolution::Uncovered {
                nearest: Some(80.0)
            }
        );
        assert_eq!(
            diagnostics.warnings(),
            &[Warning::CoverageGap {
                rod: 0,
                max_tolerance: 50.0,
                nearest: Some(80.0)
            }]
        );
    }

    #[test]
    fn omitted_tier_leaves_rod_uncovered() {
        let model = model_with(&[(1, 0.0, 0.0, 0.0), (2, 20.0, 0.0, 0.0)]);
        let surface = TargetSet::from_points("surface", vec![(9, Point3::new(-3.5, 0.0, 0.0))]);
        let full = ToleranceSchedule::new(vec![2.0, 5.0, 10.0]).unwrap();

        let mut diagnostics = Diagnostics::new();
        let selections =
            HeadSelector::new(&model, &surface, &full).select_all(&[rod(vec![1, 2])], &mut diagnostics);
        assert_eq!(
            selections[0].resolution,
            HeadResolution::Matched {
                endpoint: 1,
                target: 9,
                distance: 3.5,
                tier: 1
            }
        );
        assert!(diagnostics.is_empty());

        let short = full.truncated(1).unwrap();
        let selections =
            HeadSelector::new(&model, &surface, &short).select_all(&[rod(vec![1, 2])], &mut diagnostics);
        assert_eq!(
            selections[0].resolution,
            HeadResolution::Uncovered { nearest: Some(3.5) }
        );
        assert_eq!(
            diagnostics.warnings(),
            &[Warning::CoverageGap {
                rod: 0,
                max_tolerance: 2.0,
                nearest: Some(3.5)
            }]
        );
    }

    #[test]
    fn candidate_endpoints_restrict_the_search() {
        let model = model_with(&[(1, 0.0, 0.0, 0.0), (2, 8.0, 0.0, 0.0)]);
        let surface = TargetSet::from_points("surface", vec![(9, Point3::new(-1.0, 0.0, 0.0))]);
        let schedule = schedule();

        // endpoint 1 is closer, but only endpoint 2 lies in the free length
        let free = HashSet::from([2]);
        let selector = HeadSelector::new(&model, &surface, &schedule).with_candidates(&free);
        assert_eq!(
            selector.select(&rod(vec![1, 2])).resolution,
            HeadResolution::Matched {
                endpoint: 2,
                target: 9,
                distance: 9.0,
                tier: 2
            }
        );

        // no endpoint in the set: every endpoint stays eligible
        let unrelated = HashSet::from([77]);
        let selector = HeadSelector::new(&model, &surface, &schedule).with_candidates(&unrelated);
        assert_eq!(selector.select(&rod(vec![1, 2])).head(), Some(1));
    }

    #[test]
    fn rod_without_endpoints_is_uncovered() {
        let model = model_with(&[(1, 0.0, 0.0, 0.0)]);
        let surface = TargetSet::from_points("surface", vec![(9, Point3::new(0.0, 0.0, 0.0))]);
        let schedule = schedule();
        let selector = HeadSelector::new(&model, &surface, &schedule);

        let selection = selector.select(&rod(Vec::new()));
        assert_eq!(selection.resolution, HeadResolution::Uncovered { nearest: None });
        assert!(!selection.is_covered());
    }
}
