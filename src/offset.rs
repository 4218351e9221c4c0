use nalgebra::{Point3, Vector3};

/// Model-wide translation subtracted from every raw node coordinate.
///
/// Built from the per-axis minimum over all node records so that large
/// projected survey coordinates become small relative values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateOffset {
    origin: Vector3<f64>,
}

impl Default for CoordinateOffset {
    fn default() -> Self {
        CoordinateOffset::zero()
    }
}

impl CoordinateOffset {
    pub fn zero() -> CoordinateOffset {
        CoordinateOffset {
            origin: Vector3::zeros(),
        }
    }

    pub fn new(origin: Vector3<f64>) -> CoordinateOffset {
        CoordinateOffset { origin }
    }

    pub fn origin(&self) -> Vector3<f64> {
        self.origin
    }

    /// Converts a raw source coordinate into its stored form
    pub fn normalize(&self, raw: &Point3<f64>) -> Point3<f64> {
        raw - self.origin
    }

    /// Converts a stored coordinate back into source coordinates
    pub fn denormalize(&self, stored: &Point3<f64>) -> Point3<f64> {
        stored + self.origin
    }
}

/// Accumulates the per-axis minimum during the first pass over node records
#[derive(Debug, Clone, Default)]
pub struct OffsetScanner {
    min: Option<Vector3<f64>>,
    seen: usize,
}

impl OffsetScanner {
    pub fn new() -> OffsetScanner {
        OffsetScanner::default()
    }

    pub fn observe(&mut self, raw: &Point3<f64>) {
        self.seen += 1;
        self.min = Some(match self.min {
            Some(min) => min.inf(&raw.coords),
            None => raw.coords,
        });
    }

    pub fn nodes_seen(&self) -> usize {
        self.seen
    }

    /// A model with no nodes gets a zero offset
    pub fn finish(&self) -> CoordinateOffset {
        match self.min {
            Some(min) => CoordinateOffset::new(min),
            None => CoordinateOffset::zero(),
        }
    }
}
