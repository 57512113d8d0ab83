//! Path length of line geometries.

use log::warn;

use crate::geo::{GeodesicMethod, LonLat};

/// Result of measuring an ordered coordinate sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathLength {
    /// Total length in meters (0 for degenerate input).
    pub meters: f64,
    /// `true` when fewer than two points were supplied.
    pub degenerate: bool,
}

impl PathLength {
    /// Length rounded to centimeters, the precision written to sheets.
    #[inline]
    pub fn rounded_cm(&self) -> f64 {
        (self.meters * 100.0).round() / 100.0
    }
}

/// Sums geodesic distances between consecutive points.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathLengthCalculator {
    method: GeodesicMethod,
}

impl PathLengthCalculator {
    pub fn new(method: GeodesicMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> GeodesicMethod {
        self.method
    }

    /// Measure `points` in meters.
    ///
    /// Fewer than two points yield a zero length and a warning; this never fails.
    pub fn measure(&self, points: &[LonLat]) -> PathLength {
        if points.len() < 2 {
            warn!(
                "path with {} point(s) has no measurable length; using 0 m",
                points.len()
            );
            return PathLength {
                meters: 0.0,
                degenerate: true,
            };
        }

        let meters = points
            .windows(2)
            .map(|pair| self.method.distance_m(pair[0], pair[1]))
            .sum();

        PathLength {
            meters,
            degenerate: false,
        }
    }
}
