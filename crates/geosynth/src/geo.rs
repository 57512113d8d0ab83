//! Coordinates and point-to-point distances.
//!
//! Two models are offered:
//! - a sphere of mean radius 6,371,000 m (haversine), and
//! - the WGS-84 ellipsoid (inverse Vincenty), with a haversine fallback when the
//!   iteration does not converge (nearly antipodal points).
//!
//! For the short spans found in last-mile networks the two agree to well under 0.5%.

use serde::{Deserialize, Serialize};

/// Mean earth radius used by the spherical model, in meters.
pub const EARTH_MEAN_RADIUS_M: f64 = 6_371_000.0;

pub mod wgs84 {
    /// Semi-major axis (equatorial radius) in meters.
    pub const A: f64 = 6_378_137.0;

    /// Flattening factor (1 / 298.257223563).
    pub const F: f64 = 1.0 / 298.257_223_563;

    /// Semi-minor axis (polar radius) in meters.
    pub const B: f64 = A * (1.0 - F);
}

/// A geographic position in decimal degrees (CRS:84 axis order).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    #[inline]
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }

    /// Squared euclidean distance on raw degrees.
    ///
    /// Only meaningful for ranking nearby points: one degree of longitude shrinks
    /// with latitude, so this is not a length. Near the equator and over sub-kilometer
    /// spans the ranking matches the geodesic one.
    #[inline]
    pub fn planar_sq(&self, other: &LonLat) -> f64 {
        let d_lon = self.lon - other.lon;
        let d_lat = self.lat - other.lat;
        d_lon * d_lon + d_lat * d_lat
    }
}

/// Which earth model to use when measuring meters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeodesicMethod {
    /// Great-circle distance on a sphere of radius [`EARTH_MEAN_RADIUS_M`].
    #[default]
    Haversine,
    /// Ellipsoidal distance on WGS-84.
    Vincenty,
}

impl GeodesicMethod {
    /// Distance between two points in meters.
    #[inline]
    pub fn distance_m(self, a: LonLat, b: LonLat) -> f64 {
        match self {
            GeodesicMethod::Haversine => haversine_m(a, b),
            GeodesicMethod::Vincenty => vincenty_m(a, b).unwrap_or_else(|| haversine_m(a, b)),
        }
    }
}

impl std::fmt::Display for GeodesicMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GeodesicMethod::Haversine => "haversine",
            GeodesicMethod::Vincenty => "vincenty",
        };

        f.write_str(s)
    }
}

/// Great-circle distance in meters.
///
/// Uses the `atan2` form so both very short (a few meters) and long spans stay
/// well conditioned.
#[inline]
pub fn haversine_m(a: LonLat, b: LonLat) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lon - a.lon).to_radians();

    let s_phi = (d_phi * 0.5).sin();
    let s_lambda = (d_lambda * 0.5).sin();
    let h = (s_phi * s_phi + phi1.cos() * phi2.cos() * s_lambda * s_lambda).clamp(0.0, 1.0);

    2.0 * EARTH_MEAN_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Inverse Vincenty on WGS-84. Returns `None` if the iteration fails to converge.
pub fn vincenty_m(a: LonLat, b: LonLat) -> Option<f64> {
    use wgs84::{A, B, F};

    const MAX_ITERATIONS: usize = 200;
    const CONVERGENCE: f64 = 1e-12;

    let l = (b.lon - a.lon).to_radians();
    let u1 = ((1.0 - F) * a.lat.to_radians().tan()).atan();
    let u2 = ((1.0 - F) * b.lat.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;

    for _ in 0..MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();

        let cross = cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda;
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2) + cross * cross).sqrt();
        if sin_sigma == 0.0 {
            // Coincident points.
            return Some(0.0);
        }

        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;

        // Both points on the equator: cos²α = 0 and the term vanishes.
        let cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0
        };

        let c = F / 16.0 * cos_sq_alpha * (4.0 + F * (4.0 - 3.0 * cos_sq_alpha));
        let lambda_prev = lambda;
        lambda = l
            + (1.0 - c)
                * F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

        if (lambda - lambda_prev).abs() < CONVERGENCE {
            let u_sq = cos_sq_alpha * (A * A - B * B) / (B * B);
            let big_a =
                1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                                * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));

            return Some(B * big_a * (sigma - delta_sigma));
        }
    }

    None
}
