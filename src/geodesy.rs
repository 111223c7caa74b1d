// Geodesy module - distances and bearings between lat/lng points
//
// Spherical earth throughout; accuracy (~0.5%) is far below GPS noise
// at the scales the follow and motion logic care about.

use std::f64::consts::PI;

/// Degrees to radians conversion factor
const DTOR: f64 = PI / 180.0;

/// Radians to degrees conversion factor
const RTOD: f64 = 180.0 / PI;

/// Mean earth radius in meters
const SPHERICAL_R: f64 = 6_371_008.8;

/// Returns great-circle distance in meters between two points (haversine).
///
/// Stable for very short distances, unlike the spherical law of cosines.
///
/// # Example
/// ```
/// let d = livemap::geodesy::haversine_m(40.7128, -74.0060, 40.7306, -73.9352);
/// assert!((d - 6_290.0).abs() < 50.0);
/// ```
pub fn haversine_m(lat0: f64, lng0: f64, lat1: f64, lng1: f64) -> f64 {
    let d_lat = (lat1 - lat0) * DTOR;
    let d_lng = (lng1 - lng0) * DTOR;
    let s1 = (d_lat / 2.0).sin();
    let s2 = (d_lng / 2.0).sin();
    let h = s1 * s1 + (lat0 * DTOR).cos() * (lat1 * DTOR).cos() * s2 * s2;

    2.0 * SPHERICAL_R * h.sqrt().min(1.0).asin()
}

/// Initial bearing from point 0 to point 1, degrees clockwise from north in [0, 360).
pub fn initial_bearing_deg(lat0: f64, lng0: f64, lat1: f64, lng1: f64) -> f64 {
    let phi0 = lat0 * DTOR;
    let phi1 = lat1 * DTOR;
    let d_lng = (lng1 - lng0) * DTOR;

    let y = d_lng.sin() * phi1.cos();
    let x = phi0.cos() * phi1.sin() - phi0.sin() * phi1.cos() * d_lng.cos();

    normalize_deg(y.atan2(x) * RTOD)
}

/// Wraps any angle into [0, 360).
#[inline]
pub fn normalize_deg(deg: f64) -> f64 {
    let d = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if d >= 360.0 {
        0.0
    } else {
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-6;

    #[test]
    fn test_haversine_same_point() {
        assert!(haversine_m(40.7, -74.0, 40.7, -74.0).abs() < EPSILON);
    }

    #[test]
    fn test_haversine_london_paris() {
        let dist = haversine_m(51.5074, -0.1278, 48.8566, 2.3522);
        // Should be approximately 344 km
        assert!((dist - 344_000.0).abs() < 5_000.0, "Distance: {} meters", dist);
    }

    #[test]
    fn test_bearing_cardinal() {
        assert!((initial_bearing_deg(40.0, -74.0, 41.0, -74.0) - 0.0).abs() < 1e-9);
        assert!((initial_bearing_deg(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 1e-9);
        assert!((initial_bearing_deg(41.0, -74.0, 40.0, -74.0) - 180.0).abs() < 1e-9);
        assert!((initial_bearing_deg(0.0, 1.0, 0.0, 0.0) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_bearing_range() {
        let pts = [(40.7, -74.0), (40.6, -73.9), (40.8, -74.1), (-33.9, 18.4)];
        for &(a_lat, a_lng) in &pts {
            for &(b_lat, b_lng) in &pts {
                let b = initial_bearing_deg(a_lat, a_lng, b_lat, b_lng);
                assert!((0.0..360.0).contains(&b), "bearing {}", b);
            }
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_deg(-90.0), 270.0);
        assert_eq!(normalize_deg(720.0), 0.0);
        assert_eq!(normalize_deg(-1e-20), 0.0);
    }
}
