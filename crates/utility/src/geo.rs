//! Spherical geometry on the WGS-84 sphere.
//!
//! Formulae follow the standard great-circle forms collected at
//! http://www.movable-type.co.uk/scripts/latlong.html. All distances are in
//! meters, all angles in degrees.

use serde::{Deserialize, Serialize};

/// Radius of the earth, in meters.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

fn to_radians(degrees: f64) -> f64 {
    degrees * std::f64::consts::PI / 180.0
}

fn to_degrees(radians: f64) -> f64 {
    radians * 180.0 / std::f64::consts::PI
}

/// A latitude/longitude pair, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coord {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to another point (haversine), in meters.
    pub fn distance_to(&self, other: &Coord) -> f64 {
        let phi1 = to_radians(self.latitude);
        let phi2 = to_radians(other.latitude);
        let dphi = to_radians(other.latitude - self.latitude);
        let dlam = to_radians(other.longitude - self.longitude);

        let a = (dphi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (dlam / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS * c
    }

    /// Initial bearing towards another point, in degrees normalised to [0, 360).
    ///
    /// Undefined (NaN) when both points coincide.
    pub fn bearing_to(&self, other: &Coord) -> f64 {
        let phi1 = to_radians(self.latitude);
        let phi2 = to_radians(other.latitude);
        let dlam = to_radians(other.longitude - self.longitude);

        let y = dlam.sin() * phi2.cos();
        let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlam.cos();

        (to_degrees(y.atan2(x)) + 360.0) % 360.0
    }

    /// The point reached by travelling `distance` meters on the given initial
    /// bearing. The resulting longitude is normalised to (-180, 180].
    pub fn destination(&self, distance: f64, bearing: f64) -> Coord {
        let delta = distance / EARTH_RADIUS;
        let theta = to_radians(bearing);
        let phi1 = to_radians(self.latitude);
        let lam1 = to_radians(self.longitude);

        let sin_phi2 =
            phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos();
        let phi2 = sin_phi2.asin();
        let y = theta.sin() * delta.sin() * phi1.cos();
        let x = delta.cos() - phi1.sin() * sin_phi2;
        let lam2 = lam1 + y.atan2(x);

        Coord::new(
            to_degrees(phi2),
            (to_degrees(lam2) + 540.0) % 360.0 - 180.0,
        )
    }

    /// Signed perpendicular distance of this point from the great circle
    /// through `a` and `b`, in meters.
    pub fn cross_track_distance(&self, a: &Coord, b: &Coord) -> f64 {
        let d13 = a.distance_to(self) / EARTH_RADIUS;
        let t13 = to_radians(a.bearing_to(self));
        let t12 = to_radians(a.bearing_to(b));

        (d13.sin() * (t13 - t12).sin()).asin() * EARTH_RADIUS
    }

    /// Distance from `a` to the foot of the perpendicular dropped from this
    /// point onto the great circle through `a` and `b`. Negative when the
    /// foot lies behind `a`.
    pub fn along_track_distance(&self, a: &Coord, b: &Coord) -> f64 {
        let d13 = a.distance_to(self) / EARTH_RADIUS;
        let dxt = self.cross_track_distance(a, b) / EARTH_RADIUS;
        let t13 = to_radians(a.bearing_to(self));
        let t12 = to_radians(a.bearing_to(b));

        let along = (d13.cos() / dxt.cos()).clamp(-1.0, 1.0).acos() * EARTH_RADIUS;
        if (t13 - t12).cos() < 0.0 {
            -along
        } else {
            along
        }
    }

    /// Equirectangular projection of this point into the tangent plane at
    /// `origin`, returning `(x, y)` offsets in meters. Only valid within
    /// ~100 km of the origin.
    pub fn project_flat(&self, origin: &Coord) -> (f64, f64) {
        let x = (to_radians(self.longitude) - to_radians(origin.longitude))
            * to_radians(origin.latitude).cos();
        let y = to_radians(self.latitude) - to_radians(origin.latitude);

        (EARTH_RADIUS * x, EARTH_RADIUS * y)
    }
}

/// The closest point of a polyline to some query point.
#[derive(Debug, Clone, Copy)]
pub struct NearestPoint {
    pub point: Coord,
    /// Distance from the query point to `point`, in meters.
    pub distance: f64,
    /// Index of the polyline segment the point lies on.
    pub segment: usize,
}

/// Closest point of an ordered polyline to `p`.
///
/// For each consecutive pair of path points, the foot of the perpendicular is
/// a candidate when it falls within the segment; otherwise the nearer
/// endpoint is. Ties go to the earliest segment. Returns `None` for an empty
/// path.
pub fn nearest_point(p: &Coord, path: &[Coord]) -> Option<NearestPoint> {
    if path.is_empty() {
        return None;
    }
    if path.len() == 1 {
        return Some(NearestPoint {
            point: path[0],
            distance: p.distance_to(&path[0]),
            segment: 0,
        });
    }

    let mut best: Option<NearestPoint> = None;
    for (i, pair) in path.windows(2).enumerate() {
        let (a, b) = (&pair[0], &pair[1]);
        let seg_len = a.distance_to(b);
        let along = p.along_track_distance(a, b);

        let candidate = if seg_len > 0.0 && along >= 0.0 && along <= seg_len {
            a.destination(along, a.bearing_to(b))
        } else if p.distance_to(a) <= p.distance_to(b) {
            *a
        } else {
            *b
        };

        let distance = p.distance_to(&candidate);
        if best.map_or(true, |n| distance < n.distance) {
            best = Some(NearestPoint {
                point: candidate,
                distance,
                segment: i,
            });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    // Two points a block apart in central Auckland.
    fn auckland() -> (Coord, Coord) {
        (
            Coord::new(-36.866580, 174.757195),
            Coord::new(-36.866183, 174.757773),
        )
    }

    #[test]
    fn distance_between_auckland_points() {
        let (a, b) = auckland();
        assert!((a.distance_to(&b) - 67.769).abs() < 0.0005);
    }

    #[test]
    fn bearing_between_auckland_points() {
        let (a, b) = auckland();
        assert!((a.bearing_to(&b) - 49.353).abs() < 0.001);
    }

    #[test]
    fn distance_is_symmetric() {
        let (a, b) = auckland();
        assert!((a.distance_to(&b) - b.distance_to(&a)).abs() < 0.001);
        assert_eq!(a.distance_to(&a), 0.0);
    }

    #[test]
    fn destination_reproduces_endpoint() {
        let (a, b) = auckland();
        let d = a.destination(a.distance_to(&b), a.bearing_to(&b));
        assert!(d.distance_to(&b) < 0.1);
    }

    #[test]
    fn destination_normalises_longitude() {
        let a = Coord::new(0.0, 179.9);
        let b = a.destination(50_000.0, 90.0);
        assert!(b.longitude > -180.0 && b.longitude <= 180.0);
        assert!(b.longitude < 0.0);
    }

    #[test]
    fn project_flat_matches_haversine_nearby() {
        let (a, b) = auckland();
        let (x, y) = b.project_flat(&a);
        let planar = (x * x + y * y).sqrt();
        assert!((planar - a.distance_to(&b)).abs() < 0.05);
    }

    #[test]
    fn along_track_is_negative_behind_start() {
        let a = Coord::new(-36.8, 174.7);
        let b = Coord::new(-36.8, 174.8);
        let behind = Coord::new(-36.8, 174.65);
        assert!(behind.along_track_distance(&a, &b) < 0.0);
    }

    #[test]
    fn nearest_point_prefers_interior_foot() {
        let path = [
            Coord::new(-36.80, 174.70),
            Coord::new(-36.80, 174.80),
            Coord::new(-36.70, 174.80),
        ];
        let p = Coord::new(-36.81, 174.75);
        let n = nearest_point(&p, &path).unwrap();
        assert_eq!(n.segment, 0);
        // foot should be roughly due north of the query point
        assert!((n.point.latitude - -36.80).abs() < 0.001);
        assert!((n.point.longitude - 174.75).abs() < 0.001);
    }

    #[test]
    fn nearest_point_falls_back_to_endpoint() {
        let path = [Coord::new(-36.80, 174.70), Coord::new(-36.80, 174.80)];
        let p = Coord::new(-36.80, 174.60);
        let n = nearest_point(&p, &path).unwrap();
        assert!((n.point.longitude - 174.70).abs() < 1e-9);
    }

    #[test]
    fn nearest_point_empty_path() {
        assert!(nearest_point(&Coord::new(0.0, 0.0), &[]).is_none());
    }
}
