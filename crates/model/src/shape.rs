use serde::{Deserialize, Serialize};
use utility::{
    geo::{self, Coord},
    id::{HasId, Id},
};

use crate::{ModelError, Segment};

/// A point along a shape's path with its cumulative distance from the start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShapePt {
    pub position: Coord,
    pub dist_traveled: f64,
}

/// Assignment of a segment to a shape: the leg order is the vector order,
/// and `shape_dist_traveled` is where along the shape the segment begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeSegment {
    pub segment_id: Id<Segment>,
    pub shape_dist_traveled: f64,
}

/// The polyline a trip follows, annotated with cumulative distance and the
/// segments it is divided into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shape {
    pub id: Id<Shape>,
    pub path: Vec<ShapePt>,
    pub segments: Vec<ShapeSegment>,
}

/// Result of projecting a GPS fix onto a shape.
#[derive(Debug, Clone, Copy)]
pub struct ShapeProjection {
    /// Distance along the shape of the closest on-path point, in meters.
    pub distance: f64,
    /// Distance from the fix to that point, in meters.
    pub offset: f64,
}

impl Shape {
    pub fn new(
        id: Id<Shape>,
        path: Vec<ShapePt>,
        segments: Vec<ShapeSegment>,
    ) -> Result<Self, ModelError> {
        let shape = Self { id, path, segments };
        shape.validate()?;
        Ok(shape)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.path.is_empty() {
            return Err(ModelError::EmptyShapePath {
                shape: self.id.raw(),
            });
        }
        for (i, pair) in self.path.windows(2).enumerate() {
            if pair[1].dist_traveled < pair[0].dist_traveled {
                return Err(ModelError::NonMonotoneShapePath {
                    shape: self.id.raw(),
                    index: i + 1,
                });
            }
        }
        if let Some(first) = self.segments.first() {
            if first.shape_dist_traveled != 0.0 {
                return Err(ModelError::MisorderedShapeSegments {
                    shape: self.id.raw(),
                    leg: 0,
                });
            }
        }
        for (leg, pair) in self.segments.windows(2).enumerate() {
            if pair[1].shape_dist_traveled <= pair[0].shape_dist_traveled {
                return Err(ModelError::MisorderedShapeSegments {
                    shape: self.id.raw(),
                    leg: leg + 1,
                });
            }
        }
        Ok(())
    }

    /// Total length of the shape, in meters.
    pub fn length(&self) -> f64 {
        self.path.last().map(|pt| pt.dist_traveled).unwrap_or(0.0)
    }

    /// The coordinate `distance` meters along the path, linearly interpolated
    /// between the two bracketing shape points. Clamped to the path ends.
    pub fn point_at(&self, distance: f64) -> Coord {
        let first = &self.path[0];
        if distance <= first.dist_traveled {
            return first.position;
        }
        let last = self.path.last().expect("path is non-empty");
        if distance >= last.dist_traveled {
            return last.position;
        }

        // index of the first point beyond `distance`
        let after = self
            .path
            .partition_point(|pt| pt.dist_traveled <= distance);
        let a = &self.path[after - 1];
        let b = &self.path[after];
        let into = distance - a.dist_traveled;
        if into == 0.0 || b.dist_traveled == a.dist_traveled {
            return a.position;
        }
        a.position
            .destination(into, a.position.bearing_to(&b.position))
    }

    /// Project a GPS fix onto the shape, returning the distance along the
    /// path of the nearest on-path point and the offset to it.
    pub fn project(&self, p: &Coord) -> ShapeProjection {
        let coords: Vec<Coord> = self.path.iter().map(|pt| pt.position).collect();
        let nearest = geo::nearest_point(p, &coords).expect("path is non-empty");
        let base = &self.path[nearest.segment];
        let distance = base.dist_traveled + base.position.distance_to(&nearest.point);
        ShapeProjection {
            distance: distance.min(self.length()),
            offset: nearest.distance,
        }
    }

    /// Index of the shape segment containing `distance`, i.e. the last leg
    /// beginning at or before it.
    pub fn segment_index_at(&self, distance: f64) -> Option<usize> {
        if self.segments.is_empty() {
            return None;
        }
        let after = self
            .segments
            .partition_point(|s| s.shape_dist_traveled <= distance);
        Some(after.saturating_sub(1))
    }
}

impl HasId for Shape {
    type IdType = String;
}
