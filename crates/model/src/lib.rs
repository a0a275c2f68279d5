//! Static schedule model: the immutable catalogue of stops, intersections,
//! segments, shapes, routes and trips the realtime filter runs against.
//!
//! Entities reference each other by id and are resolved through the
//! [`catalogue::Catalogue`], which validates all structural invariants once
//! at load time. After that the catalogue is shared read-only.

use std::{error::Error, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod catalogue;
pub mod intersection;
pub mod route;
pub mod segment;
pub mod shape;
pub mod stop;
pub mod trip;

pub use catalogue::Catalogue;
pub use intersection::{Intersection, IntersectionKind};
pub use route::{Route, RouteStop};
pub use segment::{Segment, SegmentEndpoint, SegmentKind};
pub use shape::{Shape, ShapePt, ShapeSegment};
pub use stop::Stop;
pub use trip::{StopTime, Trip};

/// Running mean/variance of a duration quantity (dwell, delay or travel
/// time), with the time it was last refreshed and the number of samples
/// behind it. Catalogue entities carry these as load-time priors; live
/// values are published by the network aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeStats {
    pub mean: f64,
    pub variance: f64,
    pub updated: Option<DateTime<Utc>>,
    pub count: u64,
}

impl TimeStats {
    pub fn new(mean: f64, variance: f64) -> Result<Self, ModelError> {
        if variance < 0.0 {
            return Err(ModelError::NegativeVariance { variance });
        }
        Ok(Self {
            mean,
            variance,
            updated: None,
            count: 0,
        })
    }

    /// True once at least one observed sample has contributed.
    pub fn is_informed(&self) -> bool {
        self.count > 0
    }
}

impl Default for TimeStats {
    fn default() -> Self {
        Self {
            mean: 0.0,
            variance: 0.0,
            updated: None,
            count: 0,
        }
    }
}

/// A structural defect in the loaded schedule. Any of these refuses startup;
/// the filter never runs against a malformed catalogue.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    EmptyShapePath { shape: String },
    NonMonotoneShapePath { shape: String, index: usize },
    MisorderedShapeSegments { shape: String, leg: usize },
    MisorderedRouteStops { route: String, index: usize },
    NonPositiveSegmentLength { segment: u64, length: f64 },
    NegativeVariance { variance: f64 },
    DepartureBeforeArrival { trip: String, stop_sequence: usize },
    MissingReference { from: String, to: String },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyShapePath { shape } => {
                write!(f, "shape {} has an empty path", shape)
            }
            Self::NonMonotoneShapePath { shape, index } => write!(
                f,
                "shape {} path distance decreases at point {}",
                shape, index
            ),
            Self::MisorderedShapeSegments { shape, leg } => write!(
                f,
                "shape {} segment distances not strictly increasing at leg {}",
                shape, leg
            ),
            Self::MisorderedRouteStops { route, index } => write!(
                f,
                "route {} stop distances not strictly increasing at stop {}",
                route, index
            ),
            Self::NonPositiveSegmentLength { segment, length } => {
                write!(f, "segment {} has non-positive length {}", segment, length)
            }
            Self::NegativeVariance { variance } => {
                write!(f, "variance {} is negative", variance)
            }
            Self::DepartureBeforeArrival {
                trip,
                stop_sequence,
            } => write!(
                f,
                "trip {} departs before it arrives at stop {}",
                trip, stop_sequence
            ),
            Self::MissingReference { from, to } => {
                write!(f, "{} references missing {}", from, to)
            }
        }
    }
}

impl Error for ModelError {}
