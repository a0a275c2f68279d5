use serde::{Deserialize, Serialize};
use utility::{
    geo::Coord,
    id::{HasId, Id},
};

use crate::TimeStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntersectionKind {
    TrafficLight,
    Roundabout,
}

/// An intersection a route passes through. Carries the prior delay
/// distribution used when particles decide whether to queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intersection {
    pub id: Id<Intersection>,
    pub position: Coord,
    pub kind: IntersectionKind,
    pub delay: TimeStats,
}

impl Intersection {
    pub fn new(id: Id<Intersection>, position: Coord, kind: IntersectionKind) -> Self {
        Self {
            id,
            position,
            kind,
            delay: TimeStats::default(),
        }
    }
}

impl HasId for Intersection {
    type IdType = u64;
}
