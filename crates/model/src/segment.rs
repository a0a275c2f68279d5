use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{Intersection, ModelError, Stop, TimeStats};

/// One end of a segment: a stop or an intersection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentEndpoint {
    Stop(Id<Stop>),
    Intersection(Id<Intersection>),
}

impl SegmentEndpoint {
    pub fn is_intersection(&self) -> bool {
        matches!(self, Self::Intersection(_))
    }

    pub fn intersection(&self) -> Option<&Id<Intersection>> {
        match self {
            Self::Intersection(id) => Some(id),
            Self::Stop(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    IntersectionToIntersection,
    StopToIntersection,
    IntersectionToStop,
    StopToStop,
}

/// A piece of road between two stops and/or intersections, the unit over
/// which travel times are aggregated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: Id<Segment>,
    pub from: SegmentEndpoint,
    pub to: SegmentEndpoint,
    /// Length in meters, always positive.
    pub length: f64,
    /// Travel-time prior loaded with the schedule; refreshed estimates are
    /// published by the network aggregator.
    pub travel_time: TimeStats,
}

impl Segment {
    pub fn new(
        id: Id<Segment>,
        from: SegmentEndpoint,
        to: SegmentEndpoint,
        length: f64,
    ) -> Result<Self, ModelError> {
        if length <= 0.0 {
            return Err(ModelError::NonPositiveSegmentLength {
                segment: id.raw(),
                length,
            });
        }
        Ok(Self {
            id,
            from,
            to,
            length,
            travel_time: TimeStats::default(),
        })
    }

    pub fn kind(&self) -> SegmentKind {
        match (&self.from, &self.to) {
            (SegmentEndpoint::Intersection(_), SegmentEndpoint::Intersection(_)) => {
                SegmentKind::IntersectionToIntersection
            }
            (SegmentEndpoint::Stop(_), SegmentEndpoint::Intersection(_)) => {
                SegmentKind::StopToIntersection
            }
            (SegmentEndpoint::Intersection(_), SegmentEndpoint::Stop(_)) => {
                SegmentKind::IntersectionToStop
            }
            (SegmentEndpoint::Stop(_), SegmentEndpoint::Stop(_)) => {
                SegmentKind::StopToStop
            }
        }
    }

    pub fn starts_at_intersection(&self) -> bool {
        self.from.is_intersection()
    }

    pub fn ends_at_intersection(&self) -> bool {
        self.to.is_intersection()
    }
}

impl HasId for Segment {
    type IdType = u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_derived_from_endpoints() {
        let seg = Segment::new(
            Id::new(1),
            SegmentEndpoint::Stop(Id::new("a".to_owned())),
            SegmentEndpoint::Intersection(Id::new(7)),
            120.0,
        )
        .unwrap();
        assert_eq!(seg.kind(), SegmentKind::StopToIntersection);
        assert!(!seg.starts_at_intersection());
        assert!(seg.ends_at_intersection());
    }

    #[test]
    fn zero_length_is_rejected() {
        let err = Segment::new(
            Id::new(2),
            SegmentEndpoint::Stop(Id::new("a".to_owned())),
            SegmentEndpoint::Stop(Id::new("b".to_owned())),
            0.0,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::NonPositiveSegmentLength { .. }));
    }
}
