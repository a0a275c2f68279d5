use serde::{Deserialize, Serialize};
use utility::{
    geo::Coord,
    id::{HasId, Id},
};

use crate::TimeStats;

/// A physical stop on the network.
///
/// The dwell statistics are the prior loaded with the schedule; the network
/// aggregator publishes refreshed estimates separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub id: Id<Stop>,
    pub position: Coord,
    pub dwell: TimeStats,
}

impl Stop {
    pub fn new(id: Id<Stop>, position: Coord) -> Self {
        Self {
            id,
            position,
            dwell: TimeStats::default(),
        }
    }
}

impl HasId for Stop {
    type IdType = String;
}
