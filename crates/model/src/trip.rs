use chrono::Duration;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{Route, Stop};

/// A scheduled call at a stop.
///
/// Times are durations since midnight because GTFS allows values past
/// 24:00:00 for trips running over the date boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopTime {
    pub stop_id: Id<Stop>,
    #[serde(with = "seconds")]
    pub arrival: Duration,
    #[serde(with = "seconds")]
    pub departure: Duration,
    /// At a layover the vehicle waits for the scheduled departure time.
    pub layover: bool,
}

/// An instance of a route run at a specific time of day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Id<Trip>,
    pub route_id: Id<Route>,
    pub stop_times: Vec<StopTime>,
}

impl HasId for Trip {
    type IdType = String;
}

mod seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        i64::deserialize(d).map(Duration::seconds)
    }
}
