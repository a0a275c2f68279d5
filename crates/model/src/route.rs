use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{Shape, Stop, Trip};

/// A stop's place on a route, with how far along the shape it sits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteStop {
    pub stop_id: Id<Stop>,
    pub shape_dist_traveled: f64,
}

/// A journey pattern: a shape plus the ordered stops served along it.
///
/// Trips reference their route by id and routes list their trip ids; both
/// sides resolve through the catalogue, so there is no ownership cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Id<Route>,
    pub short_name: String,
    pub long_name: String,
    pub shape_id: Id<Shape>,
    pub stops: Vec<RouteStop>,
    pub trip_ids: Vec<Id<Trip>>,
}

impl HasId for Route {
    type IdType = String;
}
