use std::sync::Arc;

use indexmap::IndexMap;
use utility::id::Id;

use crate::{
    Intersection, ModelError, Route, Segment, Shape, Stop, Trip,
};

/// Everything the loader hands over before validation.
#[derive(Debug, Default)]
pub struct CatalogueParts {
    pub version: Option<String>,
    pub stops: Vec<Stop>,
    pub intersections: Vec<Intersection>,
    pub segments: Vec<Segment>,
    pub shapes: Vec<Shape>,
    pub routes: Vec<Route>,
    pub trips: Vec<Trip>,
}

/// The immutable, validated schedule catalogue.
///
/// Owns every entity behind an `Arc`; vehicles and particles borrow through
/// these handles and never mutate. Insertion order is preserved so iteration
/// matches the loader's ordering.
#[derive(Debug)]
pub struct Catalogue {
    version: Option<String>,
    stops: IndexMap<Id<Stop>, Arc<Stop>>,
    intersections: IndexMap<Id<Intersection>, Arc<Intersection>>,
    segments: IndexMap<Id<Segment>, Arc<Segment>>,
    shapes: IndexMap<Id<Shape>, Arc<Shape>>,
    routes: IndexMap<Id<Route>, Arc<Route>>,
    trips: IndexMap<Id<Trip>, Arc<Trip>>,
}

impl Catalogue {
    /// Assemble and validate a catalogue. Every cross-reference must resolve
    /// and every ordering invariant must hold, otherwise the schedule is
    /// refused and the engine must not start.
    pub fn assemble(parts: CatalogueParts) -> Result<Self, ModelError> {
        let stops: IndexMap<_, _> = parts
            .stops
            .into_iter()
            .map(|s| (s.id.clone(), Arc::new(s)))
            .collect();
        let intersections: IndexMap<_, _> = parts
            .intersections
            .into_iter()
            .map(|i| (i.id.clone(), Arc::new(i)))
            .collect();
        let segments: IndexMap<_, _> = parts
            .segments
            .into_iter()
            .map(|s| (s.id.clone(), Arc::new(s)))
            .collect();
        let shapes: IndexMap<_, _> = parts
            .shapes
            .into_iter()
            .map(|s| (s.id.clone(), Arc::new(s)))
            .collect();
        let routes: IndexMap<_, _> = parts
            .routes
            .into_iter()
            .map(|r| (r.id.clone(), Arc::new(r)))
            .collect();
        let trips: IndexMap<_, _> = parts
            .trips
            .into_iter()
            .map(|t| (t.id.clone(), Arc::new(t)))
            .collect();

        let catalogue = Self {
            version: parts.version,
            stops,
            intersections,
            segments,
            shapes,
            routes,
            trips,
        };
        catalogue.validate()?;
        Ok(catalogue)
    }

    fn validate(&self) -> Result<(), ModelError> {
        for segment in self.segments.values() {
            match &segment.from {
                crate::SegmentEndpoint::Stop(id) => {
                    self.require_stop(id, &format!("segment {}", segment.id))?
                }
                crate::SegmentEndpoint::Intersection(id) => {
                    self.require_intersection(id, &format!("segment {}", segment.id))?
                }
            }
            match &segment.to {
                crate::SegmentEndpoint::Stop(id) => {
                    self.require_stop(id, &format!("segment {}", segment.id))?
                }
                crate::SegmentEndpoint::Intersection(id) => {
                    self.require_intersection(id, &format!("segment {}", segment.id))?
                }
            }
        }

        for shape in self.shapes.values() {
            for leg in &shape.segments {
                if !self.segments.contains_key(&leg.segment_id) {
                    return Err(ModelError::MissingReference {
                        from: format!("shape {}", shape.id),
                        to: format!("segment {}", leg.segment_id),
                    });
                }
            }
        }

        for route in self.routes.values() {
            if !self.shapes.contains_key(&route.shape_id) {
                return Err(ModelError::MissingReference {
                    from: format!("route {}", route.id),
                    to: format!("shape {}", route.shape_id),
                });
            }
            for stop in &route.stops {
                self.require_stop(&stop.stop_id, &format!("route {}", route.id))?;
            }
            for (i, pair) in route.stops.windows(2).enumerate() {
                if pair[1].shape_dist_traveled <= pair[0].shape_dist_traveled {
                    return Err(ModelError::MisorderedRouteStops {
                        route: route.id.raw(),
                        index: i + 1,
                    });
                }
            }
            for trip_id in &route.trip_ids {
                if !self.trips.contains_key(trip_id) {
                    return Err(ModelError::MissingReference {
                        from: format!("route {}", route.id),
                        to: format!("trip {}", trip_id),
                    });
                }
            }
        }

        for trip in self.trips.values() {
            if !self.routes.contains_key(&trip.route_id) {
                return Err(ModelError::MissingReference {
                    from: format!("trip {}", trip.id),
                    to: format!("route {}", trip.route_id),
                });
            }
            for (i, stop_time) in trip.stop_times.iter().enumerate() {
                self.require_stop(&stop_time.stop_id, &format!("trip {}", trip.id))?;
                if stop_time.departure < stop_time.arrival {
                    return Err(ModelError::DepartureBeforeArrival {
                        trip: trip.id.raw(),
                        stop_sequence: i,
                    });
                }
            }
        }

        Ok(())
    }

    fn require_stop(&self, id: &Id<Stop>, from: &str) -> Result<(), ModelError> {
        if self.stops.contains_key(id) {
            Ok(())
        } else {
            Err(ModelError::MissingReference {
                from: from.to_owned(),
                to: format!("stop {}", id),
            })
        }
    }

    fn require_intersection(
        &self,
        id: &Id<Intersection>,
        from: &str,
    ) -> Result<(), ModelError> {
        if self.intersections.contains_key(id) {
            Ok(())
        } else {
            Err(ModelError::MissingReference {
                from: from.to_owned(),
                to: format!("intersection {}", id),
            })
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    // --- by-id lookup

    pub fn stop(&self, id: &Id<Stop>) -> Option<Arc<Stop>> {
        self.stops.get(id).cloned()
    }

    pub fn intersection(&self, id: &Id<Intersection>) -> Option<Arc<Intersection>> {
        self.intersections.get(id).cloned()
    }

    pub fn segment(&self, id: &Id<Segment>) -> Option<Arc<Segment>> {
        self.segments.get(id).cloned()
    }

    pub fn shape(&self, id: &Id<Shape>) -> Option<Arc<Shape>> {
        self.shapes.get(id).cloned()
    }

    pub fn route(&self, id: &Id<Route>) -> Option<Arc<Route>> {
        self.routes.get(id).cloned()
    }

    pub fn trip(&self, id: &Id<Trip>) -> Option<Arc<Trip>> {
        self.trips.get(id).cloned()
    }

    // --- iteration

    pub fn stops(&self) -> impl Iterator<Item = &Arc<Stop>> {
        self.stops.values()
    }

    pub fn intersections(&self) -> impl Iterator<Item = &Arc<Intersection>> {
        self.intersections.values()
    }

    pub fn segments(&self) -> impl Iterator<Item = &Arc<Segment>> {
        self.segments.values()
    }

    pub fn shapes(&self) -> impl Iterator<Item = &Arc<Shape>> {
        self.shapes.values()
    }

    pub fn routes(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.values()
    }

    pub fn trips(&self) -> impl Iterator<Item = &Arc<Trip>> {
        self.trips.values()
    }

    // --- cross-reference resolution

    pub fn trip_route(&self, trip_id: &Id<Trip>) -> Option<Arc<Route>> {
        let trip = self.trips.get(trip_id)?;
        self.route(&trip.route_id)
    }

    pub fn trip_shape(&self, trip_id: &Id<Trip>) -> Option<Arc<Shape>> {
        let route = self.trip_route(trip_id)?;
        self.shape(&route.shape_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use utility::geo::Coord;

    use super::*;
    use crate::{RouteStop, ShapePt, StopTime};

    fn minimal_parts() -> CatalogueParts {
        let shape = Shape::new(
            Id::new("sh".to_owned()),
            vec![
                ShapePt {
                    position: Coord::new(-36.9, 174.7),
                    dist_traveled: 0.0,
                },
                ShapePt {
                    position: Coord::new(-36.9, 174.71),
                    dist_traveled: 890.0,
                },
            ],
            vec![],
        )
        .unwrap();
        CatalogueParts {
            version: None,
            stops: vec![
                Stop::new(Id::new("stop-a".to_owned()), Coord::new(-36.9, 174.7)),
                Stop::new(Id::new("stop-b".to_owned()), Coord::new(-36.9, 174.71)),
            ],
            intersections: vec![],
            segments: vec![],
            shapes: vec![shape],
            routes: vec![Route {
                id: Id::new("r1".to_owned()),
                short_name: "10".to_owned(),
                long_name: "A to B".to_owned(),
                shape_id: Id::new("sh".to_owned()),
                stops: vec![
                    RouteStop {
                        stop_id: Id::new("stop-a".to_owned()),
                        shape_dist_traveled: 0.0,
                    },
                    RouteStop {
                        stop_id: Id::new("stop-b".to_owned()),
                        shape_dist_traveled: 890.0,
                    },
                ],
                trip_ids: vec![Id::new("t1".to_owned())],
            }],
            trips: vec![Trip {
                id: Id::new("t1".to_owned()),
                route_id: Id::new("r1".to_owned()),
                stop_times: vec![StopTime {
                    stop_id: Id::new("stop-a".to_owned()),
                    arrival: Duration::seconds(6 * 3600),
                    departure: Duration::seconds(6 * 3600 + 30),
                    layover: false,
                }],
            }],
        }
    }

    #[test]
    fn assemble_resolves_cross_references() {
        let catalogue = Catalogue::assemble(minimal_parts()).unwrap();
        let shape = catalogue.trip_shape(&Id::new("t1".to_owned())).unwrap();
        assert_eq!(shape.id.raw(), "sh");
        assert_eq!(catalogue.stops().count(), 2);
    }

    #[test]
    fn missing_shape_reference_refuses_assembly() {
        let mut parts = minimal_parts();
        parts.shapes.clear();
        let err = Catalogue::assemble(parts).unwrap_err();
        assert!(matches!(err, ModelError::MissingReference { .. }));
    }

    #[test]
    fn misordered_route_stops_refuse_assembly() {
        let mut parts = minimal_parts();
        parts.routes[0].stops[1].shape_dist_traveled = 0.0;
        let err = Catalogue::assemble(parts).unwrap_err();
        assert!(matches!(err, ModelError::MisorderedRouteStops { .. }));
    }

    #[test]
    fn departure_before_arrival_refuses_assembly() {
        let mut parts = minimal_parts();
        parts.trips[0].stop_times[0].departure = Duration::seconds(0);
        let err = Catalogue::assemble(parts).unwrap_err();
        assert!(matches!(err, ModelError::DepartureBeforeArrival { .. }));
    }
}
