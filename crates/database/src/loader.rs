//! Assembles the validated catalogue from the schedule tables, resolving all
//! cross-references before the filter is allowed to start.

use std::collections::HashMap;

use chrono::{Duration, TimeZone, Utc};
use model::{
    Catalogue, Intersection, IntersectionKind, Route, RouteStop, Segment,
    SegmentEndpoint, Shape, ShapePt, ShapeSegment, Stop, StopTime, Trip,
};
use model::catalogue::CatalogueParts;
use sqlx::SqlitePool;
use utility::{geo::Coord, id::Id};

use crate::{data_model::*, queries, DatabaseError, Result};

/// Load one schedule version (or the whole store) into a catalogue.
pub async fn load_catalogue(
    pool: &SqlitePool,
    version: Option<&str>,
) -> Result<Catalogue> {
    let stops = queries::stops(pool, version).await?;
    let intersections = queries::intersections(pool).await?;
    let segments = queries::segments(pool).await?;
    let shape_points = queries::shape_points(pool, version).await?;
    let shape_segments = queries::shape_segments(pool, version).await?;
    let routes = queries::routes(pool, version).await?;
    let trips = queries::trips(pool, version).await?;
    let stop_times = queries::stop_times(pool, version).await?;

    log::info!(
        "loaded {} stops, {} intersections, {} segments, {} routes, {} trips",
        stops.len(),
        intersections.len(),
        segments.len(),
        routes.len(),
        trips.len()
    );

    let shapes = assemble_shapes(shape_points, shape_segments)?;
    let stops: Vec<Stop> = stops.into_iter().map(stop_from_row).collect();
    let mut intersections = intersections
        .into_iter()
        .map(intersection_from_row)
        .collect::<Result<Vec<_>>>()?;
    let mut segments = segments
        .into_iter()
        .map(segment_from_row)
        .collect::<Result<Vec<_>>>()?;
    apply_persisted_stats(pool, &mut intersections, &mut segments).await?;

    let mut stop_times_by_trip: HashMap<String, Vec<StopTimeRow>> = HashMap::new();
    for row in stop_times {
        stop_times_by_trip
            .entry(row.trip_id.clone())
            .or_default()
            .push(row);
    }

    let mut trip_ids_by_route: HashMap<String, Vec<Id<Trip>>> = HashMap::new();
    let trips = trips
        .into_iter()
        .map(|row| {
            trip_ids_by_route
                .entry(row.route_id.clone())
                .or_default()
                .push(Id::new(row.trip_id.clone()));
            trip_from_row(row, &stop_times_by_trip)
        })
        .collect::<Result<Vec<_>>>()?;

    let stop_positions: HashMap<&str, Coord> = stops
        .iter()
        .map(|stop| (stop.id.raw_ref::<str>(), stop.position))
        .collect();
    let shapes_by_id: HashMap<&str, &Shape> = shapes
        .iter()
        .map(|shape| (shape.id.raw_ref::<str>(), shape))
        .collect();

    let routes = routes
        .into_iter()
        .map(|row| {
            route_from_row(
                row,
                &mut trip_ids_by_route,
                &stop_times_by_trip,
                &stop_positions,
                &shapes_by_id,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let parts = CatalogueParts {
        version: version.map(str::to_owned),
        stops,
        intersections,
        segments,
        shapes,
        routes,
        trips,
    };
    Catalogue::assemble(parts).map_err(Into::into)
}

fn stop_from_row(row: StopRow) -> Stop {
    Stop::new(Id::new(row.stop_id), Coord::new(row.lat, row.lng))
}

/// Fold estimates persisted by a previous run back in as priors. Missing
/// stats tables just mean a first run.
async fn apply_persisted_stats(
    pool: &SqlitePool,
    intersections: &mut [Intersection],
    segments: &mut [Segment],
) -> Result<()> {
    let intersection_stats = match queries::intersection_stats(pool).await {
        Ok(rows) => rows,
        Err(why) => {
            log::debug!("no persisted intersection stats: {}", why);
            Vec::new()
        }
    };
    let stats_by_id: HashMap<i64, StatRow> = intersection_stats
        .into_iter()
        .map(|row| (row.id, row))
        .collect();
    for intersection in intersections.iter_mut() {
        if let Some(row) = stats_by_id.get(&(intersection.id.raw() as i64)) {
            intersection.delay = stats_from_row(row)?;
        }
    }

    let segment_stats = match queries::segment_stats(pool).await {
        Ok(rows) => rows,
        Err(why) => {
            log::debug!("no persisted segment stats: {}", why);
            Vec::new()
        }
    };
    let stats_by_id: HashMap<i64, StatRow> = segment_stats
        .into_iter()
        .map(|row| (row.id, row))
        .collect();
    for segment in segments.iter_mut() {
        if let Some(row) = stats_by_id.get(&(segment.id.raw() as i64)) {
            segment.travel_time = stats_from_row(row)?;
        }
    }
    Ok(())
}

/// A negative persisted variance is a programming invariant violation and
/// refuses startup.
fn stats_from_row(row: &StatRow) -> Result<model::TimeStats> {
    let mut stats = model::TimeStats::new(row.mean, row.variance)?;
    stats.updated = Utc.timestamp_opt(row.timestamp, 0).single();
    stats.count = row.n.max(0) as u64;
    Ok(stats)
}

fn intersection_from_row(row: IntersectionRow) -> Result<Intersection> {
    let kind = match row.r#type.as_str() {
        "traffic_light" => IntersectionKind::TrafficLight,
        "roundabout" => IntersectionKind::Roundabout,
        other => {
            return Err(DatabaseError::Malformed {
                table: "intersections",
                detail: format!(
                    "intersection {} has unknown type '{}'",
                    row.intersection_id, other
                ),
            })
        }
    };
    Ok(Intersection::new(
        Id::new(row.intersection_id as u64),
        Coord::new(row.lat, row.lng),
        kind,
    ))
}

fn segment_from_row(row: SegmentRow) -> Result<Segment> {
    // A segment starts at an intersection or at a stop, never both.
    let from = endpoint(row.from_id, row.start_at, "segments", row.segment_id)?;
    let to = endpoint(row.to_id, row.end_at, "segments", row.segment_id)?;
    Segment::new(Id::new(row.segment_id as u64), from, to, row.length)
        .map_err(Into::into)
}

fn endpoint(
    intersection: Option<i64>,
    stop: Option<String>,
    table: &'static str,
    segment_id: i64,
) -> Result<SegmentEndpoint> {
    match (intersection, stop) {
        (Some(id), None) => Ok(SegmentEndpoint::Intersection(Id::new(id as u64))),
        (None, Some(id)) => Ok(SegmentEndpoint::Stop(Id::new(id))),
        _ => Err(DatabaseError::Malformed {
            table,
            detail: format!(
                "segment {} must have exactly one endpoint per side",
                segment_id
            ),
        }),
    }
}

fn assemble_shapes(
    points: Vec<ShapePointRow>,
    segments: Vec<ShapeSegmentRow>,
) -> Result<Vec<Shape>> {
    let mut paths: HashMap<String, Vec<ShapePt>> = HashMap::new();
    // rows arrive ordered by (shape_id, seq)
    for row in points {
        paths.entry(row.shape_id).or_default().push(ShapePt {
            position: Coord::new(row.lat, row.lng),
            dist_traveled: row.dist_traveled,
        });
    }

    let mut legs: HashMap<String, Vec<ShapeSegment>> = HashMap::new();
    for row in segments {
        legs.entry(row.shape_id).or_default().push(ShapeSegment {
            segment_id: Id::new(row.segment_id as u64),
            shape_dist_traveled: row.shape_dist_traveled,
        });
    }

    let mut shapes: Vec<(String, Vec<ShapePt>)> = paths.into_iter().collect();
    shapes.sort_by(|a, b| a.0.cmp(&b.0));
    shapes
        .into_iter()
        .map(|(shape_id, path)| {
            let segments = legs.remove(&shape_id).unwrap_or_default();
            Shape::new(Id::new(shape_id), path, segments).map_err(Into::into)
        })
        .collect()
}

fn trip_from_row(
    row: TripRow,
    stop_times: &HashMap<String, Vec<StopTimeRow>>,
) -> Result<Trip> {
    let mut times = Vec::new();
    if let Some(rows) = stop_times.get(&row.trip_id) {
        times.reserve(rows.len());
        for st in rows {
            times.push(StopTime {
                stop_id: Id::new(st.stop_id.clone()),
                arrival: parse_gtfs_time(&st.arrival_time)?,
                departure: parse_gtfs_time(&st.departure_time)?,
                layover: st.layover.unwrap_or(0) != 0,
            });
        }
    }
    Ok(Trip {
        id: Id::new(row.trip_id),
        route_id: Id::new(row.route_id),
        stop_times: times,
    })
}

fn route_from_row(
    row: RouteRow,
    trip_ids_by_route: &mut HashMap<String, Vec<Id<Trip>>>,
    stop_times_by_trip: &HashMap<String, Vec<StopTimeRow>>,
    stop_positions: &HashMap<&str, Coord>,
    shapes_by_id: &HashMap<&str, &Shape>,
) -> Result<Route> {
    let trip_ids = trip_ids_by_route.remove(&row.route_id).unwrap_or_default();

    // Route stops come from a representative trip. The stored distance is
    // preferred; without one the stop is projected onto the route's shape.
    let mut stops = Vec::new();
    if let Some(first_trip) = trip_ids.first() {
        if let Some(rows) = stop_times_by_trip.get(first_trip.raw_ref::<str>()) {
            let shape = shapes_by_id.get(row.shape_id.as_str());
            stops.reserve(rows.len());
            for st in rows {
                let dist = match (st.shape_dist_traveled, shape) {
                    (Some(dist), _) => dist,
                    (None, Some(shape)) => {
                        let position = stop_positions
                            .get(st.stop_id.as_str())
                            .ok_or_else(|| DatabaseError::Malformed {
                                table: "stop_times",
                                detail: format!(
                                    "trip {} references unknown stop {}",
                                    st.trip_id, st.stop_id
                                ),
                            })?;
                        shape.project(position).distance
                    }
                    (None, None) => {
                        return Err(DatabaseError::Malformed {
                            table: "stop_times",
                            detail: format!(
                                "no distance for stop {} and no shape {} to project on",
                                st.stop_id, row.shape_id
                            ),
                        })
                    }
                };
                stops.push(RouteStop {
                    stop_id: Id::new(st.stop_id.clone()),
                    shape_dist_traveled: dist,
                });
            }
        }
    }

    Ok(Route {
        id: Id::new(row.route_id),
        short_name: row.route_short_name,
        long_name: row.route_long_name,
        shape_id: Id::new(row.shape_id),
        stops,
        trip_ids,
    })
}

/// Parse a GTFS "HH:MM:SS" time into a duration since midnight. Hours past
/// 24 are valid for trips running over the date boundary.
fn parse_gtfs_time(text: &str) -> Result<Duration> {
    let malformed = || DatabaseError::Malformed {
        table: "stop_times",
        detail: format!("bad time '{}'", text),
    };
    let mut parts = text.split(':');
    let hours: i64 = parts
        .next()
        .and_then(|p| p.trim().parse().ok())
        .ok_or_else(malformed)?;
    let minutes: i64 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(malformed)?;
    let seconds: i64 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(malformed)?;
    if parts.next().is_some()
        || hours < 0
        || !(0..60).contains(&minutes)
        || !(0..60).contains(&seconds)
    {
        return Err(malformed());
    }
    Ok(Duration::seconds(hours * 3600 + minutes * 60 + seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_times_past_midnight() {
        assert_eq!(
            parse_gtfs_time("26:15:30").unwrap().num_seconds(),
            26 * 3600 + 15 * 60 + 30
        );
        assert_eq!(parse_gtfs_time("06:05:00").unwrap().num_seconds(), 21_900);
    }

    #[test]
    fn rejects_malformed_times() {
        assert!(parse_gtfs_time("6:70:00").is_err());
        assert!(parse_gtfs_time("six am").is_err());
        assert!(parse_gtfs_time("06:05").is_err());
        assert!(parse_gtfs_time("06:05:00:00").is_err());
    }

    #[test]
    fn endpoint_requires_exactly_one_side() {
        assert!(endpoint(Some(3), None, "segments", 1).is_ok());
        assert!(endpoint(None, Some("s".to_owned()), "segments", 1).is_ok());
        assert!(endpoint(None, None, "segments", 1).is_err());
        assert!(endpoint(Some(3), Some("s".to_owned()), "segments", 1).is_err());
    }
}
