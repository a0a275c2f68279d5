//! Raw row types, one per schedule table.

use sqlx::FromRow;

#[derive(Debug, FromRow)]
pub struct StopRow {
    pub stop_id: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, FromRow)]
pub struct IntersectionRow {
    pub intersection_id: i64,
    pub r#type: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, FromRow)]
pub struct SegmentRow {
    pub segment_id: i64,
    /// Start intersection, when the segment begins at one.
    pub from_id: Option<i64>,
    /// End intersection, when the segment ends at one.
    pub to_id: Option<i64>,
    /// Start stop, when the segment begins at one.
    pub start_at: Option<String>,
    /// End stop, when the segment ends at one.
    pub end_at: Option<String>,
    pub length: f64,
}

#[derive(Debug, FromRow)]
pub struct ShapePointRow {
    pub shape_id: String,
    pub seq: i64,
    pub lat: f64,
    pub lng: f64,
    pub dist_traveled: f64,
}

#[derive(Debug, FromRow)]
pub struct ShapeSegmentRow {
    pub shape_id: String,
    pub leg: i64,
    pub segment_id: i64,
    pub shape_dist_traveled: f64,
}

#[derive(Debug, FromRow)]
pub struct RouteRow {
    pub route_id: String,
    pub route_short_name: String,
    pub route_long_name: String,
    pub shape_id: String,
}

#[derive(Debug, FromRow)]
pub struct TripRow {
    pub trip_id: String,
    pub route_id: String,
}

#[derive(Debug, FromRow)]
pub struct StopTimeRow {
    pub trip_id: String,
    pub stop_sequence: i64,
    pub stop_id: String,
    /// "HH:MM:SS", allowed past 24:00:00 for trips crossing midnight.
    pub arrival_time: String,
    pub departure_time: String,
    pub shape_dist_traveled: Option<f64>,
    pub layover: Option<i64>,
}

/// A persisted network estimate, written back by a previous run.
#[derive(Debug, FromRow)]
pub struct StatRow {
    pub id: i64,
    pub mean: f64,
    pub variance: f64,
    pub timestamp: i64,
    pub n: i64,
}
