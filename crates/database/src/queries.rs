//! Fetch queries for the schedule tables. Every query takes the optional
//! schedule-version filter, applied as the `_v<version>` id suffix.

use sqlx::SqlitePool;

use crate::{data_model::*, version_pattern, Result};

macro_rules! versioned_query {
    ($pool:expr, $version:expr, $row:ty, $base:literal, $filter:literal, $order:literal) => {{
        match $version {
            Some(v) => {
                sqlx::query_as::<_, $row>(concat!($base, " ", $filter, " ", $order))
                    .bind(version_pattern(v))
                    .fetch_all($pool)
                    .await
            }
            None => {
                sqlx::query_as::<_, $row>(concat!($base, " ", $order))
                    .fetch_all($pool)
                    .await
            }
        }
        .map_err(Into::into)
    }};
}

pub async fn stops(pool: &SqlitePool, version: Option<&str>) -> Result<Vec<StopRow>> {
    versioned_query!(
        pool,
        version,
        StopRow,
        "SELECT stop_id, lat, lng FROM stops",
        "WHERE stop_id LIKE ?",
        "ORDER BY stop_id"
    )
}

pub async fn intersections(pool: &SqlitePool) -> Result<Vec<IntersectionRow>> {
    // intersections are shared across schedule versions
    sqlx::query_as(
        "SELECT intersection_id, type, lat, lng FROM intersections ORDER BY intersection_id",
    )
    .fetch_all(pool)
    .await
    .map_err(Into::into)
}

pub async fn segments(pool: &SqlitePool) -> Result<Vec<SegmentRow>> {
    sqlx::query_as(
        "SELECT segment_id, from_id, to_id, start_at, end_at, length \
         FROM segments ORDER BY segment_id",
    )
    .fetch_all(pool)
    .await
    .map_err(Into::into)
}

pub async fn shape_points(
    pool: &SqlitePool,
    version: Option<&str>,
) -> Result<Vec<ShapePointRow>> {
    versioned_query!(
        pool,
        version,
        ShapePointRow,
        "SELECT shape_id, seq, lat, lng, dist_traveled FROM shapes",
        "WHERE shape_id LIKE ?",
        "ORDER BY shape_id, seq"
    )
}

pub async fn shape_segments(
    pool: &SqlitePool,
    version: Option<&str>,
) -> Result<Vec<ShapeSegmentRow>> {
    versioned_query!(
        pool,
        version,
        ShapeSegmentRow,
        "SELECT shape_id, leg, segment_id, shape_dist_traveled FROM shape_segments",
        "WHERE shape_id LIKE ?",
        "ORDER BY shape_id, leg"
    )
}

pub async fn routes(pool: &SqlitePool, version: Option<&str>) -> Result<Vec<RouteRow>> {
    versioned_query!(
        pool,
        version,
        RouteRow,
        "SELECT route_id, route_short_name, route_long_name, shape_id FROM routes",
        "WHERE route_id LIKE ?",
        "ORDER BY route_id"
    )
}

pub async fn trips(pool: &SqlitePool, version: Option<&str>) -> Result<Vec<TripRow>> {
    versioned_query!(
        pool,
        version,
        TripRow,
        "SELECT trip_id, route_id FROM trips",
        "WHERE trip_id LIKE ?",
        "ORDER BY trip_id"
    )
}

pub async fn stop_times(
    pool: &SqlitePool,
    version: Option<&str>,
) -> Result<Vec<StopTimeRow>> {
    versioned_query!(
        pool,
        version,
        StopTimeRow,
        "SELECT trip_id, stop_sequence, stop_id, arrival_time, departure_time, \
                shape_dist_traveled, layover FROM stop_times",
        "WHERE trip_id LIKE ?",
        "ORDER BY trip_id, stop_sequence"
    )
}

/// Persisted segment estimates from a previous run; absent table means none.
pub async fn segment_stats(pool: &SqlitePool) -> Result<Vec<StatRow>> {
    sqlx::query_as(
        "SELECT segment_id AS id, mean, variance, timestamp, n FROM segment_stats",
    )
    .fetch_all(pool)
    .await
    .map_err(Into::into)
}

pub async fn intersection_stats(pool: &SqlitePool) -> Result<Vec<StatRow>> {
    sqlx::query_as(
        "SELECT intersection_id AS id, mean, variance, timestamp, n \
         FROM intersection_stats",
    )
    .fetch_all(pool)
    .await
    .map_err(Into::into)
}
