use std::{error::Error, fmt};

use chrono::{DateTime, TimeZone, Utc};
use prost::Message;
use utility::geo::Coord;

use crate::transit_realtime;

/// A decoded vehicle position report.
#[derive(Debug, Clone)]
pub struct VehicleObservation {
    pub vehicle_id: String,
    pub trip_id: Option<String>,
    pub position: Coord,
    pub timestamp: DateTime<Utc>,
}

/// A decoded stop-time update for a trip: where the vehicle last called and
/// how late it was.
#[derive(Debug, Clone)]
pub struct TripProgress {
    pub trip_id: String,
    pub vehicle_id: Option<String>,
    pub stop_sequence: Option<u32>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub departure_time: Option<DateTime<Utc>>,
    pub delay: Option<i32>,
}

#[derive(Debug, Clone)]
pub enum FeedEvent {
    Position(VehicleObservation),
    Progress(TripProgress),
}

#[derive(Debug)]
pub enum FeedError {
    Decode(prost::DecodeError),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(why) => write!(f, "feed does not decode: {}", why),
        }
    }
}

impl Error for FeedError {}

impl From<prost::DecodeError> for FeedError {
    fn from(why: prost::DecodeError) -> Self {
        Self::Decode(why)
    }
}

/// Decode a binary FeedMessage into engine events. Entities missing the
/// fields the filter needs are skipped with a debug log rather than failing
/// the whole feed.
pub fn decode_feed(bytes: &[u8]) -> Result<Vec<FeedEvent>, FeedError> {
    let message = transit_realtime::FeedMessage::decode(bytes)?;
    let header_time = message.header.timestamp;

    let mut events = Vec::with_capacity(message.entity.len());
    for entity in message.entity {
        if entity.is_deleted() {
            continue;
        }
        if let Some(vehicle) = entity.vehicle {
            match decode_position(&entity.id, vehicle, header_time) {
                Some(observation) => events.push(FeedEvent::Position(observation)),
                None => log::debug!("skipping position entity {}", entity.id),
            }
        }
        if let Some(update) = entity.trip_update {
            match decode_progress(update) {
                Some(progress) => events.push(FeedEvent::Progress(progress)),
                None => log::debug!("skipping trip update entity {}", entity.id),
            }
        }
    }
    Ok(events)
}

fn decode_position(
    entity_id: &str,
    vehicle: transit_realtime::VehiclePosition,
    header_time: Option<u64>,
) -> Option<VehicleObservation> {
    let position = vehicle.position?;
    let vehicle_id = vehicle
        .vehicle
        .and_then(|descriptor| descriptor.id)
        .unwrap_or_else(|| entity_id.to_owned());
    let timestamp = vehicle.timestamp.or(header_time)?;

    Some(VehicleObservation {
        vehicle_id,
        trip_id: vehicle.trip.and_then(|trip| trip.trip_id),
        position: Coord::new(
            position.latitude as f64,
            position.longitude as f64,
        ),
        timestamp: epoch_seconds(timestamp)?,
    })
}

fn decode_progress(update: transit_realtime::TripUpdate) -> Option<TripProgress> {
    let trip_id = update.trip.trip_id.clone()?;
    let vehicle_id = update.vehicle.and_then(|descriptor| descriptor.id);

    // the filter constrains against the most recent stop call only
    let latest = update.stop_time_update.into_iter().last();
    let (stop_sequence, arrival_time, departure_time, delay) = match latest {
        Some(stop) => {
            let arrival = stop.arrival.as_ref();
            let departure = stop.departure.as_ref();
            (
                stop.stop_sequence,
                arrival.and_then(|ev| ev.time).and_then(epoch_seconds_i64),
                departure.and_then(|ev| ev.time).and_then(epoch_seconds_i64),
                arrival.and_then(|ev| ev.delay).or(update.delay),
            )
        }
        None => (None, None, None, update.delay),
    };

    Some(TripProgress {
        trip_id,
        vehicle_id,
        stop_sequence,
        arrival_time,
        departure_time,
        delay,
    })
}

fn epoch_seconds(t: u64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(t as i64, 0).single()
}

fn epoch_seconds_i64(t: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(t, 0).single()
}
