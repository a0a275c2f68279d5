//! GTFS-Realtime boundary: protobuf decoding of the feed and the poller
//! that forwards decoded events to the filter fleet.

pub mod feed;
pub mod realtime;

/// Generated GTFS-Realtime message types.
pub mod transit_realtime {
    include!(concat!(env!("OUT_DIR"), "/protobuf/transit_realtime.rs"));
}
