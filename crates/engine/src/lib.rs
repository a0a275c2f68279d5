//! The realtime estimation engine: per-vehicle particle filters over the
//! schedule catalogue, and the network-level travel-time aggregation their
//! transition model feeds from.

pub mod config;
pub mod fleet;
pub mod network;
pub mod particle;
pub mod vehicle;

pub use config::FilterConfig;
pub use fleet::Fleet;
pub use network::{Aggregator, NetworkSnapshot, NetworkSubmission};
pub use particle::Particle;
pub use vehicle::{ObservationOutcome, Phase, Vehicle};
