//! The fleet: one supervised actor per vehicle, fed from the realtime feed.
//!
//! Vehicles are created on first sighting, process their own observations
//! strictly in order, and are purged when their trip ends or they go quiet.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use gtfs::realtime::{FeedEvent, TripProgress, VehicleObservation};
use model::Catalogue;
use tokio::sync::{mpsc, watch};

use crate::{
    config::FilterConfig,
    network::{NetworkSnapshot, NetworkSubmission},
    vehicle::{ObservationOutcome, Vehicle},
};

/// A vehicle's particle population at one instant.
#[derive(Debug, Clone)]
pub struct ParticleSnapshot {
    pub vehicle_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// `(distance, velocity, log_likelihood)` rows.
    pub states: Vec<(f64, f64, f64)>,
}

/// The actor wrapping one vehicle's filter.
pub struct VehicleActor {
    vehicle: Vehicle,
    submissions: mpsc::Sender<NetworkSubmission>,
}

impl actors::actor::Actor for VehicleActor {
    // the default Restart strategy rebuilds a fresh filter from the factory,
    // which is exactly the reset semantics hard errors call for
}

pub struct PositionMsg(pub VehicleObservation);

impl actors::Message for PositionMsg {
    type Response = ();
}

pub struct ProgressMsg(pub TripProgress);

impl actors::Message for ProgressMsg {
    type Response = ();
}

pub struct SnapshotMsg;

impl actors::Message for SnapshotMsg {
    type Response = ParticleSnapshot;
}

#[async_trait]
impl actors::Handler<PositionMsg> for VehicleActor {
    async fn handle(&mut self, message: PositionMsg) {
        let outcome = self.vehicle.handle_position(&message.0);
        match outcome {
            ObservationOutcome::Updated { submission, ess, resampled } => {
                log::debug!(
                    "vehicle {}: updated, ess {:.1}, resampled {}",
                    self.vehicle.id(),
                    ess,
                    resampled
                );
                if let Some(submission) = submission {
                    self.submit(submission).await;
                }
            }
            ObservationOutcome::Completed { submission } => {
                if let Some(submission) = submission {
                    self.submit(submission).await;
                }
            }
            ObservationOutcome::Progressed(phase) => {
                log::debug!("vehicle {}: now {:?}", self.vehicle.id(), phase);
            }
            ObservationOutcome::Dropped(reason) => {
                log::debug!(
                    "vehicle {}: observation dropped ({:?})",
                    self.vehicle.id(),
                    reason
                );
            }
            ObservationOutcome::Reset(reason) => {
                log::info!("vehicle {}: reset ({:?})", self.vehicle.id(), reason);
            }
        }
    }
}

#[async_trait]
impl actors::Handler<ProgressMsg> for VehicleActor {
    async fn handle(&mut self, message: ProgressMsg) {
        self.vehicle.handle_progress(&message.0);
    }
}

#[async_trait]
impl actors::Handler<SnapshotMsg> for VehicleActor {
    async fn handle(&mut self, _message: SnapshotMsg) -> ParticleSnapshot {
        ParticleSnapshot {
            vehicle_id: self.vehicle.id().to_owned(),
            timestamp: self.vehicle.last_seen(),
            states: self.vehicle.particle_states(),
        }
    }
}

impl VehicleActor {
    async fn submit(&self, submission: NetworkSubmission) {
        if self.submissions.send(submission).await.is_err() {
            log::warn!(
                "vehicle {}: aggregator gone, dropping submission",
                self.vehicle.id()
            );
        }
    }
}

struct VehicleEntry {
    actor: actors::Ref<VehicleActor>,
    task: tokio::task::JoinHandle<()>,
    last_seen: DateTime<Utc>,
}

/// Registry and router for every live vehicle filter.
pub struct Fleet {
    catalogue: Arc<Catalogue>,
    config: Arc<FilterConfig>,
    network: watch::Receiver<Arc<NetworkSnapshot>>,
    submissions: mpsc::Sender<NetworkSubmission>,
    seed_base: u64,
    vehicles: HashMap<String, VehicleEntry>,
    /// Which vehicle was last seen on which trip, for routing trip updates
    /// that carry no vehicle descriptor.
    by_trip: HashMap<String, String>,
}

impl Fleet {
    pub fn new(
        catalogue: Arc<Catalogue>,
        config: Arc<FilterConfig>,
        network: watch::Receiver<Arc<NetworkSnapshot>>,
        submissions: mpsc::Sender<NetworkSubmission>,
    ) -> Self {
        let seed_base = config.seed.unwrap_or_else(rand_seed);
        Self {
            catalogue,
            config,
            network,
            submissions,
            seed_base,
            vehicles: HashMap::new(),
            by_trip: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Route one decoded feed event to its vehicle actor, creating the actor
    /// on first sighting.
    pub fn dispatch(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Position(observation) => {
                if let Some(trip_id) = &observation.trip_id {
                    self.by_trip
                        .insert(trip_id.clone(), observation.vehicle_id.clone());
                }
                let timestamp = observation.timestamp;
                let entry = self.entry(observation.vehicle_id.clone());
                entry.last_seen = entry.last_seen.max(timestamp);
                if let Ok(actors::Delivery::EvictedOldest) =
                    entry.actor.tell(PositionMsg(observation))
                {
                    log::debug!("a stale buffered observation was evicted");
                }
            }
            FeedEvent::Progress(progress) => {
                let vehicle_id = progress
                    .vehicle_id
                    .clone()
                    .or_else(|| self.by_trip.get(&progress.trip_id).cloned());
                let Some(vehicle_id) = vehicle_id else {
                    log::debug!(
                        "no vehicle known for trip {}, ignoring trip update",
                        progress.trip_id
                    );
                    return;
                };
                let entry = self.entry(vehicle_id);
                let _ = entry.actor.tell(ProgressMsg(progress));
            }
        }
    }

    fn entry(&mut self, vehicle_id: String) -> &mut VehicleEntry {
        if !self.vehicles.contains_key(&vehicle_id) {
            let entry = self.spawn(&vehicle_id);
            log::info!("vehicle {} sighted, filter created", vehicle_id);
            self.vehicles.insert(vehicle_id.clone(), entry);
        }
        self.vehicles.get_mut(&vehicle_id).expect("just inserted")
    }

    fn spawn(&self, vehicle_id: &str) -> VehicleEntry {
        let catalogue = self.catalogue.clone();
        let config = self.config.clone();
        let network = self.network.clone();
        let submissions = self.submissions.clone();
        let seed = self.seed_base ^ fnv1a(vehicle_id.as_bytes());
        let id = vehicle_id.to_owned();

        let (actor, task) = actors::run(self.config.mailbox_capacity, move || {
            VehicleActor {
                vehicle: Vehicle::new(
                    id.clone(),
                    catalogue.clone(),
                    network.clone(),
                    config.clone(),
                    seed,
                ),
                submissions: submissions.clone(),
            }
        });
        VehicleEntry {
            actor,
            task,
            last_seen: Utc::now(),
        }
    }

    /// Tear down vehicles that have not been observed for the configured
    /// timeout. Their pending queues are drained and dropped.
    pub fn purge_idle(&mut self, now: DateTime<Utc>) {
        let timeout = Duration::seconds(self.config.purge_timeout_secs);
        let stale: Vec<String> = self
            .vehicles
            .iter()
            .filter(|(_, entry)| now - entry.last_seen > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for vehicle_id in stale {
            if let Some(entry) = self.vehicles.remove(&vehicle_id) {
                log::info!("vehicle {} idle, purging", vehicle_id);
                entry.actor.stop();
                entry.task.abort();
            }
        }
        let vehicles = &self.vehicles;
        self.by_trip
            .retain(|_, vehicle_id| vehicles.contains_key(vehicle_id));
    }

    /// Ask every live vehicle for its particle population.
    pub async fn particle_snapshots(&self) -> Vec<ParticleSnapshot> {
        let mut snapshots = Vec::with_capacity(self.vehicles.len());
        for entry in self.vehicles.values() {
            if let Ok(snapshot) = entry.actor.ask(SnapshotMsg).await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    /// Close every mailbox and wait for in-flight updates to finish.
    pub async fn shutdown(self) {
        for entry in self.vehicles.values() {
            entry.actor.stop();
        }
        for (vehicle_id, entry) in self.vehicles {
            if entry.task.await.is_err() {
                log::warn!("vehicle {} worker ended abnormally", vehicle_id);
            }
        }
        log::info!("fleet drained");
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn rand_seed() -> u64 {
    // derived from the clock; good enough when no replay seed is configured
    Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64
}

#[cfg(test)]
mod tests {
    use model::catalogue::CatalogueParts;
    use model::{Route, RouteStop, Shape, ShapePt, Stop};
    use utility::geo::Coord;
    use utility::id::Id;

    use super::*;
    use crate::network;

    fn catalogue() -> Arc<Catalogue> {
        let origin = Coord::new(-36.9, 174.7);
        let mut path = Vec::new();
        let mut prev = origin;
        let mut dist = 0.0;
        for i in 0..11 {
            let position = origin.destination(100.0 * i as f64, 90.0);
            dist += prev.distance_to(&position);
            path.push(ShapePt {
                position,
                dist_traveled: dist,
            });
            prev = position;
        }
        let length = path.last().unwrap().dist_traveled;
        let shape = Shape::new(Id::new("sh".to_owned()), path, vec![]).unwrap();
        let parts = CatalogueParts {
            version: None,
            stops: vec![
                Stop::new(Id::new("a".to_owned()), origin),
                Stop::new(Id::new("b".to_owned()), origin.destination(length, 90.0)),
            ],
            intersections: vec![],
            segments: vec![],
            shapes: vec![shape],
            routes: vec![Route {
                id: Id::new("r".to_owned()),
                short_name: "1".to_owned(),
                long_name: "east".to_owned(),
                shape_id: Id::new("sh".to_owned()),
                stops: vec![
                    RouteStop {
                        stop_id: Id::new("a".to_owned()),
                        shape_dist_traveled: 0.0,
                    },
                    RouteStop {
                        stop_id: Id::new("b".to_owned()),
                        shape_dist_traveled: length,
                    },
                ],
                trip_ids: vec![Id::new("t".to_owned())],
            }],
            trips: vec![model::Trip {
                id: Id::new("t".to_owned()),
                route_id: Id::new("r".to_owned()),
                stop_times: vec![],
            }],
        };
        Arc::new(Catalogue::assemble(parts).unwrap())
    }

    fn position_event(vehicle: &str, offset: i64, distance: f64) -> FeedEvent {
        let origin = Coord::new(-36.9, 174.7);
        FeedEvent::Position(VehicleObservation {
            vehicle_id: vehicle.to_owned(),
            trip_id: Some("t".to_owned()),
            position: origin.destination(distance, 90.0),
            timestamp: Utc::now() + Duration::seconds(offset),
        })
    }

    #[tokio::test]
    async fn vehicles_are_created_on_first_sighting() {
        let (tx, rx, _aggregator) = network::channel(16);
        let config = Arc::new(FilterConfig {
            particle_count: 10,
            seed: Some(1),
            ..FilterConfig::default()
        });
        let mut fleet = Fleet::new(catalogue(), config, rx, tx);
        assert!(fleet.is_empty());

        fleet.dispatch(position_event("bus-1", 0, 0.0));
        fleet.dispatch(position_event("bus-2", 0, 100.0));
        assert_eq!(fleet.len(), 2);

        // progress for a known trip routes to the vehicle that ran it last
        fleet.dispatch(FeedEvent::Progress(TripProgress {
            trip_id: "t".to_owned(),
            vehicle_id: None,
            stop_sequence: Some(1),
            arrival_time: None,
            departure_time: None,
            delay: Some(30),
        }));
        assert_eq!(fleet.len(), 2);

        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn idle_vehicles_are_purged() {
        let (tx, rx, _aggregator) = network::channel(16);
        let config = Arc::new(FilterConfig {
            particle_count: 10,
            purge_timeout_secs: 60,
            seed: Some(1),
            ..FilterConfig::default()
        });
        let mut fleet = Fleet::new(catalogue(), config, rx, tx);
        fleet.dispatch(position_event("bus-1", 0, 0.0));
        assert_eq!(fleet.len(), 1);

        fleet.purge_idle(Utc::now());
        assert_eq!(fleet.len(), 1, "fresh vehicle must survive");

        fleet.purge_idle(Utc::now() + Duration::seconds(120));
        assert_eq!(fleet.len(), 0);
    }

    #[tokio::test]
    async fn snapshots_cover_every_live_vehicle() {
        let (tx, rx, _aggregator) = network::channel(16);
        let config = Arc::new(FilterConfig {
            particle_count: 10,
            seed: Some(1),
            ..FilterConfig::default()
        });
        let mut fleet = Fleet::new(catalogue(), config, rx, tx);
        fleet.dispatch(position_event("bus-1", 0, 0.0));
        fleet.dispatch(position_event("bus-1", 15, 150.0));
        fleet.dispatch(position_event("bus-2", 0, 300.0));

        let snapshots = fleet.particle_snapshots().await;
        assert_eq!(snapshots.len(), 2);
        let bus1 = snapshots
            .iter()
            .find(|s| s.vehicle_id == "bus-1")
            .expect("bus-1 snapshot");
        assert_eq!(bus1.states.len(), 10);

        fleet.shutdown().await;
    }
}
