//! Per-vehicle filter: the initialisation state machine and the
//! mutate/weight/resample cycle run on every arriving observation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use gtfs::realtime::{TripProgress, VehicleObservation};
use model::{Catalogue, Route, Shape, Trip};
use sampling::{Resampler, Rng, Uniform};
use tokio::sync::watch;
use utility::{geo::Coord, id::Id};

use crate::{
    config::FilterConfig,
    network::{DwellSample, NetworkSnapshot, NetworkSubmission, SegmentSample},
    particle::{Particle, TransitionContext},
};

/// Where the filter is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No usable observation yet, or freshly reset.
    Uninitialised,
    /// First fix stored; waiting for a second, sufficiently separated fix to
    /// confirm the direction of travel.
    DirectionPending,
    /// Particles spawned; the first full update cycle has not completed yet.
    Settling,
    Tracking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Duplicate or out-of-order timestamp.
    OutOfOrder,
    /// Too large a displacement in too little time.
    ImplausibleJump,
    /// No trip assignment to filter against.
    NoTrip,
    /// The assigned trip has a schedule gap; waiting for a new trip id.
    Unroutable,
    /// Second direction-check fix arrived too soon after the first.
    TooSoon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// The direction check failed; the filter restarts from this fix.
    WrongDirection,
    /// Every particle scored zero likelihood.
    Degenerate,
    /// The feed referenced a trip the schedule does not know.
    UnknownTrip,
    /// The assigned trip references missing schedule entities.
    ScheduleGap,
}

/// What one observation did to the filter.
#[derive(Debug)]
pub enum ObservationOutcome {
    Dropped(DropReason),
    /// Initialisation advanced to the given phase.
    Progressed(Phase),
    /// A full update cycle ran.
    Updated {
        submission: Option<NetworkSubmission>,
        ess: f64,
        resampled: bool,
    },
    /// All particles reached the end of the shape; the filter tore down.
    Completed {
        submission: Option<NetworkSubmission>,
    },
    Reset(ResetReason),
}

/// A transit vehicle and the particle population estimating its state.
pub struct Vehicle {
    id: String,
    catalogue: Arc<Catalogue>,
    network: watch::Receiver<Arc<NetworkSnapshot>>,
    config: Arc<FilterConfig>,
    rng: Rng,

    trip: Option<Arc<Trip>>,
    route: Option<Arc<Route>>,
    shape: Option<Arc<Shape>>,
    /// Trip marked unroutable by a schedule gap; cleared by the next valid
    /// trip id.
    unroutable: Option<String>,

    particles: Vec<Particle>,
    next_particle_id: u64,
    phase: Phase,

    position: Option<Coord>,
    timestamp: Option<DateTime<Utc>>,
    first_obs: Option<DateTime<Utc>>,
    /// Projected distance of the direction-check fix.
    first_projection: Option<f64>,

    // most recent trip update, used as a constraint by the next cycle
    stop_sequence: Option<u32>,
    arrival_time: Option<DateTime<Utc>>,
    departure_time: Option<DateTime<Utc>>,
    delay: Option<i32>,
}

impl Vehicle {
    pub fn new(
        id: String,
        catalogue: Arc<Catalogue>,
        network: watch::Receiver<Arc<NetworkSnapshot>>,
        config: Arc<FilterConfig>,
        seed: u64,
    ) -> Self {
        Self {
            id,
            catalogue,
            network,
            config,
            rng: Rng::from_seed(seed),
            trip: None,
            route: None,
            shape: None,
            unroutable: None,
            particles: Vec::new(),
            next_particle_id: 1,
            phase: Phase::Uninitialised,
            position: None,
            timestamp: None,
            first_obs: None,
            first_projection: None,
            stop_sequence: None,
            arrival_time: None,
            departure_time: None,
            delay: None,
        }
    }

    // --- getters

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn trip_id(&self) -> Option<&str> {
        self.trip.as_ref().map(|trip| trip.id.raw_ref::<str>())
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Posterior mean distance into the shape.
    pub fn weighted_mean_distance(&self) -> Option<f64> {
        if self.particles.is_empty() {
            return None;
        }
        let total: f64 = self.particles.iter().map(Particle::weight).sum();
        if total <= 0.0 {
            return None;
        }
        Some(
            self.particles
                .iter()
                .map(|p| p.weight() * p.distance())
                .sum::<f64>()
                / total,
        )
    }

    /// Posterior mean arrival time for each stop the population has not yet
    /// passed, paired with the route stop index.
    pub fn predicted_arrivals(&self) -> Vec<(usize, DateTime<Utc>)> {
        let Some(route) = &self.route else {
            return Vec::new();
        };
        let mut etas = Vec::new();
        for (index, stop) in route.stops.iter().enumerate() {
            let mut weighted = 0.0;
            let mut weight_sum = 0.0;
            for particle in &self.particles {
                if let Some(eta) = particle.eta_to(stop.shape_dist_traveled) {
                    weighted += particle.weight() * eta as f64;
                    weight_sum += particle.weight();
                }
            }
            if weight_sum > 0.0 {
                if let Some(timestamp) = self.timestamp {
                    let eta = timestamp
                        + chrono::Duration::seconds((weighted / weight_sum) as i64);
                    etas.push((index, eta));
                }
            }
        }
        etas
    }

    /// `(distance, velocity, log_likelihood)` per particle, for snapshots.
    pub fn particle_states(&self) -> Vec<(f64, f64, f64)> {
        self.particles
            .iter()
            .map(|p| (p.distance(), p.velocity(), p.log_likelihood()))
            .collect()
    }

    // --- event handlers

    /// Feed one position report through the filter.
    pub fn handle_position(&mut self, obs: &VehicleObservation) -> ObservationOutcome {
        // trip (re)assignment comes first: a new trip id tears the old
        // filter down regardless of phase
        if let Some(trip_id) = obs.trip_id.as_deref() {
            if self.unroutable.as_deref() == Some(trip_id) {
                return ObservationOutcome::Dropped(DropReason::Unroutable);
            }
            if self.trip_id() != Some(trip_id) {
                match self.assign_trip(trip_id) {
                    Ok(()) => {}
                    Err(reason) => return ObservationOutcome::Reset(reason),
                }
            }
        }
        if self.trip.is_none() {
            return ObservationOutcome::Dropped(DropReason::NoTrip);
        }

        // transient observation errors: drop, keep the filter
        if let Some(previous) = self.timestamp {
            let delta = (obs.timestamp - previous).num_seconds();
            if delta <= 0 {
                return ObservationOutcome::Dropped(DropReason::OutOfOrder);
            }
            if let Some(position) = &self.position {
                if delta < self.config.implausible_jump_secs
                    && position.distance_to(&obs.position)
                        > self.config.implausible_jump_m
                {
                    log::warn!(
                        "vehicle {}: implausible jump of {:.0} m in {} s dropped",
                        self.id,
                        position.distance_to(&obs.position),
                        delta
                    );
                    return ObservationOutcome::Dropped(DropReason::ImplausibleJump);
                }
            }
        }

        let outcome = match self.phase {
            Phase::Uninitialised => self.begin_initialisation(obs),
            Phase::DirectionPending => self.check_direction(obs),
            Phase::Settling | Phase::Tracking => self.update_cycle(obs),
        };

        self.position = Some(obs.position);
        self.timestamp = Some(obs.timestamp);
        outcome
    }

    /// Store the most recent stop-time update; the next mutate constrains
    /// against it.
    pub fn handle_progress(&mut self, progress: &TripProgress) -> Option<ResetReason> {
        if let Some(current) = self.trip_id() {
            if current != progress.trip_id
                && self
                    .catalogue
                    .trip(&Id::<Trip>::new(progress.trip_id.clone()))
                    .is_none()
            {
                log::info!(
                    "vehicle {}: unknown trip {} in trip update, resetting",
                    self.id,
                    progress.trip_id
                );
                self.reset(false);
                return Some(ResetReason::UnknownTrip);
            }
        }
        self.stop_sequence = progress.stop_sequence;
        self.arrival_time = progress.arrival_time;
        self.departure_time = progress.departure_time;
        self.delay = progress.delay;
        None
    }

    // --- state machine

    fn assign_trip(&mut self, trip_id: &str) -> Result<(), ResetReason> {
        let id = Id::<Trip>::new(trip_id.to_owned());
        let Some(trip) = self.catalogue.trip(&id) else {
            log::info!("vehicle {}: unknown trip {}, resetting", self.id, trip_id);
            self.reset(false);
            return Err(ResetReason::UnknownTrip);
        };
        let route = self.catalogue.trip_route(&id);
        let shape = self.catalogue.trip_shape(&id);
        match (route, shape) {
            (Some(route), Some(shape)) if !shape.path.is_empty() => {
                self.reset(false);
                self.trip = Some(trip);
                self.route = Some(route);
                self.shape = Some(shape);
                self.unroutable = None;
                Ok(())
            }
            _ => {
                log::warn!(
                    "vehicle {}: trip {} has schedule gaps, marking unroutable",
                    self.id,
                    trip_id
                );
                self.reset(false);
                self.unroutable = Some(trip_id.to_owned());
                Err(ResetReason::ScheduleGap)
            }
        }
    }

    fn begin_initialisation(&mut self, obs: &VehicleObservation) -> ObservationOutcome {
        let shape = self.shape.as_ref().expect("trip assignment checked");
        self.first_obs = Some(obs.timestamp);
        self.first_projection = Some(shape.project(&obs.position).distance);
        self.phase = Phase::DirectionPending;
        ObservationOutcome::Progressed(Phase::DirectionPending)
    }

    fn check_direction(&mut self, obs: &VehicleObservation) -> ObservationOutcome {
        let gap = self
            .first_obs
            .map(|first| (obs.timestamp - first).num_seconds())
            .unwrap_or(0);
        if gap < self.config.direction_check_min_gap_secs {
            // not independent enough to confirm anything yet
            return ObservationOutcome::Dropped(DropReason::TooSoon);
        }

        let shape = self.shape.as_ref().expect("trip assignment checked").clone();
        let projection = shape.project(&obs.position).distance;
        let forward = self
            .first_projection
            .map(|first| projection > first)
            .unwrap_or(false);

        if !forward {
            log::info!(
                "vehicle {}: direction check failed, restarting initialisation",
                self.id
            );
            self.reset(true);
            // this fix becomes the new first observation
            return match self.begin_initialisation(obs) {
                ObservationOutcome::Progressed(_) => {
                    ObservationOutcome::Reset(ResetReason::WrongDirection)
                }
                other => other,
            };
        }

        self.spawn_particles(projection, obs);
        self.phase = Phase::Settling;
        ObservationOutcome::Progressed(Phase::Settling)
    }

    fn spawn_particles(&mut self, around: f64, obs: &VehicleObservation) {
        let shape = self.shape.as_ref().expect("trip assignment checked").clone();
        let route = self.route.as_ref().expect("trip assignment checked").clone();
        let snapshot = self.network.borrow().clone();

        let margin = self.config.prior_distance_margin;
        let lo = (around - margin).max(0.0);
        let hi = (around + margin).min(shape.length()).max(lo + 1.0);
        let distance_prior =
            Uniform::new(lo, hi).expect("prior interval is non-empty by construction");
        let velocity_prior = Uniform::new(0.0, self.config.max_velocity)
            .expect("max velocity is validated at startup");

        let ctx = TransitionContext {
            shape: &shape,
            route: &route,
            catalogue: self.catalogue.as_ref(),
            network: snapshot.as_ref(),
            config: self.config.as_ref(),
        };

        let count = ctx.config.particle_count;
        let mut next_id = self.next_particle_id;
        let mut particles = Vec::with_capacity(count);
        for _ in 0..count {
            let id = next_id;
            next_id += 1;
            let mut particle = Particle::init(
                id,
                obs.timestamp,
                &distance_prior,
                &velocity_prior,
                &ctx,
                &mut self.rng,
            );
            particle.update_likelihood(&shape, &obs.position, ctx.config.gps_sigma);
            particles.push(particle);
        }
        self.next_particle_id = next_id;
        self.particles = particles;
        log::debug!(
            "vehicle {}: spawned {} particles around {:.0} m",
            self.id,
            self.particles.len(),
            around
        );
    }

    fn update_cycle(&mut self, obs: &VehicleObservation) -> ObservationOutcome {
        let delta = self
            .timestamp
            .map(|previous| (obs.timestamp - previous).num_seconds())
            .unwrap_or(0);

        let shape = self.shape.as_ref().expect("trip assignment checked").clone();
        let route = self.route.as_ref().expect("trip assignment checked").clone();
        let snapshot = self.network.borrow().clone();
        let ctx = TransitionContext {
            shape: &shape,
            route: &route,
            catalogue: self.catalogue.as_ref(),
            network: snapshot.as_ref(),
            config: self.config.as_ref(),
        };

        // mutate
        for particle in &mut self.particles {
            particle.transition(delta, &ctx, &mut self.rng);
            particle.update_likelihood(&shape, &obs.position, self.config.gps_sigma);
        }

        // constrain against the latest reported stop call
        if let (Some(sequence), Some(arrival)) = (self.stop_sequence, self.arrival_time)
        {
            // GTFS stop_sequence is 1-based
            let stop_index = sequence.saturating_sub(1) as usize;
            if stop_index < route.stops.len() {
                for particle in &mut self.particles {
                    let offset = (arrival - particle.start()).num_seconds();
                    particle.apply_arrival_constraint(
                        stop_index,
                        offset,
                        self.config.arrival_tolerance_secs,
                        self.config.arrival_penalty,
                    );
                }
            }
        }

        // weight: log-sum-exp stable softmax
        let max_ll = self
            .particles
            .iter()
            .map(Particle::log_likelihood)
            .fold(f64::NEG_INFINITY, f64::max);
        if !max_ll.is_finite() {
            log::warn!("vehicle {}: filter degenerate, resetting", self.id);
            self.reset(true);
            return ObservationOutcome::Reset(ResetReason::Degenerate);
        }
        let mut weights: Vec<f64> = self
            .particles
            .iter()
            .map(|p| (p.log_likelihood() - max_ll).exp())
            .collect();
        let total: f64 = weights.iter().sum();
        for weight in &mut weights {
            *weight /= total;
        }
        let max_weight = weights.iter().cloned().fold(0.0, f64::max);
        if max_weight < self.config.weight_floor {
            log::warn!(
                "vehicle {}: best weight {} below floor, resetting",
                self.id,
                max_weight
            );
            self.reset(true);
            return ObservationOutcome::Reset(ResetReason::Degenerate);
        }
        for (particle, &weight) in self.particles.iter_mut().zip(&weights) {
            particle.set_weight(weight);
        }

        // resample, unless the population is still diverse enough
        let ess = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();
        let threshold =
            self.config.particle_count as f64 * self.config.ess_threshold_fraction;
        let resampled = ess <= threshold;
        if resampled {
            self.resample(&weights);
        }

        let submission = self.collect_submission(obs.timestamp, &shape, &route);

        if self.particles.iter().all(Particle::is_finished) {
            log::info!("vehicle {}: trip complete, tearing filter down", self.id);
            self.reset(true);
            return ObservationOutcome::Completed { submission };
        }

        if self.phase == Phase::Settling {
            self.phase = Phase::Tracking;
        }
        ObservationOutcome::Updated {
            submission,
            ess,
            resampled,
        }
    }

    /// Weighted multinomial resampling with replacement. Every survivor is a
    /// copy with a fresh id pointing back at its parent.
    fn resample(&mut self, weights: &[f64]) {
        let resampler = Resampler::weighted(weights)
            .expect("normalised weights are non-negative");
        let indices = resampler.draw(self.config.particle_count, &mut self.rng);
        let uniform_weight = 1.0 / self.config.particle_count as f64;

        let old = std::mem::take(&mut self.particles);
        self.particles = Vec::with_capacity(indices.len());
        for index in indices {
            let id = self.allocate_id();
            self.particles.push(old[index].child(id, uniform_weight));
        }
    }

    /// Average the pending records of the surviving population into one
    /// submission for the aggregator. Post-resample every particle counts
    /// equally.
    fn collect_submission(
        &mut self,
        timestamp: DateTime<Utc>,
        shape: &Shape,
        route: &Route,
    ) -> Option<NetworkSubmission> {
        use std::collections::HashMap;

        struct LegAccum {
            queue: f64,
            travel: f64,
            entered: i64,
            count: u64,
        }

        let mut legs: HashMap<usize, LegAccum> = HashMap::new();
        let mut dwells: HashMap<usize, (f64, u64)> = HashMap::new();
        let mut start_epoch = None;
        for particle in &mut self.particles {
            start_epoch.get_or_insert(particle.start().timestamp());
            let (stop_visits, crossings) = particle.take_pending();
            for visit in stop_visits {
                if visit.dwell > 0 {
                    let entry = dwells.entry(visit.stop_index).or_insert((0.0, 0));
                    entry.0 += visit.dwell as f64;
                    entry.1 += 1;
                }
            }
            for crossing in crossings {
                let entry = legs.entry(crossing.leg).or_insert(LegAccum {
                    queue: 0.0,
                    travel: 0.0,
                    entered: crossing.entered,
                    count: 0,
                });
                entry.queue += crossing.queue as f64;
                entry.travel += crossing.travel as f64;
                entry.entered = entry.entered.min(crossing.entered);
                entry.count += 1;
            }
        }

        if legs.is_empty() && dwells.is_empty() {
            return None;
        }

        let start_epoch = start_epoch?;
        let mut segments = Vec::with_capacity(legs.len());
        for (leg, accum) in legs {
            let Some(shape_segment) = shape.segments.get(leg) else {
                continue;
            };
            let segment = self.catalogue.segment(&shape_segment.segment_id);
            segments.push(SegmentSample {
                segment_id: shape_segment.segment_id.raw(),
                intersection_id: segment
                    .as_ref()
                    .and_then(|s| s.from.intersection())
                    .map(|id| id.raw()),
                entered_at: start_epoch + accum.entered,
                queue_secs: accum.queue / accum.count as f64,
                travel_secs: accum.travel / accum.count as f64,
            });
        }

        let dwell_samples = dwells
            .into_iter()
            .filter_map(|(stop_index, (sum, count))| {
                route.stops.get(stop_index).map(|stop| DwellSample {
                    stop_id: stop.stop_id.raw(),
                    dwell_secs: sum / count as f64,
                })
            })
            .collect::<Vec<_>>();

        if segments.is_empty() && dwell_samples.is_empty() {
            return None;
        }

        Some(NetworkSubmission {
            vehicle_id: self.id.clone(),
            trip_id: self.trip_id().unwrap_or_default().to_owned(),
            timestamp,
            segments,
            dwells: dwell_samples,
        })
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_particle_id;
        self.next_particle_id += 1;
        id
    }

    /// Drop the particle population and return to `Uninitialised`.
    /// `preserve_trip` keeps the trip assignment (filter degeneracy); a trip
    /// mismatch clears it.
    fn reset(&mut self, preserve_trip: bool) {
        self.particles.clear();
        self.phase = Phase::Uninitialised;
        self.first_obs = None;
        self.first_projection = None;
        self.stop_sequence = None;
        self.arrival_time = None;
        self.departure_time = None;
        self.delay = None;
        if !preserve_trip {
            self.trip = None;
            self.route = None;
            self.shape = None;
        }
    }
}
