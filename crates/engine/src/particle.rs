//! One trajectory hypothesis for a vehicle, conditioned on every observation
//! seen so far.

use chrono::{DateTime, Utc};
use model::{Catalogue, Route, Shape, Stop};
use sampling::{Exponential, Normal, Rng, Uniform};
use utility::{geo::Coord, id::Id};

use crate::{config::FilterConfig, network::NetworkSnapshot};

/// A recorded call at a route stop.
#[derive(Debug, Clone, Copy)]
pub struct StopVisit {
    /// Index into the route's stop list.
    pub stop_index: usize,
    /// Seconds after the particle's start time.
    pub arrival: i64,
    /// Seconds spent stationary at the stop.
    pub dwell: i64,
}

/// A completed traversal of one shape segment.
#[derive(Debug, Clone, Copy)]
pub struct SegmentCrossing {
    /// Leg index into the shape's segment list.
    pub leg: usize,
    /// Seconds after the particle's start time when the leg was entered.
    pub entered: i64,
    /// Seconds queued at the intersection at the head of the leg.
    pub queue: i64,
    /// Seconds in motion across the leg.
    pub travel: i64,
}

/// Everything a transition needs to read; particles hold no reference back
/// to their vehicle.
pub struct TransitionContext<'a> {
    pub shape: &'a Shape,
    pub route: &'a Route,
    pub catalogue: &'a Catalogue,
    pub network: &'a NetworkSnapshot,
    pub config: &'a FilterConfig,
}

/// A single point estimate of the vehicle's latent state.
#[derive(Debug, Clone)]
pub struct Particle {
    id: u64,
    parent_id: Option<u64>,
    /// Trip start; trajectory indices are seconds after this.
    start: DateTime<Utc>,
    /// `trajectory[k]` is the distance into the shape `k` seconds after
    /// `start`. Extended lazily, one entry per simulated second.
    trajectory: Vec<f64>,
    stops: Vec<StopVisit>,
    segments: Vec<SegmentCrossing>,
    /// Records not yet handed to the network aggregator.
    pending_stops: Vec<StopVisit>,
    pending_segments: Vec<SegmentCrossing>,
    velocity: f64,
    log_likelihood: f64,
    weight: f64,
    finished: bool,

    // in-flight simulation state
    /// Seconds left to sit still (dwell or queue).
    hold: i64,
    /// Next route stop not yet crossed.
    next_stop: usize,
    /// Current shape segment leg.
    leg: usize,
    /// Offset when the current leg was entered.
    leg_entered: i64,
    /// Queued seconds accumulated in the current leg.
    leg_queue: i64,
}

impl Particle {
    /// Draw a fresh particle for a vehicle first observed at `start`.
    ///
    /// `distance_prior` and `velocity_prior` are the initialisation bounds of
    /// the filter (projected first fix widened by the configured margin, and
    /// (0, v_max)).
    pub fn init(
        id: u64,
        start: DateTime<Utc>,
        distance_prior: &Uniform,
        velocity_prior: &Uniform,
        ctx: &TransitionContext,
        rng: &mut Rng,
    ) -> Self {
        let distance = distance_prior.sample(rng).clamp(0.0, ctx.shape.length());
        let velocity = velocity_prior.sample(rng);
        let next_stop = ctx
            .route
            .stops
            .partition_point(|stop| stop.shape_dist_traveled <= distance);
        let leg = ctx.shape.segment_index_at(distance).unwrap_or(0);

        Self {
            id,
            parent_id: None,
            start,
            trajectory: vec![distance],
            stops: Vec::new(),
            segments: Vec::new(),
            pending_stops: Vec::new(),
            pending_segments: Vec::new(),
            velocity,
            log_likelihood: f64::NEG_INFINITY,
            weight: 0.0,
            finished: false,
            hold: 0,
            next_stop,
            leg,
            leg_entered: 0,
            leg_queue: 0,
        }
    }

    /// Copy-construct from a resample survivor. The copy takes a fresh id,
    /// remembers where it came from, and starts on the uniform weight.
    pub fn child(&self, id: u64, weight: f64) -> Self {
        let mut copy = self.clone();
        copy.parent_id = Some(self.id);
        copy.id = id;
        copy.weight = weight;
        copy
    }

    // --- getters

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Seconds-since-start index of the latest update.
    pub fn latest(&self) -> usize {
        self.trajectory.len().saturating_sub(1)
    }

    /// Current distance into the shape, meters.
    pub fn distance(&self) -> f64 {
        self.trajectory.last().copied().unwrap_or(0.0)
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    pub fn trajectory(&self) -> &[f64] {
        &self.trajectory
    }

    pub fn stop_visits(&self) -> &[StopVisit] {
        &self.stops
    }

    pub fn segment_crossings(&self) -> &[SegmentCrossing] {
        &self.segments
    }

    /// Hand over the records accumulated since the last drain.
    pub fn take_pending(&mut self) -> (Vec<StopVisit>, Vec<SegmentCrossing>) {
        (
            std::mem::take(&mut self.pending_stops),
            std::mem::take(&mut self.pending_segments),
        )
    }

    /// Expected seconds until the particle reaches `shape_dist`, from its
    /// latest state. `None` once passed.
    pub fn eta_to(&self, shape_dist: f64) -> Option<i64> {
        let d = self.distance();
        if shape_dist <= d || self.velocity <= 0.0 {
            return None;
        }
        Some(((shape_dist - d) / self.velocity).ceil() as i64 + self.hold)
    }

    // --- methods

    /// Advance the hypothesis by `delta` seconds.
    ///
    /// A new velocity is proposed from a normal random walk, rejecting
    /// proposals outside (0, v_max). The trajectory is then simulated second
    /// by second so dwell and queue time displace motion rather than being
    /// lost, and every stop or segment boundary crossed is recorded.
    pub fn transition(&mut self, delta: i64, ctx: &TransitionContext, rng: &mut Rng) {
        if delta <= 0 || self.finished {
            return;
        }

        let proposal = Normal::new(self.velocity, ctx.config.velocity_sigma)
            .expect("velocity sigma is validated at startup");
        let mut velocity = proposal.sample(rng);
        while velocity <= 0.0 || velocity >= ctx.config.max_velocity {
            velocity = proposal.sample(rng);
        }
        self.velocity = velocity;

        let shape_length = ctx.shape.length();
        let target_len = self.trajectory.len() + delta as usize;
        let mut distance = self.distance();
        while self.trajectory.len() < target_len {
            let offset = self.trajectory.len() as i64;

            if self.hold > 0 {
                self.hold -= 1;
                self.trajectory.push(distance);
                continue;
            }

            distance += velocity;
            if distance >= shape_length {
                distance = shape_length;
                self.finished = true;
            }

            self.cross_stops(distance, offset, ctx, rng);
            self.cross_segments(distance, offset, ctx, rng);

            self.trajectory.push(distance);

            if self.finished {
                // pad the remaining seconds at the terminus
                self.trajectory.resize(target_len, distance);
                break;
            }
        }
    }

    /// Record calls at every route stop whose distance was passed this second.
    fn cross_stops(
        &mut self,
        distance: f64,
        offset: i64,
        ctx: &TransitionContext,
        rng: &mut Rng,
    ) {
        while self.next_stop < ctx.route.stops.len()
            && ctx.route.stops[self.next_stop].shape_dist_traveled <= distance
        {
            let stop = &ctx.route.stops[self.next_stop];
            let dwell = if rng.uniform01() < ctx.config.stop_probability {
                let mean = self.dwell_mean(stop.stop_id.raw_ref::<str>(), ctx);
                let draw = Exponential::new(1.0 / mean)
                    .expect("dwell mean is positive")
                    .sample(rng);
                draw.clamp(ctx.config.min_dwell_secs, ctx.config.max_dwell_secs)
                    .round() as i64
            } else {
                0
            };

            let visit = StopVisit {
                stop_index: self.next_stop,
                arrival: offset,
                dwell,
            };
            self.stops.push(visit);
            self.pending_stops.push(visit);
            self.hold += dwell;
            self.next_stop += 1;
        }
    }

    /// Close out every leg whose end was passed this second, and maybe queue
    /// at the intersection heading the next one.
    fn cross_segments(
        &mut self,
        distance: f64,
        offset: i64,
        ctx: &TransitionContext,
        rng: &mut Rng,
    ) {
        let legs = &ctx.shape.segments;
        while self.leg + 1 < legs.len()
            && legs[self.leg + 1].shape_dist_traveled <= distance
        {
            let crossing = self.close_leg(offset, ctx);
            self.segments.push(crossing);
            self.pending_segments.push(crossing);

            self.leg += 1;
            self.leg_entered = offset;
            self.leg_queue = 0;

            // queueing happens at the intersection at the head of the new leg
            if let Some(queue) = self.sample_queue(self.leg, ctx, rng) {
                self.hold += queue;
                self.leg_queue = queue;
            }
        }

        if self.finished && !legs.is_empty() {
            // the trip ends mid-leg; close the final one
            let crossing = self.close_leg(offset, ctx);
            self.segments.push(crossing);
            self.pending_segments.push(crossing);
        }
    }

    fn close_leg(&self, offset: i64, ctx: &TransitionContext) -> SegmentCrossing {
        let legs = &ctx.shape.segments;
        let start = legs[self.leg].shape_dist_traveled;
        let end = if self.leg + 1 < legs.len() {
            legs[self.leg + 1].shape_dist_traveled
        } else {
            ctx.shape.length()
        };
        // single-velocity approximation across the leg
        let travel = ((end - start) / self.velocity).round().max(0.0) as i64;
        SegmentCrossing {
            leg: self.leg,
            entered: self.leg_entered,
            queue: self.leg_queue,
            travel,
        }
    }

    /// Queue time at the intersection heading `leg`, when there is one.
    fn sample_queue(
        &self,
        leg: usize,
        ctx: &TransitionContext,
        rng: &mut Rng,
    ) -> Option<i64> {
        let segment_id = &ctx.shape.segments[leg].segment_id;
        let segment = ctx.catalogue.segment(segment_id)?;
        let intersection_id = segment.from.intersection()?;

        let (probability, mean_delay) =
            match ctx.network.intersection_delay(intersection_id.raw()) {
                Some(estimate) if estimate.count > 0 => {
                    let p = (estimate.mean
                        * ctx.config.queue_probability_per_delay_sec)
                        .clamp(0.0, ctx.config.max_queue_probability);
                    (p, estimate.mean.max(1.0))
                }
                _ => {
                    let prior = ctx
                        .catalogue
                        .intersection(intersection_id)
                        .filter(|i| i.delay.is_informed())
                        .map(|i| i.delay.mean);
                    match prior {
                        Some(mean) => (
                            (mean * ctx.config.queue_probability_per_delay_sec)
                                .clamp(0.0, ctx.config.max_queue_probability),
                            mean.max(1.0),
                        ),
                        None => (
                            ctx.config.default_queue_probability,
                            ctx.config.default_queue_delay_secs,
                        ),
                    }
                }
            };

        if rng.uniform01() < probability {
            let queue = Exponential::new(1.0 / mean_delay)
                .expect("queue delay mean is positive")
                .sample(rng)
                .round() as i64;
            Some(queue)
        } else {
            None
        }
    }

    fn dwell_mean(&self, stop_id: &str, ctx: &TransitionContext) -> f64 {
        if let Some(estimate) = ctx.network.stop_dwell(stop_id) {
            if estimate.count > 0 && estimate.mean > 0.0 {
                return estimate.mean;
            }
        }
        ctx.catalogue
            .stop(&Id::<Stop>::new(stop_id.to_owned()))
            .filter(|stop| stop.dwell.is_informed() && stop.dwell.mean > 0.0)
            .map(|stop| stop.dwell.mean)
            .unwrap_or(ctx.config.default_dwell_secs)
    }

    /// Score the hypothesis against the vehicle's observed position with an
    /// isotropic gaussian in the local tangent plane.
    pub fn update_likelihood(&mut self, shape: &Shape, observed: &Coord, sigma: f64) {
        if self.trajectory.is_empty() {
            self.log_likelihood = f64::NEG_INFINITY;
            return;
        }
        let hypothesis = shape.point_at(self.distance());
        let (x, y) = hypothesis.project_flat(observed);
        self.log_likelihood =
            -(2.0 * std::f64::consts::PI * sigma * sigma).ln()
                - (x * x + y * y) / (2.0 * sigma * sigma);
    }

    /// Penalise the hypothesis when it disagrees with a reported stop
    /// arrival by more than the tolerance.
    pub fn apply_arrival_constraint(
        &mut self,
        stop_index: usize,
        reported_offset: i64,
        tolerance: i64,
        penalty: f64,
    ) {
        let predicted = self
            .stops
            .iter()
            .find(|visit| visit.stop_index == stop_index)
            .map(|visit| visit.arrival);
        if let Some(arrival) = predicted {
            if (arrival - reported_offset).abs() > tolerance {
                self.log_likelihood -= penalty;
            }
        }
    }
}
