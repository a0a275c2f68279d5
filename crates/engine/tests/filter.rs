//! End-to-end filter scenarios on a synthetic straight-line route.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use engine::config::FilterConfig;
use engine::network;
use engine::particle::{Particle, TransitionContext};
use engine::vehicle::{ObservationOutcome, Phase, Vehicle};
use gtfs::realtime::VehicleObservation;
use model::catalogue::CatalogueParts;
use model::{Catalogue, Route, RouteStop, Shape, ShapePt, Stop, StopTime, Trip};
use sampling::{Normal, Rng, Uniform};
use utility::{geo::Coord, id::Id};

const ORIGIN: (f64, f64) = (-36.9, 174.7);

/// A straight 2 km eastbound shape with a stop at each end.
fn line_catalogue() -> Arc<Catalogue> {
    let origin = Coord::new(ORIGIN.0, ORIGIN.1);
    let mut path = Vec::new();
    let mut prev = origin;
    let mut dist = 0.0;
    for i in 0..21 {
        let position = origin.destination(100.0 * i as f64, 90.0);
        dist += prev.distance_to(&position);
        path.push(ShapePt {
            position,
            dist_traveled: dist,
        });
        prev = position;
    }
    let length = path.last().unwrap().dist_traveled;
    let shape = Shape::new(Id::new("line".to_owned()), path, vec![]).unwrap();

    let parts = CatalogueParts {
        version: None,
        stops: vec![
            Stop::new(Id::new("origin".to_owned()), origin),
            Stop::new(
                Id::new("terminus".to_owned()),
                origin.destination(length, 90.0),
            ),
        ],
        intersections: vec![],
        segments: vec![],
        shapes: vec![shape],
        routes: vec![Route {
            id: Id::new("r-line".to_owned()),
            short_name: "L".to_owned(),
            long_name: "origin to terminus".to_owned(),
            shape_id: Id::new("line".to_owned()),
            stops: vec![
                RouteStop {
                    stop_id: Id::new("origin".to_owned()),
                    shape_dist_traveled: 0.0,
                },
                RouteStop {
                    stop_id: Id::new("terminus".to_owned()),
                    shape_dist_traveled: length,
                },
            ],
            trip_ids: vec![Id::new("t-line".to_owned())],
        }],
        trips: vec![Trip {
            id: Id::new("t-line".to_owned()),
            route_id: Id::new("r-line".to_owned()),
            stop_times: vec![StopTime {
                stop_id: Id::new("origin".to_owned()),
                arrival: Duration::seconds(6 * 3600),
                departure: Duration::seconds(6 * 3600),
                layover: false,
            }],
        }],
    };
    Arc::new(Catalogue::assemble(parts).unwrap())
}

fn observation(offset_secs: i64, position: Coord) -> VehicleObservation {
    VehicleObservation {
        vehicle_id: "bus-1".to_owned(),
        trip_id: Some("t-line".to_owned()),
        position,
        timestamp: Utc.with_ymd_and_hms(2017, 3, 1, 6, 0, 0).unwrap()
            + Duration::seconds(offset_secs),
    }
}

/// A vehicle drives the 2 km shape at 10 m/s with N(0, 5 m) position noise.
/// After the 20th observation the posterior mean must sit within 50 m of
/// the ground truth and within 10 m of the median particle.
#[test]
fn filter_recovers_the_true_trajectory() {
    let catalogue = line_catalogue();
    let shape = catalogue.trip_shape(&Id::new("t-line".to_owned())).unwrap();
    let (_tx, network_rx, _aggregator) = network::channel(4);
    let config = FilterConfig {
        particle_count: 500,
        ..FilterConfig::default()
    };
    let mut vehicle = Vehicle::new(
        "bus-1".to_owned(),
        catalogue.clone(),
        network_rx,
        Arc::new(config),
        42,
    );

    let mut noise_rng = Rng::from_seed(7);
    let noise = Normal::new(0.0, 5.0).unwrap();

    for k in 0..50i64 {
        let t = 4 * k;
        let truth = 10.0 * t as f64;
        let exact = shape.point_at(truth);
        let east = noise.sample(&mut noise_rng);
        let north = noise.sample(&mut noise_rng);
        let radius = (east * east + north * north).sqrt();
        let bearing = east.atan2(north).to_degrees().rem_euclid(360.0);
        let observed = if radius > 0.0 {
            exact.destination(radius, bearing)
        } else {
            exact
        };

        let outcome = vehicle.handle_position(&observation(t, observed));

        if k == 19 {
            assert!(
                matches!(outcome, ObservationOutcome::Updated { .. }),
                "20th observation should run a full cycle, got {:?}",
                outcome
            );
            assert_eq!(vehicle.phase(), Phase::Tracking);

            let mean = vehicle.weighted_mean_distance().unwrap();
            assert!(
                (mean - truth).abs() < 50.0,
                "posterior mean {:.1} too far from truth {:.1}",
                mean,
                truth
            );

            let mut distances: Vec<f64> =
                vehicle.particles().iter().map(Particle::distance).collect();
            distances.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let median = distances[distances.len() / 2];
            assert!(
                (mean - median).abs() < 10.0,
                "posterior mean {:.1} disagrees with median particle {:.1}",
                mean,
                median
            );
        }

        // population invariants hold after every cycle
        let length = shape.length();
        for particle in vehicle.particles() {
            assert!(particle.distance() >= 0.0 && particle.distance() <= length);
            assert!(particle.velocity() >= 0.0 && particle.velocity() <= 30.0);
        }
    }
}

fn particle_context<'a>(
    catalogue: &'a Catalogue,
    shape: &'a Shape,
    route: &'a Route,
    network: &'a network::NetworkSnapshot,
    config: &'a FilterConfig,
) -> TransitionContext<'a> {
    TransitionContext {
        shape,
        route,
        catalogue,
        network,
        config,
    }
}

/// The velocity random walk with the (0, 30) rejection gate keeps every
/// sample strictly inside the bounds and the population mean near its
/// starting point.
#[test]
fn velocity_proposals_stay_inside_the_gate() {
    let catalogue = line_catalogue();
    let shape = catalogue.trip_shape(&Id::new("t-line".to_owned())).unwrap();
    let route = catalogue.trip_route(&Id::new("t-line".to_owned())).unwrap();
    let snapshot = network::NetworkSnapshot::default();
    let config = FilterConfig {
        // no dwell pauses, so every second is a velocity sample
        stop_probability: 0.0,
        ..FilterConfig::default()
    };
    let ctx = particle_context(&catalogue, &shape, &route, &snapshot, &config);
    let start = Utc.with_ymd_and_hms(2017, 3, 1, 6, 0, 0).unwrap();
    let mut rng = Rng::from_seed(3);

    let distance_prior = Uniform::new(0.0, 1.0).unwrap();
    let velocity_prior = Uniform::new(14.999, 15.001).unwrap();

    // population reading: 1000 particles mutated once from v = 15
    let mut velocities = Vec::with_capacity(1000);
    for id in 0..1000 {
        let mut particle = Particle::init(
            id,
            start,
            &distance_prior,
            &velocity_prior,
            &ctx,
            &mut rng,
        );
        particle.transition(1, &ctx, &mut rng);
        velocities.push(particle.velocity());
    }
    let mean = velocities.iter().sum::<f64>() / velocities.len() as f64;
    let min = velocities.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = velocities.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    assert!((14.0..=16.0).contains(&mean), "mean velocity {}", mean);
    assert!(min > 0.0);
    assert!(max < 30.0);

    // walk reading: one particle mutated 1000 times never escapes the gate
    let mut particle = Particle::init(
        1000,
        start,
        &distance_prior,
        &velocity_prior,
        &ctx,
        &mut rng,
    );
    for _ in 0..1000 {
        particle.transition(1, &ctx, &mut rng);
        if particle.is_finished() {
            break;
        }
        let v = particle.velocity();
        assert!(v > 0.0 && v < 30.0, "velocity {} escaped the gate", v);
    }
}

/// A particle one meter short of the end of the shape reaches it, is
/// marked finished, and further transitions are no-ops.
#[test]
fn distance_clamps_at_the_end_of_the_shape() {
    let catalogue = line_catalogue();
    let shape = catalogue.trip_shape(&Id::new("t-line".to_owned())).unwrap();
    let route = catalogue.trip_route(&Id::new("t-line".to_owned())).unwrap();
    let snapshot = network::NetworkSnapshot::default();
    let config = FilterConfig {
        stop_probability: 0.0,
        ..FilterConfig::default()
    };
    let ctx = particle_context(&catalogue, &shape, &route, &snapshot, &config);
    let start = Utc.with_ymd_and_hms(2017, 3, 1, 6, 0, 0).unwrap();
    let mut rng = Rng::from_seed(5);

    let length = shape.length();
    let distance_prior = Uniform::new(length - 1.0 - 1e-6, length - 1.0).unwrap();
    let velocity_prior = Uniform::new(29.0, 29.9).unwrap();

    let mut particle = Particle::init(
        1,
        start,
        &distance_prior,
        &velocity_prior,
        &ctx,
        &mut rng,
    );
    for _ in 0..5 {
        particle.transition(1, &ctx, &mut rng);
        if particle.is_finished() {
            break;
        }
    }
    assert!(particle.is_finished());
    assert_eq!(particle.distance(), length);

    // a finished particle's transition is a no-op
    let trajectory_len = particle.trajectory().len();
    let velocity = particle.velocity();
    particle.transition(10, &ctx, &mut rng);
    assert_eq!(particle.trajectory().len(), trajectory_len);
    assert_eq!(particle.velocity(), velocity);
    assert_eq!(particle.distance(), length);
}
