//! Network-level aggregation: segment travel times, intersection delays and
//! stop dwell times estimated from the surviving particle populations.
//!
//! A single serialiser task folds submissions from every vehicle into
//! Welford accumulators and publishes immutable snapshots through a watch
//! channel. Vehicles read the latest snapshot without blocking; no estimate
//! is ever mutated in place.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

/// Numerically stable running mean and variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn push(&mut self, sample: f64) {
        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance; zero until two samples have arrived.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }
}

/// A published estimate for one segment, intersection or stop.
#[derive(Debug, Clone, Copy)]
pub struct Estimate {
    pub mean: f64,
    pub variance: f64,
    pub count: u64,
    pub updated: DateTime<Utc>,
}

/// An immutable view of every network estimate at one point in time.
#[derive(Debug, Clone, Default)]
pub struct NetworkSnapshot {
    segments: HashMap<u64, Estimate>,
    intersections: HashMap<u64, Estimate>,
    stops: HashMap<String, Estimate>,
}

impl NetworkSnapshot {
    pub fn segment_travel(&self, segment_id: u64) -> Option<&Estimate> {
        self.segments.get(&segment_id)
    }

    pub fn intersection_delay(&self, intersection_id: u64) -> Option<&Estimate> {
        self.intersections.get(&intersection_id)
    }

    pub fn stop_dwell(&self, stop_id: &str) -> Option<&Estimate> {
        self.stops.get(stop_id)
    }

    pub fn segments(&self) -> impl Iterator<Item = (&u64, &Estimate)> {
        self.segments.iter()
    }

    pub fn intersections(&self) -> impl Iterator<Item = (&u64, &Estimate)> {
        self.intersections.iter()
    }

    pub fn stops(&self) -> impl Iterator<Item = (&String, &Estimate)> {
        self.stops.iter()
    }
}

/// One segment traversal averaged over a vehicle's particle population.
#[derive(Debug, Clone)]
pub struct SegmentSample {
    pub segment_id: u64,
    /// The intersection at the head of the segment, when there is one; it
    /// receives the queue portion.
    pub intersection_id: Option<u64>,
    /// Epoch seconds when the population entered the segment.
    pub entered_at: i64,
    pub queue_secs: f64,
    pub travel_secs: f64,
}

#[derive(Debug, Clone)]
pub struct DwellSample {
    pub stop_id: String,
    pub dwell_secs: f64,
}

/// Everything one vehicle learned in one update cycle.
#[derive(Debug, Clone)]
pub struct NetworkSubmission {
    pub vehicle_id: String,
    pub trip_id: String,
    pub timestamp: DateTime<Utc>,
    pub segments: Vec<SegmentSample>,
    pub dwells: Vec<DwellSample>,
}

/// The single-writer serialiser owning all accumulators.
pub struct Aggregator {
    rx: mpsc::Receiver<NetworkSubmission>,
    publish: watch::Sender<Arc<NetworkSnapshot>>,
    segments: HashMap<u64, Welford>,
    intersections: HashMap<u64, Welford>,
    stops: HashMap<String, Welford>,
    /// Traversals already folded, keyed by
    /// (vehicle, trip, segment, entry time). Guarantees each accumulator
    /// sees a sample at most once even if a submission is retried.
    seen: HashSet<(String, String, u64, i64)>,
}

/// Handles for the vehicles (writer side) and their filters (reader side).
pub fn channel(
    capacity: usize,
) -> (
    mpsc::Sender<NetworkSubmission>,
    watch::Receiver<Arc<NetworkSnapshot>>,
    Aggregator,
) {
    let (tx, rx) = mpsc::channel(capacity);
    let (publish, subscribe) = watch::channel(Arc::new(NetworkSnapshot::default()));
    let aggregator = Aggregator {
        rx,
        publish,
        segments: HashMap::new(),
        intersections: HashMap::new(),
        stops: HashMap::new(),
        seen: HashSet::new(),
    };
    (tx, subscribe, aggregator)
}

impl Aggregator {
    /// Consume submissions until every sender is gone.
    pub async fn run(mut self) {
        while let Some(submission) = self.rx.recv().await {
            self.fold(submission);
            self.publish_snapshot();
        }
        log::info!("all vehicles gone, aggregator stopping");
    }

    /// Fold one submission into the running estimates.
    pub fn fold(&mut self, submission: NetworkSubmission) {
        for sample in submission.segments {
            let key = (
                submission.vehicle_id.clone(),
                submission.trip_id.clone(),
                sample.segment_id,
                sample.entered_at,
            );
            if !self.seen.insert(key) {
                log::debug!(
                    "duplicate sample for segment {} from vehicle {}",
                    sample.segment_id,
                    submission.vehicle_id
                );
                continue;
            }
            self.segments
                .entry(sample.segment_id)
                .or_default()
                .push(sample.travel_secs);
            if let Some(intersection_id) = sample.intersection_id {
                // the queue portion belongs to the intersection, not the road
                self.intersections
                    .entry(intersection_id)
                    .or_default()
                    .push(sample.queue_secs);
            }
        }
        for dwell in submission.dwells {
            self.stops
                .entry(dwell.stop_id)
                .or_default()
                .push(dwell.dwell_secs);
        }
    }

    fn publish_snapshot(&self) {
        let now = Utc::now();
        let snapshot = NetworkSnapshot {
            segments: estimates(&self.segments, now),
            intersections: estimates(&self.intersections, now),
            stops: estimates(&self.stops, now),
        };
        // receivers may all be gone during shutdown; nothing to do then
        let _ = self.publish.send(Arc::new(snapshot));
    }

    /// Current snapshot without waiting for the next submission. Used by the
    /// persistence loop.
    pub fn snapshot(&self) -> NetworkSnapshot {
        let now = Utc::now();
        NetworkSnapshot {
            segments: estimates(&self.segments, now),
            intersections: estimates(&self.intersections, now),
            stops: estimates(&self.stops, now),
        }
    }
}

fn estimates<K: Clone + Eq + std::hash::Hash>(
    accumulators: &HashMap<K, Welford>,
    now: DateTime<Utc>,
) -> HashMap<K, Estimate> {
    accumulators
        .iter()
        .map(|(key, welford)| {
            (
                key.clone(),
                Estimate {
                    mean: welford.mean(),
                    variance: welford.variance(),
                    count: welford.count(),
                    updated: now,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(
        vehicle: &str,
        entered_at: i64,
        travel: f64,
    ) -> NetworkSubmission {
        NetworkSubmission {
            vehicle_id: vehicle.to_owned(),
            trip_id: "trip".to_owned(),
            timestamp: Utc::now(),
            segments: vec![SegmentSample {
                segment_id: 7,
                intersection_id: Some(3),
                entered_at,
                queue_secs: 4.0,
                travel_secs: travel,
            }],
            dwells: vec![DwellSample {
                stop_id: "s1".to_owned(),
                dwell_secs: 12.0,
            }],
        }
    }

    #[test]
    fn welford_matches_two_pass_results() {
        let samples = [3.0, 7.5, 1.2, 9.9, 5.5, 2.2];
        let mut acc = Welford::default();
        for &x in &samples {
            acc.push(x);
        }
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>()
            / (samples.len() - 1) as f64;
        assert!((acc.mean() - mean).abs() < 1e-12);
        assert!((acc.variance() - var).abs() < 1e-12);
    }

    #[test]
    fn welford_is_order_insensitive_within_tolerance() {
        let samples = [14.0, 3.3, 99.1, 0.4, 27.0, 8.8, 41.5];
        let mut forward = Welford::default();
        let mut backward = Welford::default();
        for &x in &samples {
            forward.push(x);
        }
        for &x in samples.iter().rev() {
            backward.push(x);
        }
        assert!((forward.mean() - backward.mean()).abs() < 1e-9);
        assert!((forward.variance() - backward.variance()).abs() < 1e-9);
    }

    #[test]
    fn variance_is_zero_below_two_samples() {
        let mut acc = Welford::default();
        assert_eq!(acc.variance(), 0.0);
        acc.push(5.0);
        assert_eq!(acc.variance(), 0.0);
        assert_eq!(acc.mean(), 5.0);
    }

    #[test]
    fn duplicate_submissions_fold_once() {
        let (_tx, _rx, mut aggregator) = channel(4);
        aggregator.fold(submission("v1", 100, 30.0));
        aggregator.fold(submission("v1", 100, 30.0)); // retry, same key

        let snapshot = aggregator.snapshot();
        let travel = snapshot.segment_travel(7).unwrap();
        assert_eq!(travel.count, 1);
        assert_eq!(travel.mean, 30.0);
        // dwell samples carry no dedup key; both count
        assert_eq!(snapshot.stop_dwell("s1").unwrap().count, 2);
    }

    #[test]
    fn queue_portion_lands_on_the_intersection() {
        let (_tx, _rx, mut aggregator) = channel(4);
        aggregator.fold(submission("v1", 100, 30.0));
        aggregator.fold(submission("v2", 140, 36.0));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.segment_travel(7).unwrap().count, 2);
        assert!((snapshot.segment_travel(7).unwrap().mean - 33.0).abs() < 1e-12);
        let delay = snapshot.intersection_delay(3).unwrap();
        assert_eq!(delay.count, 2);
        assert!((delay.mean - 4.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn run_publishes_after_each_submission() {
        let (tx, mut rx, aggregator) = channel(4);
        let task = tokio::spawn(aggregator.run());

        tx.send(submission("v1", 100, 30.0)).await.unwrap();
        rx.changed().await.unwrap();
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.segment_travel(7).unwrap().count, 1);

        drop(tx);
        task.await.unwrap();
    }
}
