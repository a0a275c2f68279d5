//! The realtime network model daemon: loads the schedule, runs the fleet of
//! per-vehicle filters against the GTFS-Realtime feed, and periodically
//! persists the network estimates.

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use chrono::Utc;
use database::{stats::{self, StatRecord}, SqlitePool};
use engine::{network, Fleet};
use gtfs::feed::FeedPoller;
use tokio::sync::{mpsc, watch};

mod config;

use config::DaemonConfig;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("network-model.json"));
    let config = match DaemonConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(why) => {
            log::error!("cannot read config {}: {}", config_path.display(), why);
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(why) => {
            log::error!("daemon failed: {}", why);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: DaemonConfig) -> Result<(), Box<dyn std::error::Error>> {
    // any load-time invariant violation lands here and refuses startup
    config.filter.validate()?;
    let pool = database::connect(&config.database.path).await?;
    let catalogue = Arc::new(
        database::load_catalogue(&pool, config.database.version.as_deref()).await?,
    );
    log::info!(
        "catalogue ready: {} routes, {} trips, {} segments",
        catalogue.routes().count(),
        catalogue.trips().count(),
        catalogue.segments().count(),
    );

    let (submissions, network_rx, aggregator) = network::channel(256);
    tokio::spawn(aggregator.run());

    let mut fleet = Fleet::new(
        catalogue,
        Arc::new(config.filter.clone()),
        network_rx.clone(),
        submissions,
    );

    let (event_tx, mut event_rx) = mpsc::channel(1024);
    let poller = FeedPoller::new(
        config.feed.url.clone(),
        Duration::from_secs(config.feed.poll_interval_secs),
    );
    tokio::spawn(poller.run(event_tx));

    if config.persistence.network_stats || config.persistence.particles {
        stats::ensure_tables(&pool).await?;
    }

    let mut purge_timer = tokio::time::interval(Duration::from_secs(60));
    let mut persist_timer =
        tokio::time::interval(Duration::from_secs(config.persistence.interval_secs.max(1)));

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Some(event) => fleet.dispatch(event),
                    None => {
                        log::warn!("feed poller stopped, shutting down");
                        break;
                    }
                }
            }
            _ = purge_timer.tick() => {
                fleet.purge_idle(Utc::now());
            }
            _ = persist_timer.tick() => {
                if let Err(why) =
                    persist(&pool, &network_rx, &fleet, &config.persistence).await
                {
                    log::warn!("persistence pass failed: {}", why);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutdown requested");
                break;
            }
        }
    }

    fleet.shutdown().await;
    Ok(())
}

/// Write the latest published estimates (and optionally the particle
/// populations) back to the store.
async fn persist(
    pool: &SqlitePool,
    network_rx: &watch::Receiver<Arc<network::NetworkSnapshot>>,
    fleet: &Fleet,
    config: &config::PersistenceConfig,
) -> database::Result<()> {
    if config.network_stats {
        let snapshot = network_rx.borrow().clone();
        for (segment_id, estimate) in snapshot.segments() {
            stats::upsert_segment_stat(pool, *segment_id, &record(estimate)).await?;
        }
        for (intersection_id, estimate) in snapshot.intersections() {
            stats::upsert_intersection_stat(pool, *intersection_id, &record(estimate))
                .await?;
        }
    }

    if config.particles {
        for snapshot in fleet.particle_snapshots().await {
            let Some(timestamp) = snapshot.timestamp else {
                continue;
            };
            let rows: Vec<stats::ParticleRow> = snapshot
                .states
                .iter()
                .map(|&(distance, velocity, log_likelihood)| stats::ParticleRow {
                    distance,
                    velocity,
                    log_likelihood,
                })
                .collect();
            stats::insert_particle_snapshot(pool, &snapshot.vehicle_id, timestamp, &rows)
                .await?;
        }
    }
    Ok(())
}

fn record(estimate: &network::Estimate) -> StatRecord {
    StatRecord {
        mean: estimate.mean,
        variance: estimate.variance,
        updated: estimate.updated,
        count: estimate.count,
    }
}
