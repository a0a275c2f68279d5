//! Writeback of network estimates and particle snapshots.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::Result;

/// One published segment or intersection estimate.
#[derive(Debug, Clone)]
pub struct StatRecord {
    pub mean: f64,
    pub variance: f64,
    pub updated: DateTime<Utc>,
    pub count: u64,
}

/// One particle's state at snapshot time.
#[derive(Debug, Clone)]
pub struct ParticleRow {
    pub distance: f64,
    pub velocity: f64,
    pub log_likelihood: f64,
}

pub async fn ensure_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS segment_stats (
            segment_id INTEGER PRIMARY KEY,
            mean REAL NOT NULL,
            variance REAL NOT NULL,
            timestamp INTEGER NOT NULL,
            n INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS intersection_stats (
            intersection_id INTEGER PRIMARY KEY,
            mean REAL NOT NULL,
            variance REAL NOT NULL,
            timestamp INTEGER NOT NULL,
            n INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS particle_snapshots (
            vehicle_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            distance REAL NOT NULL,
            velocity REAL NOT NULL,
            log_likelihood REAL NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn upsert_segment_stat(
    pool: &SqlitePool,
    segment_id: u64,
    record: &StatRecord,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO segment_stats (segment_id, mean, variance, timestamp, n)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(segment_id) DO UPDATE SET
            mean = excluded.mean,
            variance = excluded.variance,
            timestamp = excluded.timestamp,
            n = excluded.n",
    )
    .bind(segment_id as i64)
    .bind(record.mean)
    .bind(record.variance)
    .bind(record.updated.timestamp())
    .bind(record.count as i64)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn upsert_intersection_stat(
    pool: &SqlitePool,
    intersection_id: u64,
    record: &StatRecord,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO intersection_stats (intersection_id, mean, variance, timestamp, n)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(intersection_id) DO UPDATE SET
            mean = excluded.mean,
            variance = excluded.variance,
            timestamp = excluded.timestamp,
            n = excluded.n",
    )
    .bind(intersection_id as i64)
    .bind(record.mean)
    .bind(record.variance)
    .bind(record.updated.timestamp())
    .bind(record.count as i64)
    .execute(pool)
    .await?;
    Ok(())
}

/// Append one vehicle's particle population.
pub async fn insert_particle_snapshot(
    pool: &SqlitePool,
    vehicle_id: &str,
    timestamp: DateTime<Utc>,
    particles: &[ParticleRow],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    for particle in particles {
        sqlx::query(
            "INSERT INTO particle_snapshots
                (vehicle_id, timestamp, distance, velocity, log_likelihood)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(vehicle_id)
        .bind(timestamp.timestamp())
        .bind(particle.distance)
        .bind(particle.velocity)
        .bind(particle.log_likelihood)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
