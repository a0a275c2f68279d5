//! SQLite schedule store: loads the preprocessed GTFS schedule into a
//! validated [`model::Catalogue`] and persists network statistics back.
//!
//! The preprocessing step that splits route shapes at intersections runs
//! elsewhere; this crate only consumes its output tables.

use std::{error::Error, fmt};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
pub use sqlx::sqlite::SqlitePool;

pub mod data_model;
pub mod loader;
pub mod queries;
pub mod stats;

pub use loader::load_catalogue;

#[derive(Debug)]
pub enum DatabaseError {
    /// The store itself failed (connection, malformed SQL, ...).
    Sqlx(sqlx::Error),
    /// A row that cannot be turned into a model entity.
    Malformed { table: &'static str, detail: String },
    /// The loaded schedule violates a model invariant.
    Model(model::ModelError),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlx(why) => write!(f, "database error: {}", why),
            Self::Malformed { table, detail } => {
                write!(f, "malformed row in {}: {}", table, detail)
            }
            Self::Model(why) => write!(f, "schedule invalid: {}", why),
        }
    }
}

impl Error for DatabaseError {}

impl From<sqlx::Error> for DatabaseError {
    fn from(why: sqlx::Error) -> Self {
        Self::Sqlx(why)
    }
}

impl From<model::ModelError> for DatabaseError {
    fn from(why: model::ModelError) -> Self {
        Self::Model(why)
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Open a pooled connection to the schedule database.
pub async fn connect(path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;
    log::info!("connected to schedule database {}", path);
    Ok(pool)
}

/// The id pattern selecting one schedule version, e.g. `%_v54.27`.
pub(crate) fn version_pattern(version: &str) -> String {
    format!("%_v{}", version)
}
