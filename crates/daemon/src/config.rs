use std::{fs, path::Path};

use engine::FilterConfig;
use serde::Deserialize;

/// Everything the daemon needs, read from one JSON file. Only the feed URL
/// is mandatory; the rest falls back to defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    /// Schedule version filter, e.g. "54.27"; everything when absent.
    pub version: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "gtfs.db".to_owned(),
            version: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    #[serde(default = "default_poll_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Write segment/intersection estimates back to the database.
    pub network_stats: bool,
    /// Also snapshot every vehicle's particle population.
    pub particles: bool,
    pub interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            network_stats: true,
            particles: false,
            interval_secs: 300,
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
