use std::{error::Error, fmt};

use serde::Deserialize;

/// Tuning for the per-vehicle filters. Every field has a sensible default,
/// so a config file only needs to name what it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Particles per vehicle.
    pub particle_count: usize,
    /// GPS observation noise, meters.
    pub gps_sigma: f64,
    /// Velocity random-walk step, m/s.
    pub velocity_sigma: f64,
    /// Upper speed bound, m/s. Proposals outside (0, max) are rejected.
    pub max_velocity: f64,
    /// Half-width of the initial distance prior around the projected first
    /// fix, meters.
    pub prior_distance_margin: f64,
    /// Probability a particle dwells when it crosses a stop.
    pub stop_probability: f64,
    pub min_dwell_secs: f64,
    pub max_dwell_secs: f64,
    /// Mean dwell when neither the network estimate nor the schedule prior
    /// knows the stop yet.
    pub default_dwell_secs: f64,
    /// Queue probability per second of expected intersection delay.
    pub queue_probability_per_delay_sec: f64,
    pub max_queue_probability: f64,
    /// Queue probability at an intersection with no delay estimate yet.
    pub default_queue_probability: f64,
    /// Mean queue time at an intersection with no delay estimate yet, seconds.
    pub default_queue_delay_secs: f64,
    /// Minimum spacing between the two fixes of the direction check, seconds.
    pub direction_check_min_gap_secs: i64,
    /// A jump longer than this within `implausible_jump_secs` is discarded.
    pub implausible_jump_m: f64,
    pub implausible_jump_secs: i64,
    /// Resample only when the effective sample size falls to this fraction
    /// of the population.
    pub ess_threshold_fraction: f64,
    /// Highest normalised weight below which the population counts as
    /// degenerate.
    pub weight_floor: f64,
    /// Allowed deviation from a reported stop arrival before the penalty
    /// applies, seconds.
    pub arrival_tolerance_secs: i64,
    /// Log-likelihood penalty for particles outside the arrival tolerance.
    pub arrival_penalty: f64,
    /// Per-vehicle observation queue length.
    pub mailbox_capacity: usize,
    /// Vehicles unseen this long are purged, seconds.
    pub purge_timeout_secs: i64,
    /// Base seed for the per-vehicle generators; random when absent.
    pub seed: Option<u64>,
}

/// A parameter the filter mathematics cannot run on. Raised once at
/// startup; the engine refuses to start rather than panic mid-update.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub parameter: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.parameter, self.message)
    }
}

impl Error for ConfigError {}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(parameter: &'static str, value: f64) -> Result<(), ConfigError> {
            if value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError {
                    parameter,
                    message: format!("must be positive, got {}", value),
                })
            }
        }

        if self.particle_count == 0 {
            return Err(ConfigError {
                parameter: "particle_count",
                message: "at least one particle is required".to_owned(),
            });
        }
        positive("gps_sigma", self.gps_sigma)?;
        positive("velocity_sigma", self.velocity_sigma)?;
        positive("max_velocity", self.max_velocity)?;
        positive("prior_distance_margin", self.prior_distance_margin)?;
        positive("default_dwell_secs", self.default_dwell_secs)?;
        positive("default_queue_delay_secs", self.default_queue_delay_secs)?;
        if !(0.0..=1.0).contains(&self.stop_probability) {
            return Err(ConfigError {
                parameter: "stop_probability",
                message: format!("must be a probability, got {}", self.stop_probability),
            });
        }
        if self.min_dwell_secs < 0.0 || self.max_dwell_secs < self.min_dwell_secs {
            return Err(ConfigError {
                parameter: "min_dwell_secs",
                message: "dwell bounds must satisfy 0 <= min <= max".to_owned(),
            });
        }
        if !(0.0..=1.0).contains(&self.ess_threshold_fraction) {
            return Err(ConfigError {
                parameter: "ess_threshold_fraction",
                message: format!(
                    "must be a fraction of the population, got {}",
                    self.ess_threshold_fraction
                ),
            });
        }
        Ok(())
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            particle_count: 500,
            gps_sigma: 5.0,
            velocity_sigma: 2.0,
            max_velocity: 30.0,
            prior_distance_margin: 200.0,
            stop_probability: 0.5,
            min_dwell_secs: 6.0,
            max_dwell_secs: 120.0,
            default_dwell_secs: 20.0,
            queue_probability_per_delay_sec: 0.02,
            max_queue_probability: 0.9,
            default_queue_probability: 0.3,
            default_queue_delay_secs: 15.0,
            direction_check_min_gap_secs: 10,
            implausible_jump_m: 500.0,
            implausible_jump_secs: 10,
            ess_threshold_fraction: 0.5,
            weight_floor: 1e-9,
            arrival_tolerance_secs: 60,
            arrival_penalty: 20.0,
            mailbox_capacity: 4,
            purge_timeout_secs: 1800,
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: FilterConfig =
            serde_json::from_str(r#"{"particle_count": 50, "gps_sigma": 10.0}"#).unwrap();
        assert_eq!(config.particle_count, 50);
        assert_eq!(config.gps_sigma, 10.0);
        assert_eq!(config.max_velocity, 30.0);
        assert_eq!(config.stop_probability, 0.5);
        config.validate().unwrap();
    }

    #[test]
    fn invalid_parameters_refuse_startup() {
        let mut config = FilterConfig::default();
        config.velocity_sigma = 0.0;
        assert_eq!(config.validate().unwrap_err().parameter, "velocity_sigma");

        let mut config = FilterConfig::default();
        config.particle_count = 0;
        assert!(config.validate().is_err());

        let mut config = FilterConfig::default();
        config.stop_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = FilterConfig::default();
        config.max_dwell_secs = 1.0;
        assert!(config.validate().is_err());
    }
}
