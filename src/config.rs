//! Parameters consumed by the Cluster stage.
//!
//! Values are validated once, at the boundary of the stage, before any
//! computation begins. Every stage receives its parameters explicitly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest value the Pearson distance can take.
pub const MAX_PEARSON_DISTANCE: f64 = 2.0;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("max_dist must lie in [0, 2], got {0}")]
    MaxDistOutOfRange(f64),

    #[error("min_samples must be a whole number >= 1, got {0}")]
    InvalidMinSamples(f64),

    #[error("{name} must be a non-negative number, got {value}")]
    NegativeThreshold { name: &'static str, value: f64 },
}

/// Density and filtering parameters of a Cluster invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterParams {
    /// Maximum Pearson distance between two reads to be neighbours.
    pub max_dist: f64,
    /// Minimum neighbourhood size (the point itself included) of a core point.
    pub min_samples: usize,
    /// Minimum number of reads a bin needs to be retained.
    pub min_reads_bin: f64,
    /// Minimum total abundance a bin needs to be retained.
    pub min_abund_bin: f64,
    /// Worker threads for the distance and neighbourhood passes.
    pub cpu: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        ClusterParams {
            max_dist: 0.1,
            min_samples: 1,
            min_reads_bin: 10.0,
            min_abund_bin: 10.0,
            cpu: 1,
        }
    }
}

impl ClusterParams {
    /// Builds validated parameters from raw user values.
    ///
    /// `min_samples` arrives as a float (the way it is exposed on the command
    /// line) and is rejected unless it is a whole number >= 1. A `cpu` of zero
    /// selects every logical CPU.
    pub fn new(
        max_dist: f64,
        min_samples: f64,
        min_reads_bin: f64,
        min_abund_bin: f64,
        cpu: usize,
    ) -> Result<Self, ConfigError> {
        if !min_samples.is_finite() || min_samples < 1.0 || min_samples.fract() != 0.0 {
            return Err(ConfigError::InvalidMinSamples(min_samples));
        }
        let params = ClusterParams {
            max_dist,
            min_samples: min_samples as usize,
            min_reads_bin,
            min_abund_bin,
            cpu: if cpu == 0 { num_cpus::get() } else { cpu },
        };
        params.validate()?;
        Ok(params)
    }

    /// Checks every value against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=MAX_PEARSON_DISTANCE).contains(&self.max_dist) {
            return Err(ConfigError::MaxDistOutOfRange(self.max_dist));
        }
        if self.min_samples == 0 {
            return Err(ConfigError::InvalidMinSamples(0.0));
        }
        for (name, value) in [
            ("min_reads_bin", self.min_reads_bin),
            ("min_abund_bin", self.min_abund_bin),
        ] {
            if !(value >= 0.0) {
                return Err(ConfigError::NegativeThreshold { name, value });
            }
        }
        Ok(())
    }

    /// Whether reads reachable from no core point are labelled noise.
    pub fn produces_noise(&self) -> bool {
        self.min_samples > 1
    }
}
