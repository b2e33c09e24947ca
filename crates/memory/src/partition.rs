//! Partition key computation.
//!
//! `compute_key` is a pure function: identical discretized inputs always
//! produce an identical key, which is what makes partition-based
//! retrieval usable as a cache.

use serde::{Deserialize, Serialize};

use crate::types::{Dim, PartitionKey};

const DAY_MS: u64 = 86_400_000;
const WEEK_MS: u64 = 7 * DAY_MS;

/// Time-bucket granularity for the time dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGranularity {
    #[default]
    Day,
    Week,
}

/// Discrete complexity bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityBand {
    Low,
    Medium,
    High,
    Critical,
}

impl ComplexityBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityBand::Low => "low",
            ComplexityBand::Medium => "medium",
            ComplexityBand::High => "high",
            ComplexityBand::Critical => "critical",
        }
    }
}

/// Thresholds and granularity for key discretization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    #[serde(default)]
    pub time_granularity: TimeGranularity,

    /// Complexity strictly below this is `low`
    #[serde(default = "default_low_max")]
    pub complexity_low_max: f64,

    /// Complexity strictly below this (and >= low) is `medium`
    #[serde(default = "default_medium_max")]
    pub complexity_medium_max: f64,

    /// Complexity strictly below this (and >= medium) is `high`;
    /// everything else is `critical`
    #[serde(default = "default_high_max")]
    pub complexity_high_max: f64,
}

fn default_low_max() -> f64 {
    5.0
}

fn default_medium_max() -> f64 {
    15.0
}

fn default_high_max() -> f64 {
    30.0
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            time_granularity: TimeGranularity::default(),
            complexity_low_max: default_low_max(),
            complexity_medium_max: default_medium_max(),
            complexity_high_max: default_high_max(),
        }
    }
}

impl PartitionConfig {
    /// Thresholds must be strictly ascending for bands to be disjoint.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.complexity_low_max < self.complexity_medium_max
            && self.complexity_medium_max < self.complexity_high_max)
        {
            return Err(format!(
                "complexity thresholds must be strictly ascending: {} < {} < {}",
                self.complexity_low_max, self.complexity_medium_max, self.complexity_high_max
            ));
        }
        Ok(())
    }
}

/// The raw inputs a key is computed from.
#[derive(Debug, Clone)]
pub struct Observation<'a> {
    pub project: &'a str,
    pub language: Option<&'a str>,
    pub pattern_type: &'a str,
    pub agent_id: &'a str,
    pub domain: Option<&'a str>,
    /// Unix millis
    pub timestamp: u64,
    pub complexity: Option<f64>,
}

/// Computes partition keys from observations.
#[derive(Debug, Clone, Default)]
pub struct PartitionManager {
    config: PartitionConfig,
}

impl PartitionManager {
    pub fn new(config: PartitionConfig) -> Self {
        Self { config }
    }

    /// Deterministically discretize an observation into a key.
    ///
    /// Missing language/domain/complexity map to the wildcard dimension
    /// so records without those attributes still land in a queryable
    /// partition.
    pub fn compute_key(&self, obs: &Observation<'_>) -> PartitionKey {
        PartitionKey {
            project: Dim::value(obs.project),
            language: obs.language.map(Dim::value).unwrap_or_default(),
            pattern_type: Dim::value(obs.pattern_type),
            agent_id: Dim::value(obs.agent_id),
            time_bucket: Dim::value(self.time_bucket(obs.timestamp)),
            complexity_band: obs
                .complexity
                .map(|c| Dim::value(self.complexity_band(c).as_str()))
                .unwrap_or_default(),
            domain: obs.domain.map(Dim::value).unwrap_or_default(),
        }
    }

    /// Bucket a timestamp into a day or week window.
    pub fn time_bucket(&self, timestamp: u64) -> String {
        match self.config.time_granularity {
            TimeGranularity::Day => format!("d{}", timestamp / DAY_MS),
            TimeGranularity::Week => format!("w{}", timestamp / WEEK_MS),
        }
    }

    /// Band a raw complexity value using the configured thresholds.
    pub fn complexity_band(&self, complexity: f64) -> ComplexityBand {
        if complexity < self.config.complexity_low_max {
            ComplexityBand::Low
        } else if complexity < self.config.complexity_medium_max {
            ComplexityBand::Medium
        } else if complexity < self.config.complexity_high_max {
            ComplexityBand::High
        } else {
            ComplexityBand::Critical
        }
    }
}
