//! Confidence calibration from accuracy history.
//!
//! Blends a record's historical accuracy with a recency decay: a
//! Laplace-style prior keeps zero-history records at the configured
//! neutral value, and observations older than the half-life count for
//! progressively less.

use serde::{Deserialize, Serialize};

use crate::types::AccuracyObservation;

/// Calibration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// Confidence of a record with no history
    #[serde(default = "default_neutral_prior")]
    pub neutral_prior: f64,

    /// Pseudo-count weight of the prior; higher values make new
    /// observations move confidence more slowly
    #[serde(default = "default_prior_weight")]
    pub prior_weight: f64,

    /// Age at which an observation's weight halves (millis)
    #[serde(default = "default_half_life_ms")]
    pub half_life_ms: u64,
}

fn default_neutral_prior() -> f64 {
    0.5
}

fn default_prior_weight() -> f64 {
    2.0
}

fn default_half_life_ms() -> u64 {
    7 * 86_400_000 // one week
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            neutral_prior: default_neutral_prior(),
            prior_weight: default_prior_weight(),
            half_life_ms: default_half_life_ms(),
        }
    }
}

impl ScorerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.neutral_prior) {
            return Err(format!(
                "neutral_prior must be in [0, 1], got {}",
                self.neutral_prior
            ));
        }
        if self.prior_weight <= 0.0 {
            return Err(format!(
                "prior_weight must be positive, got {}",
                self.prior_weight
            ));
        }
        if self.half_life_ms == 0 {
            return Err("half_life_ms must be non-zero".into());
        }
        Ok(())
    }
}

/// Converts accuracy history into a calibrated [0, 1] confidence.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    config: ScorerConfig,
}

impl ConfidenceScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    /// Calibrate confidence for a history as of `now`.
    ///
    /// Each observation carries weight `0.5^(age / half_life)`. The
    /// result is `(prior_weight * prior + accurate_weight) /
    /// (prior_weight + total_weight)`, clamped to [0, 1]. Empty history
    /// yields exactly the neutral prior, and adding an accurate
    /// observation never decreases the result.
    pub fn calibrate(&self, history: &[AccuracyObservation], now: u64) -> f64 {
        let mut total_weight = 0.0;
        let mut accurate_weight = 0.0;

        for obs in history {
            let age = now.saturating_sub(obs.timestamp) as f64;
            let weight = 0.5_f64.powf(age / self.config.half_life_ms as f64);
            total_weight += weight;
            if obs.accurate() {
                accurate_weight += weight;
            }
        }

        let blended = (self.config.prior_weight * self.config.neutral_prior + accurate_weight)
            / (self.config.prior_weight + total_weight);

        blended.clamp(0.0, 1.0)
    }
}
