//! Guard configuration loaded from TOML
//!
//! Every knob of a decision cycle lives here: the experiment salt, the stage
//! ladder, the guardrail significance level and the segment detector
//! thresholds. Missing keys fall back to the defaults below.

use crate::regression::SegmentConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for one rollout-guard deployment
///
/// # Example
/// ```
/// use rollout_guard::config::GuardConfig;
///
/// let config = GuardConfig::default();
/// assert_eq!(config.stages, vec![0.10, 0.05, 0.02, 0.00]);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Salt mixed into every assignment hash. Changing it re-randomizes arms.
    pub experiment_salt: String,

    /// Control rate written into a freshly bootstrapped registry
    pub default_control_rate: f64,

    /// Descending control rates walked on each GO decision
    pub stages: Vec<f64>,

    /// Control rate restored on ROLLBACK
    pub rollback_to: f64,

    /// Minimum valid records per arm before an effect is estimated
    pub min_arm_n: usize,

    /// Welch p-value threshold used by the guardrail
    pub significance_level: f64,

    /// Calibrated fraud probability at or above which TREATMENT claims are reviewed
    pub review_threshold: f64,

    /// Review queue capacity per batch
    pub max_daily_reviews: usize,

    /// Month-to-date savings target for KPI progress (reporting only)
    pub target_mtd_saving: f64,

    /// Quarter-to-date savings target for KPI progress (reporting only)
    pub target_qtd_saving: f64,

    /// Location of the JSON policy registry
    pub registry_path: PathBuf,

    /// Segment regression detector thresholds
    pub segment: SegmentConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            experiment_salt: "fraud-exp-v1".to_string(),
            default_control_rate: 0.10,
            stages: vec![0.10, 0.05, 0.02, 0.00],
            rollback_to: 0.10,
            min_arm_n: 5,
            significance_level: 0.05,
            review_threshold: 0.85,
            max_daily_reviews: 500,
            target_mtd_saving: 200_000_000.0,
            target_qtd_saving: 600_000_000.0,
            registry_path: PathBuf::from("models/policy_registry.json"),
            segment: SegmentConfig::default(),
        }
    }
}

impl GuardConfig {
    /// Load configuration from a TOML file, filling gaps with defaults
    ///
    /// # Example TOML
    /// ```toml
    /// experiment_salt = "fraud-exp-v2"
    /// stages = [0.20, 0.10, 0.00]
    /// rollback_to = 0.20
    ///
    /// [segment]
    /// alpha = 0.05
    /// ```
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;
        let config: GuardConfig =
            toml::from_str(&content).context("Failed to parse TOML guard configuration")?;
        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let rate_ok = |r: f64| (0.0..=1.0).contains(&r);

        if !rate_ok(self.default_control_rate) {
            return Err(format!(
                "default_control_rate must be in [0, 1], got {}",
                self.default_control_rate
            ));
        }

        if !rate_ok(self.rollback_to) {
            return Err(format!(
                "rollback_to must be in [0, 1], got {}",
                self.rollback_to
            ));
        }

        if self.stages.is_empty() {
            return Err("stages must not be empty".to_string());
        }

        if let Some(bad) = self.stages.iter().find(|r| !rate_ok(**r)) {
            return Err(format!("stage rates must be in [0, 1], got {}", bad));
        }

        if self.stages.windows(2).any(|w| w[1] >= w[0]) {
            return Err(format!(
                "stages must be strictly descending, got {:?}",
                self.stages
            ));
        }

        if self.min_arm_n < 2 {
            return Err(format!(
                "min_arm_n must be >= 2 for a t-test, got {}",
                self.min_arm_n
            ));
        }

        if !(self.significance_level > 0.0 && self.significance_level < 1.0) {
            return Err(format!(
                "significance_level must be in (0, 1), got {}",
                self.significance_level
            ));
        }

        if !rate_ok(self.review_threshold) {
            return Err(format!(
                "review_threshold must be in [0, 1], got {}",
                self.review_threshold
            ));
        }

        self.segment.validate()
    }
}
