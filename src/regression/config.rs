// Configuration for segment regression detection
//
// Sample-size floors bound the noise of each per-segment test; alpha is the
// false discovery rate controlled across all segments of one cycle.

use serde::{Deserialize, Serialize};

/// Thresholds for the segment regression detector
///
/// # Example
/// ```
/// use rollout_guard::regression::SegmentConfig;
///
/// let config = SegmentConfig::default();
/// assert_eq!(config.alpha, 0.10);
/// assert_eq!(config.min_segment_n, 50);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Minimum records in a segment (both arms together) before it is tested
    pub min_segment_n: usize,

    /// Minimum valid records per arm within a segment
    pub min_arm_n: usize,

    /// Benjamini–Hochberg false discovery rate level
    ///
    /// - 0.10 (default): tolerate one false alert in ten flagged segments
    /// - 0.05: stricter, fewer rollbacks from noisy segments
    pub alpha: f64,

    /// Upper bound on automatically discovered segment columns
    pub max_columns: usize,

    /// Smallest distinct-value count for a discovered segment column
    pub min_cardinality: usize,

    /// Largest distinct-value count for a discovered segment column
    ///
    /// Attributes above this (claim ids, zip codes) would explode the number
    /// of tests and dilute the FDR correction.
    pub max_cardinality: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            min_segment_n: 50,
            min_arm_n: 20,
            alpha: 0.10,
            max_columns: 8,
            min_cardinality: 2,
            max_cardinality: 30,
        }
    }
}

impl SegmentConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(format!("segment alpha must be in (0, 1], got {}", self.alpha));
        }

        if self.min_arm_n < 2 {
            return Err(format!(
                "segment min_arm_n must be >= 2 for t-test, got {}",
                self.min_arm_n
            ));
        }

        if self.min_cardinality < 2 || self.min_cardinality > self.max_cardinality {
            return Err(format!(
                "segment cardinality bounds must satisfy 2 <= min <= max, got [{}, {}]",
                self.min_cardinality, self.max_cardinality
            ));
        }

        Ok(())
    }
}
