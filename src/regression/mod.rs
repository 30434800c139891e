// Segment Regression Detection with Multiple-Testing Correction
//
// A policy that saves money on average can still hurt a slice of the book:
// one channel, one product line. This module tests every low-cardinality
// segment independently and controls the false discovery rate across all of
// them, so a rollout is only reverted for regressions that survive the
// correction.
//
// Scientific Foundation:
// [1] Welch, B. L. (1947). The generalization of "Student's" problem when
//     several different population variances are involved. Biometrika 34.
//
// [2] Benjamini, Y., & Hochberg, Y. (1995). Controlling the false discovery
//     rate: a practical and powerful approach to multiple testing. JRSS-B 57.
//
// Implementation:
// - Welch's t-test and confidence intervals in f64, t quantiles from statrs
// - Medians through aprender's DescriptiveStats over trueno vectors
// - BH step-up with monotone q-values for every tested segment

mod config;
mod detector;
mod fdr;
mod statistics;

pub use config::SegmentConfig;
pub use detector::{alert_count, candidate_columns, detect, SegmentAlert};
pub use fdr::{benjamini_hochberg, FdrCorrection};
pub use statistics::{mean, median, sample_variance, t_critical, welch_t_test, WelchTest};
