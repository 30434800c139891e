//! Effect estimation between experiment arms
//!
//! Effect is CONTROL mean paid minus TREATMENT mean paid: positive means the
//! review policy is saving money per claim. Significance comes from Welch's
//! unequal-variance t-test with a two-sided 95% confidence interval built on
//! the Welch–Satterthwaite degrees of freedom.

use crate::ledger::{Arm, ClaimRecord};
use crate::regression::{mean, median, sample_variance, welch_t_test};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum valid records per arm before any effect is reported
pub const MIN_ARM_SAMPLES: usize = 5;

/// Coverage of the reported confidence interval
pub const CONFIDENCE_LEVEL: f64 = 0.95;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectError {
    #[error(
        "insufficient data: {n_control} CONTROL and {n_treatment} TREATMENT records (need {min} per arm)"
    )]
    InsufficientData {
        n_control: usize,
        n_treatment: usize,
        min: usize,
    },
}

/// Aggregate paid statistics for one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSummary {
    pub arm: Arm,
    pub count: usize,
    pub mean_paid: f64,
    /// Unbiased sample variance
    pub variance: f64,
    /// Single-precision median, display only
    pub median_paid: Option<f64>,
}

impl ArmSummary {
    /// Summarize valid paid amounts; `None` when the arm has no valid records
    pub fn from_values(arm: Arm, values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        Some(Self {
            arm,
            count: values.len(),
            mean_paid: mean(values),
            variance: sample_variance(values),
            median_paid: median(values).ok(),
        })
    }
}

/// Welch significance result for an effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Significance {
    pub p_value: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub t_statistic: f64,
    pub df: f64,
}

/// TREATMENT vs CONTROL comparison over one ledger snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectEstimate {
    /// CONTROL mean paid minus TREATMENT mean paid
    pub effect: f64,
    pub n_control: usize,
    pub n_treatment: usize,
    pub control: ArmSummary,
    pub treatment: ArmSummary,
    /// `None` when the test is undefined (both arms with zero variance)
    pub significance: Option<Significance>,
}

/// Flat effect record handed to reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRecord {
    pub effect_per_claim: f64,
    pub p_value: Option<f64>,
    pub ci_low: Option<f64>,
    pub ci_high: Option<f64>,
    pub n_control: usize,
    pub n_treatment: usize,
    pub control_median_paid: Option<f64>,
    pub treatment_median_paid: Option<f64>,
}

impl From<&EffectEstimate> for EffectRecord {
    fn from(estimate: &EffectEstimate) -> Self {
        let sig = estimate.significance.as_ref();
        Self {
            effect_per_claim: estimate.effect,
            p_value: sig.map(|s| s.p_value),
            ci_low: sig.map(|s| s.ci_low),
            ci_high: sig.map(|s| s.ci_high),
            n_control: estimate.n_control,
            n_treatment: estimate.n_treatment,
            control_median_paid: estimate.control.median_paid,
            treatment_median_paid: estimate.treatment.median_paid,
        }
    }
}

/// Valid paid amounts for one arm
pub fn paid_amounts(records: &[ClaimRecord], arm: Arm) -> Vec<f64> {
    records
        .iter()
        .filter(|r| r.arm == arm)
        .filter_map(ClaimRecord::valid_paid)
        .collect()
}

/// Estimate the policy effect with the default per-arm minimum of 5
///
/// # Example
/// ```
/// use chrono::NaiveDate;
/// use rollout_guard::effect::{estimate, EffectError};
/// use rollout_guard::ledger::{Arm, ClaimRecord};
///
/// let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
/// let records = vec![
///     ClaimRecord::new("a", d, Arm::Control, 10.0),
///     ClaimRecord::new("b", d, Arm::Treatment, 8.0),
/// ];
/// assert!(matches!(estimate(&records), Err(EffectError::InsufficientData { .. })));
/// ```
pub fn estimate(records: &[ClaimRecord]) -> Result<EffectEstimate, EffectError> {
    estimate_with_min(records, MIN_ARM_SAMPLES)
}

/// Estimate the policy effect requiring `min_arm_n` valid records per arm
pub fn estimate_with_min(
    records: &[ClaimRecord],
    min_arm_n: usize,
) -> Result<EffectEstimate, EffectError> {
    let control = paid_amounts(records, Arm::Control);
    let treatment = paid_amounts(records, Arm::Treatment);

    let min = min_arm_n.max(2);
    let (Some(control_summary), Some(treatment_summary)) = (
        ArmSummary::from_values(Arm::Control, &control).filter(|s| s.count >= min),
        ArmSummary::from_values(Arm::Treatment, &treatment).filter(|s| s.count >= min),
    ) else {
        tracing::info!(
            n_control = control.len(),
            n_treatment = treatment.len(),
            min,
            "Insufficient samples for effect estimate"
        );
        return Err(EffectError::InsufficientData {
            n_control: control.len(),
            n_treatment: treatment.len(),
            min,
        });
    };

    let effect = control_summary.mean_paid - treatment_summary.mean_paid;

    let significance = welch_t_test(&control, &treatment)
        .and_then(|test| {
            let (ci_low, ci_high) = test.confidence_interval(CONFIDENCE_LEVEL)?;
            Ok(Significance {
                p_value: test.p_value,
                ci_low,
                ci_high,
                t_statistic: test.statistic,
                df: test.df,
            })
        })
        .map_err(|e| tracing::warn!("Significance could not be computed: {}", e))
        .ok();

    tracing::info!(
        effect,
        p_value = significance.as_ref().map(|s| s.p_value),
        n_control = control.len(),
        n_treatment = treatment.len(),
        "Estimated policy effect"
    );

    Ok(EffectEstimate {
        effect,
        n_control: control.len(),
        n_treatment: treatment.len(),
        control: control_summary,
        treatment: treatment_summary,
        significance,
    })
}

/// One row of the impact panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactRow {
    pub method: String,
    pub effect_per_claim: f64,
    pub p_value: Option<f64>,
    pub n_control: usize,
    pub n_treatment: usize,
}

pub const METHOD_DIFF_IN_MEANS: &str = "Unadjusted (Diff-in-Means)";
pub const METHOD_WELCH: &str = "Welch t-test";

/// Side-by-side effect estimates for reporting
///
/// Empty when either arm is below `min_arm_n`.
pub fn impact_panel(records: &[ClaimRecord], min_arm_n: usize) -> Vec<ImpactRow> {
    estimate_with_min(records, min_arm_n)
        .map(|estimate| impact_rows(&estimate))
        .unwrap_or_default()
}

/// Panel rows for an estimate already in hand
pub fn impact_rows(estimate: &EffectEstimate) -> Vec<ImpactRow> {
    vec![
        ImpactRow {
            method: METHOD_DIFF_IN_MEANS.to_string(),
            effect_per_claim: estimate.effect,
            p_value: None,
            n_control: estimate.n_control,
            n_treatment: estimate.n_treatment,
        },
        ImpactRow {
            method: METHOD_WELCH.to_string(),
            effect_per_claim: estimate.effect,
            p_value: estimate.significance.as_ref().map(|s| s.p_value),
            n_control: estimate.n_control,
            n_treatment: estimate.n_treatment,
        },
    ]
}
