// Per-segment regression detection
//
// Groups the ledger by each segment column, runs a Welch test per surviving
// segment, and corrects the resulting p-values with Benjamini–Hochberg.
// A segment alerts only when TREATMENT pays significantly MORE than CONTROL:
// an improvement is never a regression.

use crate::ledger::{Arm, ClaimRecord};
use crate::regression::config::SegmentConfig;
use crate::regression::fdr::benjamini_hochberg;
use crate::regression::statistics::welch_t_test;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One tested (segment column, segment value) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentAlert {
    pub segment_col: String,
    pub segment_value: String,
    pub n_control: usize,
    pub n_treatment: usize,
    /// CONTROL mean paid minus TREATMENT mean paid within the segment
    #[serde(rename = "effect_per_claim")]
    pub effect: f64,
    pub p_value: f64,
    /// Benjamini–Hochberg adjusted p-value
    pub q_value: f64,
    pub is_alert: bool,
}

/// Segment columns eligible for testing
///
/// A column qualifies when its distinct non-empty value count lies within
/// the configured cardinality bounds. Columns are returned in name order and
/// capped at `max_columns`.
pub fn candidate_columns(records: &[ClaimRecord], config: &SegmentConfig) -> Vec<String> {
    let mut distinct: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for record in records {
        for (column, value) in &record.segments {
            distinct.entry(column).or_default().insert(value);
        }
    }

    distinct
        .into_iter()
        .filter(|(column, values)| {
            let ok = (config.min_cardinality..=config.max_cardinality).contains(&values.len());
            if !ok {
                tracing::debug!(
                    column,
                    cardinality = values.len(),
                    "Excluding segment column outside cardinality bounds"
                );
            }
            ok
        })
        .map(|(column, _)| column.to_string())
        .take(config.max_columns)
        .collect()
}

/// Detect segments where TREATMENT regressed against CONTROL
///
/// Never fails: segments below the sample floors or with a degenerate test
/// are skipped, and an empty result is the expected common case.
///
/// Rows are ordered alerts first, then by ascending q-value.
///
/// # Example
/// ```
/// use rollout_guard::regression::{detect, SegmentConfig};
///
/// let alerts = detect(&[], &["channel".to_string()], &SegmentConfig::default());
/// assert!(alerts.is_empty());
/// ```
pub fn detect(
    records: &[ClaimRecord],
    segment_columns: &[String],
    config: &SegmentConfig,
) -> Vec<SegmentAlert> {
    let mut rows: Vec<SegmentAlert> = Vec::new();

    for column in segment_columns {
        let mut groups: BTreeMap<&str, Vec<&ClaimRecord>> = BTreeMap::new();
        for record in records {
            if let Some(value) = record.segment(column) {
                groups.entry(value).or_default().push(record);
            }
        }

        for (value, members) in groups {
            if members.len() < config.min_segment_n {
                tracing::debug!(
                    column = column.as_str(),
                    value,
                    n = members.len(),
                    "Skipping segment below min_segment_n"
                );
                continue;
            }

            let paid = |arm: Arm| -> Vec<f64> {
                members
                    .iter()
                    .filter(|r| r.arm == arm)
                    .filter_map(|r| r.valid_paid())
                    .collect()
            };
            let control = paid(Arm::Control);
            let treatment = paid(Arm::Treatment);

            if control.len() < config.min_arm_n || treatment.len() < config.min_arm_n {
                tracing::debug!(
                    column = column.as_str(),
                    value,
                    n_control = control.len(),
                    n_treatment = treatment.len(),
                    "Skipping segment below min_arm_n"
                );
                continue;
            }

            match welch_t_test(&control, &treatment) {
                Ok(test) => rows.push(SegmentAlert {
                    segment_col: column.clone(),
                    segment_value: value.to_string(),
                    n_control: control.len(),
                    n_treatment: treatment.len(),
                    effect: test.mean_difference,
                    p_value: test.p_value,
                    q_value: f64::NAN,
                    is_alert: false,
                }),
                Err(e) => {
                    tracing::warn!("Failed to test segment {}={}: {}", column, value, e);
                }
            }
        }
    }

    if rows.is_empty() {
        tracing::info!("No segments met the sample thresholds");
        return rows;
    }

    let p_values: Vec<f64> = rows.iter().map(|r| r.p_value).collect();
    let fdr = benjamini_hochberg(&p_values, config.alpha);

    for (row, q) in rows.iter_mut().zip(fdr.q_values) {
        row.q_value = q;
        row.is_alert = q <= config.alpha && row.effect < 0.0;
    }

    rows.sort_by(|a, b| {
        b.is_alert
            .cmp(&a.is_alert)
            .then(a.q_value.total_cmp(&b.q_value))
    });

    let alerts = rows.iter().filter(|r| r.is_alert).count();
    tracing::info!(
        tested = rows.len(),
        fdr_rejected = fdr.rejected,
        alerts,
        "Segment regression detection complete"
    );

    rows
}

/// Number of rows flagged as regressions
pub fn alert_count(rows: &[SegmentAlert]) -> usize {
    rows.iter().filter(|r| r.is_alert).count()
}
