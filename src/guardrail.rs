//! Guardrail decision engine
//!
//! Maps one cycle's evidence to GO, HOLD or ROLLBACK. Checks run in a fixed
//! priority order and stop at the first terminal branch:
//!
//! 1. no effect estimate                        -> HOLD     `missing_effect`
//! 2. effect <= 0                               -> ROLLBACK `effect_non_positive`
//! 3. no significance result                    -> HOLD     `missing_significance`
//! 4. p >= level and CI lower bound <= 0        -> HOLD     `not_significant`
//! 5. one or more segment alerts                -> ROLLBACK `segment_alerts=N`
//! 6. otherwise                                 -> GO
//!
//! Active harm resolves to ROLLBACK; HOLD only ever means the evidence is
//! inconclusive. Nothing is carried over between cycles.

use crate::effect::EffectEstimate;
use crate::regression::{alert_count, SegmentAlert};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Rollout gate for one decision cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Go,
    Hold,
    Rollback,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decision::Go => "GO",
            Decision::Hold => "HOLD",
            Decision::Rollback => "ROLLBACK",
        })
    }
}

/// Decision plus the ordered trail of checks that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailDecision {
    pub decision: Decision,
    pub reasons: Vec<String>,
}

impl GuardrailDecision {
    /// Reasons joined for the audit record
    pub fn reasons_joined(&self) -> String {
        self.reasons.join(" | ")
    }

    pub fn has_reason(&self, prefix: &str) -> bool {
        self.reasons.iter().any(|r| r.starts_with(prefix))
    }

    /// Flat record handed to reporting
    pub fn to_record(&self) -> GuardrailRecord {
        GuardrailRecord {
            decision: self.decision,
            reasons: self.reasons_joined(),
        }
    }
}

/// `{decision, reasons}` with reasons joined by ` | `
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailRecord {
    pub decision: Decision,
    pub reasons: String,
}

/// Numbers the guardrail looks at
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardrailEvidence {
    pub effect: Option<f64>,
    pub p_value: Option<f64>,
    pub ci_low: Option<f64>,
    pub segment_alerts: usize,
}

impl GuardrailEvidence {
    /// Collect evidence from an estimator result and a segment alert table
    pub fn from_cycle(estimate: Option<&EffectEstimate>, segments: &[SegmentAlert]) -> Self {
        let significance = estimate.and_then(|e| e.significance.as_ref());
        Self {
            effect: estimate.map(|e| e.effect),
            p_value: significance.map(|s| s.p_value),
            ci_low: significance.map(|s| s.ci_low),
            segment_alerts: alert_count(segments),
        }
    }
}

/// Stateless decision engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Guardrail {
    pub significance_level: f64,
}

impl Default for Guardrail {
    fn default() -> Self {
        Self {
            significance_level: DEFAULT_SIGNIFICANCE_LEVEL,
        }
    }
}

impl Guardrail {
    pub fn new(significance_level: f64) -> Self {
        Self { significance_level }
    }

    /// Evaluate one cycle's evidence
    ///
    /// # Example
    /// ```
    /// use rollout_guard::guardrail::{Decision, Guardrail, GuardrailEvidence};
    ///
    /// let evidence = GuardrailEvidence {
    ///     effect: Some(15000.0),
    ///     p_value: Some(0.02),
    ///     ci_low: Some(2100.0),
    ///     segment_alerts: 0,
    /// };
    /// assert_eq!(Guardrail::default().evaluate(&evidence).decision, Decision::Go);
    /// ```
    pub fn evaluate(&self, evidence: &GuardrailEvidence) -> GuardrailDecision {
        let mut reasons = Vec::new();

        let Some(effect) = evidence.effect else {
            reasons.push("missing_effect".to_string());
            return self.emit(Decision::Hold, reasons);
        };
        reasons.push("effect_source=Welch".to_string());

        if effect.is_nan() || effect <= 0.0 {
            reasons.push(format!("effect_non_positive={:.2}", effect));
            return self.emit(Decision::Rollback, reasons);
        }

        let Some(p_value) = evidence.p_value.filter(|p| !p.is_nan()) else {
            reasons.push("missing_significance".to_string());
            return self.emit(Decision::Hold, reasons);
        };

        let ci_positive = evidence.ci_low.is_some_and(|lo| lo > 0.0);
        if !(p_value < self.significance_level || ci_positive) {
            let ci = evidence
                .ci_low
                .map_or_else(|| "none".to_string(), |lo| format!("{:.2}", lo));
            reasons.push(format!(
                "not_significant(p={}, ci_lo={})",
                format_p(p_value),
                ci
            ));
            return self.emit(Decision::Hold, reasons);
        }
        reasons.push(format!("significant(p={})", format_p(p_value)));

        reasons.push(format!("segment_alerts={}", evidence.segment_alerts));
        if evidence.segment_alerts > 0 {
            return self.emit(Decision::Rollback, reasons);
        }

        self.emit(Decision::Go, reasons)
    }

    fn emit(&self, decision: Decision, reasons: Vec<String>) -> GuardrailDecision {
        let out = GuardrailDecision { decision, reasons };
        match decision {
            Decision::Go => tracing::info!(reasons = %out.reasons_joined(), "Guardrail: GO"),
            Decision::Hold => tracing::warn!(reasons = %out.reasons_joined(), "Guardrail: HOLD"),
            Decision::Rollback => {
                tracing::warn!(reasons = %out.reasons_joined(), "Guardrail: ROLLBACK")
            }
        }
        out
    }
}

/// Four significant digits, scientific below 1e-4
fn format_p(p: f64) -> String {
    if p != 0.0 && p.abs() < 1e-4 {
        format!("{:.3e}", p)
    } else {
        format!("{:.4}", p)
    }
}
