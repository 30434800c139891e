//! Deterministic experiment assignment
//!
//! A claim's arm is a pure function of `(claim_id, salt, control_rate)`:
//! SHA-256 over `salt:claim_id`, the leading 32 bits read as an unsigned
//! integer and scaled into [0, 1). No shared state, so any number of scoring
//! workers can assign in parallel and agree on every claim.
//!
//! The review policy applied at scoring time lives here as well, since it is
//! the only other per-claim decision taken with the current policy state.

use crate::ledger::{Arm, ClaimDecision, ClaimRecord};
use crate::policy::{PolicyMode, PolicyState};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// 2^32, so the bucket of the largest 32-bit value stays below 1.0
const BUCKET_SCALE: f64 = 4_294_967_296.0;

fn digest(claim_id: &str, salt: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(claim_id.as_bytes());
    hasher.finalize().into()
}

/// Hex digest of `salt:claim_id`, logged by `assign` for audit
pub fn digest_hex(claim_id: &str, salt: &str) -> String {
    hex::encode(digest(claim_id, salt))
}

/// Position of a claim in [0, 1) for the given salt
pub fn bucket(claim_id: &str, salt: &str) -> f64 {
    let d = digest(claim_id, salt);
    let prefix = u32::from_be_bytes([d[0], d[1], d[2], d[3]]);
    f64::from(prefix) / BUCKET_SCALE
}

/// Assign a claim to CONTROL or TREATMENT
///
/// # Example
/// ```
/// use rollout_guard::assignment::assign;
/// use rollout_guard::ledger::Arm;
///
/// let arm = assign("C0000042", "fraud-exp-v1", 0.10);
/// assert_eq!(arm, assign("C0000042", "fraud-exp-v1", 0.10));
/// assert_eq!(assign("C0000042", "fraud-exp-v1", 0.0), Arm::Treatment);
/// assert_eq!(assign("C0000042", "fraud-exp-v1", 1.0), Arm::Control);
/// ```
pub fn assign(claim_id: &str, salt: &str, control_rate: f64) -> Arm {
    if bucket(claim_id, salt) < control_rate {
        Arm::Control
    } else {
        Arm::Treatment
    }
}

/// Review policy: only TREATMENT claims in EXPERIMENT mode are ever reviewed
pub fn review_decision(
    arm: Arm,
    score: Option<f64>,
    mode: PolicyMode,
    threshold: f64,
) -> ClaimDecision {
    match (mode, arm, score) {
        (PolicyMode::Experiment, Arm::Treatment, Some(s)) if s >= threshold => {
            ClaimDecision::Review
        }
        _ => ClaimDecision::Pay,
    }
}

/// REVIEW records ordered by descending score, truncated to `cap`
pub fn review_queue(records: &[ClaimRecord], cap: usize) -> Vec<&ClaimRecord> {
    let mut queue: Vec<&ClaimRecord> = records
        .iter()
        .filter(|r| r.decision == ClaimDecision::Review)
        .collect();
    queue.sort_by(|a, b| {
        let sa = a.risk_score.unwrap_or(0.0);
        let sb = b.risk_score.unwrap_or(0.0);
        sb.total_cmp(&sa)
    });
    queue.truncate(cap);
    queue
}

/// A claim as it leaves the scorer, before policy is applied
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredClaim {
    pub claim_id: String,
    pub claim_date: NaiveDate,
    pub paid_amount: f64,
    pub risk_score: Option<f64>,
    pub segments: BTreeMap<String, String>,
}

/// Applies the current policy to scored claims
///
/// Stamps each ledger record with the policy version, mode and control rate
/// in force, so every row can be traced back to the registry entry that
/// produced it.
#[derive(Debug, Clone)]
pub struct Assigner {
    salt: String,
    policy: PolicyState,
    review_threshold: f64,
}

impl Assigner {
    pub fn new(salt: impl Into<String>, policy: PolicyState, review_threshold: f64) -> Self {
        Self {
            salt: salt.into(),
            policy,
            review_threshold,
        }
    }

    pub fn arm(&self, claim_id: &str) -> Arm {
        assign(claim_id, &self.salt, self.policy.control_rate)
    }

    pub fn apply(&self, claim: ScoredClaim) -> ClaimRecord {
        let arm = self.arm(&claim.claim_id);
        let decision = review_decision(
            arm,
            claim.risk_score,
            self.policy.mode,
            self.review_threshold,
        );

        ClaimRecord {
            claim_id: claim.claim_id,
            claim_date: claim.claim_date,
            arm,
            paid_amount: claim.paid_amount,
            decision,
            risk_score: claim.risk_score,
            policy_version: Some(self.policy.policy_version.clone()),
            mode: Some(self.policy.mode),
            control_rate: Some(self.policy.control_rate),
            segments: claim.segments,
        }
    }

    pub fn apply_batch(&self, claims: Vec<ScoredClaim>) -> Vec<ClaimRecord> {
        let records: Vec<ClaimRecord> = claims.into_iter().map(|c| self.apply(c)).collect();
        let control = records.iter().filter(|r| r.arm == Arm::Control).count();
        tracing::info!(
            policy_version = %self.policy.policy_version,
            control_rate = self.policy.control_rate,
            claims = records.len(),
            control,
            "Assigned scoring batch"
        );
        records
    }
}
