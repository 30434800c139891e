//! One decision cycle: Estimate -> Detect -> Decide -> Rollout
//!
//! Each stage takes the previous stage's typed output. The ledger snapshot is
//! borrowed immutably for the whole cycle, and the only side effect is the
//! single registry transaction inside the rollout controller.

use crate::config::GuardConfig;
use crate::effect::{estimate_with_min, impact_rows, EffectEstimate, EffectRecord, ImpactRow};
use crate::guardrail::{Guardrail, GuardrailDecision, GuardrailEvidence};
use crate::ledger::ClaimRecord;
use crate::policy::RegistryStore;
use crate::regression::{candidate_columns, detect, SegmentAlert};
use crate::rollout::{RolloutController, RolloutOutcome};
use crate::telemetry::{ops_kpis, saving_kpis, OpsKpi, SavingKpi};
use anyhow::{Context, Result};
use serde::{Serialize, Serializer};

/// Everything the cycle derives before touching the registry
#[derive(Debug, Clone)]
pub struct CycleEvaluation {
    pub estimate: Option<EffectEstimate>,
    /// Why no estimate was produced
    pub estimate_error: Option<String>,
    pub segment_columns: Vec<String>,
    pub segments: Vec<SegmentAlert>,
    pub decision: GuardrailDecision,
}

/// Serializable summary of one cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub n_records: usize,
    pub dry_run: bool,
    pub effect: Option<EffectRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect_error: Option<String>,
    pub impact_panel: Vec<ImpactRow>,
    pub segment_columns: Vec<String>,
    pub segments: Vec<SegmentAlert>,
    /// Written as the flat `{decision, reasons}` audit record
    #[serde(serialize_with = "guardrail_record")]
    pub guardrail: GuardrailDecision,
    pub rollout: RolloutOutcome,
    pub savings: SavingKpi,
    pub ops: OpsKpi,
}

fn guardrail_record<S: Serializer>(
    decision: &GuardrailDecision,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    decision.to_record().serialize(serializer)
}

/// Estimate, detect and decide over one ledger snapshot
pub fn evaluate(records: &[ClaimRecord], config: &GuardConfig) -> CycleEvaluation {
    let (estimate, estimate_error) = match estimate_with_min(records, config.min_arm_n) {
        Ok(estimate) => (Some(estimate), None),
        Err(e) => (None, Some(e.to_string())),
    };

    let segment_columns = candidate_columns(records, &config.segment);
    let segments = detect(records, &segment_columns, &config.segment);

    let evidence = GuardrailEvidence::from_cycle(estimate.as_ref(), &segments);
    let decision = Guardrail::new(config.significance_level).evaluate(&evidence);

    CycleEvaluation {
        estimate,
        estimate_error,
        segment_columns,
        segments,
        decision,
    }
}

/// Run a full cycle and apply the decision to the registry
pub fn run_cycle<S: RegistryStore>(
    records: &[ClaimRecord],
    config: &GuardConfig,
    controller: &RolloutController<S>,
) -> Result<CycleReport> {
    let evaluation = evaluate(records, config);
    let rollout = controller
        .advance(&evaluation.decision)
        .context("Failed to apply guardrail decision to policy registry")?;
    Ok(report(records, config, evaluation, rollout, false))
}

/// Run a full cycle without writing the registry
pub fn preview_cycle<S: RegistryStore>(
    records: &[ClaimRecord],
    config: &GuardConfig,
    controller: &RolloutController<S>,
) -> Result<CycleReport> {
    let evaluation = evaluate(records, config);
    let rollout = controller
        .preview(&evaluation.decision)
        .context("Failed to read policy registry")?;
    Ok(report(records, config, evaluation, rollout, true))
}

fn report(
    records: &[ClaimRecord],
    config: &GuardConfig,
    evaluation: CycleEvaluation,
    rollout: RolloutOutcome,
    dry_run: bool,
) -> CycleReport {
    let effect = evaluation.estimate.as_ref().map(EffectRecord::from);
    let impact_panel = evaluation
        .estimate
        .as_ref()
        .map(impact_rows)
        .unwrap_or_default();
    let savings = saving_kpis(
        effect.as_ref().map(|e| e.effect_per_claim),
        records,
        config.target_mtd_saving,
        config.target_qtd_saving,
    );

    tracing::info!(
        decision = %evaluation.decision.decision,
        version = %rollout.state().policy_version,
        control_rate = rollout.state().control_rate,
        dry_run,
        "Decision cycle complete"
    );

    CycleReport {
        n_records: records.len(),
        dry_run,
        effect,
        effect_error: evaluation.estimate_error,
        impact_panel,
        segment_columns: evaluation.segment_columns,
        segments: evaluation.segments,
        guardrail: evaluation.decision,
        rollout,
        savings,
        ops: ops_kpis(records),
    }
}
