//! Rollout controller
//!
//! Turns one guardrail decision into at most one policy registry write:
//!
//! - GO moves to the next stage strictly below the current control rate, or
//!   reports `AlreadyBestStage` without writing when none is left.
//! - HOLD re-registers the current rate and mode so the reasons land in the
//!   audit history.
//! - ROLLBACK restores the rollback target in EXPERIMENT mode.
//!
//! The read of the current state and the write of its successor happen inside
//! one registry transaction.

use crate::config::GuardConfig;
use crate::guardrail::{Decision, GuardrailDecision};
use crate::policy::{
    PolicyMode, PolicyRegistryService, PolicyState, PolicyUpdate, RegistryError, RegistryStore,
};
use serde::Serialize;

/// Rates closer than this are treated as the same stage
const RATE_EPSILON: f64 = 1e-9;

/// Descending control-rate stages plus the rollback target
#[derive(Debug, Clone, PartialEq)]
pub struct StageLadder {
    stages: Vec<f64>,
    rollback_to: f64,
}

impl Default for StageLadder {
    fn default() -> Self {
        Self::new(vec![0.10, 0.05, 0.02, 0.00], 0.10)
    }
}

impl StageLadder {
    pub fn new(stages: Vec<f64>, rollback_to: f64) -> Self {
        Self {
            stages,
            rollback_to,
        }
    }

    pub fn from_config(config: &GuardConfig) -> Self {
        Self::new(config.stages.clone(), config.rollback_to)
    }

    pub fn stages(&self) -> &[f64] {
        &self.stages
    }

    pub fn rollback_to(&self) -> f64 {
        self.rollback_to
    }

    /// First stage strictly below `current`
    pub fn next_stage(&self, current: f64) -> Option<f64> {
        self.stages
            .iter()
            .copied()
            .find(|&rate| rate < current - RATE_EPSILON)
    }

    /// Registry update a decision calls for, given the current state
    pub fn plan(&self, current: &PolicyState, decision: &GuardrailDecision) -> Option<PolicyUpdate> {
        let reasons = decision.reasons_joined();
        match decision.decision {
            Decision::Go => self.next_stage(current.control_rate).map(|rate| PolicyUpdate {
                control_rate: rate,
                mode: PolicyMode::Experiment,
                notes: format!("rollout GO -> {}. {}", rate, reasons),
            }),
            Decision::Hold => Some(PolicyUpdate {
                control_rate: current.control_rate,
                mode: current.mode,
                notes: format!("hold. {}", reasons),
            }),
            Decision::Rollback => Some(PolicyUpdate {
                control_rate: self.rollback_to,
                mode: PolicyMode::Experiment,
                notes: format!("rollback. {}", reasons),
            }),
        }
    }
}

/// What a rollout step did to the registry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RolloutOutcome {
    Advanced { from: PolicyState, state: PolicyState },
    /// GO at the terminal stage; nothing written
    AlreadyBestStage { state: PolicyState },
    Held { from: PolicyState, state: PolicyState },
    RolledBack { from: PolicyState, state: PolicyState },
}

impl RolloutOutcome {
    /// Policy in force after the step
    pub fn state(&self) -> &PolicyState {
        match self {
            RolloutOutcome::Advanced { state, .. }
            | RolloutOutcome::AlreadyBestStage { state }
            | RolloutOutcome::Held { state, .. }
            | RolloutOutcome::RolledBack { state, .. } => state,
        }
    }

    /// Whether a new registry version was (or would be) written
    pub fn mutated(&self) -> bool {
        !matches!(self, RolloutOutcome::AlreadyBestStage { .. })
    }

    fn resolve(decision: Decision, from: PolicyState, created: Option<PolicyState>) -> Self {
        match (decision, created) {
            (_, None) => RolloutOutcome::AlreadyBestStage { state: from },
            (Decision::Go, Some(state)) => RolloutOutcome::Advanced { from, state },
            (Decision::Hold, Some(state)) => RolloutOutcome::Held { from, state },
            (Decision::Rollback, Some(state)) => RolloutOutcome::RolledBack { from, state },
        }
    }
}

/// Sole writer of the policy registry
///
/// # Example
/// ```
/// use rollout_guard::guardrail::{Decision, GuardrailDecision};
/// use rollout_guard::policy::{MemoryStore, PolicyRegistryService};
/// use rollout_guard::rollout::{RolloutController, StageLadder};
///
/// let registry = PolicyRegistryService::new(MemoryStore::new(), 0.10);
/// let controller = RolloutController::new(registry, StageLadder::default());
///
/// let go = GuardrailDecision { decision: Decision::Go, reasons: vec![] };
/// let outcome = controller.advance(&go)?;
/// assert_eq!(outcome.state().control_rate, 0.05);
/// # Ok::<(), rollout_guard::policy::RegistryError>(())
/// ```
#[derive(Debug)]
pub struct RolloutController<S: RegistryStore> {
    registry: PolicyRegistryService<S>,
    ladder: StageLadder,
}

impl<S: RegistryStore> RolloutController<S> {
    pub fn new(registry: PolicyRegistryService<S>, ladder: StageLadder) -> Self {
        Self { registry, ladder }
    }

    pub fn registry(&self) -> &PolicyRegistryService<S> {
        &self.registry
    }

    pub fn ladder(&self) -> &StageLadder {
        &self.ladder
    }

    /// Apply one guardrail decision to the registry
    pub fn advance(&self, decision: &GuardrailDecision) -> Result<RolloutOutcome, RegistryError> {
        let tx = self
            .registry
            .transact(|current| self.ladder.plan(current, decision))?;
        let outcome = RolloutOutcome::resolve(decision.decision, tx.previous, tx.created);
        log_outcome(&outcome, false);
        Ok(outcome)
    }

    /// Outcome `advance` would produce, without writing
    pub fn preview(&self, decision: &GuardrailDecision) -> Result<RolloutOutcome, RegistryError> {
        let mut registry = self.registry.load()?;
        let from = registry.current.clone();
        let created = self
            .ladder
            .plan(&from, decision)
            .map(|update| registry.supersede(update, "DRY-RUN".to_string()));
        let outcome = RolloutOutcome::resolve(decision.decision, from, created);
        log_outcome(&outcome, true);
        Ok(outcome)
    }
}

fn log_outcome(outcome: &RolloutOutcome, dry_run: bool) {
    match outcome {
        RolloutOutcome::Advanced { from, state } => tracing::info!(
            dry_run,
            from = from.control_rate,
            to = state.control_rate,
            version = %state.policy_version,
            "Rollout advanced"
        ),
        RolloutOutcome::AlreadyBestStage { state } => tracing::info!(
            dry_run,
            control_rate = state.control_rate,
            version = %state.policy_version,
            "Rollout already at best stage"
        ),
        RolloutOutcome::Held { state, .. } => tracing::info!(
            dry_run,
            control_rate = state.control_rate,
            version = %state.policy_version,
            "Rollout held"
        ),
        RolloutOutcome::RolledBack { from, state } => tracing::warn!(
            dry_run,
            from = from.control_rate,
            to = state.control_rate,
            version = %state.policy_version,
            "Rollout rolled back"
        ),
    }
}
