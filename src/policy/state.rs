use serde::{Deserialize, Serialize};
use std::fmt;

/// How scored claims are treated under a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyMode {
    /// TREATMENT claims go through the review policy
    Experiment,
    /// Every claim is paid; the review policy is switched off
    BaselineOnly,
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyMode::Experiment => f.write_str("EXPERIMENT"),
            PolicyMode::BaselineOnly => f.write_str("BASELINE_ONLY"),
        }
    }
}

/// One versioned rollout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyState {
    /// `P<n>`, strictly increasing in creation order
    pub policy_version: String,
    pub control_rate: f64,
    pub mode: PolicyMode,
    /// RFC 3339 timestamp, or `INIT` for the bootstrap state
    pub created_at: String,
    pub notes: String,
}

impl PolicyState {
    /// Bootstrap state written on first access
    pub fn initial(control_rate: f64) -> Self {
        Self {
            policy_version: "P0".to_string(),
            control_rate,
            mode: PolicyMode::Experiment,
            created_at: "INIT".to_string(),
            notes: "auto-created".to_string(),
        }
    }

    /// Numeric part of `policy_version`
    pub fn version_number(&self) -> Option<u64> {
        self.policy_version.strip_prefix('P')?.parse().ok()
    }
}

/// Requested change to the current policy
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyUpdate {
    pub control_rate: f64,
    pub mode: PolicyMode,
    pub notes: String,
}

/// Current policy plus every superseded state, oldest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRegistry {
    pub current: PolicyState,
    pub history: Vec<PolicyState>,
}

impl PolicyRegistry {
    pub fn bootstrap(default_control_rate: f64) -> Self {
        Self {
            current: PolicyState::initial(default_control_rate),
            history: Vec::new(),
        }
    }

    /// Supersede the current state and return the new one
    ///
    /// The version number is the history length after the append, so it
    /// grows by one per call as long as history is never pruned.
    pub fn supersede(&mut self, update: PolicyUpdate, created_at: String) -> PolicyState {
        let next = PolicyState {
            policy_version: format!("P{}", self.history.len() + 1),
            control_rate: update.control_rate,
            mode: update.mode,
            created_at,
            notes: update.notes,
        };
        let previous = std::mem::replace(&mut self.current, next);
        self.history.push(previous);
        self.current.clone()
    }
}
