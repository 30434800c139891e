//! rollout-guard - Canary rollout controller for fraud-review policy experiments
//!
//! Claims are assigned to CONTROL or TREATMENT by a salted hash. Each
//! decision cycle estimates the policy's per-claim effect with Welch's
//! t-test, screens claim segments for regressions under Benjamini–Hochberg
//! FDR control, and maps the evidence to GO / HOLD / ROLLBACK. The rollout
//! controller turns that decision into a new version in the policy registry,
//! which sets the control rate for the next scoring batch.

pub mod assignment;
pub mod cli;
pub mod config;
pub mod effect;
pub mod guardrail;
pub mod ledger;
pub mod pipeline;
pub mod policy;
pub mod regression;
pub mod rollout;
pub mod simulate;
pub mod telemetry;
