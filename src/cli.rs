//! CLI argument parsing for rollout-guard

use crate::simulate::Scenario;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rollout-guard")]
#[command(version)]
#[command(
    about = "Canary rollout controller for fraud-review policy experiments",
    long_about = None
)]
pub struct Cli {
    /// Guard configuration file (TOML); defaults apply when omitted
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug tracing output (to stderr)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the experiment arm for a claim
    Assign {
        #[arg(long, value_name = "ID")]
        claim_id: String,

        /// Experiment salt (defaults to the configured salt)
        #[arg(long)]
        salt: Option<String>,

        /// Control rate (defaults to the registry's current rate)
        #[arg(long, value_name = "RATE")]
        control_rate: Option<f64>,

        /// Policy registry file (overrides the configured path)
        #[arg(long, value_name = "PATH")]
        registry: Option<PathBuf>,
    },

    /// Run one decision cycle over a claim ledger and print the report as JSON
    Cycle {
        /// JSON Lines claim ledger
        #[arg(long, value_name = "PATH")]
        ledger: PathBuf,

        /// Policy registry file (overrides the configured path)
        #[arg(long, value_name = "PATH")]
        registry: Option<PathBuf>,

        /// Decide without writing the registry
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the current policy state
    Status {
        /// Policy registry file (overrides the configured path)
        #[arg(long, value_name = "PATH")]
        registry: Option<PathBuf>,
    },

    /// Print the review queue of a ledger as JSON Lines, highest score first
    Queue {
        #[arg(long, value_name = "PATH")]
        ledger: PathBuf,

        /// Queue capacity (defaults to max_daily_reviews)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Write a synthetic JSON Lines ledger to stdout
    Simulate {
        #[arg(long, value_enum, ignore_case = true, default_value = "go")]
        scenario: Scenario,

        #[arg(long, default_value = "2000")]
        claims: usize,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Control rate used for assignment (defaults to the configured default)
        #[arg(long, value_name = "RATE")]
        control_rate: Option<f64>,
    },
}
