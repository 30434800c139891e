use anyhow::{Context, Result};
use clap::Parser;
use rollout_guard::{
    assignment,
    cli::{Cli, Command},
    config::GuardConfig,
    ledger::{self, LedgerError, LedgerLoad},
    pipeline,
    policy::{JsonFileStore, PolicyRegistryService},
    rollout::{RolloutController, StageLadder},
    simulate,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; logs go to stderr so stdout stays machine-readable
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<GuardConfig> {
    match path {
        Some(path) => GuardConfig::from_toml(path),
        None => Ok(GuardConfig::default()),
    }
}

fn registry_service(
    config: &GuardConfig,
    registry: Option<PathBuf>,
) -> PolicyRegistryService<JsonFileStore> {
    let path = registry.unwrap_or_else(|| config.registry_path.clone());
    PolicyRegistryService::new(JsonFileStore::new(path), config.default_control_rate)
}

/// Missing ledger is an empty snapshot; the guardrail turns that into HOLD
fn read_ledger(path: &Path) -> Result<LedgerLoad> {
    match ledger::load_ledger(path) {
        Ok(load) => Ok(load),
        Err(LedgerError::Missing(path)) => {
            tracing::warn!("Ledger {} not found; evaluating an empty snapshot", path.display());
            Ok(LedgerLoad::default())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Assign {
            claim_id,
            salt,
            control_rate,
            registry,
        } => {
            let salt = salt.unwrap_or_else(|| config.experiment_salt.clone());
            let rate = match control_rate {
                Some(rate) => rate,
                None => registry_service(&config, registry).current()?.control_rate,
            };
            if !(0.0..=1.0).contains(&rate) {
                anyhow::bail!("--control-rate must be in [0, 1], got {}", rate);
            }
            let arm = assignment::assign(&claim_id, &salt, rate);
            tracing::debug!(
                claim_id = %claim_id,
                digest = %assignment::digest_hex(&claim_id, &salt),
                bucket = assignment::bucket(&claim_id, &salt),
                control_rate = rate,
                arm = %arm,
                "Assigned claim"
            );
            println!("{}", arm);
        }

        Command::Cycle {
            ledger,
            registry,
            dry_run,
        } => {
            let load = read_ledger(&ledger)?;
            if load.skipped > 0 {
                tracing::warn!(skipped = load.skipped, "Malformed ledger rows excluded");
            }

            let controller = RolloutController::new(
                registry_service(&config, registry),
                StageLadder::from_config(&config),
            );
            let report = if dry_run {
                pipeline::preview_cycle(&load.records, &config, &controller)?
            } else {
                pipeline::run_cycle(&load.records, &config, &controller)?
            };
            print_json(&report)?;
        }

        Command::Status { registry } => {
            let state = registry_service(&config, registry).load()?;
            print_json(&serde_json::json!({
                "current": state.current,
                "history_len": state.history.len(),
            }))?;
        }

        Command::Queue { ledger, limit } => {
            let load = ledger::load_ledger(&ledger)?;
            let queue = assignment::review_queue(
                &load.records,
                limit.unwrap_or(config.max_daily_reviews),
            );
            let mut out = std::io::stdout().lock();
            for record in queue {
                writeln!(out, "{}", serde_json::to_string(record)?)?;
            }
        }

        Command::Simulate {
            scenario,
            claims,
            seed,
            control_rate,
        } => {
            let records = simulate::simulate_ledger(
                scenario,
                claims,
                seed,
                &config.experiment_salt,
                control_rate.unwrap_or(config.default_control_rate),
            );
            let text = ledger::to_json_lines(&records).context("Failed to serialize ledger")?;
            std::io::stdout()
                .lock()
                .write_all(text.as_bytes())
                .context("Failed to write ledger")?;
        }
    }

    Ok(())
}
