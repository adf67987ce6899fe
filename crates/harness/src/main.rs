//! Tideline harness CLI.
//!
//! Usage: `tideline-harness [config.json]`. Without a path the default
//! configuration runs. Log level comes from `RUST_LOG` (default `info`).

use std::env;
use std::fs;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tideline_harness::{HarnessConfig, run_scenario};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Predictions further than this from the authority count as not converged.
const CONVERGENCE_TOLERANCE: f64 = 1e-6;

fn main() -> ExitCode {
    init_tracing();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            error!(error = %format!("{err:#}"), "harness failed");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<bool> {
    let config = match env::args().nth(1) {
        Some(path) => {
            let text =
                fs::read_to_string(&path).with_context(|| format!("reading config {path}"))?;
            serde_json::from_str::<HarnessConfig>(&text)
                .with_context(|| format!("parsing config {path}"))?
        }
        None => HarnessConfig::default(),
    };
    info!(
        clients = config.clients,
        ticks = config.ticks,
        latency_ticks = config.link.latency_ticks,
        jitter_ticks = config.link.jitter_ticks,
        "starting harness"
    );

    let report = run_scenario(config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let converged = report.converged(CONVERGENCE_TOLERANCE);
    info!(
        converged,
        max_final_error = report.max_final_error(),
        corrections = report.total_corrections(),
        "harness finished"
    );
    Ok(converged)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
