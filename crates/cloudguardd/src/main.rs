//! cloudguardd: the CloudGuard daemon.
//!
//! Runs the twin sync, scaling, predictive scaling and self-healing loops
//! against a simulated fleet described in `cloudguard.toml`.
//!
//! # Usage
//!
//! ```text
//! cloudguardd run --config cloudguard.toml [--json]
//! cloudguardd check --config cloudguard.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use cloudguard_core::clock::SystemClock;
use cloudguard_core::collaborator::{Collaborators, HealthProbe};
use cloudguard_core::config::CloudGuardConfig;
use cloudguard_health::HttpHealthProbe;
use cloudguardd::{ControlPlane, SimulatedFleet};

#[derive(Parser)]
#[command(name = "cloudguardd", about = "CloudGuard scaling and self-healing daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every control loop until Ctrl-C.
    Run {
        /// Path to cloudguard.toml.
        #[arg(long, default_value = "cloudguard.toml")]
        config: PathBuf,

        /// Emit logs as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Validate a config file and print what it declares.
    Check {
        #[arg(long, default_value = "cloudguard.toml")]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,cloudguardd=debug,cloudguard=debug")
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, json } => {
            init_tracing(json);
            run(&config).await
        }
        Command::Check { config } => check(&config),
    }
}

async fn run(path: &Path) -> anyhow::Result<()> {
    let config = CloudGuardConfig::from_file(path)?;
    info!(path = %path.display(), "CloudGuard daemon starting");

    let simulation = config.simulation.clone().unwrap_or_default();
    let sample_interval = simulation.sample_interval()?;
    let fleet = Arc::new(SimulatedFleet::new(&simulation));

    let mut collaborators = Collaborators::from_fleet(fleet.fleet().clone());
    if let Some(probes) = config.probes.as_ref().filter(|p| !p.endpoints.is_empty()) {
        let settings = config.engine.settings()?;
        let fallback: Arc<dyn HealthProbe> = fleet.fleet().clone();
        let probe = HttpHealthProbe::new(probes.endpoints.clone(), settings.collaborator_timeout)
            .with_fallback(fallback);
        info!(endpoints = probes.endpoints.len(), "http health probes enabled");
        collaborators = collaborators.with_health(Arc::new(probe));
    }

    let plane = ControlPlane::new(&config, collaborators, Arc::new(SystemClock)).await?;

    let (sampler_tx, sampler_rx) = watch::channel(false);
    let sampler = tokio::spawn(fleet.clone().run(sample_interval, sampler_rx));

    plane.start().await;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    plane.stop().await;
    let _ = sampler_tx.send(true);
    let _ = sampler.await;

    info!("CloudGuard daemon stopped");
    Ok(())
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = CloudGuardConfig::from_file(path)?;
    let summary = serde_json::json!({
        "config": path.display().to_string(),
        "policies": config.policies.iter().map(|p| &p.id).collect::<Vec<_>>(),
        "rules": config.rules.iter().map(|r| &r.id).collect::<Vec<_>>(),
        "predictive": config.predictive.enabled,
        "simulated_resources": config.simulation.as_ref().map_or(0, |s| s.resources.len()),
        "probe_endpoints": config.probes.as_ref().map_or(0, |p| p.endpoints.len()),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
