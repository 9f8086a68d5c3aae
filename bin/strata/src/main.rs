//! strata deploys a network of interdependent contracts in dependency order and
//! picks up where an interrupted run stopped.

mod cli;
mod config;
mod status;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Command};
use config::{NetworkConfig, StrataConfig};
use strata_deploy::{
    ArtifactStore, DeployOptions, Deployer, EnvironmentStore, InMemoryLedger, JsonRpcLedger,
    Ledger, Manifest, Restorer,
};

/// Directory, under the state directory, holding dry-run environments.
const DRY_RUN_DIR: &str = "dry-run";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = StrataConfig::load(&cli.config)?;

    match cli.command {
        Command::Deploy { manifest, dry_run } => {
            let network = config.network(&cli.network)?;
            let manifest = Manifest::load(&manifest).context("Failed to load the plan manifest")?;
            let artifacts = ArtifactStore::load(&config.artifact_dir)
                .context("Failed to load contract artifacts")?;

            if dry_run {
                let state_dir = config.state_dir.join(DRY_RUN_DIR);
                let stale = state_dir.join(format!("{}.json", cli.network));
                if stale.exists() {
                    std::fs::remove_file(&stale).with_context(|| {
                        format!("Failed to discard previous dry run {}", stale.display())
                    })?;
                }

                tracing::info!(network = %cli.network, "Simulating plan on an in-memory chain...");
                deploy(
                    InMemoryLedger::new(),
                    &state_dir,
                    &cli.network,
                    network,
                    &config,
                    artifacts,
                    manifest,
                )
                .await
            } else {
                let rpc_url = network.rpc_url.clone().with_context(|| {
                    format!("No rpc_url configured for network {}", cli.network)
                })?;
                let ledger = JsonRpcLedger::new(rpc_url).context("Failed to create the RPC client")?;

                deploy(
                    ledger,
                    &config.state_dir,
                    &cli.network,
                    network,
                    &config,
                    artifacts,
                    manifest,
                )
                .await
            }
        }
        Command::Status { format } => {
            let environment = EnvironmentStore::open(&config.state_dir, &cli.network)
                .and_then(|store| store.load_or_default())
                .context("Failed to open the environment")?;
            status::print(&environment, format)
        }
    }
}

async fn deploy<L: Ledger + 'static>(
    ledger: L,
    state_dir: &Path,
    network_id: &str,
    network: &NetworkConfig,
    config: &StrataConfig,
    artifacts: ArtifactStore,
    manifest: Manifest,
) -> Result<()> {
    let book = Restorer::new(state_dir, network_id)
        .with_overrides(network.overrides.clone())
        .restore()
        .context("Failed to restore the environment")?;

    let options = DeployOptions::new(network.sender)
        .with_confirmation(config.confirmation)
        .with_proxy_artifact(config.proxy_artifact.clone());
    let mut deployer = Deployer::new(ledger, book, artifacts, options);

    let report = Restorer::run(&mut deployer, manifest.into_plan())
        .await
        .with_context(|| format!("Deployment on {network_id} failed, re-run to resume"))?;

    tracing::info!(
        network = %network_id,
        executed = report.executed.len(),
        skipped = report.skipped.len(),
        components = report.environment.records.len(),
        "Deployment complete"
    );
    status::print(&report.environment, cli::OutputFormat::Table)
}
