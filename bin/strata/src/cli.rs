use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::config::CONFIG_FILENAME;

/// Output format of the `status` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "strata")]
#[command(
    author,
    version,
    about = "Deploy interdependent contracts in order, resuming where the last run stopped"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "STRATA_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    #[arg(short, long, alias = "conf", env = "STRATA_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    /// The target network, as named in the `[networks]` table of the configuration.
    #[arg(short, long, env = "STRATA_NETWORK")]
    pub network: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a plan manifest against the network.
    Deploy {
        /// Path to the plan manifest.
        #[arg(short, long, env = "STRATA_MANIFEST")]
        manifest: PathBuf,

        /// Simulate the plan on an empty in-memory chain.
        ///
        /// The simulated environment is written under `<state_dir>/dry-run` and is
        /// discarded at the start of every dry run.
        #[arg(long, env = "STRATA_DRY_RUN")]
        dry_run: bool,
    },

    /// Show the persisted environment of the network.
    Status {
        /// The output format.
        #[arg(long, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}
