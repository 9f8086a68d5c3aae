//! Operator configuration: `Strata.toml` merged with `STRATA_*` environment variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use strata_deploy::{ConfirmationPolicy, DEFAULT_PROXY_ARTIFACT};
use url::Url;

/// The default name of the configuration file.
pub const CONFIG_FILENAME: &str = "Strata.toml";

/// Prefix of the environment variables overriding the configuration file.
const ENV_PREFIX: &str = "STRATA_";

fn default_state_dir() -> PathBuf {
    PathBuf::from("deployments")
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_proxy_artifact() -> String {
    DEFAULT_PROXY_ARTIFACT.to_string()
}

/// Settings of one target network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint of a node holding the sender's unlocked account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<Url>,
    /// Account every transaction is sent from.
    pub sender: Address,
    /// Components provided by the network instead of deployed (WETH9, USDC, ...).
    #[serde(default)]
    pub overrides: BTreeMap<String, Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Directory holding one environment file per network.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Directory scanned for compiled artifacts.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    #[serde(default = "default_proxy_artifact")]
    pub proxy_artifact: String,
    #[serde(default)]
    pub confirmation: ConfirmationPolicy,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl StrataConfig {
    /// Load the configuration file (if it exists) and apply the environment.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `STRATA_NETWORKS__KOVAN__RPC_URL=http://localhost:8545`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No configuration file, using the environment only");
        }

        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        tracing::debug!(path = %path.display(), networks = config.networks.len(), "Configuration loaded");
        Ok(config)
    }

    pub fn network(&self, id: &str) -> Result<&NetworkConfig> {
        self.networks.get(id).with_context(|| {
            format!(
                "Network {id} is not configured, add a [networks.{id}] table to {CONFIG_FILENAME}"
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    const CONFIG: &str = r#"
        state_dir = "state"

        [confirmation]
        timeout = 600
        poll_interval = 4000

        [networks.kovan]
        rpc_url = "http://localhost:8545"
        sender = "0x00000000000000000000000000000000000000de"

        [networks.kovan.overrides]
        WETH9 = "0xd0a1e359811322d97991e03f863a0c30c2cf029c"
    "#;

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new("strata-config").unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, CONFIG).unwrap();

        let config = StrataConfig::load(&path).unwrap();

        assert_eq!(config.state_dir, PathBuf::from("state"));
        assert_eq!(config.artifact_dir, default_artifact_dir());
        assert_eq!(config.proxy_artifact, DEFAULT_PROXY_ARTIFACT);
        assert_eq!(config.confirmation.timeout.as_secs(), 600);

        let kovan = config.network("kovan").unwrap();
        assert_eq!(kovan.sender, Address::with_last_byte(0xde));
        assert!(kovan.overrides.contains_key("WETH9"));
        assert!(config.network("mainnet").is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new("strata-config").unwrap();
        let config = StrataConfig::load(&dir.path().join(CONFIG_FILENAME)).unwrap();

        assert_eq!(config.state_dir, default_state_dir());
        assert!(config.networks.is_empty());
    }
}
