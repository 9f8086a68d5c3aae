//! Declarative deployment plans.
//!
//! A manifest is a TOML document with an ordered `[[step]]` array:
//!
//! ```toml
//! [[step]]
//! kind = "deploy"
//! name = "Perpetual"
//! args = ["@GlobalConfig", "@USDC", "18"]
//!
//! [[step]]
//! kind = "upgradeable"
//! name = "PoolCreator"
//! admin = "@ProxyAdmin"
//!
//! [[step]]
//! kind = "add-version"
//! registry = "PoolCreator"
//! modules = ["LiquidityPool", "LiquidityPoolHop1"]
//! governor = "Governor"
//! description = "initial version"
//!
//! [[step]]
//! kind = "call"
//! id = "PoolCreator.initialize"
//! target = "PoolCreator"
//! function = "initialize"
//! args = ["@SymbolService", "@Vault"]
//! ```
//!
//! Arguments are strings coerced to the ABI types of the artifact. `@Name` stands
//! for the address of component `Name` when the step runs.

use std::path::Path;

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::deployer::Deployer;
use crate::environment::Lookup;
use crate::error::{DeployError, Result};
use crate::ledger::Ledger;
use crate::registry::VersionBundle;
use crate::restorer::{Plan, StepMode};

/// One `[[step]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ManifestStep {
    /// Deploy or skip a component.
    Deploy {
        name: String,
        /// Defaults to `name`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact: Option<String>,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Deploy or upgrade a component behind a proxy.
    Upgradeable {
        name: String,
        admin: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact: Option<String>,
    },
    /// Register a version bundle.
    AddVersion(VersionBundle),
    /// Call a function once.
    Call {
        id: String,
        target: String,
        function: String,
        #[serde(default)]
        args: Vec<String>,
        /// Artifact whose ABI encodes the call, defaults to `target`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact: Option<String>,
    },
}

impl ManifestStep {
    /// Name the step is reported and checkpointed under.
    pub fn step_name(&self) -> String {
        match self {
            ManifestStep::Deploy { name, .. } | ManifestStep::Upgradeable { name, .. } => name.clone(),
            ManifestStep::AddVersion(bundle) => format!("{}.addVersion", bundle.registry),
            ManifestStep::Call { id, .. } => id.clone(),
        }
    }

    pub fn mode(&self) -> StepMode {
        match self {
            ManifestStep::Call { .. } => StepMode::Once,
            _ => StepMode::Idempotent,
        }
    }
}

/// A parsed plan manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, rename = "step")]
    pub steps: Vec<ManifestStep>,
}

impl std::str::FromStr for Manifest {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| DeployError::config(format!("invalid manifest: {e}")))
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::config(format!("cannot read manifest {}: {e}", path.display()))
        })?;
        let manifest: Self = content.parse()?;

        tracing::info!(path = %path.display(), steps = manifest.steps.len(), "Manifest loaded");
        Ok(manifest)
    }

    /// Compile the manifest into an executable plan.
    pub fn into_plan<L: Ledger + 'static>(self) -> Plan<L> {
        self.steps.into_iter().fold(Plan::new(), |plan, step| {
            let name = step.step_name();
            let mode = step.mode();
            plan.push(name, mode, move |deployer: &mut Deployer<L>| {
                Box::pin(async move { execute(deployer, step).await })
            })
        })
    }
}

async fn execute<L: Ledger>(deployer: &mut Deployer<L>, step: ManifestStep) -> Result<()> {
    match step {
        ManifestStep::Deploy {
            name,
            artifact,
            args,
        } => {
            let artifact = artifact.unwrap_or_else(|| name.clone());

            // Overridden components need neither arguments nor an artifact.
            if let Lookup::Override(_) = deployer.environment().get(&name) {
                deployer.deploy_component(&name, &artifact, Vec::new()).await?;
                return Ok(());
            }

            let raw = resolve_args(deployer, &args)?;
            let values = deployer
                .artifacts()
                .get(&artifact)?
                .coerce_constructor_args(&raw)?;
            deployer.deploy_component(&name, &artifact, values).await?;
        }
        ManifestStep::Upgradeable {
            name,
            admin,
            artifact,
        } => {
            let artifact = artifact.unwrap_or_else(|| name.clone());
            let admin = resolve_address(deployer, &admin)?;
            deployer
                .deploy_upgradeable_component(&name, &artifact, admin)
                .await?;
        }
        ManifestStep::AddVersion(bundle) => {
            deployer.add_version(&bundle).await?;
        }
        ManifestStep::Call {
            id,
            target,
            function,
            args,
            artifact,
        } => {
            let to = deployer.address_of(&target)?;
            let artifact = artifact.unwrap_or_else(|| target.clone());
            let raw = resolve_args(deployer, &args)?;
            let data = deployer
                .artifacts()
                .get(&artifact)?
                .encode_function_call(&function, &raw)?;
            deployer.send(&id, to, data).await?;
        }
    }
    Ok(())
}

/// Replace `@Name` references with component addresses.
fn resolve_args<L: Ledger>(deployer: &Deployer<L>, args: &[String]) -> Result<Vec<String>> {
    args.iter()
        .map(|arg| match arg.strip_prefix('@') {
            Some(name) => Ok(format!("0x{}", hex::encode(deployer.address_of(name)?))),
            None => Ok(arg.clone()),
        })
        .collect()
}

/// An `@Name` reference or a literal address.
fn resolve_address<L: Ledger>(deployer: &Deployer<L>, value: &str) -> Result<Address> {
    match value.strip_prefix('@') {
        Some(name) => deployer.address_of(name),
        None => value
            .parse()
            .map_err(|e| DeployError::config(format!("{value:?} is not an address: {e}"))),
    }
}
