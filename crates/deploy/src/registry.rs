//! Version registry client.

use alloy_core::dyn_abi::DynSolValue;
use alloy_core::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::abi;
use crate::deployer::Deployer;
use crate::environment::{VersionEntry, unix_now};
use crate::error::{DeployError, Result};
use crate::ledger::Ledger;

/// A set of modules to register as the next version of a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBundle {
    /// Component holding the version registry.
    pub registry: String,
    /// Module component names, in the order the registry expects them.
    pub modules: Vec<String>,
    /// Component allowed to govern instances created from this version.
    pub governor: String,
    #[serde(default)]
    pub compatibility: u64,
    pub description: String,
}

impl VersionBundle {
    pub fn new(
        registry: impl Into<String>,
        modules: Vec<String>,
        governor: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            modules,
            governor: governor.into(),
            compatibility: 0,
            description: description.into(),
        }
    }

    pub fn with_compatibility(mut self, compatibility: u64) -> Self {
        self.compatibility = compatibility;
        self
    }
}

/// Addresses of a bundle, resolved against the environment.
struct ResolvedBundle {
    registry: Address,
    modules: Vec<Address>,
    governor: Address,
}

impl<L: Ledger> Deployer<L> {
    fn resolve_bundle(&self, bundle: &VersionBundle) -> Result<ResolvedBundle> {
        let resolve = |role: &str, name: &str| {
            self.environment().address_of(name).ok_or_else(|| {
                DeployError::config(format!(
                    "{}.addVersion: {role} {name} is not deployed",
                    bundle.registry
                ))
            })
        };

        Ok(ResolvedBundle {
            registry: resolve("registry", &bundle.registry)?,
            modules: bundle
                .modules
                .iter()
                .map(|m| resolve("module", m))
                .collect::<Result<_>>()?,
            governor: resolve("governor", &bundle.governor)?,
        })
    }

    /// Register `bundle` as the next version of its registry.
    ///
    /// Every referenced component must be known before anything is submitted.
    ///
    /// Calls are deduplicated: a bundle with the same modules, governor,
    /// compatibility and description as an already confirmed version of the
    /// registry sends nothing and returns that version, so re-running a plan
    /// never registers it twice. To register the same modules again as a new
    /// version, give the bundle a different description.
    pub async fn add_version(&mut self, bundle: &VersionBundle) -> Result<VersionEntry> {
        let resolved = self.resolve_bundle(bundle)?;

        let existing = self
            .environment()
            .versions_of(&bundle.registry)
            .iter()
            .find(|v| {
                v.modules == resolved.modules
                    && v.governor == resolved.governor
                    && v.compatibility == bundle.compatibility
                    && v.description == bundle.description
            });
        if let Some(entry) = existing {
            tracing::info!(
                registry = %bundle.registry,
                version = entry.version,
                "Version already registered, skipping"
            );
            return Ok(entry.clone());
        }

        let data = abi::encode_call(
            abi::ADD_VERSION,
            vec![
                DynSolValue::Array(resolved.modules.iter().copied().map(DynSolValue::Address).collect()),
                DynSolValue::Address(resolved.governor),
                DynSolValue::Uint(U256::from(bundle.compatibility), 256),
                DynSolValue::String(bundle.description.clone()),
            ],
        );
        // The marker outlives the confirmation so that a crash before the entry is
        // recorded re-reads this transaction instead of registering a second version.
        let label = format!("{}.addVersion", bundle.registry);
        let receipt = self.send_tracked(&label, resolved.registry, data).await?;

        let count = abi::decode_uint(
            &self
                .read(resolved.registry, abi::encode_call(abi::VERSION_COUNT, vec![]))
                .await?,
        )?;
        let version = u64::try_from(count).map_err(|_| {
            DeployError::config(format!("{} reported version count {count}", bundle.registry))
        })?;

        let entry = VersionEntry {
            version,
            module_names: bundle.modules.clone(),
            modules: resolved.modules,
            governor: resolved.governor,
            compatibility: bundle.compatibility,
            description: bundle.description.clone(),
            activated_at: unix_now(),
            tx_hash: receipt.tx_hash,
        };
        self.book_mut().push_version(&bundle.registry, entry.clone())?;
        self.book_mut().clear_pending_call(&label)?;

        tracing::info!(
            registry = %bundle.registry,
            version,
            modules = ?bundle.modules,
            "Version registered"
        );
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_from_toml() {
        let bundle: VersionBundle = toml::from_str(
            r#"
            registry = "PoolCreator"
            modules = ["LiquidityPool", "LiquidityPoolHop1"]
            governor = "Governor"
            description = "initial version"
            "#,
        )
        .unwrap();

        assert_eq!(
            bundle,
            VersionBundle::new(
                "PoolCreator",
                vec!["LiquidityPool".into(), "LiquidityPoolHop1".into()],
                "Governor",
                "initial version",
            )
        );
    }
}
