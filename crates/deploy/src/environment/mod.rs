//! Persisted deployment state of one network.
//!
//! The [`Environment`] is plain data. [`EnvironmentStore`] reads and writes it,
//! and [`AddressBook`] owns one in memory and flushes it after every mutation.

mod book;
mod store;

pub use book::AddressBook;
pub use store::EnvironmentStore;

use std::collections::BTreeMap;

use alloy_core::primitives::{Address, TxHash};
use serde::{Deserialize, Serialize};

use crate::Fingerprint;

/// Current unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A deployed component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Logical component name, unique per network.
    pub name: String,
    /// Address of the deployed contract.
    pub address: Address,
    /// Artifact the code was taken from.
    pub artifact: String,
    /// Fingerprint of the linked code and constructor arguments.
    pub fingerprint: Fingerprint,
    /// Creation transaction.
    pub tx_hash: TxHash,
    /// Unix timestamp of the confirmation.
    pub timestamp: i64,
}

/// One implementation a proxy pointed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationRecord {
    pub address: Address,
    pub fingerprint: Fingerprint,
    /// Unix timestamp at which the proxy started pointing to this implementation.
    pub activated_at: i64,
}

/// Proxy state of an upgradeable component.
///
/// `proxy` is the permanent external identity of the component; only
/// `implementation` moves, and every previous value is kept in `history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyDeployment {
    pub proxy: Address,
    pub admin: Address,
    pub implementation: ImplementationRecord,
    /// Previous implementations, oldest first.
    #[serde(default)]
    pub history: Vec<ImplementationRecord>,
}

/// A confirmed version registered against a registry component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: u64,
    /// Component names of the modules, in submission order.
    pub module_names: Vec<String>,
    pub modules: Vec<Address>,
    pub governor: Address,
    pub compatibility: u64,
    pub description: String,
    pub activated_at: i64,
    pub tx_hash: TxHash,
}

/// A transaction submitted to the ledger whose outcome has not been observed yet.
///
/// For a deployment the fingerprint covers the creation code; for a call it covers
/// the target and the calldata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub fingerprint: Fingerprint,
    pub tx_hash: TxHash,
    pub submitted_at: i64,
}

/// Marker for a non-idempotent plan step that already ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub completed_at: i64,
}

/// Result of looking a component up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// The operator pinned the component to an address.
    Override(Address),
    /// The component was deployed by a previous step or run.
    Deployed(&'a DeploymentRecord),
    /// Nothing is known about the component.
    Absent,
}

impl Lookup<'_> {
    /// Address of the component, if any.
    pub fn address(&self) -> Option<Address> {
        match self {
            Lookup::Override(address) => Some(*address),
            Lookup::Deployed(record) => Some(record.address),
            Lookup::Absent => None,
        }
    }
}

/// Complete deployment state for one target network.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Environment {
    pub network: String,
    #[serde(default)]
    pub records: BTreeMap<String, DeploymentRecord>,
    #[serde(default)]
    pub overrides: BTreeMap<String, Address>,
    #[serde(default)]
    pub proxies: BTreeMap<String, ProxyDeployment>,
    #[serde(default)]
    pub versions: BTreeMap<String, Vec<VersionEntry>>,
    /// Unconfirmed deployments, keyed by component name.
    #[serde(default)]
    pub pending: BTreeMap<String, PendingTransaction>,
    /// Unconfirmed calls, keyed by call label.
    #[serde(default)]
    pub pending_calls: BTreeMap<String, PendingTransaction>,
    #[serde(default)]
    pub completed: BTreeMap<String, CompletedStep>,
}

impl Environment {
    /// Create an empty environment for `network`.
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            ..Default::default()
        }
    }

    /// Look a component up. Overrides win over records.
    pub fn get(&self, name: &str) -> Lookup<'_> {
        if let Some(address) = self.overrides.get(name) {
            return Lookup::Override(*address);
        }
        match self.records.get(name) {
            Some(record) => Lookup::Deployed(record),
            None => Lookup::Absent,
        }
    }

    /// Address of a component, if it is overridden or deployed.
    pub fn address_of(&self, name: &str) -> Option<Address> {
        self.get(name).address()
    }

    /// Whether `address` belongs to any known component.
    pub fn contains_address(&self, address: Address) -> bool {
        self.overrides.values().any(|a| *a == address)
            || self.records.values().any(|r| r.address == address)
    }

    pub fn proxy(&self, name: &str) -> Option<&ProxyDeployment> {
        self.proxies.get(name)
    }

    /// Confirmed versions of a registry, in registration order.
    pub fn versions_of(&self, registry: &str) -> &[VersionEntry] {
        self.versions.get(registry).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_completed(&self, step: &str) -> bool {
        self.completed.contains_key(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, address: Address) -> DeploymentRecord {
        DeploymentRecord {
            name: name.to_string(),
            address,
            artifact: name.to_string(),
            fingerprint: Fingerprint::of_code(name.as_bytes()),
            tx_hash: TxHash::ZERO,
            timestamp: 1_610_000_000,
        }
    }

    #[test]
    fn test_lookup_distinguishes_sources() {
        let mut env = Environment::new("kovan");
        let deployed = Address::repeat_byte(0x11);
        let pinned = Address::repeat_byte(0x22);

        env.records.insert("Broker".into(), record("Broker", deployed));
        env.overrides.insert("WETH9".into(), pinned);

        assert_eq!(env.get("WETH9"), Lookup::Override(pinned));
        assert!(matches!(env.get("Broker"), Lookup::Deployed(r) if r.address == deployed));
        assert_eq!(env.get("Reader"), Lookup::Absent);
    }

    #[test]
    fn test_override_wins_over_record() {
        let mut env = Environment::new("kovan");
        let pinned = Address::repeat_byte(0x33);
        env.records
            .insert("USDC".into(), record("USDC", Address::repeat_byte(0x44)));
        env.overrides.insert("USDC".into(), pinned);

        assert_eq!(env.address_of("USDC"), Some(pinned));
    }

    #[test]
    fn test_missing_sections_deserialize_as_empty() {
        let env: Environment = serde_json::from_str(r#"{ "network": "arb-one" }"#).unwrap();

        assert_eq!(env.network, "arb-one");
        assert!(env.records.is_empty());
        assert!(env.versions_of("PoolCreator").is_empty());
        assert!(!env.is_completed("init"));
    }
}
