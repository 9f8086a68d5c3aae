use std::collections::BTreeMap;

use alloy_core::primitives::{Address, TxHash};

use super::{
    CompletedStep, DeploymentRecord, Environment, EnvironmentStore, Lookup, PendingTransaction,
    ProxyDeployment, VersionEntry, unix_now,
};
use crate::error::{DeployError, Result};
use crate::Fingerprint;

/// In-memory [`Environment`] backed by an [`EnvironmentStore`].
///
/// Every mutating method persists the environment before returning, so a crash
/// loses at most the operation in flight.
#[derive(Debug)]
pub struct AddressBook {
    environment: Environment,
    store: EnvironmentStore,
}

impl AddressBook {
    /// Load the environment of the store's network.
    pub fn open(store: EnvironmentStore) -> Result<Self> {
        let environment = store.load_or_default()?;
        Ok(Self { environment, store })
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn network(&self) -> &str {
        &self.environment.network
    }

    pub fn get(&self, name: &str) -> Lookup<'_> {
        self.environment.get(name)
    }

    /// Write the environment to disk.
    pub fn flush(&self) -> Result<()> {
        self.store.save(&self.environment)
    }

    /// Record a new deployment.
    ///
    /// Replacing a different existing record is refused: that is what
    /// [`redeploy`](Self::redeploy) is for.
    pub fn set(&mut self, record: DeploymentRecord) -> Result<()> {
        if let Some(existing) = self.environment.records.get(&record.name) {
            if *existing == record {
                return Ok(());
            }
            return Err(DeployError::config(format!(
                "{} is already recorded at {}; replacing it requires an explicit redeploy",
                record.name, existing.address
            )));
        }

        tracing::info!(
            component = %record.name,
            address = %record.address,
            fingerprint = %record.fingerprint.short(),
            "Recorded deployment"
        );
        self.environment.records.insert(record.name.clone(), record);
        self.flush()
    }

    /// Replace the record of a component, returning the previous one.
    pub fn redeploy(&mut self, record: DeploymentRecord) -> Result<Option<DeploymentRecord>> {
        let previous = self
            .environment
            .records
            .insert(record.name.clone(), record.clone());

        match &previous {
            Some(old) => tracing::warn!(
                component = %record.name,
                old_address = %old.address,
                new_address = %record.address,
                old_fingerprint = %old.fingerprint.short(),
                new_fingerprint = %record.fingerprint.short(),
                "Redeployed component, previous address is no longer referenced"
            ),
            None => tracing::info!(
                component = %record.name,
                address = %record.address,
                "Recorded deployment"
            ),
        }

        self.flush()?;
        Ok(previous)
    }

    /// Pin a component to an operator-supplied address.
    pub fn set_override(&mut self, name: &str, address: Address) -> Result<()> {
        match self.environment.overrides.insert(name.to_string(), address) {
            Some(previous) if previous == address => return Ok(()),
            Some(previous) => tracing::warn!(
                component = %name,
                old_address = %previous,
                new_address = %address,
                "Address override changed"
            ),
            None => tracing::info!(component = %name, address = %address, "Address override set"),
        }
        self.flush()
    }

    /// Make `overrides` the complete override table of the network.
    pub fn replace_overrides(&mut self, overrides: BTreeMap<String, Address>) -> Result<()> {
        if self.environment.overrides == overrides {
            return Ok(());
        }

        for (name, address) in &self.environment.overrides {
            if !overrides.contains_key(name) {
                tracing::warn!(component = %name, address = %address, "Address override removed");
            }
        }
        for (name, address) in &overrides {
            match self.environment.overrides.get(name) {
                Some(previous) if previous == address => {}
                Some(previous) => tracing::warn!(
                    component = %name,
                    old_address = %previous,
                    new_address = %address,
                    "Address override changed"
                ),
                None => tracing::info!(component = %name, address = %address, "Address override set"),
            }
        }

        self.environment.overrides = overrides;
        self.flush()
    }

    pub fn pending(&self, key: &str) -> Option<&PendingTransaction> {
        self.environment.pending.get(key)
    }

    /// Remember a submitted deployment before waiting for its confirmation.
    pub fn set_pending(&mut self, key: &str, fingerprint: Fingerprint, tx_hash: TxHash) -> Result<()> {
        self.environment.pending.insert(
            key.to_string(),
            PendingTransaction {
                fingerprint,
                tx_hash,
                submitted_at: unix_now(),
            },
        );
        self.flush()
    }

    pub fn clear_pending(&mut self, key: &str) -> Result<()> {
        if self.environment.pending.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    pub fn pending_call(&self, label: &str) -> Option<&PendingTransaction> {
        self.environment.pending_calls.get(label)
    }

    /// Remember a submitted call before waiting for its confirmation.
    pub fn set_pending_call(
        &mut self,
        label: &str,
        fingerprint: Fingerprint,
        tx_hash: TxHash,
    ) -> Result<()> {
        self.environment.pending_calls.insert(
            label.to_string(),
            PendingTransaction {
                fingerprint,
                tx_hash,
                submitted_at: unix_now(),
            },
        );
        self.flush()
    }

    pub fn clear_pending_call(&mut self, label: &str) -> Result<()> {
        if self.environment.pending_calls.remove(label).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    /// Store a confirmed deployment and drop its pending marker in one flush.
    pub(crate) fn confirm_deployment(&mut self, record: DeploymentRecord) -> Result<()> {
        let cleared = self.environment.pending.remove(&record.name).is_some();
        match self.environment.records.get(&record.name) {
            Some(existing) if *existing == record => {
                if cleared {
                    self.flush()?;
                }
                Ok(())
            }
            Some(_) => self.redeploy(record).map(|_| ()),
            None => self.set(record),
        }
    }

    pub fn set_proxy(&mut self, name: &str, proxy: ProxyDeployment) -> Result<()> {
        if let Some(existing) = self.environment.proxies.get(name) {
            if existing.proxy != proxy.proxy {
                return Err(DeployError::config(format!(
                    "proxy of {name} is {}; it cannot move to {}",
                    existing.proxy, proxy.proxy
                )));
            }
        }
        self.environment.proxies.insert(name.to_string(), proxy);
        self.flush()
    }

    /// Append a confirmed version. Entries are never edited or removed.
    pub fn push_version(&mut self, registry: &str, entry: VersionEntry) -> Result<()> {
        let previous = self
            .environment
            .versions_of(registry)
            .last()
            .map(|v| v.version)
            .unwrap_or(0);

        if entry.version <= previous {
            return Err(DeployError::VersionOrder {
                registry: registry.to_string(),
                previous,
                reported: entry.version,
            });
        }

        self.environment
            .versions
            .entry(registry.to_string())
            .or_default()
            .push(entry);
        self.flush()
    }

    pub fn mark_completed(&mut self, step: &str) -> Result<()> {
        self.environment.completed.insert(
            step.to_string(),
            CompletedStep {
                completed_at: unix_now(),
            },
        );
        self.flush()
    }

    /// Hand the environment back, releasing the store lock.
    pub fn into_environment(self) -> Environment {
        self.environment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn record(name: &str, byte: u8) -> DeploymentRecord {
        DeploymentRecord {
            name: name.to_string(),
            address: Address::repeat_byte(byte),
            artifact: name.to_string(),
            fingerprint: Fingerprint::of_code(&[byte]),
            tx_hash: TxHash::repeat_byte(byte),
            timestamp: 1_610_000_000,
        }
    }

    fn open(dir: &TempDir) -> AddressBook {
        AddressBook::open(EnvironmentStore::open(dir.path(), "kovan").unwrap()).unwrap()
    }

    fn entry(version: u64) -> VersionEntry {
        VersionEntry {
            version,
            module_names: vec!["LiquidityPool".into()],
            modules: vec![Address::repeat_byte(0x01)],
            governor: Address::repeat_byte(0x02),
            compatibility: 0,
            description: format!("version {version}"),
            activated_at: 1_610_000_000,
            tx_hash: TxHash::ZERO,
        }
    }

    #[test]
    fn test_set_persists_immediately() {
        let dir = TempDir::new("strata-test").unwrap();
        let mut book = open(&dir);
        book.set(record("Broker", 0x10)).unwrap();
        drop(book);

        let book = open(&dir);
        assert!(matches!(book.get("Broker"), Lookup::Deployed(r) if r.address == Address::repeat_byte(0x10)));
    }

    #[test]
    fn test_set_refuses_implicit_overwrite() {
        let dir = TempDir::new("strata-test").unwrap();
        let mut book = open(&dir);
        book.set(record("Broker", 0x10)).unwrap();

        // Same record again is fine.
        book.set(record("Broker", 0x10)).unwrap();

        let result = book.set(record("Broker", 0x11));
        assert!(matches!(result, Err(DeployError::Configuration(_))));
        assert_eq!(book.environment().address_of("Broker"), Some(Address::repeat_byte(0x10)));
    }

    #[test]
    fn test_redeploy_returns_previous() {
        let dir = TempDir::new("strata-test").unwrap();
        let mut book = open(&dir);
        book.set(record("Broker", 0x10)).unwrap();

        let previous = book.redeploy(record("Broker", 0x11)).unwrap();
        assert_eq!(previous.map(|r| r.address), Some(Address::repeat_byte(0x10)));
        assert_eq!(book.environment().address_of("Broker"), Some(Address::repeat_byte(0x11)));
    }

    #[test]
    fn test_pending_calls_survive_reopen() {
        let dir = TempDir::new("strata-test").unwrap();
        let mut book = open(&dir);
        let fingerprint = Fingerprint::of_code(b"initialize");
        book.set_pending_call("Broker.initialize", fingerprint.clone(), TxHash::repeat_byte(0x42))
            .unwrap();
        drop(book);

        let mut book = open(&dir);
        let pending = book.pending_call("Broker.initialize").cloned().unwrap();
        assert_eq!(pending.fingerprint, fingerprint);
        assert_eq!(pending.tx_hash, TxHash::repeat_byte(0x42));
        // Deployment and call markers are separate tables.
        assert!(book.pending("Broker.initialize").is_none());

        book.clear_pending_call("Broker.initialize").unwrap();
        drop(book);
        assert!(open(&dir).pending_call("Broker.initialize").is_none());
    }

    #[test]
    fn test_confirm_deployment_clears_pending() {
        let dir = TempDir::new("strata-test").unwrap();
        let mut book = open(&dir);
        let rec = record("Reader", 0x20);
        book.set_pending("Reader", rec.fingerprint.clone(), rec.tx_hash)
            .unwrap();
        assert!(book.pending("Reader").is_some());

        book.confirm_deployment(rec).unwrap();
        drop(book);

        let book = open(&dir);
        assert!(book.pending("Reader").is_none());
        assert!(book.environment().records.contains_key("Reader"));
    }

    #[test]
    fn test_versions_are_append_only_and_increasing() {
        let dir = TempDir::new("strata-test").unwrap();
        let mut book = open(&dir);

        book.push_version("PoolCreator", entry(1)).unwrap();
        book.push_version("PoolCreator", entry(2)).unwrap();

        let result = book.push_version("PoolCreator", entry(2));
        assert!(matches!(
            result,
            Err(DeployError::VersionOrder { previous: 2, reported: 2, .. })
        ));

        // Registries are numbered independently.
        book.push_version("OtherRegistry", entry(1)).unwrap();
        assert_eq!(book.environment().versions_of("PoolCreator").len(), 2);
    }

    #[test]
    fn test_replace_overrides() {
        let dir = TempDir::new("strata-test").unwrap();
        let mut book = open(&dir);
        book.set_override("WETH9", Address::repeat_byte(0xd0)).unwrap();
        book.set_override("USDC", Address::repeat_byte(0xd1)).unwrap();

        let configured = BTreeMap::from([("WETH9".to_string(), Address::repeat_byte(0xd2))]);
        book.replace_overrides(configured.clone()).unwrap();
        drop(book);

        let book = open(&dir);
        assert_eq!(book.environment().overrides, configured);
        assert_eq!(book.get("USDC"), Lookup::Absent);
    }

    #[test]
    fn test_proxy_address_cannot_move() {
        use crate::environment::ImplementationRecord;

        let dir = TempDir::new("strata-test").unwrap();
        let mut book = open(&dir);
        let implementation = ImplementationRecord {
            address: Address::repeat_byte(0x31),
            fingerprint: Fingerprint::of_code(&[0x31]),
            activated_at: 0,
        };
        let proxy = ProxyDeployment {
            proxy: Address::repeat_byte(0x30),
            admin: Address::repeat_byte(0x3a),
            implementation,
            history: vec![],
        };
        book.set_proxy("PoolCreator", proxy.clone()).unwrap();

        let mut moved = proxy;
        moved.proxy = Address::repeat_byte(0x40);
        assert!(book.set_proxy("PoolCreator", moved).is_err());
    }
}
