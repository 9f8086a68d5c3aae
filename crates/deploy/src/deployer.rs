use alloy_core::dyn_abi::DynSolValue;
use alloy_core::primitives::{Address, Bytes, TxHash};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactStore;
use crate::environment::{AddressBook, DeploymentRecord, Environment, Lookup, unix_now};
use crate::error::{DeployError, LedgerError, Result};
use crate::ledger::{
    Confirmation, ConfirmationPolicy, Ledger, Receipt, TransactionRequest, wait_for_confirmation,
};
use crate::Fingerprint;

/// Artifact used for the proxy of upgradeable components.
pub const DEFAULT_PROXY_ARTIFACT: &str = "TransparentUpgradeableProxy";

fn default_proxy_artifact() -> String {
    DEFAULT_PROXY_ARTIFACT.to_string()
}

/// What to do with a named component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No matching record: deploy it.
    Deploy,
    /// A record with the current fingerprint exists at this address.
    Skip(Address),
    /// The operator pinned the component to this address.
    Override(Address),
}

/// Decide whether a component needs to be deployed.
///
/// Overrides always win. A record is reused only if it was deployed from the same
/// code and constructor arguments.
pub fn decide(lookup: Lookup<'_>, fingerprint: &Fingerprint) -> Decision {
    match lookup {
        Lookup::Override(address) => Decision::Override(address),
        Lookup::Deployed(record) if record.fingerprint == *fingerprint => {
            Decision::Skip(record.address)
        }
        Lookup::Deployed(_) | Lookup::Absent => Decision::Deploy,
    }
}

/// Options of a [`Deployer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOptions {
    /// Account every transaction is sent from.
    pub sender: Address,
    /// Artifact the proxies of upgradeable components are created from.
    #[serde(default = "default_proxy_artifact")]
    pub proxy_artifact: String,
    #[serde(default)]
    pub confirmation: ConfirmationPolicy,
}

impl DeployOptions {
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            proxy_artifact: default_proxy_artifact(),
            confirmation: ConfirmationPolicy::default(),
        }
    }

    pub fn with_confirmation(mut self, confirmation: ConfirmationPolicy) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn with_proxy_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.proxy_artifact = artifact.into();
        self
    }
}

/// Linked creation code of a component and its fingerprint.
#[derive(Debug, Clone)]
pub(crate) struct PreparedDeployment {
    pub artifact: String,
    /// Creation code followed by the encoded constructor arguments.
    pub code: Vec<u8>,
    pub fingerprint: Fingerprint,
}

/// Execution context of a deployment plan.
///
/// Owns the ledger handle, the address book of the target network and the
/// artifacts. Every plan step receives it mutably, so there is no state outside
/// of it.
pub struct Deployer<L> {
    ledger: L,
    book: AddressBook,
    artifacts: ArtifactStore,
    options: DeployOptions,
}

impl<L: Ledger> Deployer<L> {
    pub fn new(ledger: L, book: AddressBook, artifacts: ArtifactStore, options: DeployOptions) -> Self {
        Self {
            ledger,
            book,
            artifacts,
            options,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn environment(&self) -> &Environment {
        self.book.environment()
    }

    pub fn book(&self) -> &AddressBook {
        &self.book
    }

    pub(crate) fn book_mut(&mut self) -> &mut AddressBook {
        &mut self.book
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn options(&self) -> &DeployOptions {
        &self.options
    }

    pub fn sender(&self) -> Address {
        self.options.sender
    }

    /// Address of a component that must already be known.
    pub fn address_of(&self, name: &str) -> Result<Address> {
        self.environment().address_of(name).ok_or_else(|| {
            DeployError::config(format!(
                "{name} is neither deployed nor overridden on {}",
                self.book.network()
            ))
        })
    }

    /// Release the store lock and return the final environment.
    pub fn into_environment(self) -> Environment {
        self.book.into_environment()
    }

    /// Deploy the component `name` from the artifact of the same name, unless an
    /// override or an up-to-date record exists.
    pub async fn deploy_or_skip(&mut self, name: &str, args: Vec<DynSolValue>) -> Result<Address> {
        self.deploy_component(name, name, args).await
    }

    /// Like [`deploy_or_skip`](Self::deploy_or_skip) with a record name distinct from
    /// the artifact name.
    pub async fn deploy_component(
        &mut self,
        name: &str,
        artifact: &str,
        args: Vec<DynSolValue>,
    ) -> Result<Address> {
        // Overridden components need no artifact.
        if let Lookup::Override(address) = self.book.get(name) {
            return self.adopt_override(name, address).await;
        }

        let prepared = self.prepare(artifact, &args)?;
        self.ensure_deployed(name, &prepared).await
    }

    /// Deploy `name` again even if its record is up to date, replacing the record.
    pub async fn redeploy(
        &mut self,
        name: &str,
        artifact: &str,
        args: Vec<DynSolValue>,
    ) -> Result<Address> {
        if let Lookup::Override(address) = self.book.get(name) {
            return Err(DeployError::config(format!(
                "{name} is overridden to {address} and cannot be redeployed"
            )));
        }

        let prepared = self.prepare(artifact, &args)?;
        if let Some(address) = self.reconcile_pending(name, &prepared).await? {
            return Ok(address);
        }
        self.execute_deployment(name, &prepared).await
    }

    /// Link the artifact against the environment and encode the constructor arguments.
    pub(crate) fn prepare(&self, artifact: &str, args: &[DynSolValue]) -> Result<PreparedDeployment> {
        let compiled = self.artifacts.get(artifact)?;
        let linked = compiled.link(self.environment())?;
        let encoded_args = compiled.encode_constructor_args(args)?;
        let fingerprint = Fingerprint::compute(&linked, &encoded_args);

        let mut code = linked;
        code.extend_from_slice(&encoded_args);

        Ok(PreparedDeployment {
            artifact: artifact.to_string(),
            code,
            fingerprint,
        })
    }

    /// Deploy `prepared` under `name` unless the environment already holds it.
    pub(crate) async fn ensure_deployed(
        &mut self,
        name: &str,
        prepared: &PreparedDeployment,
    ) -> Result<Address> {
        match decide(self.book.get(name), &prepared.fingerprint) {
            Decision::Override(address) => return self.adopt_override(name, address).await,
            Decision::Skip(address) => {
                tracing::info!(
                    component = %name,
                    address = %address,
                    fingerprint = %prepared.fingerprint.short(),
                    "Component up to date, skipping"
                );
                return Ok(address);
            }
            Decision::Deploy => {}
        }

        if let Some(address) = self.reconcile_pending(name, prepared).await? {
            return Ok(address);
        }
        self.execute_deployment(name, prepared).await
    }

    pub(crate) async fn adopt_override(&self, name: &str, address: Address) -> Result<Address> {
        let code = self.ledger.code_at(address).await?;
        if code.is_empty() {
            tracing::warn!(component = %name, address = %address, "Override address has no code");
        }
        tracing::info!(component = %name, address = %address, "Using address override");
        Ok(address)
    }

    /// Settle a deployment submitted by an interrupted run.
    ///
    /// Returns the address if the pending transaction created the component, or
    /// `None` if a new deployment is needed.
    async fn reconcile_pending(
        &mut self,
        name: &str,
        prepared: &PreparedDeployment,
    ) -> Result<Option<Address>> {
        let Some(pending) = self.book.pending(name).cloned() else {
            return Ok(None);
        };

        if pending.fingerprint != prepared.fingerprint {
            tracing::warn!(
                component = %name,
                tx_hash = %pending.tx_hash,
                pending_fingerprint = %pending.fingerprint.short(),
                fingerprint = %prepared.fingerprint.short(),
                "Abandoning pending deployment of different code"
            );
            self.book.clear_pending(name)?;
            return Ok(None);
        }

        tracing::info!(
            component = %name,
            tx_hash = %pending.tx_hash,
            "Re-observing deployment submitted by a previous run"
        );

        match self.confirm(name, pending.tx_hash).await {
            Ok(receipt) => self
                .record_deployment(name, prepared, &receipt)
                .map(Some)
                .map_err(|e| DeployError::deployment(name, e)),
            Err(DeployError::TransactionFailure { .. }) => {
                tracing::warn!(
                    component = %name,
                    tx_hash = %pending.tx_hash,
                    "Pending deployment reverted, deploying again"
                );
                self.book.clear_pending(name)?;
                Ok(None)
            }
            Err(err) => Err(DeployError::deployment(name, err)),
        }
    }

    async fn execute_deployment(&mut self, name: &str, prepared: &PreparedDeployment) -> Result<Address> {
        tracing::info!(
            component = %name,
            artifact = %prepared.artifact,
            fingerprint = %prepared.fingerprint.short(),
            "Deploying component..."
        );

        let tx = TransactionRequest::create(self.sender(), Bytes::from(prepared.code.clone()));
        let tx_hash = self
            .submit(name, tx)
            .await
            .map_err(|e| DeployError::deployment(name, e))?;

        self.book
            .set_pending(name, prepared.fingerprint.clone(), tx_hash)?;

        match self.confirm(name, tx_hash).await {
            Ok(receipt) => self
                .record_deployment(name, prepared, &receipt)
                .map_err(|e| DeployError::deployment(name, e)),
            Err(err @ DeployError::TransactionFailure { .. }) => {
                self.book.clear_pending(name)?;
                Err(DeployError::deployment(name, err))
            }
            // Outcome unknown: keep the pending marker for the next run.
            Err(err) => Err(DeployError::deployment(name, err)),
        }
    }

    fn record_deployment(
        &mut self,
        name: &str,
        prepared: &PreparedDeployment,
        receipt: &Receipt,
    ) -> Result<Address> {
        let address = receipt.contract_address.ok_or_else(|| DeployError::TransactionFailure {
            context: name.to_string(),
            tx_hash: Some(receipt.tx_hash),
            reason: "receipt has no contract address".to_string(),
        })?;

        self.book.confirm_deployment(DeploymentRecord {
            name: name.to_string(),
            address,
            artifact: prepared.artifact.clone(),
            fingerprint: prepared.fingerprint.clone(),
            tx_hash: receipt.tx_hash,
            timestamp: unix_now(),
        })?;

        Ok(address)
    }

    /// Submit a state-changing call and wait for its confirmation.
    ///
    /// `label` names the call across runs. If a previous run sent the same
    /// calldata under `label` and never saw it confirmed, that transaction is
    /// observed again instead of sending a new one.
    pub async fn send(&mut self, label: &str, to: Address, data: Bytes) -> Result<Receipt> {
        let receipt = self.send_tracked(label, to, data).await?;
        self.book.clear_pending_call(label)?;
        Ok(receipt)
    }

    /// Like [`send`](Self::send), but the pending marker is kept after the
    /// confirmation. The caller clears it once the outcome is recorded.
    pub(crate) async fn send_tracked(
        &mut self,
        label: &str,
        to: Address,
        data: Bytes,
    ) -> Result<Receipt> {
        let fingerprint = Fingerprint::compute(to.as_slice(), &data);
        if let Some(receipt) = self.reconcile_pending_call(label, &fingerprint).await? {
            return Ok(receipt);
        }

        tracing::info!(call = %label, to = %to, "Sending transaction...");

        let tx_hash = self
            .submit(label, TransactionRequest::call(self.sender(), to, data))
            .await?;
        self.book.set_pending_call(label, fingerprint, tx_hash)?;

        let receipt = match self.confirm(label, tx_hash).await {
            Ok(receipt) => receipt,
            Err(err @ DeployError::TransactionFailure { .. }) => {
                self.book.clear_pending_call(label)?;
                return Err(err);
            }
            // Outcome unknown: keep the pending marker for the next run.
            Err(err) => return Err(err),
        };

        tracing::info!(
            call = %label,
            tx_hash = %tx_hash,
            block = receipt.block_number,
            gas_used = receipt.gas_used,
            "Transaction confirmed"
        );
        Ok(receipt)
    }

    /// Settle a call submitted by an interrupted run.
    ///
    /// Returns its receipt if it succeeded, or `None` if the call must be sent.
    async fn reconcile_pending_call(
        &mut self,
        label: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<Receipt>> {
        let Some(pending) = self.book.pending_call(label).cloned() else {
            return Ok(None);
        };

        if pending.fingerprint != *fingerprint {
            tracing::warn!(
                call = %label,
                tx_hash = %pending.tx_hash,
                "Abandoning pending call with different calldata"
            );
            self.book.clear_pending_call(label)?;
            return Ok(None);
        }

        tracing::info!(
            call = %label,
            tx_hash = %pending.tx_hash,
            "Re-observing call submitted by a previous run"
        );

        match self.confirm(label, pending.tx_hash).await {
            Ok(receipt) => Ok(Some(receipt)),
            Err(DeployError::TransactionFailure { .. }) => {
                tracing::warn!(
                    call = %label,
                    tx_hash = %pending.tx_hash,
                    "Pending call reverted, sending again"
                );
                self.book.clear_pending_call(label)?;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Read-only call against the latest state.
    pub async fn read(&self, to: Address, data: Bytes) -> Result<Bytes> {
        Ok(self.ledger.call(to, data).await?)
    }

    async fn submit(&self, context: &str, tx: TransactionRequest) -> Result<TxHash> {
        match self.ledger.submit(tx).await {
            Ok(tx_hash) => {
                tracing::debug!(context = %context, tx_hash = %tx_hash, "Transaction submitted");
                Ok(tx_hash)
            }
            Err(LedgerError::Rejected(reason)) => Err(DeployError::TransactionFailure {
                context: context.to_string(),
                tx_hash: None,
                reason,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Wait for a successful receipt of `tx_hash`.
    async fn confirm(&self, context: &str, tx_hash: TxHash) -> Result<Receipt> {
        let policy = &self.options.confirmation;

        match wait_for_confirmation(&self.ledger, tx_hash, policy).await? {
            Confirmation::Confirmed(receipt) if receipt.success => Ok(receipt),
            Confirmation::Confirmed(receipt) => Err(DeployError::TransactionFailure {
                context: context.to_string(),
                tx_hash: Some(receipt.tx_hash),
                reason: format!("reverted in block {}", receipt.block_number),
            }),
            Confirmation::TimedOut => Err(DeployError::ConfirmationTimeout {
                context: context.to_string(),
                tx_hash,
                waited: policy.timeout,
            }),
        }
    }
}
