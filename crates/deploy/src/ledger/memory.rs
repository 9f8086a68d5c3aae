//! Simulated chain used for dry runs and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_core::primitives::{Address, Bytes, TxHash, U256, keccak256};

use super::{Ledger, Receipt, TransactionRequest};
use crate::abi;
use crate::error::LedgerError;

/// A fault applied to the next submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The node refuses the transaction; nothing is recorded.
    Reject(String),
    /// The transaction is mined but reverts.
    Revert(String),
    /// The transaction is executed but its receipt is withheld until
    /// [`InMemoryLedger::release_withheld`] is called.
    NeverConfirm,
}

/// A transaction accepted by the simulated chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTransaction {
    pub hash: TxHash,
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    pub success: bool,
}

impl SubmittedTransaction {
    pub fn is_creation(&self) -> bool {
        self.to.is_none()
    }
}

#[derive(Debug, Default)]
struct ChainState {
    block: u64,
    nonces: HashMap<Address, u64>,
    code: HashMap<Address, Bytes>,
    /// Creator of each contract; answers `owner()`.
    owners: HashMap<Address, Address>,
    /// Implementation each proxy was repointed to through `upgrade`.
    implementations: HashMap<Address, Address>,
    version_counts: HashMap<Address, u64>,
    receipts: HashMap<TxHash, Receipt>,
    withheld: HashMap<TxHash, Receipt>,
    transactions: Vec<SubmittedTransaction>,
    faults: VecDeque<Fault>,
}

/// In-memory [`Ledger`] that emulates the contracts the orchestrator talks to.
///
/// Contract creation stores the creation code and makes the sender the owner.
/// Calls to `upgrade(address,address)` require the sender to own the target, calls
/// to `addVersion(...)` bump the target's version count, and any other call
/// succeeds if the target has code. Clones share the same chain.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<ChainState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        // A poisoned lock only means another test thread panicked mid-update.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a fault for the next submission.
    pub fn inject(&self, fault: Fault) {
        self.state().faults.push_back(fault);
    }

    /// Number of transactions accepted so far.
    pub fn transaction_count(&self) -> usize {
        self.state().transactions.len()
    }

    /// Number of contract creations accepted so far.
    pub fn creation_count(&self) -> usize {
        self.state()
            .transactions
            .iter()
            .filter(|tx| tx.is_creation())
            .count()
    }

    pub fn transactions(&self) -> Vec<SubmittedTransaction> {
        self.state().transactions.clone()
    }

    /// Make every withheld receipt visible, as if the node caught up.
    pub fn release_withheld(&self) {
        let mut state = self.state();
        let withheld: Vec<_> = state.withheld.drain().collect();
        state.receipts.extend(withheld);
    }

    /// Implementation a proxy was last repointed to.
    pub fn implementation_of(&self, proxy: Address) -> Option<Address> {
        self.state().implementations.get(&proxy).copied()
    }

    /// Give `address` some code, e.g. for an overridden component.
    pub fn set_code(&self, address: Address, code: Bytes) {
        self.state().code.insert(address, code);
    }
}

impl ChainState {
    fn next_nonce(&mut self, from: Address) -> u64 {
        let nonce = self.nonces.entry(from).or_default();
        let current = *nonce;
        *nonce += 1;
        current
    }

    /// Apply a call to an existing contract, returning the revert reason on failure.
    fn execute_call(&mut self, from: Address, to: Address, data: &[u8]) -> Result<(), String> {
        if !self.code.contains_key(&to) {
            return Err(format!("call to {to}, which has no code"));
        }

        if abi::is_call_to(data, abi::UPGRADE) {
            let owner = self.owners.get(&to).copied().unwrap_or_default();
            if owner != from {
                return Err("Ownable: caller is not the owner".to_string());
            }
            let args = abi::decode_call_args(data, vec![DynSolType::Address, DynSolType::Address])
                .map_err(|e| e.to_string())?;
            if let [DynSolValue::Address(proxy), DynSolValue::Address(implementation)] =
                args.as_slice()
            {
                self.implementations.insert(*proxy, *implementation);
            }
        } else if abi::is_call_to(data, abi::ADD_VERSION) {
            *self.version_counts.entry(to).or_default() += 1;
        }

        Ok(())
    }
}

/// Address of a contract created by `from` with `nonce`.
fn create_address(from: Address, nonce: u64) -> Address {
    let mut preimage = from.to_vec();
    preimage.extend_from_slice(&nonce.to_be_bytes());
    Address::from_slice(&keccak256(&preimage)[12..])
}

impl Ledger for InMemoryLedger {
    async fn submit(&self, tx: TransactionRequest) -> Result<TxHash, LedgerError> {
        let mut state = self.state();
        let fault = state.faults.pop_front();

        if let Some(Fault::Reject(reason)) = fault {
            return Err(LedgerError::Rejected(reason));
        }

        let nonce = state.next_nonce(tx.from);
        let mut preimage = tx.from.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&tx.data);
        let hash = keccak256(&preimage);

        state.block += 1;

        let outcome = match (&fault, tx.to) {
            (Some(Fault::Revert(reason)), _) => Err(reason.clone()),
            (_, None) => {
                let address = create_address(tx.from, nonce);
                state.code.insert(address, tx.data.clone());
                state.owners.insert(address, tx.from);
                Ok(Some(address))
            }
            (_, Some(to)) => state.execute_call(tx.from, to, &tx.data).map(|_| None),
        };

        if let Err(reason) = &outcome {
            tracing::debug!(tx_hash = %hash, %reason, "Simulated transaction reverted");
        }

        let receipt = Receipt {
            tx_hash: hash,
            success: outcome.is_ok(),
            contract_address: outcome.clone().ok().flatten(),
            block_number: state.block,
            gas_used: 21_000 + tx.data.len() as u64 * 16,
        };

        if matches!(fault, Some(Fault::NeverConfirm)) {
            state.withheld.insert(hash, receipt);
        } else {
            state.receipts.insert(hash, receipt);
        }

        state.transactions.push(SubmittedTransaction {
            hash,
            from: tx.from,
            to: tx.to,
            data: tx.data,
            success: outcome.is_ok(),
        });

        Ok(hash)
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, LedgerError> {
        Ok(self.state().receipts.get(&tx_hash).cloned())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError> {
        let state = self.state();

        if abi::is_call_to(&data, abi::OWNER) {
            let owner = state.owners.get(&to).copied().unwrap_or_default();
            return Ok(abi::encode_return(vec![DynSolValue::Address(owner)]));
        }
        if abi::is_call_to(&data, abi::VERSION_COUNT) {
            let count = state.version_counts.get(&to).copied().unwrap_or_default();
            return Ok(abi::encode_return(vec![DynSolValue::Uint(U256::from(count), 256)]));
        }

        Err(LedgerError::Rejected(format!(
            "simulated ledger cannot answer call 0x{} to {to}",
            hex::encode(data.get(..4).unwrap_or(&data))
        )))
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, LedgerError> {
        Ok(self.state().code.get(&address).cloned().unwrap_or_default())
    }
}
