//! Access to the chain the components are deployed on.
//!
//! The orchestrator only needs four primitives: submit a transaction, look its
//! receipt up, call a read-only method and read deployed code. Submission is
//! treated as at-least-once, so after a transaction is handed to the ledger the
//! orchestrator only ever polls for its receipt and never submits it again.

mod memory;
mod rpc;

pub use memory::{Fault, InMemoryLedger, SubmittedTransaction};
pub use rpc::JsonRpcLedger;

use std::future::Future;
use std::time::Duration;

use alloy_core::primitives::{Address, Bytes, TxHash};
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Default time to wait for a transaction confirmation.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Default interval between receipt lookups.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A transaction to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    /// `None` creates a contract from `data`.
    pub to: Option<Address>,
    pub data: Bytes,
    pub gas: Option<u64>,
}

impl TransactionRequest {
    /// A contract creation transaction.
    pub fn create(from: Address, code: Bytes) -> Self {
        Self {
            from,
            to: None,
            data: code,
            gas: None,
        }
    }

    /// A call to an existing contract.
    pub fn call(from: Address, to: Address, data: Bytes) -> Self {
        Self {
            from,
            to: Some(to),
            data,
            gas: None,
        }
    }
}

/// Observed outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    /// `true` if the transaction succeeded.
    pub success: bool,
    /// Address of the created contract, for creation transactions.
    pub contract_address: Option<Address>,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Chain access used by the [`Deployer`](crate::Deployer).
pub trait Ledger {
    /// Hand a transaction to the ledger, returning its hash.
    fn submit(
        &self,
        tx: TransactionRequest,
    ) -> impl Future<Output = Result<TxHash, LedgerError>> + Send;

    /// Receipt of a transaction, `None` while it is not mined.
    fn receipt(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<Option<Receipt>, LedgerError>> + Send;

    /// Execute a read-only call against the latest state.
    fn call(
        &self,
        to: Address,
        data: Bytes,
    ) -> impl Future<Output = Result<Bytes, LedgerError>> + Send;

    /// Runtime code deployed at `address`, empty if none.
    fn code_at(&self, address: Address) -> impl Future<Output = Result<Bytes, LedgerError>> + Send;
}

/// How long to wait for confirmations and how often to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationPolicy {
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ConfirmationPolicy {
    /// Number of receipt lookups after the first one.
    fn max_retries(&self) -> usize {
        let interval = self.poll_interval.as_millis().max(1);
        (self.timeout.as_millis() / interval).max(1) as usize
    }
}

/// Outcome of waiting for a confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed(Receipt),
    /// No receipt was observed within the policy timeout.
    TimedOut,
}

/// Poll the receipt of `tx_hash` until it is mined or the policy times out.
///
/// Only the receipt lookup is retried; the transaction itself is never
/// submitted again.
pub async fn wait_for_confirmation<L: Ledger>(
    ledger: &L,
    tx_hash: TxHash,
    policy: &ConfirmationPolicy,
) -> Result<Confirmation, LedgerError> {
    let poll = || async move {
        match ledger.receipt(tx_hash).await? {
            Some(receipt) => Ok(receipt),
            None => Err(LedgerError::Pending(tx_hash)),
        }
    };

    let backoff = ConstantBuilder::default()
        .with_delay(policy.poll_interval)
        .with_max_times(policy.max_retries());

    let result = poll
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .when(LedgerError::is_retryable)
        .notify(|err: &LedgerError, delay: Duration| {
            tracing::trace!(error = %err, ?delay, "Receipt not available, retrying...");
        })
        .await;

    match result {
        Ok(receipt) => Ok(Confirmation::Confirmed(receipt)),
        Err(LedgerError::Pending(_)) => Ok(Confirmation::TimedOut),
        Err(err) => Err(err),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy() -> ConfirmationPolicy {
        ConfirmationPolicy {
            timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_max_retries() {
        let policy = ConfirmationPolicy {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
        };
        assert_eq!(policy.max_retries(), 5);

        let policy = ConfirmationPolicy {
            timeout: Duration::ZERO,
            poll_interval: Duration::from_secs(2),
        };
        assert_eq!(policy.max_retries(), 1);
    }

    #[tokio::test]
    async fn test_confirmed_transaction() {
        let ledger = InMemoryLedger::new();
        let from = Address::repeat_byte(0xaa);
        let tx_hash = ledger
            .submit(TransactionRequest::create(from, Bytes::from_static(&[0x60, 0x00])))
            .await
            .unwrap();

        let confirmation = wait_for_confirmation(&ledger, tx_hash, &fast_policy())
            .await
            .unwrap();
        assert!(matches!(confirmation, Confirmation::Confirmed(r) if r.success));
    }

    #[tokio::test]
    async fn test_withheld_transaction_times_out() {
        let ledger = InMemoryLedger::new();
        ledger.inject(Fault::NeverConfirm);
        let from = Address::repeat_byte(0xaa);
        let tx_hash = ledger
            .submit(TransactionRequest::create(from, Bytes::from_static(&[0x60, 0x00])))
            .await
            .unwrap();

        let confirmation = wait_for_confirmation(&ledger, tx_hash, &fast_policy())
            .await
            .unwrap();
        assert_eq!(confirmation, Confirmation::TimedOut);
        assert_eq!(ledger.transaction_count(), 1, "waiting must not resubmit");
    }

    #[test]
    fn test_policy_roundtrip_units() {
        let policy: ConfirmationPolicy =
            serde_json::from_str(r#"{ "timeout": 120, "poll_interval": 500 }"#).unwrap();
        assert_eq!(policy.timeout, Duration::from_secs(120));
        assert_eq!(policy.poll_interval, Duration::from_millis(500));
    }
}
