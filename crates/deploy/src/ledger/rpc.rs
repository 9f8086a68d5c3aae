//! [`Ledger`] over an Ethereum JSON-RPC endpoint.

use std::time::Duration;

use alloy_core::primitives::{Address, Bytes, TxHash};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use super::{Ledger, Receipt, TransactionRequest};
use crate::error::LedgerError;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Ledger backed by a node that signs with its unlocked accounts
/// (`eth_sendTransaction`).
#[derive(Debug, Clone)]
pub struct JsonRpcLedger {
    client: reqwest::Client,
    url: Url,
}

impl JsonRpcLedger {
    pub fn new(url: Url) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| LedgerError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Make a JSON-RPC call and deserialize the result.
    ///
    /// Error objects returned by the node are rejections; anything that prevents
    /// reading a response is a transport error.
    async fn json_rpc_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, LedgerError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("failed to send {method} request: {e}")))?;

        let result: Value = response
            .json()
            .await
            .map_err(|e| LedgerError::Transport(format!("failed to parse {method} response: {e}")))?;

        if let Some(error) = result.get("error") {
            return Err(LedgerError::Rejected(format!(
                "{method}: {}",
                error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown")
            )));
        }

        let result_value = result
            .get("result")
            .cloned()
            .ok_or_else(|| LedgerError::Transport(format!("no result in {method} response")))?;

        serde_json::from_value(result_value)
            .map_err(|e| LedgerError::Transport(format!("failed to deserialize {method} result: {e}")))
    }
}

/// Receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: TxHash,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    status: u64,
    contract_address: Option<Address>,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    block_number: u64,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    gas_used: u64,
}

impl From<RpcReceipt> for Receipt {
    fn from(r: RpcReceipt) -> Self {
        Self {
            tx_hash: r.transaction_hash,
            success: r.status == 1,
            contract_address: r.contract_address,
            block_number: r.block_number,
            gas_used: r.gas_used,
        }
    }
}

/// Deserialize a u64 from a hex string (with 0x prefix).
fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(serde::de::Error::custom)
}

fn transaction_object(tx: &TransactionRequest) -> Value {
    let mut object = serde_json::json!({
        "from": tx.from,
        "data": tx.data,
    });
    if let Some(to) = tx.to {
        object["to"] = serde_json::json!(to);
    }
    if let Some(gas) = tx.gas {
        object["gas"] = Value::String(format!("0x{gas:x}"));
    }
    object
}

impl Ledger for JsonRpcLedger {
    async fn submit(&self, tx: TransactionRequest) -> Result<TxHash, LedgerError> {
        let hash: TxHash = self
            .json_rpc_call("eth_sendTransaction", vec![transaction_object(&tx)])
            .await?;
        tracing::debug!(tx_hash = %hash, from = %tx.from, to = ?tx.to, "Transaction submitted");
        Ok(hash)
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, LedgerError> {
        let receipt: Option<RpcReceipt> = self
            .json_rpc_call("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await?;
        Ok(receipt.map(Receipt::from))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError> {
        self.json_rpc_call(
            "eth_call",
            vec![serde_json::json!({ "to": to, "data": data }), Value::from("latest")],
        )
        .await
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, LedgerError> {
        self.json_rpc_call(
            "eth_getCode",
            vec![serde_json::json!(address), Value::from("latest")],
        )
        .await
    }
}
