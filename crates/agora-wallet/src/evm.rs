//! Minimal EVM JSON-RPC client.
//!
//! Raw HTTP POST with serde_json rather than a full web3 stack; the wallet
//! needs five methods and nothing else. Everything is behind the
//! [`EvmClient`] trait so workers are testable against a scripted chain.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use agora_core::MarketError;

/// One log entry of a transaction receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

/// The subset of an EVM transaction receipt the deposit path reads.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub status_ok: bool,
    pub block_number: u64,
    pub logs: Vec<ReceiptLog>,
}

#[async_trait]
pub trait EvmClient: Send + Sync {
    /// Receipt for a mined transaction, or None when the chain has not seen
    /// the hash.
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, MarketError>;
    async fn block_number(&self) -> Result<u64, MarketError>;
    /// Pending-inclusive nonce for an address.
    async fn transaction_count(&self, address: &str) -> Result<u64, MarketError>;
    async fn gas_price(&self) -> Result<u128, MarketError>;
    async fn max_priority_fee(&self) -> Result<u128, MarketError>;
    /// Broadcast a raw signed transaction, returning its hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, MarketError>;
}

/// Parse a 0x-prefixed hex quantity.
pub fn parse_quantity(value: &Value) -> Result<u128, MarketError> {
    let s = value
        .as_str()
        .ok_or_else(|| MarketError::Upstream("rpc: expected hex quantity".into()))?;
    u128::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| MarketError::Upstream(format!("rpc: bad hex quantity: {e}")))
}

pub struct HttpEvmClient {
    url: String,
    client: reqwest::Client,
}

impl HttpEvmClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), client: reqwest::Client::new() }
    }

    /// Call a JSON-RPC method and return the `result` field.
    async fn call(&self, method: &str, params: Value) -> Result<Value, MarketError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MarketError::Upstream(format!("rpc {method}: {e}")))?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| MarketError::Upstream(format!("rpc {method}: {e}")))?;
        if let Some(err) = body.get("error") {
            if !err.is_null() {
                return Err(MarketError::Upstream(format!("rpc {method}: {err}")));
            }
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl EvmClient for HttpEvmClient {
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, MarketError> {
        let result = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let status_ok = result
            .get("status")
            .map(parse_quantity)
            .transpose()?
            .map(|s| s == 1)
            .unwrap_or(false);
        let block_number = result
            .get("blockNumber")
            .map(parse_quantity)
            .transpose()?
            .ok_or_else(|| MarketError::Upstream("rpc: receipt missing blockNumber".into()))?
            as u64;
        let logs: Vec<ReceiptLog> = result
            .get("logs")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| MarketError::Upstream(format!("rpc: bad receipt logs: {e}")))?
            .unwrap_or_default();
        Ok(Some(Receipt { status_ok, block_number, logs }))
    }

    async fn block_number(&self) -> Result<u64, MarketError> {
        Ok(parse_quantity(&self.call("eth_blockNumber", json!([])).await?)? as u64)
    }

    async fn transaction_count(&self, address: &str) -> Result<u64, MarketError> {
        Ok(parse_quantity(
            &self
                .call("eth_getTransactionCount", json!([address, "pending"]))
                .await?,
        )? as u64)
    }

    async fn gas_price(&self) -> Result<u128, MarketError> {
        parse_quantity(&self.call("eth_gasPrice", json!([])).await?)
    }

    async fn max_priority_fee(&self) -> Result<u128, MarketError> {
        parse_quantity(&self.call("eth_maxPriorityFeePerGas", json!([])).await?)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, MarketError> {
        let hex_tx = format!("0x{}", hex::encode(raw));
        let result = self.call("eth_sendRawTransaction", json!([hex_tx])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| MarketError::Upstream("rpc: expected tx hash".into()))
    }
}
