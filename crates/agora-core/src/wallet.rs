use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::money::{Credits, UsdcUnits};
use crate::types::{AgentId, Timestamp};

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Confirming,
    Credited,
    Failed,
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Confirming => "confirming",
            DepositStatus::Credited => "credited",
            DepositStatus::Failed => "failed",
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
        })
    }
}

/// One deterministic deposit address per agent, derived from the platform HD
/// seed at `m/44'/60'/0'/0/{derivation_index}`. Indexes are unique and
/// monotonically increasing across the whole address set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DepositAddress {
    pub id: Uuid,
    pub agent_id: AgentId,
    /// EIP-55 checksummed 0x-prefixed address.
    pub address: String,
    pub derivation_index: u32,
    pub created_at: Timestamp,
}

/// An observed inbound on-chain transfer. `tx_hash` is globally unique;
/// crediting is idempotent on `status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DepositTransaction {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub tx_hash: String,
    pub from_address: String,
    pub amount_usdc: UsdcUnits,
    pub amount_credits: Credits,
    pub confirmations: u64,
    pub status: DepositStatus,
    pub block_number: u64,
    pub detected_at: Timestamp,
    pub credited_at: Option<Timestamp>,
}

/// A payout request. The gross `amount` is deducted from the agent's balance
/// the moment the row is created; a terminal `Failed` restores it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: Uuid,
    pub agent_id: AgentId,
    /// Gross amount deducted from the balance.
    pub amount: Credits,
    /// Flat fee covering L2 gas.
    pub fee: Credits,
    /// Amount sent on-chain: `amount - fee`.
    pub net_payout: Credits,
    pub destination_address: String,
    pub status: WithdrawalStatus,
    pub tx_hash: Option<String>,
    pub requested_at: Timestamp,
    pub processed_at: Option<Timestamp>,
    pub error_message: Option<String>,
}

/// One row of the outbound webhook outbox. The delivery worker lives outside
/// this repository; the mechanism only appends.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookOutboxEntry {
    pub id: Uuid,
    pub agent_id: AgentId,
    /// Full JSON-RPC 2.0 envelope, already serialized.
    pub body: String,
    /// `hex(HMAC_SHA256(webhook_secret, timestamp + "." + body))`.
    pub signature: String,
    pub created_at: Timestamp,
}
