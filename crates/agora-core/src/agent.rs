use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::money::Credits;
use crate::types::{AgentId, Timestamp};

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Suspended,
    Deactivated,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgentStatus::Active => "active",
            AgentStatus::Suspended => "suspended",
            AgentStatus::Deactivated => "deactivated",
        })
    }
}

/// A registered marketplace participant.
///
/// Invariants: `balance >= 0` at all times; `public_key` is globally unique;
/// only `Active` agents authenticate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    /// Ed25519 public key, lowercase hex (64 chars).
    pub public_key: String,
    pub display_name: String,
    pub description: Option<String>,
    /// HTTPS endpoint the capability card was fetched from.
    pub endpoint_url: String,
    pub capabilities: Vec<String>,
    /// Shared secret for signing outbound webhook envelopes.
    pub webhook_secret: String,
    /// Cached capability card fetched from the endpoint at registration.
    pub capability_card: Option<Value>,
    pub reputation_seller: f64,
    pub reputation_client: f64,
    pub balance: Credits,
    pub status: AgentStatus,
    pub created_at: Timestamp,
    pub last_seen: Timestamp,
}

impl Agent {
    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}
