use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::money::Credits;
use crate::types::{AgentId, EscrowId, JobId, Timestamp};

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Funded,
    Released,
    Refunded,
    Disputed,
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EscrowStatus::Pending => "pending",
            EscrowStatus::Funded => "funded",
            EscrowStatus::Released => "released",
            EscrowStatus::Refunded => "refunded",
            EscrowStatus::Disputed => "disputed",
        })
    }
}

/// Custodial hold against the client's balance for the duration of one job.
///
/// Status moves monotonically along pending → funded → released | refunded;
/// `disputed` is terminal at this layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscrowAccount {
    pub id: EscrowId,
    pub job_id: JobId,
    pub client: AgentId,
    pub seller: AgentId,
    pub amount: Credits,
    pub status: EscrowStatus,
    pub funded_at: Option<Timestamp>,
    pub released_at: Option<Timestamp>,
}

// ── Audit log ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum EscrowAction {
    Created,
    Funded,
    Released,
    Refunded,
    Disputed,
    Resolved,
}

/// Why a funded escrow went back to the client.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    VerificationFailed,
    PartyFailed,
    DeadlineExpired,
    AgentDeactivated,
}

/// Typed per-action payload recorded alongside each audit entry. One variant
/// per action kind; fee breakdowns live here.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditDetail {
    Created,
    Funded,
    Released {
        total_fee: Credits,
        client_base_fee: Credits,
        seller_base_fee: Credits,
        fee_base_bps: u32,
        /// False when the client could not cover their share and the
        /// platform absorbed it.
        client_fee_collected: bool,
    },
    Refunded {
        reason: RefundReason,
    },
    Disputed {
        by: AgentId,
    },
    Resolved,
}

impl AuditDetail {
    pub fn action(&self) -> EscrowAction {
        match self {
            AuditDetail::Created => EscrowAction::Created,
            AuditDetail::Funded => EscrowAction::Funded,
            AuditDetail::Released { .. } => EscrowAction::Released,
            AuditDetail::Refunded { .. } => EscrowAction::Refunded,
            AuditDetail::Disputed { .. } => EscrowAction::Disputed,
            AuditDetail::Resolved => EscrowAction::Resolved,
        }
    }
}

/// One append-only audit row. Never updated, never deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscrowAuditEntry {
    pub id: Uuid,
    pub escrow_id: EscrowId,
    pub action: EscrowAction,
    pub actor: Option<AgentId>,
    pub amount: Credits,
    pub timestamp: Timestamp,
    pub detail: AuditDetail,
}
