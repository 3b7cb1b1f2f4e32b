use thiserror::Error;

use crate::job::JobStatus;
use crate::money::Credits;

/// Error type for every service-layer operation.
///
/// Each variant carries enough context for the caller-facing `detail`
/// string; [`MarketError::status`] maps a variant to the HTTP-equivalent
/// status code the thin transport layer should emit.
#[derive(Debug, Error)]
pub enum MarketError {
    // ── Validation ───────────────────────────────────────────────────────────
    #[error("{0}")]
    Validation(String),

    #[error("insufficient balance: {have} < {need}")]
    InsufficientBalance { have: Credits, need: Credits },

    #[error("insufficient balance for {fee_kind} fee: balance {have}, fee {need}")]
    InsufficientBalanceForFee {
        fee_kind: &'static str,
        have: Credits,
        need: Credits,
    },

    // ── Authentication (distinct detail per failure mode) ────────────────────
    #[error("Missing authentication headers")]
    MissingAuthHeaders,

    #[error("Invalid authorization scheme")]
    BadAuthScheme,

    #[error("Malformed authorization header")]
    MalformedAuthHeader,

    #[error("Request timestamp expired")]
    TimestampExpired,

    #[error("Nonce already used")]
    NonceReused,

    #[error("Agent not found")]
    AuthAgentUnknown,

    #[error("Agent is not active")]
    AgentNotActive,

    #[error("Invalid signature")]
    InvalidSignature,

    // ── Authorization ────────────────────────────────────────────────────────
    #[error("{0}")]
    Forbidden(String),

    #[error("Not a party to this job")]
    NotAParty,

    #[error("Only the client can perform this action")]
    ClientOnly,

    #[error("Only the seller can perform this action")]
    SellerOnly,

    // ── State conflicts ──────────────────────────────────────────────────────
    #[error("Cannot transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Maximum negotiation rounds exceeded, job cancelled")]
    RoundsExhausted,

    #[error("acceptance_criteria_hash mismatch. Review the current acceptance_criteria and provide the correct hash")]
    CriteriaHashMismatch,

    #[error("Escrow already exists for this job")]
    EscrowExists,

    #[error("Escrow must be funded, currently {current}")]
    EscrowNotFunded { current: String },

    #[error("{0}")]
    Conflict(String),

    // ── Missing resources ────────────────────────────────────────────────────
    #[error("{0} not found")]
    NotFound(&'static str),

    // ── Admission ────────────────────────────────────────────────────────────
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    // ── Edges ────────────────────────────────────────────────────────────────
    #[error("{0}")]
    ChainTx(String),

    #[error("{0}")]
    Disabled(String),

    #[error("{0}")]
    Upstream(String),

    // ── Internal ─────────────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MarketError {
    /// The HTTP-equivalent status code for this error.
    pub fn status(&self) -> u16 {
        use MarketError::*;
        match self {
            Validation(_) | InsufficientBalance { .. } | InsufficientBalanceForFee { .. } => 422,
            MissingAuthHeaders | BadAuthScheme | MalformedAuthHeader | TimestampExpired
            | NonceReused | AuthAgentUnknown | AgentNotActive | InvalidSignature
            | Forbidden(_) | NotAParty | ClientOnly | SellerOnly => 403,
            InvalidTransition { .. } | RoundsExhausted | CriteriaHashMismatch | EscrowExists
            | EscrowNotFunded { .. } | Conflict(_) => 409,
            NotFound(_) => 404,
            RateLimited { .. } => 429,
            ChainTx(_) => 400,
            Disabled(_) => 501,
            Upstream(_) => 502,
            Storage(_) | Serialization(_) | Internal(_) => 500,
        }
    }
}
