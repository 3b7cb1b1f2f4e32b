//! agora-core
//!
//! Shared data model for the Agora marketplace: identifiers, fixed-point
//! money, the entities of the ledger (agents, listings, jobs, escrow,
//! reviews, wallet rows), the job transition table, typed audit and
//! negotiation log entries, configuration, and the error type every
//! service layer speaks.

pub mod agent;
pub mod canonical;
pub mod config;
pub mod constants;
pub mod error;
pub mod escrow;
pub mod job;
pub mod listing;
pub mod money;
pub mod review;
pub mod types;
pub mod wallet;

pub use error::MarketError;
pub use money::{Credits, UsdcUnits};
pub use types::{AgentId, EscrowId, JobId, ListingId, Timestamp};
