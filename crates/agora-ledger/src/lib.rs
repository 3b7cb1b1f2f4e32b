//! agora-ledger
//!
//! The money-moving half of the marketplace: agent balance mutations, the
//! escrow lifecycle (fund / release / refund), fee computation and the
//! append-only audit log.
//!
//! The embedded store has no row locks, so every mutation path serializes
//! through the [`locks::LockManager`] instead: per-agent async mutexes are
//! acquired first (sorted by agent id when two are involved), then the
//! per-job lock guarding the escrow row. The audit log is insert-only; the
//! ledger never updates or deletes its rows.

pub mod engine;
pub mod fees;
pub mod locks;

pub use engine::Ledger;
pub use fees::{base_fee_split, storage_fee, verification_fee, FeeBreakdown};
pub use locks::LockManager;
