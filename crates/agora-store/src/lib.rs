//! agora-store
//!
//! Persistent marketplace state backed by sled. One named tree per table;
//! values are serde_json bytes (rows carry free-form JSON fields, which
//! rules out non-self-describing encodings). Secondary lookups are either
//! dedicated index trees (public key → agent, tx hash → deposit,
//! job → escrow) or prefix scans.

mod db;

pub use db::MarketDb;
