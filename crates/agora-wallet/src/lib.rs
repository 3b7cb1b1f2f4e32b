//! agora-wallet
//!
//! The on-chain rails: deterministic deposit-address derivation from the
//! platform HD seed, deposit ingestion (receipt fetch, ERC-20 Transfer
//! decode, confirmation watcher, idempotent crediting), the withdrawal
//! payout worker (EIP-1559 transfer from the treasury, failure refunds) and
//! startup recovery of every in-flight row. Work-in-progress state lives in
//! rows, never only in memory — a restart re-spawns handlers that observe
//! the row status and exit or continue.

pub mod erc20;
pub mod evm;
pub mod secrets;
pub mod service;
pub mod tx;

pub use evm::{EvmClient, HttpEvmClient, Receipt, ReceiptLog};
pub use secrets::{resolve_secrets, SecretStore, HD_WALLET_MASTER_SEED, TREASURY_WALLET_PRIVATE_KEY};
pub use service::WalletService;
