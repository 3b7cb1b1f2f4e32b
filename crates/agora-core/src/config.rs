use serde::{Deserialize, Serialize};

use crate::money::Credits;

/// Full node configuration, loaded from a JSON file at startup. Every field
/// has a development-grade default so a bare config file boots a local node.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MarketConfig {
    pub env: Environment,
    /// Allows the direct-credit dev deposit endpoint.
    pub dev_deposit_enabled: bool,
    pub auth: AuthConfig,
    pub fees: FeeConfig,
    pub rate_limits: RateLimitConfig,
    pub chain: ChainConfig,
    pub sandbox: SandboxConfig,
    pub secrets: SecretsConfig,
    pub coordination: CoordinationConfig,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

// ── Auth ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Maximum absolute skew between `X-Timestamp` and server time.
    pub signature_max_age_secs: i64,
    /// TTL of a consumed nonce in the nonce store.
    pub nonce_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { signature_max_age_secs: 30, nonce_ttl_secs: 60 }
    }
}

// ── Fees ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Base marketplace fee in basis points of the agreed price (100 = 1%),
    /// split 50/50 between client and seller at escrow release.
    pub base_bps: u32,
    /// Verification compute rate in micro-credits per CPU-second.
    pub verification_per_cpu_second_micro: u64,
    /// Floor applied to every verification charge.
    pub verification_minimum: Credits,
    /// Storage rate in micro-credits per KB of serialized deliverable.
    pub storage_per_kb_micro: u64,
    /// Floor applied to every storage charge.
    pub storage_minimum: Credits,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            base_bps: 100,
            verification_per_cpu_second_micro: 10_000, // 0.01 credits
            verification_minimum: Credits::from_cents(5),
            storage_per_kb_micro: 1_000, // 0.001 credits
            storage_minimum: Credits::from_cents(1),
        }
    }
}

// ── Rate limits ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RateRule {
    pub capacity: u32,
    pub refill_per_min: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub discovery: RateRule,
    pub read: RateRule,
    pub write: RateRule,
    pub registration: RateRule,
    pub signup: RateRule,
    pub job_lifecycle: RateRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            discovery: RateRule { capacity: 60, refill_per_min: 20 },
            read: RateRule { capacity: 120, refill_per_min: 60 },
            write: RateRule { capacity: 30, refill_per_min: 10 },
            registration: RateRule { capacity: 5, refill_per_min: 2 },
            signup: RateRule { capacity: 1, refill_per_min: 1 },
            job_lifecycle: RateRule { capacity: 20, refill_per_min: 5 },
        }
    }
}

// ── Chain / wallet ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChainNetwork {
    #[default]
    BaseSepolia,
    BaseMainnet,
}

impl ChainNetwork {
    pub fn chain_id(&self) -> u64 {
        match self {
            ChainNetwork::BaseSepolia => 84532,
            ChainNetwork::BaseMainnet => 8453,
        }
    }

    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            ChainNetwork::BaseSepolia => "https://sepolia.base.org",
            ChainNetwork::BaseMainnet => "https://mainnet.base.org",
        }
    }

    pub fn default_usdc_contract(&self) -> &'static str {
        match self {
            ChainNetwork::BaseSepolia => "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            ChainNetwork::BaseMainnet => "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub network: ChainNetwork,
    /// Overrides the network default when set.
    pub rpc_url: Option<String>,
    /// Overrides the canonical token contract when set.
    pub usdc_contract: Option<String>,
    pub min_deposit: Credits,
    pub min_withdrawal: Credits,
    pub max_withdrawal: Credits,
    pub withdrawal_flat_fee: Credits,
    pub confirmations_required: u64,
}

impl ChainConfig {
    pub fn resolved_rpc_url(&self) -> String {
        self.rpc_url
            .clone()
            .unwrap_or_else(|| self.network.default_rpc_url().to_string())
    }

    pub fn resolved_usdc_contract(&self) -> String {
        self.usdc_contract
            .clone()
            .unwrap_or_else(|| self.network.default_usdc_contract().to_string())
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            network: ChainNetwork::BaseSepolia,
            rpc_url: None,
            usdc_contract: None,
            min_deposit: Credits::from_cents(100),
            min_withdrawal: Credits::from_cents(100),
            max_withdrawal: Credits::from_cents(10_000_000),
            withdrawal_flat_fee: Credits::from_cents(50),
            confirmations_required: 12,
        }
    }
}

// ── Sandbox ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SandboxDriver {
    /// Local container runtime for development.
    Docker,
    /// Managed clustered backend; one job per run.
    Cluster { base_url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub driver: SandboxDriver,
    pub default_runtime: String,
    pub default_timeout_secs: u64,
    pub default_memory_limit_mb: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            driver: SandboxDriver::Docker,
            default_runtime: "python:3.13".to_string(),
            default_timeout_secs: 60,
            default_memory_limit_mb: 256,
        }
    }
}

// ── Secrets ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SecretsBackend {
    /// Read from process environment variables (development).
    #[default]
    Env,
    /// Read from a JSON file of key → value (managed deployments mount one).
    File { path: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecretsConfig {
    pub backend: SecretsBackend,
}

// ── Coordination ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoordinationDriver {
    /// Process-local state; single-node development and tests.
    #[default]
    Memory,
    Redis { url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CoordinationConfig {
    pub driver: CoordinationDriver,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let cfg: MarketConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.fees.base_bps, 100);
        assert_eq!(cfg.chain.confirmations_required, 12);
        assert_eq!(cfg.rate_limits.job_lifecycle.capacity, 20);
        assert_eq!(cfg.auth.signature_max_age_secs, 30);
    }

    #[test]
    fn network_constants() {
        assert_eq!(ChainNetwork::BaseSepolia.chain_id(), 84532);
        assert_eq!(ChainNetwork::BaseMainnet.chain_id(), 8453);
        let cfg = ChainConfig::default();
        assert!(cfg.resolved_rpc_url().starts_with("https://sepolia"));
        assert!(cfg.resolved_usdc_contract().starts_with("0x"));
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let cfg: MarketConfig = serde_json::from_str(
            r#"{"fees": {"base_bps": 250}, "chain": {"network": "base_mainnet"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.fees.base_bps, 250);
        assert_eq!(cfg.fees.verification_minimum, Credits::from_cents(5));
        assert_eq!(cfg.chain.network, ChainNetwork::BaseMainnet);
    }
}
