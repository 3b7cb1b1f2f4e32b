//! Protocol-level limits that are not operator-configurable.

/// Default maximum negotiation rounds when a proposal does not specify one.
pub const DEFAULT_MAX_ROUNDS: u32 = 5;

/// Inclusive bounds on a proposal's `max_rounds`.
pub const MIN_MAX_ROUNDS: u32 = 1;
pub const MAX_MAX_ROUNDS: u32 = 20;

/// Hard cap on declarative tests per acceptance suite.
pub const MAX_TESTS_PER_SUITE: usize = 20;

/// Maximum length of a sandboxed assertion expression.
pub const MAX_ASSERTION_EXPR_LEN: usize = 500;

/// Maximum decoded verification script size.
pub const MAX_SCRIPT_SIZE_BYTES: usize = 1_048_576;

/// Script sandbox ceilings; per-run values are clamped to these.
pub const MAX_SANDBOX_TIMEOUT_SECS: u64 = 300;
pub const MAX_SANDBOX_MEMORY_MB: u64 = 512;

/// Grace period added to the sandbox deadline before the container is
/// force-killed.
pub const SANDBOX_KILL_GRACE_SECS: u64 = 5;

/// stdout/stderr capture cap inside the sandbox.
pub const MAX_SANDBOX_OUTPUT_CAPTURE: usize = 65_536;

/// stdout/stderr length surfaced in API responses.
pub const SANDBOX_OUTPUT_SURFACE_LEN: usize = 2_000;

/// Reviews required before a reputation score is displayed numerically.
pub const REPUTATION_MIN_REVIEWS: usize = 3;

/// Review count at which reputation confidence saturates.
pub const REPUTATION_CONFIDENCE_REVIEWS: usize = 20;

/// Number of wallet history rows returned per query.
pub const WALLET_HISTORY_LIMIT: usize = 100;

/// BIP-44 derivation prefix for deposit addresses; the final path component
/// is the per-agent derivation index.
pub const HD_DERIVATION_PREFIX: &str = "m/44'/60'/0'/0";
