//! Pluggable secret storage for the HD seed and the treasury key.
//!
//! Two drivers behind one trait, selected by a single config enum and
//! resolved once at process start: process environment (development) and a
//! mounted JSON file (managed deployments). Values are read per key; the
//! wallet caches what it needs at construction.

use std::collections::HashMap;
use std::sync::Arc;

use agora_core::config::SecretsBackend;
use agora_core::MarketError;

pub const HD_WALLET_MASTER_SEED: &str = "hd_wallet_master_seed";
pub const TREASURY_WALLET_PRIVATE_KEY: &str = "treasury_wallet_private_key";

pub trait SecretStore: Send + Sync {
    /// Fetch a secret by key. Returns None when the backend has no value —
    /// an unconfigured secret disables the feature needing it rather than
    /// failing startup.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads `HD_WALLET_MASTER_SEED`-style uppercase environment variables.
pub struct EnvSecrets;

impl SecretStore for EnvSecrets {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key.to_uppercase()).ok().filter(|v| !v.is_empty())
    }
}

/// Reads a flat JSON object of key → value, as mounted by the deployment.
pub struct FileSecrets {
    values: HashMap<String, String>,
}

impl FileSecrets {
    pub fn load(path: &str) -> Result<Self, MarketError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MarketError::Internal(format!("reading secrets file {path}: {e}")))?;
        let values: HashMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| MarketError::Internal(format!("parsing secrets file {path}: {e}")))?;
        Ok(Self { values })
    }
}

impl SecretStore for FileSecrets {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned().filter(|v| !v.is_empty())
    }
}

/// Resolve the configured driver. Called once at startup; the returned
/// store is cached for the process lifetime.
pub fn resolve_secrets(backend: &SecretsBackend) -> Result<Arc<dyn SecretStore>, MarketError> {
    match backend {
        SecretsBackend::Env => Ok(Arc::new(EnvSecrets)),
        SecretsBackend::File { path } => Ok(Arc::new(FileSecrets::load(path)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_secrets_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        std::fs::write(
            &path,
            r#"{"hd_wallet_master_seed": "deadbeef", "treasury_wallet_private_key": ""}"#,
        )
        .unwrap();
        let secrets = FileSecrets::load(path.to_str().unwrap()).unwrap();
        assert_eq!(secrets.get(HD_WALLET_MASTER_SEED).as_deref(), Some("deadbeef"));
        // Empty values count as unconfigured.
        assert_eq!(secrets.get(TREASURY_WALLET_PRIVATE_KEY), None);
        assert_eq!(secrets.get("other"), None);
    }

    #[test]
    fn missing_file_errors() {
        assert!(FileSecrets::load("/nonexistent/secrets.json").is_err());
    }
}
