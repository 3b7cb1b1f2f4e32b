use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use agora_core::MarketError;

/// Replay-protection store. `set_if_absent` must be atomic: of two
/// concurrent calls with the same nonce, exactly one returns true.
#[async_trait]
pub trait NonceStore: Send + Sync {
    async fn set_if_absent(&self, nonce: &str, ttl: Duration) -> Result<bool, MarketError>;
}

/// Process-local driver. Entries expire lazily on the next access.
#[derive(Default)]
pub struct MemoryNonceStore {
    seen: Mutex<HashMap<String, Instant>>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn set_if_absent(&self, nonce: &str, ttl: Duration) -> Result<bool, MarketError> {
        let mut seen = self
            .seen
            .lock()
            .map_err(|_| MarketError::Internal("nonce store poisoned".into()))?;
        let now = Instant::now();
        seen.retain(|_, expires| *expires > now);
        if seen.contains_key(nonce) {
            return Ok(false);
        }
        seen.insert(nonce.to_string(), now + ttl);
        Ok(true)
    }
}
