use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use agora_core::MarketError;

/// Outcome of one check-and-consume against a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_secs: u64,
}

/// Token buckets keyed by an opaque caller-built key. `check` atomically
/// refills (at `refill_per_min / 60` tokens per elapsed second, capped at
/// `capacity`) and either consumes one token or reports the retry delay.
#[async_trait]
pub trait RateBuckets: Send + Sync {
    async fn check(
        &self,
        key: &str,
        capacity: u32,
        refill_per_min: u32,
        now_unix: f64,
    ) -> Result<RateDecision, MarketError>;
}

/// Buckets self-garbage-collect after this long without traffic.
pub(crate) const BUCKET_TTL_SECS: f64 = 120.0;

pub(crate) fn bucket_math(
    tokens: f64,
    last_refill: f64,
    capacity: u32,
    refill_per_min: u32,
    now: f64,
) -> (f64, RateDecision) {
    let elapsed = (now - last_refill).max(0.0);
    let refilled = (tokens + elapsed * (refill_per_min as f64 / 60.0)).min(capacity as f64);
    if refilled >= 1.0 {
        let new_tokens = refilled - 1.0;
        (
            new_tokens,
            RateDecision {
                allowed: true,
                remaining: new_tokens.floor() as u32,
                retry_after_secs: 0,
            },
        )
    } else {
        let retry = ((1.0 - refilled) * 60.0 / refill_per_min as f64).ceil() as u64;
        (
            refilled,
            RateDecision { allowed: false, remaining: 0, retry_after_secs: retry },
        )
    }
}

struct Bucket {
    tokens: f64,
    last_refill: f64,
}

/// Process-local driver with the same refill math as the Redis script.
#[derive(Default)]
pub struct MemoryRateBuckets {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl MemoryRateBuckets {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateBuckets for MemoryRateBuckets {
    async fn check(
        &self,
        key: &str,
        capacity: u32,
        refill_per_min: u32,
        now_unix: f64,
    ) -> Result<RateDecision, MarketError> {
        let mut buckets = self
            .buckets
            .lock()
            .map_err(|_| MarketError::Internal("rate buckets poisoned".into()))?;
        buckets.retain(|_, b| now_unix - b.last_refill < BUCKET_TTL_SECS);

        let (tokens, last_refill) = match buckets.get(key) {
            Some(b) => (b.tokens, b.last_refill),
            None => (capacity as f64, now_unix),
        };
        let (new_tokens, decision) =
            bucket_math(tokens, last_refill, capacity, refill_per_min, now_unix);
        buckets.insert(key.to_string(), Bucket { tokens: new_tokens, last_refill: now_unix });
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_exhausts_and_reports_retry() {
        let limiter = MemoryRateBuckets::new();
        let now = 1_000_000.0;
        for i in 0..3 {
            let d = limiter.check("k", 3, 60, now).await.unwrap();
            assert!(d.allowed, "request {i} should pass");
        }
        let denied = limiter.check("k", 3, 60, now).await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs >= 1);
    }

    #[tokio::test]
    async fn refill_restores_tokens() {
        let limiter = MemoryRateBuckets::new();
        let now = 1_000_000.0;
        assert!(limiter.check("k", 1, 60, now).await.unwrap().allowed);
        assert!(!limiter.check("k", 1, 60, now).await.unwrap().allowed);
        // 60/min refills one token per second.
        assert!(limiter.check("k", 1, 60, now + 1.5).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn keys_are_isolated() {
        let limiter = MemoryRateBuckets::new();
        let now = 1_000_000.0;
        assert!(limiter.check("a", 1, 1, now).await.unwrap().allowed);
        assert!(!limiter.check("a", 1, 1, now).await.unwrap().allowed);
        // Exhausting "a" leaves "b" untouched.
        assert!(limiter.check("b", 1, 1, now).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn refill_caps_at_capacity() {
        let limiter = MemoryRateBuckets::new();
        let now = 1_000_000.0;
        assert!(limiter.check("k", 2, 60, now).await.unwrap().allowed);
        // A long idle period cannot exceed capacity: 2 tokens max.
        let d = limiter.check("k", 2, 60, now + 50.0).await.unwrap();
        assert!(d.allowed);
        assert_eq!(d.remaining, 1);
    }
}
