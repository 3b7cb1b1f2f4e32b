use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use agora_core::{JobId, MarketError};

use crate::deadline::DeadlineSet;
use crate::nonce::NonceStore;
use crate::ratelimit::{RateBuckets, RateDecision};

fn redis_err(e: redis::RedisError) -> MarketError {
    MarketError::Upstream(format!("redis: {e}"))
}

/// Open a multiplexed connection shared by all Redis-backed drivers.
pub async fn connect_redis(url: &str) -> Result<MultiplexedConnection, MarketError> {
    let client = redis::Client::open(url).map_err(redis_err)?;
    client
        .get_multiplexed_tokio_connection()
        .await
        .map_err(redis_err)
}

// ── Nonce store ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RedisNonceStore {
    con: MultiplexedConnection,
}

impl RedisNonceStore {
    pub fn new(con: MultiplexedConnection) -> Self {
        Self { con }
    }
}

#[async_trait]
impl NonceStore for RedisNonceStore {
    async fn set_if_absent(&self, nonce: &str, ttl: Duration) -> Result<bool, MarketError> {
        let mut con = self.con.clone();
        // SET key 1 NX EX ttl — the atomic primitive replay protection rests on.
        let outcome: Option<String> = redis::cmd("SET")
            .arg(format!("nonce:{nonce}"))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut con)
            .await
            .map_err(redis_err)?;
        Ok(outcome.is_some())
    }
}

// ── Rate buckets ─────────────────────────────────────────────────────────────

/// Atomic check-and-consume. Mirrors the math in
/// `crate::ratelimit::bucket_math`; the 120 s expiry lets idle buckets
/// self-garbage-collect.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(bucket[1])
local last_refill = tonumber(bucket[2])

if tokens == nil then
    tokens = capacity
    last_refill = now
end

local elapsed = now - last_refill
local new_tokens = math.min(capacity, tokens + elapsed * (refill_rate / 60.0))

if new_tokens >= 1 then
    new_tokens = new_tokens - 1
    redis.call('HMSET', key, 'tokens', new_tokens, 'last_refill', now)
    redis.call('EXPIRE', key, 120)
    return {1, math.floor(new_tokens), 0}
else
    local retry_after = math.ceil((1 - new_tokens) * 60 / refill_rate)
    redis.call('HMSET', key, 'tokens', new_tokens, 'last_refill', now)
    redis.call('EXPIRE', key, 120)
    return {0, 0, retry_after}
end
"#;

pub struct RedisRateBuckets {
    con: MultiplexedConnection,
    script: redis::Script,
}

impl RedisRateBuckets {
    pub fn new(con: MultiplexedConnection) -> Self {
        Self { con, script: redis::Script::new(TOKEN_BUCKET_SCRIPT) }
    }
}

#[async_trait]
impl RateBuckets for RedisRateBuckets {
    async fn check(
        &self,
        key: &str,
        capacity: u32,
        refill_per_min: u32,
        now_unix: f64,
    ) -> Result<RateDecision, MarketError> {
        let mut con = self.con.clone();
        let (allowed, remaining, retry_after): (i64, i64, i64) = self
            .script
            .key(key)
            .arg(capacity)
            .arg(refill_per_min)
            .arg(now_unix)
            .invoke_async(&mut con)
            .await
            .map_err(redis_err)?;
        Ok(RateDecision {
            allowed: allowed == 1,
            remaining: remaining.max(0) as u32,
            retry_after_secs: retry_after.max(0) as u64,
        })
    }
}

// ── Deadline set ─────────────────────────────────────────────────────────────

const DEADLINE_KEY: &str = "job:deadlines";

#[derive(Clone)]
pub struct RedisDeadlineSet {
    con: MultiplexedConnection,
}

impl RedisDeadlineSet {
    pub fn new(con: MultiplexedConnection) -> Self {
        Self { con }
    }
}

#[async_trait]
impl DeadlineSet for RedisDeadlineSet {
    async fn add(&self, job: JobId, deadline_unix: i64) -> Result<(), MarketError> {
        let mut con = self.con.clone();
        let _: i64 = con
            .zadd(DEADLINE_KEY, job.to_string(), deadline_unix)
            .await
            .map_err(redis_err)?;
        Ok(())
    }

    async fn remove(&self, job: JobId) -> Result<bool, MarketError> {
        let mut con = self.con.clone();
        let removed: i64 = con
            .zrem(DEADLINE_KEY, job.to_string())
            .await
            .map_err(redis_err)?;
        Ok(removed > 0)
    }

    async fn peek(&self) -> Result<Option<(JobId, i64)>, MarketError> {
        let mut con = self.con.clone();
        let entries: Vec<(String, f64)> = con
            .zrangebyscore_limit_withscores(DEADLINE_KEY, "-inf", "+inf", 0, 1)
            .await
            .map_err(redis_err)?;
        match entries.first() {
            Some((member, score)) => {
                let job: JobId = member
                    .parse()
                    .map_err(|_| MarketError::Internal(format!("corrupt deadline member: {member}")))?;
                Ok(Some((job, *score as i64)))
            }
            None => Ok(None),
        }
    }
}
