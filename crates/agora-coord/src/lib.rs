//! agora-coord
//!
//! Ephemeral coordination state: the nonce store, the rate-limit buckets and
//! the deadline sorted set. Each concern is a trait with two drivers — a
//! Redis driver for deployments and an in-memory driver for single-node
//! development and tests. Neither side is the source of truth for the
//! relational store; everything here is either idempotent or guarded by an
//! atomic primitive.

mod deadline;
mod nonce;
mod ratelimit;
mod redis_driver;

pub use deadline::{DeadlineSet, MemoryDeadlineSet};
pub use nonce::{MemoryNonceStore, NonceStore};
pub use ratelimit::{MemoryRateBuckets, RateBuckets, RateDecision};
pub use redis_driver::{
    connect_redis, RedisDeadlineSet, RedisNonceStore, RedisRateBuckets,
};
