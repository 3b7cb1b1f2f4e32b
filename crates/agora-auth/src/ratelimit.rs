use std::sync::Arc;

use chrono::Utc;

use agora_coord::RateBuckets;
use agora_core::config::{RateLimitConfig, RateRule};
use agora_core::MarketError;

/// Request classes with independent buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateCategory {
    Discovery,
    Registration,
    Signup,
    JobLifecycle,
    Write,
    Read,
}

impl RateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateCategory::Discovery => "discovery",
            RateCategory::Registration => "registration",
            RateCategory::Signup => "signup",
            RateCategory::JobLifecycle => "job_lifecycle",
            RateCategory::Write => "write",
            RateCategory::Read => "read",
        }
    }
}

/// Pick the request class from its method and path.
pub fn classify(method: &str, path: &str) -> RateCategory {
    let method = method.to_uppercase();
    if path.contains("/discover") {
        return RateCategory::Discovery;
    }
    if path.contains("/signup") {
        return RateCategory::Signup;
    }
    if method == "POST" && path.trim_end_matches('/') == "/agents" {
        return RateCategory::Registration;
    }
    if matches!(method.as_str(), "POST" | "PATCH" | "DELETE") {
        if path.contains("/jobs") {
            return RateCategory::JobLifecycle;
        }
        return RateCategory::Write;
    }
    RateCategory::Read
}

/// Extract the client IP: first element of a forwarded-for list when one is
/// present, else the peer address.
pub fn client_ip(forwarded_for: Option<&str>, peer: &str) -> String {
    if let Some(forwarded) = forwarded_for {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.to_string()
}

/// Data for the rate-limit response headers of an admitted request.
#[derive(Debug, Clone, Copy)]
pub struct RateOutcome {
    pub limit: u32,
    pub remaining: u32,
}

pub struct RateLimiter {
    buckets: Arc<dyn RateBuckets>,
    cfg: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(buckets: Arc<dyn RateBuckets>, cfg: RateLimitConfig) -> Self {
        Self { buckets, cfg }
    }

    fn rule(&self, category: RateCategory) -> RateRule {
        match category {
            RateCategory::Discovery => self.cfg.discovery,
            RateCategory::Registration => self.cfg.registration,
            RateCategory::Signup => self.cfg.signup,
            RateCategory::JobLifecycle => self.cfg.job_lifecycle,
            RateCategory::Write => self.cfg.write,
            RateCategory::Read => self.cfg.read,
        }
    }

    /// Admit or reject one request. Authenticated traffic is keyed by agent
    /// id so a well-behaved agent is not starved by noisy neighbors behind
    /// the same egress; anonymous traffic is keyed by client IP.
    pub async fn admit(
        &self,
        agent_id: Option<&str>,
        ip: &str,
        method: &str,
        path: &str,
    ) -> Result<RateOutcome, MarketError> {
        let category = classify(method, path);
        let rule = self.rule(category);
        let key = match agent_id {
            Some(id) => format!("ratelimit:{id}:{}", category.as_str()),
            None => format!("ratelimit:ip:{ip}:{}", category.as_str()),
        };
        let now = Utc::now().timestamp_millis() as f64 / 1_000.0;
        let decision = self
            .buckets
            .check(&key, rule.capacity, rule.refill_per_min, now)
            .await?;
        if !decision.allowed {
            return Err(MarketError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            });
        }
        Ok(RateOutcome { limit: rule.capacity, remaining: decision.remaining })
    }
}
