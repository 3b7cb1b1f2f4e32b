use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use agora_coord::NonceStore;
use agora_core::agent::Agent;
use agora_core::config::AuthConfig;
use agora_core::{AgentId, MarketError};
use agora_crypto::{is_timestamp_fresh, verify_request};
use agora_store::MarketDb;

/// The three authentication headers of a signed request.
#[derive(Debug, Clone, Default)]
pub struct AuthHeaders {
    /// `Authorization: AgentSig <agent_id>:<signature_hex>`
    pub authorization: Option<String>,
    /// `X-Timestamp`: ISO-8601 with timezone.
    pub timestamp: Option<String>,
    /// `X-Nonce`: optional single-use token.
    pub nonce: Option<String>,
}

/// Verifies the signed request envelope and loads the acting agent.
pub struct Authenticator {
    db: Arc<MarketDb>,
    nonces: Arc<dyn NonceStore>,
    cfg: AuthConfig,
}

/// Split `AgentSig <agent_id>:<signature>` into its parts.
fn parse_authorization(header: &str) -> Result<(AgentId, String), MarketError> {
    let credentials = header.strip_prefix("AgentSig ").ok_or(MarketError::BadAuthScheme)?;
    let (agent_id, signature) = credentials
        .split_once(':')
        .ok_or(MarketError::MalformedAuthHeader)?;
    let agent_id: AgentId = agent_id.parse().map_err(|_| MarketError::MalformedAuthHeader)?;
    if signature.is_empty() {
        return Err(MarketError::MalformedAuthHeader);
    }
    Ok((agent_id, signature.to_string()))
}

impl Authenticator {
    pub fn new(db: Arc<MarketDb>, nonces: Arc<dyn NonceStore>, cfg: AuthConfig) -> Self {
        Self { db, nonces, cfg }
    }

    /// Authenticate one request. `method`/`path`/`body` are the values the
    /// canonical signed message binds; the path carries no query string.
    pub async fn verify(
        &self,
        headers: &AuthHeaders,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> Result<Agent, MarketError> {
        let (authorization, timestamp) = match (&headers.authorization, &headers.timestamp) {
            (Some(a), Some(t)) => (a, t),
            _ => return Err(MarketError::MissingAuthHeaders),
        };

        let (agent_id, signature) = parse_authorization(authorization)?;

        if !is_timestamp_fresh(timestamp, self.cfg.signature_max_age_secs, Utc::now()) {
            return Err(MarketError::TimestampExpired);
        }

        // Optional replay protection: a nonce may be used exactly once
        // within its TTL. Requests without one are accepted (weaker).
        if let Some(nonce) = &headers.nonce {
            let fresh = self
                .nonces
                .set_if_absent(nonce, Duration::from_secs(self.cfg.nonce_ttl_secs))
                .await?;
            if !fresh {
                return Err(MarketError::NonceReused);
            }
        }

        let agent = self
            .db
            .get_agent(agent_id)?
            .ok_or(MarketError::AuthAgentUnknown)?;
        if !agent.is_active() {
            return Err(MarketError::AgentNotActive);
        }

        if !verify_request(&agent.public_key, &signature, timestamp, method, path, body) {
            return Err(MarketError::InvalidSignature);
        }

        debug!(agent = %agent.id, method, path, "request authenticated");
        Ok(agent)
    }
}
