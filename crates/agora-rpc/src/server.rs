use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use rand::RngCore;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use agora_auth::{Authenticator, RateLimiter};
use agora_core::agent::{Agent, AgentStatus};
use agora_core::config::MarketConfig;
use agora_core::job::Job;
use agora_core::listing::{Listing, ListingStatus, PriceModel};
use agora_core::review::{Review, ReviewRole};
use agora_core::wallet::DepositStatus;
use agora_core::{AgentId, Credits, JobId, ListingId, MarketError, Timestamp};
use agora_jobs::{CounterOffer, JobService, ProposeJob};
use agora_ledger::Ledger;
use agora_store::MarketDb;
use agora_wallet::WalletService;

use crate::agent_card::{fetch_card_lenient, skill_ids_from_card, validate_endpoint_url};
use crate::api::AgoraApiServer;
use crate::types::*;

/// Map a service error to a JSON-RPC error carrying its HTTP-equivalent
/// status as the code. Rate-limit rejections carry the retry delay as data.
fn rpc_err(e: MarketError) -> ErrorObject<'static> {
    let code = e.status() as i32;
    match e {
        MarketError::RateLimited { retry_after_secs } => ErrorObject::owned(
            code,
            e.to_string(),
            Some(json!({ "retry_after": retry_after_secs })),
        ),
        other => ErrorObject::owned(code, other.to_string(), None::<()>),
    }
}

fn parse_agent_id(s: &str) -> Result<AgentId, ErrorObject<'static>> {
    s.parse()
        .map_err(|_| rpc_err(MarketError::Validation(format!("invalid agent id: {s}"))))
}

fn parse_job_id(s: &str) -> Result<JobId, ErrorObject<'static>> {
    s.parse()
        .map_err(|_| rpc_err(MarketError::Validation(format!("invalid job id: {s}"))))
}

fn parse_listing_id(s: &str) -> Result<ListingId, ErrorObject<'static>> {
    s.parse()
        .map_err(|_| rpc_err(MarketError::Validation(format!("invalid listing id: {s}"))))
}

fn parse_credits(s: &str) -> Result<Credits, ErrorObject<'static>> {
    s.parse().map_err(rpc_err)
}

fn parse_deadline(s: &str) -> Result<Timestamp, ErrorObject<'static>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| rpc_err(MarketError::Validation(format!("invalid delivery_deadline: {e}"))))
}

fn body_of<T: serde::Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

/// Shared state behind the RPC surface.
pub struct RpcServerState {
    pub db: Arc<MarketDb>,
    pub config: MarketConfig,
    pub authenticator: Authenticator,
    pub limiter: RateLimiter,
    pub ledger: Arc<Ledger>,
    pub jobs: Arc<JobService>,
    pub wallet: Arc<WalletService>,
    /// Fetch capability cards at registration. Off in tests.
    pub fetch_cards: bool,
}

pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the server on `addr` with permissive CORS. Returns a handle to
    /// stop it.
    pub async fn start(self, addr: SocketAddr) -> Result<ServerHandle, MarketError> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await
            .map_err(|e| MarketError::Internal(format!("rpc server bind: {e}")))?;

        let handle = server.start(self.into_rpc());
        info!(%addr, "RPC server started");
        Ok(handle)
    }

    /// Rate-limit admission for one logical endpoint.
    async fn admit(
        &self,
        ctx: &RpcContext,
        method: &str,
        path: &str,
    ) -> Result<(), ErrorObject<'static>> {
        let agent_key = ctx
            .authorization
            .as_deref()
            .and_then(|h| h.strip_prefix("AgentSig "))
            .and_then(|c| c.split(':').next())
            .map(str::to_string);
        let ip = agora_auth::client_ip(
            ctx.forwarded_for.as_deref(),
            ctx.peer_addr.as_deref().unwrap_or("unknown"),
        );
        self.state
            .limiter
            .admit(agent_key.as_deref(), &ip, method, path)
            .await
            .map(|_| ())
            .map_err(rpc_err)
    }

    /// Verify the signed envelope for one logical endpoint.
    async fn authenticate(
        &self,
        ctx: &RpcContext,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> Result<Agent, ErrorObject<'static>> {
        let headers = agora_auth::AuthHeaders {
            authorization: ctx.authorization.clone(),
            timestamp: ctx.timestamp.clone(),
            nonce: ctx.nonce.clone(),
        };
        self.state
            .authenticator
            .verify(&headers, method, path, body)
            .await
            .map_err(rpc_err)
    }

    fn load_agent(&self, id: AgentId) -> Result<Agent, ErrorObject<'static>> {
        self.state
            .db
            .get_agent(id)
            .map_err(rpc_err)?
            .ok_or_else(|| rpc_err(MarketError::NotFound("Agent")))
    }

    fn require_self(agent: &Agent, target: AgentId) -> Result<(), ErrorObject<'static>> {
        if agent.id != target {
            return Err(rpc_err(MarketError::Forbidden(
                "Can only act on your own agent".into(),
            )));
        }
        Ok(())
    }

    // ── Reputation internals ─────────────────────────────────────────────────

    fn recency_weight(created_at: Timestamp) -> f64 {
        let age_days = (Utc::now() - created_at).num_days();
        if age_days <= 30 {
            2.0
        } else if age_days <= 90 {
            1.5
        } else {
            1.0
        }
    }

    /// Recency-weighted average scaled by a review-count confidence factor.
    fn recompute_reputation(&self, reviewee: AgentId, role: ReviewRole) -> Result<(), MarketError> {
        let reviews: Vec<Review> = self
            .state
            .db
            .reviews_for_reviewee(reviewee)?
            .into_iter()
            .filter(|r| r.role == role)
            .collect();
        if reviews.is_empty() {
            return Ok(());
        }

        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for review in &reviews {
            let w = Self::recency_weight(review.created_at);
            weighted_sum += review.rating as f64 * w;
            total_weight += w;
        }
        let raw = if total_weight > 0.0 { weighted_sum / total_weight } else { 0.0 };
        let confidence = (reviews.len() as f64
            / agora_core::constants::REPUTATION_CONFIDENCE_REVIEWS as f64)
            .min(1.0);
        let score = ((raw * confidence) * 100.0).round() / 100.0;
        let score = score.min(5.0);

        let mut agent = self
            .state
            .db
            .get_agent(reviewee)?
            .ok_or(MarketError::NotFound("Agent"))?;
        match role {
            ReviewRole::ClientReviewingSeller => agent.reputation_seller = score,
            ReviewRole::SellerReviewingClient => agent.reputation_client = score,
        }
        self.state.db.put_agent(&agent)
    }

    fn reputation_summary(&self, agent: &Agent) -> Result<RpcReputation, ErrorObject<'static>> {
        let reviews = self.state.db.reviews_for_reviewee(agent.id).map_err(rpc_err)?;
        let seller_count = reviews
            .iter()
            .filter(|r| r.role == ReviewRole::ClientReviewingSeller)
            .count();
        let client_count = reviews
            .iter()
            .filter(|r| r.role == ReviewRole::SellerReviewingClient)
            .count();

        let mut tag_counts: HashMap<&str, usize> = HashMap::new();
        for review in &reviews {
            for tag in &review.tags {
                *tag_counts.entry(tag.as_str()).or_default() += 1;
            }
        }
        let mut tags: Vec<(&str, usize)> = tag_counts.into_iter().collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        let top_tags = tags.into_iter().take(5).map(|(t, _)| t.to_string()).collect();

        let min = agora_core::constants::REPUTATION_MIN_REVIEWS;
        Ok(RpcReputation {
            agent_id: agent.id.to_string(),
            reputation_seller: (seller_count >= min).then_some(agent.reputation_seller),
            reputation_seller_display: if seller_count >= min {
                format!("{:.2}", agent.reputation_seller)
            } else {
                "New".to_string()
            },
            reputation_client: (client_count >= min).then_some(agent.reputation_client),
            reputation_client_display: if client_count >= min {
                format!("{:.2}", agent.reputation_client)
            } else {
                "New".to_string()
            },
            total_reviews_as_seller: seller_count,
            total_reviews_as_client: client_count,
            top_tags,
        })
    }
}

#[async_trait]
impl AgoraApiServer for RpcServer {
    // ── Agents ───────────────────────────────────────────────────────────────

    async fn register_agent(&self, ctx: RpcContext, data: RegisterAgent) -> RpcResult<RpcAgent> {
        self.admit(&ctx, "POST", "/agents").await?;

        let key_ok = data.public_key.len() == 64
            && data.public_key.bytes().all(|b| b.is_ascii_hexdigit());
        if !key_ok {
            return Err(rpc_err(MarketError::Validation(
                "public_key must be 64 hex characters".into(),
            )));
        }
        if data.display_name.trim().is_empty() || data.display_name.len() > 128 {
            return Err(rpc_err(MarketError::Validation(
                "display_name must be 1-128 characters".into(),
            )));
        }
        validate_endpoint_url(&data.endpoint_url).map_err(rpc_err)?;

        if self
            .state
            .db
            .get_agent_by_pubkey(&data.public_key)
            .map_err(rpc_err)?
            .is_some()
        {
            return Err(rpc_err(MarketError::Conflict("Public key already registered".into())));
        }

        let (card, capabilities) = if self.state.fetch_cards {
            fetch_card_lenient(&data.endpoint_url, &data.capabilities)
                .await
                .map_err(rpc_err)?
        } else {
            (None, data.capabilities.clone())
        };

        let mut secret = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret);
        let now = Utc::now();
        let agent = Agent {
            id: AgentId::new(),
            public_key: data.public_key.to_lowercase(),
            display_name: data.display_name,
            description: data.description,
            endpoint_url: data.endpoint_url,
            capabilities,
            webhook_secret: hex::encode(secret),
            capability_card: card,
            reputation_seller: 0.0,
            reputation_client: 0.0,
            balance: Credits::ZERO,
            status: AgentStatus::Active,
            created_at: now,
            last_seen: now,
        };
        self.state.db.put_agent(&agent).map_err(rpc_err)?;
        info!(agent = %agent.id, name = %agent.display_name, "agent registered");
        Ok(RpcAgent::from(&agent))
    }

    async fn get_agent(&self, ctx: RpcContext, agent_id: String) -> RpcResult<RpcAgent> {
        self.admit(&ctx, "GET", &format!("/agents/{agent_id}")).await?;
        let agent = self.load_agent(parse_agent_id(&agent_id)?)?;
        Ok(RpcAgent::from(&agent))
    }

    async fn update_agent(
        &self,
        ctx: RpcContext,
        agent_id: String,
        data: UpdateAgent,
    ) -> RpcResult<RpcAgent> {
        let path = format!("/agents/{agent_id}");
        self.admit(&ctx, "PATCH", &path).await?;
        let acting = self.authenticate(&ctx, "PATCH", &path, &body_of(&data)).await?;
        let target = parse_agent_id(&agent_id)?;
        Self::require_self(&acting, target)?;

        let mut agent = self.load_agent(target)?;
        if let Some(display_name) = data.display_name {
            agent.display_name = display_name;
        }
        if let Some(description) = data.description {
            agent.description = Some(description);
        }
        if let Some(capabilities) = data.capabilities {
            agent.capabilities = capabilities;
        }
        if let Some(endpoint_url) = data.endpoint_url {
            validate_endpoint_url(&endpoint_url).map_err(rpc_err)?;
            if self.state.fetch_cards {
                let (card, capabilities) =
                    fetch_card_lenient(&endpoint_url, &agent.capabilities)
                        .await
                        .map_err(rpc_err)?;
                if card.is_some() {
                    agent.capability_card = card;
                    agent.capabilities = capabilities;
                }
            }
            agent.endpoint_url = endpoint_url;
        }
        agent.last_seen = Utc::now();
        self.state.db.put_agent(&agent).map_err(rpc_err)?;
        Ok(RpcAgent::from(&agent))
    }

    async fn deactivate_agent(
        &self,
        ctx: RpcContext,
        agent_id: String,
    ) -> RpcResult<RpcDeactivation> {
        let path = format!("/agents/{agent_id}");
        self.admit(&ctx, "DELETE", &path).await?;
        let acting = self.authenticate(&ctx, "DELETE", &path, b"").await?;
        let target = parse_agent_id(&agent_id)?;
        Self::require_self(&acting, target)?;

        let mut agent = self.load_agent(target)?;
        agent.status = AgentStatus::Deactivated;
        self.state.db.put_agent(&agent).map_err(rpc_err)?;

        let (cancelled, failed) =
            self.state.jobs.deactivation_sweep(target).await.map_err(rpc_err)?;
        Ok(RpcDeactivation {
            agent_id,
            status: agent.status.to_string(),
            jobs_cancelled: cancelled,
            jobs_failed: failed,
        })
    }

    async fn get_agent_card(&self, ctx: RpcContext, agent_id: String) -> RpcResult<Option<Value>> {
        self.admit(&ctx, "GET", &format!("/agents/{agent_id}/agent-card")).await?;
        let agent = self.load_agent(parse_agent_id(&agent_id)?)?;
        Ok(agent.capability_card)
    }

    async fn get_reputation(&self, ctx: RpcContext, agent_id: String) -> RpcResult<RpcReputation> {
        self.admit(&ctx, "GET", &format!("/agents/{agent_id}/reputation")).await?;
        let agent = self.load_agent(parse_agent_id(&agent_id)?)?;
        self.reputation_summary(&agent)
    }

    async fn get_balance(&self, ctx: RpcContext, agent_id: String) -> RpcResult<RpcBalance> {
        let path = format!("/agents/{agent_id}/balance");
        self.admit(&ctx, "GET", &path).await?;
        let acting = self.authenticate(&ctx, "GET", &path, b"").await?;
        let target = parse_agent_id(&agent_id)?;
        Self::require_self(&acting, target)?;
        Ok(RpcBalance { agent_id, balance: acting.balance.to_string() })
    }

    async fn dev_deposit(
        &self,
        ctx: RpcContext,
        agent_id: String,
        amount: String,
    ) -> RpcResult<RpcBalance> {
        let path = format!("/agents/{agent_id}/deposit");
        self.admit(&ctx, "POST", &path).await?;
        if !self.state.config.dev_deposit_enabled {
            return Err(rpc_err(MarketError::Disabled(
                "Direct deposits are disabled; use the wallet rails".into(),
            )));
        }
        let acting = self.authenticate(&ctx, "POST", &path, amount.as_bytes()).await?;
        let target = parse_agent_id(&agent_id)?;
        Self::require_self(&acting, target)?;
        let amount = parse_credits(&amount)?;
        if !amount.is_positive() {
            return Err(rpc_err(MarketError::Validation("amount must be positive".into())));
        }
        let balance = self.state.ledger.credit_balance(target, amount).await.map_err(rpc_err)?;
        Ok(RpcBalance { agent_id, balance: balance.to_string() })
    }

    // ── Jobs ─────────────────────────────────────────────────────────────────

    async fn propose_job(&self, ctx: RpcContext, data: RpcJobProposal) -> RpcResult<RpcJob> {
        self.admit(&ctx, "POST", "/jobs").await?;
        let acting = self.authenticate(&ctx, "POST", "/jobs", &body_of(&data)).await?;

        let proposal = ProposeJob {
            seller: parse_agent_id(&data.seller_agent_id)?,
            listing_id: data.listing_id.as_deref().map(parse_listing_id).transpose()?,
            max_budget: parse_credits(&data.max_budget)?,
            requirements: data.requirements.clone(),
            acceptance_criteria: data.acceptance_criteria.clone(),
            delivery_deadline: data.delivery_deadline.as_deref().map(parse_deadline).transpose()?,
            max_rounds: data.max_rounds,
        };
        let job = self.state.jobs.propose(acting.id, proposal).await.map_err(rpc_err)?;
        Ok(RpcJob::from(&job))
    }

    async fn get_job(&self, ctx: RpcContext, job_id: String) -> RpcResult<RpcJob> {
        let path = format!("/jobs/{job_id}");
        self.admit(&ctx, "GET", &path).await?;
        let acting = self.authenticate(&ctx, "GET", &path, b"").await?;
        let job = self
            .state
            .jobs
            .get_job_for(parse_job_id(&job_id)?, acting.id)
            .map_err(rpc_err)?;
        Ok(RpcJob::from(&job))
    }

    async fn counter_job(
        &self,
        ctx: RpcContext,
        job_id: String,
        data: RpcCounter,
    ) -> RpcResult<RpcJob> {
        let path = format!("/jobs/{job_id}/counter");
        self.admit(&ctx, "POST", &path).await?;
        let acting = self.authenticate(&ctx, "POST", &path, &body_of(&data)).await?;
        let offer = CounterOffer {
            proposed_price: parse_credits(&data.proposed_price)?,
            counter_terms: data.counter_terms.clone(),
            accepted_terms: data.accepted_terms.clone(),
            message: data.message.clone(),
        };
        let job = self
            .state
            .jobs
            .counter(parse_job_id(&job_id)?, acting.id, offer)
            .await
            .map_err(rpc_err)?;
        Ok(RpcJob::from(&job))
    }

    async fn accept_job(
        &self,
        ctx: RpcContext,
        job_id: String,
        data: RpcAccept,
    ) -> RpcResult<RpcJob> {
        let path = format!("/jobs/{job_id}/accept");
        self.admit(&ctx, "POST", &path).await?;
        let acting = self.authenticate(&ctx, "POST", &path, &body_of(&data)).await?;
        let job = self
            .state
            .jobs
            .accept(parse_job_id(&job_id)?, acting.id, data.acceptance_criteria_hash)
            .await
            .map_err(rpc_err)?;
        Ok(RpcJob::from(&job))
    }

    async fn fund_job(&self, ctx: RpcContext, job_id: String) -> RpcResult<RpcEscrow> {
        let path = format!("/jobs/{job_id}/fund");
        self.admit(&ctx, "POST", &path).await?;
        let acting = self.authenticate(&ctx, "POST", &path, b"").await?;
        let escrow = self
            .state
            .jobs
            .fund(parse_job_id(&job_id)?, acting.id)
            .await
            .map_err(rpc_err)?;
        Ok(RpcEscrow::from(&escrow))
    }

    async fn start_job(&self, ctx: RpcContext, job_id: String) -> RpcResult<RpcJob> {
        let path = format!("/jobs/{job_id}/start");
        self.admit(&ctx, "POST", &path).await?;
        let acting = self.authenticate(&ctx, "POST", &path, b"").await?;
        let job = self
            .state
            .jobs
            .start(parse_job_id(&job_id)?, acting.id)
            .await
            .map_err(rpc_err)?;
        Ok(RpcJob::from(&job))
    }

    async fn deliver_job(
        &self,
        ctx: RpcContext,
        job_id: String,
        data: RpcDeliver,
    ) -> RpcResult<RpcDeliverResult> {
        let path = format!("/jobs/{job_id}/deliver");
        self.admit(&ctx, "POST", &path).await?;
        let acting = self.authenticate(&ctx, "POST", &path, &body_of(&data)).await?;
        let (job, fee) = self
            .state
            .jobs
            .deliver(parse_job_id(&job_id)?, acting.id, data.result)
            .await
            .map_err(rpc_err)?;
        Ok(RpcDeliverResult { job: RpcJob::from(&job), storage_fee: fee.to_string() })
    }

    async fn verify_job(&self, ctx: RpcContext, job_id: String) -> RpcResult<RpcVerify> {
        let path = format!("/jobs/{job_id}/verify");
        self.admit(&ctx, "POST", &path).await?;
        let acting = self.authenticate(&ctx, "POST", &path, b"").await?;
        let outcome = self
            .state
            .jobs
            .verify(parse_job_id(&job_id)?, acting.id)
            .await
            .map_err(rpc_err)?;
        Ok(RpcVerify {
            job: RpcJob::from(&outcome.job),
            verification: outcome.verification,
            fee_charged: outcome.fee_charged.map(|f| f.to_string()),
        })
    }

    async fn complete_job(&self, ctx: RpcContext, job_id: String) -> RpcResult<RpcJob> {
        let path = format!("/jobs/{job_id}/complete");
        self.admit(&ctx, "POST", &path).await?;
        let acting = self.authenticate(&ctx, "POST", &path, b"").await?;
        let job = self
            .state
            .jobs
            .complete(parse_job_id(&job_id)?, acting.id)
            .await
            .map_err(rpc_err)?;
        Ok(RpcJob::from(&job))
    }

    async fn fail_job(&self, ctx: RpcContext, job_id: String) -> RpcResult<RpcJob> {
        let path = format!("/jobs/{job_id}/fail");
        self.admit(&ctx, "POST", &path).await?;
        let acting = self.authenticate(&ctx, "POST", &path, b"").await?;
        let job = self
            .state
            .jobs
            .fail(parse_job_id(&job_id)?, acting.id)
            .await
            .map_err(rpc_err)?;
        Ok(RpcJob::from(&job))
    }

    async fn dispute_job(&self, ctx: RpcContext, job_id: String) -> RpcResult<RpcJob> {
        let path = format!("/jobs/{job_id}/dispute");
        self.admit(&ctx, "POST", &path).await?;
        let acting = self.authenticate(&ctx, "POST", &path, b"").await?;
        let job = self
            .state
            .jobs
            .dispute(parse_job_id(&job_id)?, acting.id)
            .await
            .map_err(rpc_err)?;
        Ok(RpcJob::from(&job))
    }

    // ── Listings / discovery ─────────────────────────────────────────────────

    async fn create_listing(
        &self,
        ctx: RpcContext,
        agent_id: String,
        data: RpcListingCreate,
    ) -> RpcResult<RpcListing> {
        let path = format!("/agents/{agent_id}/listings");
        self.admit(&ctx, "POST", &path).await?;
        let acting = self.authenticate(&ctx, "POST", &path, &body_of(&data)).await?;
        let target = parse_agent_id(&agent_id)?;
        Self::require_self(&acting, target)?;

        if let Some(card) = &acting.capability_card {
            let skills = skill_ids_from_card(card);
            if !skills.contains(&data.skill_id) {
                return Err(rpc_err(MarketError::Validation(format!(
                    "skill_id '{}' not found in the agent's capability card",
                    data.skill_id
                ))));
            }
        }
        if self
            .state
            .db
            .find_listing(target, &data.skill_id, ListingStatus::Active)
            .map_err(rpc_err)?
            .is_some()
        {
            return Err(rpc_err(MarketError::Conflict(
                "An active listing for this skill already exists".into(),
            )));
        }

        let price_model: PriceModel = data.price_model.parse().map_err(rpc_err)?;
        let base_price = parse_credits(&data.base_price)?;
        if !base_price.is_positive() {
            return Err(rpc_err(MarketError::Validation("base_price must be positive".into())));
        }

        let listing = Listing {
            id: ListingId::new(),
            seller: target,
            skill_id: data.skill_id,
            description: data.description,
            price_model,
            base_price,
            currency: data.currency,
            sla: data.sla,
            status: ListingStatus::Active,
            created_at: Utc::now(),
        };
        self.state.db.put_listing(&listing).map_err(rpc_err)?;
        Ok(RpcListing::from(&listing))
    }

    async fn get_listing(&self, ctx: RpcContext, listing_id: String) -> RpcResult<RpcListing> {
        self.admit(&ctx, "GET", &format!("/listings/{listing_id}")).await?;
        let listing = self
            .state
            .db
            .get_listing(parse_listing_id(&listing_id)?)
            .map_err(rpc_err)?
            .ok_or_else(|| rpc_err(MarketError::NotFound("Listing")))?;
        Ok(RpcListing::from(&listing))
    }

    async fn update_listing(
        &self,
        ctx: RpcContext,
        listing_id: String,
        data: RpcListingUpdate,
    ) -> RpcResult<RpcListing> {
        let path = format!("/listings/{listing_id}");
        self.admit(&ctx, "PATCH", &path).await?;
        let acting = self.authenticate(&ctx, "PATCH", &path, &body_of(&data)).await?;

        let mut listing = self
            .state
            .db
            .get_listing(parse_listing_id(&listing_id)?)
            .map_err(rpc_err)?
            .ok_or_else(|| rpc_err(MarketError::NotFound("Listing")))?;
        if listing.seller != acting.id {
            return Err(rpc_err(MarketError::Forbidden("Can only update own listings".into())));
        }

        if let Some(description) = data.description {
            listing.description = Some(description);
        }
        if let Some(price_model) = data.price_model {
            listing.price_model = price_model.parse().map_err(rpc_err)?;
        }
        if let Some(base_price) = data.base_price {
            listing.base_price = parse_credits(&base_price)?;
        }
        if let Some(sla) = data.sla {
            listing.sla = Some(sla);
        }
        if let Some(status) = data.status {
            listing.status = match status.as_str() {
                "active" => ListingStatus::Active,
                "paused" => ListingStatus::Paused,
                "archived" => ListingStatus::Archived,
                other => {
                    return Err(rpc_err(MarketError::Validation(format!(
                        "unknown listing status: {other}"
                    ))))
                }
            };
        }
        self.state.db.put_listing(&listing).map_err(rpc_err)?;
        Ok(RpcListing::from(&listing))
    }

    async fn browse_listings(
        &self,
        ctx: RpcContext,
        skill_id: Option<String>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> RpcResult<Vec<RpcListing>> {
        self.admit(&ctx, "GET", "/listings").await?;
        let needle = skill_id.map(|s| s.to_lowercase());
        let mut listings: Vec<Listing> = self
            .state
            .db
            .iter_listings()
            .map_err(rpc_err)?
            .into_iter()
            .filter(|l| l.status == ListingStatus::Active)
            .filter(|l| match &needle {
                Some(n) => l.skill_id.to_lowercase().contains(n),
                None => true,
            })
            .collect();
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listings
            .iter()
            .skip(offset.unwrap_or(0))
            .take(limit.unwrap_or(20).min(100))
            .map(RpcListing::from)
            .collect())
    }

    async fn discover(
        &self,
        ctx: RpcContext,
        query: RpcDiscoverQuery,
    ) -> RpcResult<Vec<RpcDiscoverHit>> {
        self.admit(&ctx, "GET", "/discover").await?;
        let max_price = query.max_price.as_deref().map(parse_credits).transpose()?;
        let price_model: Option<PriceModel> =
            query.price_model.as_deref().map(|p| p.parse()).transpose().map_err(rpc_err)?;
        let needle = query.skill_id.map(|s| s.to_lowercase());

        let mut hits = Vec::new();
        for listing in self.state.db.iter_listings().map_err(rpc_err)? {
            if listing.status != ListingStatus::Active {
                continue;
            }
            if let Some(n) = &needle {
                if !listing.skill_id.to_lowercase().contains(n) {
                    continue;
                }
            }
            if let Some(max) = max_price {
                if listing.base_price > max {
                    continue;
                }
            }
            if let Some(model) = price_model {
                if listing.price_model != model {
                    continue;
                }
            }
            let Some(seller) = self.state.db.get_agent(listing.seller).map_err(rpc_err)? else {
                continue;
            };
            if !seller.is_active() {
                continue;
            }
            if let Some(min_rating) = query.min_rating {
                if seller.reputation_seller < min_rating {
                    continue;
                }
            }
            let skill = seller.capability_card.as_ref().and_then(|card| {
                card.get("skills")?.as_array()?.iter().find_map(|s| {
                    (s.get("id")?.as_str()? == listing.skill_id).then(|| {
                        json!({
                            "name": s.get("name"),
                            "description": s.get("description"),
                            "tags": s.get("tags").cloned().unwrap_or(Value::Array(vec![])),
                            "examples": s.get("examples").cloned().unwrap_or(Value::Array(vec![])),
                        })
                    })
                })
            });
            hits.push(RpcDiscoverHit {
                listing: RpcListing::from(&listing),
                seller_display_name: seller.display_name.clone(),
                seller_reputation: seller.reputation_seller,
                skill,
            });
        }

        hits.sort_by(|a, b| {
            b.seller_reputation
                .partial_cmp(&a.seller_reputation)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.listing.base_price.cmp(&b.listing.base_price))
        });
        Ok(hits
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(20).min(100))
            .collect())
    }

    // ── Reviews ──────────────────────────────────────────────────────────────

    async fn submit_review(
        &self,
        ctx: RpcContext,
        job_id: String,
        data: RpcReviewCreate,
    ) -> RpcResult<RpcReview> {
        let path = format!("/jobs/{job_id}/reviews");
        self.admit(&ctx, "POST", &path).await?;
        let acting = self.authenticate(&ctx, "POST", &path, &body_of(&data)).await?;

        if !(1..=5).contains(&data.rating) {
            return Err(rpc_err(MarketError::Validation("rating must be between 1 and 5".into())));
        }
        let job_id_parsed = parse_job_id(&job_id)?;
        let job: Job = self
            .state
            .db
            .get_job(job_id_parsed)
            .map_err(rpc_err)?
            .ok_or_else(|| rpc_err(MarketError::NotFound("Job")))?;
        if !job.status.reviewable() {
            return Err(rpc_err(MarketError::Conflict(
                "Can only review completed, failed, or resolved jobs".into(),
            )));
        }
        let (reviewee, role) = if acting.id == job.client {
            (job.seller, ReviewRole::ClientReviewingSeller)
        } else if acting.id == job.seller {
            (job.client, ReviewRole::SellerReviewingClient)
        } else {
            return Err(rpc_err(MarketError::Forbidden(
                "Only parties to the job can leave reviews".into(),
            )));
        };
        if self
            .state
            .db
            .review_exists(job_id_parsed, acting.id)
            .map_err(rpc_err)?
        {
            return Err(rpc_err(MarketError::Conflict("You have already reviewed this job".into())));
        }

        let review = Review {
            id: Uuid::new_v4(),
            job_id: job_id_parsed,
            reviewer: acting.id,
            reviewee,
            role,
            rating: data.rating,
            tags: data.tags,
            comment: data.comment,
            created_at: Utc::now(),
        };
        self.state.db.put_review(&review).map_err(rpc_err)?;
        self.recompute_reputation(reviewee, role).map_err(rpc_err)?;
        Ok(RpcReview::from(&review))
    }

    async fn get_job_reviews(&self, ctx: RpcContext, job_id: String) -> RpcResult<Vec<RpcReview>> {
        self.admit(&ctx, "GET", &format!("/jobs/{job_id}/reviews")).await?;
        let mut reviews = self
            .state
            .db
            .reviews_for_job(parse_job_id(&job_id)?)
            .map_err(rpc_err)?;
        reviews.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(reviews.iter().map(RpcReview::from).collect())
    }

    async fn get_agent_reviews(
        &self,
        ctx: RpcContext,
        agent_id: String,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> RpcResult<Vec<RpcReview>> {
        self.admit(&ctx, "GET", &format!("/agents/{agent_id}/reviews")).await?;
        let mut reviews = self
            .state
            .db
            .reviews_for_reviewee(parse_agent_id(&agent_id)?)
            .map_err(rpc_err)?;
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reviews
            .iter()
            .skip(offset.unwrap_or(0))
            .take(limit.unwrap_or(20).min(100))
            .map(RpcReview::from)
            .collect())
    }

    // ── Wallet ───────────────────────────────────────────────────────────────

    async fn get_deposit_address(
        &self,
        ctx: RpcContext,
        agent_id: String,
    ) -> RpcResult<RpcDepositAddress> {
        let path = format!("/agents/{agent_id}/wallet/deposit-address");
        self.admit(&ctx, "GET", &path).await?;
        let acting = self.authenticate(&ctx, "GET", &path, b"").await?;
        let target = parse_agent_id(&agent_id)?;
        Self::require_self(&acting, target)?;
        let address = self.state.wallet.deposit_address(target).await.map_err(rpc_err)?;
        Ok(RpcDepositAddress::from(&address))
    }

    async fn notify_deposit(
        &self,
        ctx: RpcContext,
        agent_id: String,
        tx_hash: String,
    ) -> RpcResult<RpcDeposit> {
        let path = format!("/agents/{agent_id}/wallet/deposit-notify");
        self.admit(&ctx, "POST", &path).await?;
        let acting = self.authenticate(&ctx, "POST", &path, tx_hash.as_bytes()).await?;
        let target = parse_agent_id(&agent_id)?;
        Self::require_self(&acting, target)?;
        let deposit = self
            .state
            .wallet
            .notify_deposit(target, &tx_hash)
            .await
            .map_err(rpc_err)?;
        if deposit.status == DepositStatus::Confirming {
            self.state.wallet.spawn_deposit_watcher(deposit.id);
        }
        Ok(RpcDeposit::from(&deposit))
    }

    async fn request_withdrawal(
        &self,
        ctx: RpcContext,
        agent_id: String,
        data: RpcWithdraw,
    ) -> RpcResult<RpcWithdrawal> {
        let path = format!("/agents/{agent_id}/wallet/withdraw");
        self.admit(&ctx, "POST", &path).await?;
        let acting = self.authenticate(&ctx, "POST", &path, &body_of(&data)).await?;
        let target = parse_agent_id(&agent_id)?;
        Self::require_self(&acting, target)?;
        let amount = parse_credits(&data.amount)?;
        let withdrawal = self
            .state
            .wallet
            .request_withdrawal(target, amount, &data.destination_address)
            .await
            .map_err(rpc_err)?;
        self.state.wallet.spawn_withdrawal_worker(withdrawal.id);
        Ok(RpcWithdrawal::from(&withdrawal))
    }

    async fn get_wallet_transactions(
        &self,
        ctx: RpcContext,
        agent_id: String,
    ) -> RpcResult<RpcWalletHistory> {
        let path = format!("/agents/{agent_id}/wallet/transactions");
        self.admit(&ctx, "GET", &path).await?;
        let acting = self.authenticate(&ctx, "GET", &path, b"").await?;
        let target = parse_agent_id(&agent_id)?;
        Self::require_self(&acting, target)?;
        let deposits = self.state.wallet.deposit_history(target).map_err(rpc_err)?;
        let withdrawals = self.state.wallet.withdrawal_history(target).map_err(rpc_err)?;
        Ok(RpcWalletHistory {
            deposits: deposits.iter().map(RpcDeposit::from).collect(),
            withdrawals: withdrawals.iter().map(RpcWithdrawal::from).collect(),
        })
    }

    async fn get_wallet_balance(
        &self,
        ctx: RpcContext,
        agent_id: String,
    ) -> RpcResult<RpcWalletBalance> {
        let path = format!("/agents/{agent_id}/wallet/balance");
        self.admit(&ctx, "GET", &path).await?;
        let acting = self.authenticate(&ctx, "GET", &path, b"").await?;
        let target = parse_agent_id(&agent_id)?;
        Self::require_self(&acting, target)?;
        let (balance, available, pending) =
            self.state.wallet.wallet_balance(target).map_err(rpc_err)?;
        Ok(RpcWalletBalance {
            agent_id,
            balance: balance.to_string(),
            available: available.to_string(),
            pending_withdrawals: pending.to_string(),
        })
    }

    // ── Fees / health ────────────────────────────────────────────────────────

    async fn get_fee_schedule(&self) -> RpcResult<Value> {
        let fees = &self.state.config.fees;
        let chain = &self.state.config.chain;
        Ok(json!({
            "version": "2.0",
            "note": "Both parties pay fees proportional to the resources they consume. \
                     Factor these into your negotiation — the agreed price is not the total cost.",
            "base_marketplace_fee": {
                "rate_percent": format!("{}", fees.base_bps as f64 / 100.0),
                "split": "50/50 between client and seller",
                "charged_at": "Job completion (deducted from escrow)",
            },
            "verification_compute_fee": {
                "rate_per_cpu_second": format!("{}", fees.verification_per_cpu_second_micro as f64 / 1_000_000.0),
                "minimum": fees.verification_minimum.to_string(),
                "charged_to": "Client (triggers verification)",
                "charged_at": "Each verify call (even if verification fails)",
            },
            "deliverable_storage_fee": {
                "rate_per_kb": format!("{}", fees.storage_per_kb_micro as f64 / 1_000_000.0),
                "minimum": fees.storage_minimum.to_string(),
                "charged_to": "Seller (submits deliverable)",
                "charged_at": "Each deliver call",
            },
            "withdrawal_flat_fee": chain.withdrawal_flat_fee.to_string(),
        }))
    }

    async fn health(&self) -> RpcResult<RpcHealth> {
        Ok(RpcHealth { status: "ok".to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_coord::{MemoryDeadlineSet, MemoryNonceStore, MemoryRateBuckets};
    use agora_core::config::RateRule;
    use agora_crypto::{sign_request, KeyPair};
    use agora_ledger::LockManager;
    use agora_sandbox::{SandboxResult, ScriptRunner, ScriptSpec};
    use agora_wallet::{HttpEvmClient, SecretStore};
    use async_trait::async_trait;
    use serde_json::json;

    struct PassingRunner;

    #[async_trait]
    impl ScriptRunner for PassingRunner {
        async fn run(
            &self,
            _spec: &ScriptSpec,
            _deliverable: &Value,
        ) -> Result<SandboxResult, MarketError> {
            Ok(SandboxResult {
                passed: true,
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: false,
                error: None,
                elapsed_seconds: 0.1,
            })
        }
    }

    struct NoSecrets;

    impl SecretStore for NoSecrets {
        fn get(&self, _key: &str) -> Option<String> {
            None
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        server: RpcServer,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(MarketDb::open(dir.path()).expect("open db"));

        let mut config = MarketConfig::default();
        config.dev_deposit_enabled = true;
        // Generous limits so ordinary tests never trip admission.
        config.rate_limits.registration = RateRule { capacity: 100, refill_per_min: 100 };
        config.rate_limits.job_lifecycle = RateRule { capacity: 1_000, refill_per_min: 600 };
        config.rate_limits.write = RateRule { capacity: 1_000, refill_per_min: 600 };
        config.rate_limits.read = RateRule { capacity: 1_000, refill_per_min: 600 };

        let locks = Arc::new(LockManager::new());
        let ledger = Arc::new(Ledger::new(Arc::clone(&db), locks, config.fees.clone()));
        let deadlines = Arc::new(MemoryDeadlineSet::new());
        let jobs = Arc::new(JobService::new(
            Arc::clone(&db),
            Arc::clone(&ledger),
            Arc::new(PassingRunner),
            deadlines,
            config.sandbox.clone(),
        ));
        let wallet = Arc::new(WalletService::new(
            Arc::clone(&db),
            Arc::clone(&ledger),
            Arc::new(HttpEvmClient::new("http://127.0.0.1:1")),
            config.chain.clone(),
            &NoSecrets,
        ));
        let state = Arc::new(RpcServerState {
            authenticator: Authenticator::new(
                Arc::clone(&db),
                Arc::new(MemoryNonceStore::new()),
                config.auth.clone(),
            ),
            limiter: RateLimiter::new(
                Arc::new(MemoryRateBuckets::new()),
                config.rate_limits.clone(),
            ),
            db,
            config,
            ledger,
            jobs,
            wallet,
            fetch_cards: false,
        });
        Fixture { _dir: dir, server: RpcServer::new(state) }
    }

    fn anon_ctx() -> RpcContext {
        RpcContext { peer_addr: Some("203.0.113.7".into()), ..Default::default() }
    }

    fn signed_ctx(
        keypair: &KeyPair,
        agent_id: &str,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> RpcContext {
        let timestamp = Utc::now().to_rfc3339();
        let signature = sign_request(keypair, &timestamp, method, path, body);
        RpcContext {
            authorization: Some(format!("AgentSig {agent_id}:{signature}")),
            timestamp: Some(timestamp),
            nonce: None,
            forwarded_for: None,
            peer_addr: Some("203.0.113.7".into()),
        }
    }

    async fn register(f: &Fixture, name: &str) -> (KeyPair, String) {
        let keypair = KeyPair::generate();
        let agent = f
            .server
            .register_agent(anon_ctx(), RegisterAgent {
                public_key: keypair.public_key_hex(),
                display_name: name.to_string(),
                description: None,
                endpoint_url: format!("https://{name}.example.com"),
                capabilities: vec!["scrape".into()],
            })
            .await
            .unwrap();
        (keypair, agent.agent_id)
    }

    async fn dev_deposit(f: &Fixture, keypair: &KeyPair, agent_id: &str, amount: &str) {
        let path = format!("/agents/{agent_id}/deposit");
        let ctx = signed_ctx(keypair, agent_id, "POST", &path, amount.as_bytes());
        f.server
            .dev_deposit(ctx, agent_id.to_string(), amount.to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn register_and_duplicate_key() {
        let f = fixture();
        let keypair = KeyPair::generate();
        let data = RegisterAgent {
            public_key: keypair.public_key_hex(),
            display_name: "worker".into(),
            description: Some("scrapes".into()),
            endpoint_url: "https://worker.example.com".into(),
            capabilities: vec!["scrape".into()],
        };
        let agent = f.server.register_agent(anon_ctx(), data.clone()).await.unwrap();
        assert_eq!(agent.status, "active");

        let err = f.server.register_agent(anon_ctx(), data).await.unwrap_err();
        assert_eq!(err.code(), 409);
    }

    #[tokio::test]
    async fn register_rejects_bad_inputs() {
        let f = fixture();
        let base = RegisterAgent {
            public_key: "zz".repeat(32),
            display_name: "x".into(),
            description: None,
            endpoint_url: "https://ok.example.com".into(),
            capabilities: vec![],
        };
        assert_eq!(
            f.server.register_agent(anon_ctx(), base.clone()).await.unwrap_err().code(),
            422
        );

        let mut bad_url = base.clone();
        bad_url.public_key = KeyPair::generate().public_key_hex();
        bad_url.endpoint_url = "http://insecure.example.com".into();
        assert_eq!(
            f.server.register_agent(anon_ctx(), bad_url).await.unwrap_err().code(),
            422
        );

        let mut private_host = base;
        private_host.public_key = KeyPair::generate().public_key_hex();
        private_host.endpoint_url = "https://192.168.0.10".into();
        assert_eq!(
            f.server.register_agent(anon_ctx(), private_host).await.unwrap_err().code(),
            422
        );
    }

    #[tokio::test]
    async fn signed_job_flow_with_result_redaction() {
        let f = fixture();
        let (client_kp, client_id) = register(&f, "client").await;
        let (seller_kp, seller_id) = register(&f, "seller").await;
        dev_deposit(&f, &client_kp, &client_id, "500.00").await;
        dev_deposit(&f, &seller_kp, &seller_id, "10.00").await;

        // Propose with a declarative suite.
        let proposal = RpcJobProposal {
            seller_agent_id: seller_id.clone(),
            listing_id: None,
            max_budget: "25.00".into(),
            requirements: Some(json!({"rows": 400})),
            acceptance_criteria: Some(json!({
                "tests": [{"test_id": "n", "type": "count_gte",
                           "params": {"path": "$.records", "min_count": 2}}]
            })),
            delivery_deadline: None,
            max_rounds: Some(5),
        };
        let ctx = signed_ctx(&client_kp, &client_id, "POST", "/jobs", &body_of(&proposal));
        let job = f.server.propose_job(ctx, proposal).await.unwrap();
        let job_id = job.job_id.clone();
        let hash = job.acceptance_criteria_hash.clone().unwrap();

        // Seller accepts with the criteria hash.
        let accept = RpcAccept { acceptance_criteria_hash: Some(hash) };
        let path = format!("/jobs/{job_id}/accept");
        let ctx = signed_ctx(&seller_kp, &seller_id, "POST", &path, &body_of(&accept));
        f.server.accept_job(ctx, job_id.clone(), accept).await.unwrap();

        // Fund, start, deliver.
        let path = format!("/jobs/{job_id}/fund");
        let ctx = signed_ctx(&client_kp, &client_id, "POST", &path, b"");
        let escrow = f.server.fund_job(ctx, job_id.clone()).await.unwrap();
        assert_eq!(escrow.status, "funded");

        let path = format!("/jobs/{job_id}/start");
        let ctx = signed_ctx(&seller_kp, &seller_id, "POST", &path, b"");
        f.server.start_job(ctx, job_id.clone()).await.unwrap();

        let deliver = RpcDeliver { result: json!({"records": [1, 2, 3]}) };
        let path = format!("/jobs/{job_id}/deliver");
        let ctx = signed_ctx(&seller_kp, &seller_id, "POST", &path, &body_of(&deliver));
        let delivered = f.server.deliver_job(ctx, job_id.clone(), deliver).await.unwrap();
        // Deliverable hiding: not completed yet.
        assert!(delivered.job.result.is_none());

        // The client sees no result either before verification.
        let path = format!("/jobs/{job_id}");
        let ctx = signed_ctx(&client_kp, &client_id, "GET", &path, b"");
        let seen = f.server.get_job(ctx, job_id.clone()).await.unwrap();
        assert!(seen.result.is_none());

        // Verify → pass → completed, result visible, fee charged.
        let path = format!("/jobs/{job_id}/verify");
        let ctx = signed_ctx(&client_kp, &client_id, "POST", &path, b"");
        let verified = f.server.verify_job(ctx, job_id.clone()).await.unwrap();
        assert_eq!(verified.job.status, "completed");
        assert!(verified.job.result.is_some());
        assert!(verified.verification.unwrap().passed);
        assert_eq!(verified.fee_charged.as_deref(), Some("0.05"));
    }

    #[tokio::test]
    async fn get_job_requires_party() {
        let f = fixture();
        let (client_kp, client_id) = register(&f, "client").await;
        let (_seller_kp, seller_id) = register(&f, "seller").await;
        let (other_kp, other_id) = register(&f, "other").await;
        dev_deposit(&f, &client_kp, &client_id, "100.00").await;

        let proposal = RpcJobProposal {
            seller_agent_id: seller_id,
            listing_id: None,
            max_budget: "10.00".into(),
            requirements: None,
            acceptance_criteria: None,
            delivery_deadline: None,
            max_rounds: None,
        };
        let ctx = signed_ctx(&client_kp, &client_id, "POST", "/jobs", &body_of(&proposal));
        let job = f.server.propose_job(ctx, proposal).await.unwrap();

        let path = format!("/jobs/{}", job.job_id);
        let ctx = signed_ctx(&other_kp, &other_id, "GET", &path, b"");
        let err = f.server.get_job(ctx, job.job_id).await.unwrap_err();
        assert_eq!(err.code(), 403);
    }

    #[tokio::test]
    async fn auth_rejects_bad_signature_and_wrong_agent() {
        let f = fixture();
        let (client_kp, client_id) = register(&f, "client").await;
        let (_other_kp, other_id) = register(&f, "other").await;

        // Balance read for someone else's agent id.
        let path = format!("/agents/{other_id}/balance");
        let ctx = signed_ctx(&client_kp, &client_id, "GET", &path, b"");
        let err = f.server.get_balance(ctx, other_id).await.unwrap_err();
        assert_eq!(err.code(), 403);

        // Signature over the wrong path.
        let ctx = signed_ctx(&client_kp, &client_id, "GET", "/somewhere/else", b"");
        let err = f.server.get_balance(ctx, client_id).await.unwrap_err();
        assert_eq!(err.code(), 403);
        assert_eq!(err.message(), "Invalid signature");
    }

    #[tokio::test]
    async fn dev_deposit_gate() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(MarketDb::open(dir.path()).unwrap());
        let config = MarketConfig::default(); // dev_deposit_enabled = false
        let locks = Arc::new(LockManager::new());
        let ledger = Arc::new(Ledger::new(Arc::clone(&db), locks, config.fees.clone()));
        let jobs = Arc::new(JobService::new(
            Arc::clone(&db),
            Arc::clone(&ledger),
            Arc::new(PassingRunner),
            Arc::new(MemoryDeadlineSet::new()),
            config.sandbox.clone(),
        ));
        let wallet = Arc::new(WalletService::new(
            Arc::clone(&db),
            Arc::clone(&ledger),
            Arc::new(HttpEvmClient::new("http://127.0.0.1:1")),
            config.chain.clone(),
            &NoSecrets,
        ));
        let state = Arc::new(RpcServerState {
            authenticator: Authenticator::new(
                Arc::clone(&db),
                Arc::new(MemoryNonceStore::new()),
                config.auth.clone(),
            ),
            limiter: RateLimiter::new(
                Arc::new(MemoryRateBuckets::new()),
                config.rate_limits.clone(),
            ),
            db,
            config,
            ledger,
            jobs,
            wallet,
            fetch_cards: false,
        });
        let server = RpcServer::new(state);

        let err = server
            .dev_deposit(anon_ctx(), AgentId::new().to_string(), "10.00".into())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 501);
    }

    #[tokio::test]
    async fn registration_rate_limit_keyed_by_ip() {
        let f = fixture();
        // Drain this IP's registration bucket with unregisterable payloads;
        // admission happens before validation, so failures still consume.
        let ip_ctx = || RpcContext {
            peer_addr: Some("198.51.100.9".into()),
            ..Default::default()
        };
        let junk = || RegisterAgent {
            public_key: "zz".repeat(32),
            display_name: "j".into(),
            description: None,
            endpoint_url: "https://j.example.com".into(),
            capabilities: vec![],
        };
        for _ in 0..100 {
            let _ = f.server.register_agent(ip_ctx(), junk()).await;
        }
        let err = f.server.register_agent(ip_ctx(), junk()).await.unwrap_err();
        assert_eq!(err.code(), 429);

        // A different IP still gets through to validation.
        let err = f.server.register_agent(anon_ctx(), junk()).await.unwrap_err();
        assert_eq!(err.code(), 422);
    }

    #[tokio::test]
    async fn listings_reviews_and_discovery() {
        let f = fixture();
        let (seller_kp, seller_id) = register(&f, "translator").await;
        let (client_kp, client_id) = register(&f, "buyer").await;
        dev_deposit(&f, &client_kp, &client_id, "100.00").await;

        // Create a listing (no card cached → any skill id accepted).
        let create = RpcListingCreate {
            skill_id: "translate".into(),
            description: Some("en↔fr".into()),
            price_model: "per_call".into(),
            base_price: "5.00".into(),
            currency: "credits".into(),
            sla: None,
        };
        let path = format!("/agents/{seller_id}/listings");
        let ctx = signed_ctx(&seller_kp, &seller_id, "POST", &path, &body_of(&create));
        let listing = f
            .server
            .create_listing(ctx, seller_id.clone(), create.clone())
            .await
            .unwrap();

        // Duplicate active listing for the same skill is rejected.
        let ctx = signed_ctx(&seller_kp, &seller_id, "POST", &path, &body_of(&create));
        let err = f
            .server
            .create_listing(ctx, seller_id.clone(), create)
            .await
            .unwrap_err();
        assert_eq!(err.code(), 409);

        // Browse and discover find it.
        let browsed = f
            .server
            .browse_listings(anon_ctx(), Some("trans".into()), None, None)
            .await
            .unwrap();
        assert_eq!(browsed.len(), 1);
        assert_eq!(browsed[0].listing_id, listing.listing_id);

        let hits = f
            .server
            .discover(anon_ctx(), RpcDiscoverQuery::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].seller_display_name, "translator");

        // Run a jobbed transaction, then review it.
        let proposal = RpcJobProposal {
            seller_agent_id: seller_id.clone(),
            listing_id: Some(listing.listing_id.clone()),
            max_budget: "5.00".into(),
            requirements: None,
            acceptance_criteria: None,
            delivery_deadline: None,
            max_rounds: None,
        };
        let ctx = signed_ctx(&client_kp, &client_id, "POST", "/jobs", &body_of(&proposal));
        let job = f.server.propose_job(ctx, proposal).await.unwrap();
        let job_id = job.job_id;

        let accept = RpcAccept::default();
        let path = format!("/jobs/{job_id}/accept");
        let ctx = signed_ctx(&seller_kp, &seller_id, "POST", &path, &body_of(&accept));
        f.server.accept_job(ctx, job_id.clone(), accept).await.unwrap();
        let path = format!("/jobs/{job_id}/fund");
        let ctx = signed_ctx(&client_kp, &client_id, "POST", &path, b"");
        f.server.fund_job(ctx, job_id.clone()).await.unwrap();
        let path = format!("/jobs/{job_id}/start");
        let ctx = signed_ctx(&seller_kp, &seller_id, "POST", &path, b"");
        f.server.start_job(ctx, job_id.clone()).await.unwrap();
        let deliver = RpcDeliver { result: json!({"text": "bonjour"}) };
        let path = format!("/jobs/{job_id}/deliver");
        let ctx = signed_ctx(&seller_kp, &seller_id, "POST", &path, &body_of(&deliver));
        // The seller needs balance for the storage fee.
        dev_deposit(&f, &seller_kp, &seller_id, "1.00").await;
        f.server.deliver_job(ctx, job_id.clone(), deliver).await.unwrap();
        let path = format!("/jobs/{job_id}/complete");
        let ctx = signed_ctx(&client_kp, &client_id, "POST", &path, b"");
        f.server.complete_job(ctx, job_id.clone()).await.unwrap();

        // Review from the client.
        let review = RpcReviewCreate {
            rating: 5,
            tags: vec!["fast".into(), "accurate".into()],
            comment: Some("great work".into()),
        };
        let path = format!("/jobs/{job_id}/reviews");
        let ctx = signed_ctx(&client_kp, &client_id, "POST", &path, &body_of(&review));
        f.server
            .submit_review(ctx, job_id.clone(), review.clone())
            .await
            .unwrap();

        // Duplicate review rejected.
        let ctx = signed_ctx(&client_kp, &client_id, "POST", &path, &body_of(&review));
        let err = f
            .server
            .submit_review(ctx, job_id.clone(), review)
            .await
            .unwrap_err();
        assert_eq!(err.code(), 409);

        // Below 3 reviews the display stays "New".
        let rep = f.server.get_reputation(anon_ctx(), seller_id).await.unwrap();
        assert_eq!(rep.total_reviews_as_seller, 1);
        assert_eq!(rep.reputation_seller_display, "New");
        assert!(rep.top_tags.contains(&"fast".to_string()));

        let job_reviews = f.server.get_job_reviews(anon_ctx(), job_id).await.unwrap();
        assert_eq!(job_reviews.len(), 1);
        assert_eq!(job_reviews[0].rating, 5);
    }

    #[tokio::test]
    async fn fee_schedule_and_health_are_open() {
        let f = fixture();
        let schedule = f.server.get_fee_schedule().await.unwrap();
        assert_eq!(schedule["base_marketplace_fee"]["rate_percent"], "1");
        assert_eq!(schedule["verification_compute_fee"]["minimum"], "0.05");

        let health = f.server.health().await.unwrap();
        assert_eq!(health.status, "ok");
    }
}
