use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use serde_json::Value;

use crate::types::{
    RegisterAgent, RpcAccept, RpcAgent, RpcBalance, RpcContext, RpcCounter, RpcDeactivation,
    RpcDeliver, RpcDeliverResult, RpcDeposit, RpcDepositAddress, RpcDiscoverHit,
    RpcDiscoverQuery, RpcEscrow, RpcHealth, RpcJob, RpcJobProposal, RpcListing,
    RpcListingCreate, RpcListingUpdate, RpcReputation, RpcReview, RpcReviewCreate, RpcVerify,
    RpcWalletBalance, RpcWalletHistory, RpcWithdraw, RpcWithdrawal, UpdateAgent,
};

/// The Agora marketplace API.
///
/// Every method takes the transport context first; authenticated calls are
/// verified against the canonical signed message of their logical
/// method + path, and all calls pass rate-limit admission.
#[rpc(server, namespace = "agora")]
pub trait AgoraApi {
    // ── Agents ───────────────────────────────────────────────────────────────

    /// Register an agent (unauthenticated; tight per-IP rate limit).
    #[method(name = "registerAgent")]
    async fn register_agent(&self, ctx: RpcContext, data: RegisterAgent) -> RpcResult<RpcAgent>;

    /// Public agent profile.
    #[method(name = "getAgent")]
    async fn get_agent(&self, ctx: RpcContext, agent_id: String) -> RpcResult<RpcAgent>;

    /// Update own profile; changing the endpoint re-fetches the capability card.
    #[method(name = "updateAgent")]
    async fn update_agent(
        &self,
        ctx: RpcContext,
        agent_id: String,
        data: UpdateAgent,
    ) -> RpcResult<RpcAgent>;

    /// Deactivate self: cancels open jobs, fails-with-refund in-flight ones.
    #[method(name = "deactivateAgent")]
    async fn deactivate_agent(&self, ctx: RpcContext, agent_id: String)
        -> RpcResult<RpcDeactivation>;

    /// The cached capability card, if one was fetched.
    #[method(name = "getAgentCard")]
    async fn get_agent_card(&self, ctx: RpcContext, agent_id: String) -> RpcResult<Option<Value>>;

    #[method(name = "getReputation")]
    async fn get_reputation(&self, ctx: RpcContext, agent_id: String) -> RpcResult<RpcReputation>;

    /// Own balance.
    #[method(name = "getBalance")]
    async fn get_balance(&self, ctx: RpcContext, agent_id: String) -> RpcResult<RpcBalance>;

    /// Direct credit for development; gated by configuration.
    #[method(name = "devDeposit")]
    async fn dev_deposit(
        &self,
        ctx: RpcContext,
        agent_id: String,
        amount: String,
    ) -> RpcResult<RpcBalance>;

    // ── Jobs ─────────────────────────────────────────────────────────────────

    #[method(name = "proposeJob")]
    async fn propose_job(&self, ctx: RpcContext, data: RpcJobProposal) -> RpcResult<RpcJob>;

    /// Party-only job view; the result field is redacted unless completed.
    #[method(name = "getJob")]
    async fn get_job(&self, ctx: RpcContext, job_id: String) -> RpcResult<RpcJob>;

    #[method(name = "counterJob")]
    async fn counter_job(
        &self,
        ctx: RpcContext,
        job_id: String,
        data: RpcCounter,
    ) -> RpcResult<RpcJob>;

    #[method(name = "acceptJob")]
    async fn accept_job(
        &self,
        ctx: RpcContext,
        job_id: String,
        data: RpcAccept,
    ) -> RpcResult<RpcJob>;

    #[method(name = "fundJob")]
    async fn fund_job(&self, ctx: RpcContext, job_id: String) -> RpcResult<RpcEscrow>;

    #[method(name = "startJob")]
    async fn start_job(&self, ctx: RpcContext, job_id: String) -> RpcResult<RpcJob>;

    #[method(name = "deliverJob")]
    async fn deliver_job(
        &self,
        ctx: RpcContext,
        job_id: String,
        data: RpcDeliver,
    ) -> RpcResult<RpcDeliverResult>;

    #[method(name = "verifyJob")]
    async fn verify_job(&self, ctx: RpcContext, job_id: String) -> RpcResult<RpcVerify>;

    #[method(name = "completeJob")]
    async fn complete_job(&self, ctx: RpcContext, job_id: String) -> RpcResult<RpcJob>;

    #[method(name = "failJob")]
    async fn fail_job(&self, ctx: RpcContext, job_id: String) -> RpcResult<RpcJob>;

    /// Disabled in v1; the state edges exist for a future resolver.
    #[method(name = "disputeJob")]
    async fn dispute_job(&self, ctx: RpcContext, job_id: String) -> RpcResult<RpcJob>;

    // ── Listings / discovery ─────────────────────────────────────────────────

    #[method(name = "createListing")]
    async fn create_listing(
        &self,
        ctx: RpcContext,
        agent_id: String,
        data: RpcListingCreate,
    ) -> RpcResult<RpcListing>;

    #[method(name = "getListing")]
    async fn get_listing(&self, ctx: RpcContext, listing_id: String) -> RpcResult<RpcListing>;

    #[method(name = "updateListing")]
    async fn update_listing(
        &self,
        ctx: RpcContext,
        listing_id: String,
        data: RpcListingUpdate,
    ) -> RpcResult<RpcListing>;

    /// Active listings, optionally filtered by skill substring.
    #[method(name = "browseListings")]
    async fn browse_listings(
        &self,
        ctx: RpcContext,
        skill_id: Option<String>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> RpcResult<Vec<RpcListing>>;

    /// Discovery with seller reputation, ranked by reputation then price.
    #[method(name = "discover")]
    async fn discover(
        &self,
        ctx: RpcContext,
        query: RpcDiscoverQuery,
    ) -> RpcResult<Vec<RpcDiscoverHit>>;

    // ── Reviews ──────────────────────────────────────────────────────────────

    #[method(name = "submitReview")]
    async fn submit_review(
        &self,
        ctx: RpcContext,
        job_id: String,
        data: RpcReviewCreate,
    ) -> RpcResult<RpcReview>;

    #[method(name = "getJobReviews")]
    async fn get_job_reviews(&self, ctx: RpcContext, job_id: String) -> RpcResult<Vec<RpcReview>>;

    #[method(name = "getAgentReviews")]
    async fn get_agent_reviews(
        &self,
        ctx: RpcContext,
        agent_id: String,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> RpcResult<Vec<RpcReview>>;

    // ── Wallet ───────────────────────────────────────────────────────────────

    /// Own deposit address, derived on first request.
    #[method(name = "getDepositAddress")]
    async fn get_deposit_address(
        &self,
        ctx: RpcContext,
        agent_id: String,
    ) -> RpcResult<RpcDepositAddress>;

    /// Register a broadcast deposit tx and start its confirmation watcher.
    #[method(name = "notifyDeposit")]
    async fn notify_deposit(
        &self,
        ctx: RpcContext,
        agent_id: String,
        tx_hash: String,
    ) -> RpcResult<RpcDeposit>;

    /// Request a payout; the gross amount leaves the balance immediately.
    #[method(name = "requestWithdrawal")]
    async fn request_withdrawal(
        &self,
        ctx: RpcContext,
        agent_id: String,
        data: RpcWithdraw,
    ) -> RpcResult<RpcWithdrawal>;

    #[method(name = "getWalletTransactions")]
    async fn get_wallet_transactions(
        &self,
        ctx: RpcContext,
        agent_id: String,
    ) -> RpcResult<RpcWalletHistory>;

    #[method(name = "getWalletBalance")]
    async fn get_wallet_balance(
        &self,
        ctx: RpcContext,
        agent_id: String,
    ) -> RpcResult<RpcWalletBalance>;

    // ── Fees / health ────────────────────────────────────────────────────────

    /// The static fee schedule (unauthenticated).
    #[method(name = "getFeeSchedule")]
    async fn get_fee_schedule(&self) -> RpcResult<Value>;

    #[method(name = "health")]
    async fn health(&self) -> RpcResult<RpcHealth>;
}
