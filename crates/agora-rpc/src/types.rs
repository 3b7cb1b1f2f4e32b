use serde::{Deserialize, Serialize};
use serde_json::Value;

use agora_core::agent::Agent;
use agora_core::escrow::EscrowAccount;
use agora_core::job::{Job, JobStatus};
use agora_core::listing::Listing;
use agora_core::review::Review;
use agora_core::wallet::{DepositAddress, DepositTransaction, WithdrawalRequest};
use agora_sandbox::SuiteReport;

/// Transport context the fronting HTTP layer extracts per request: the
/// three auth headers plus addressing for IP-keyed rate limits.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcContext {
    pub authorization: Option<String>,
    pub timestamp: Option<String>,
    pub nonce: Option<String>,
    pub forwarded_for: Option<String>,
    pub peer_addr: Option<String>,
}

// ── Agents ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterAgent {
    pub public_key: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub endpoint_url: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateAgent {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub endpoint_url: Option<String>,
    pub capabilities: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcAgent {
    pub agent_id: String,
    pub public_key: String,
    pub display_name: String,
    pub description: Option<String>,
    pub endpoint_url: String,
    pub capabilities: Vec<String>,
    pub reputation_seller: f64,
    pub reputation_client: f64,
    pub status: String,
    pub created_at: String,
    pub last_seen: String,
}

impl From<&Agent> for RpcAgent {
    fn from(agent: &Agent) -> Self {
        Self {
            agent_id: agent.id.to_string(),
            public_key: agent.public_key.clone(),
            display_name: agent.display_name.clone(),
            description: agent.description.clone(),
            endpoint_url: agent.endpoint_url.clone(),
            capabilities: agent.capabilities.clone(),
            reputation_seller: agent.reputation_seller,
            reputation_client: agent.reputation_client,
            status: agent.status.to_string(),
            created_at: agent.created_at.to_rfc3339(),
            last_seen: agent.last_seen.to_rfc3339(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcBalance {
    pub agent_id: String,
    pub balance: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcDeactivation {
    pub agent_id: String,
    pub status: String,
    pub jobs_cancelled: usize,
    pub jobs_failed: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcReputation {
    pub agent_id: String,
    pub reputation_seller: Option<f64>,
    pub reputation_seller_display: String,
    pub reputation_client: Option<f64>,
    pub reputation_client_display: String,
    pub total_reviews_as_seller: usize,
    pub total_reviews_as_client: usize,
    pub top_tags: Vec<String>,
}

// ── Jobs ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcJobProposal {
    pub seller_agent_id: String,
    #[serde(default)]
    pub listing_id: Option<String>,
    pub max_budget: String,
    #[serde(default)]
    pub requirements: Option<Value>,
    #[serde(default)]
    pub acceptance_criteria: Option<Value>,
    #[serde(default)]
    pub delivery_deadline: Option<String>,
    #[serde(default)]
    pub max_rounds: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcCounter {
    pub proposed_price: String,
    #[serde(default)]
    pub counter_terms: Option<Value>,
    #[serde(default)]
    pub accepted_terms: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcAccept {
    pub acceptance_criteria_hash: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcDeliver {
    pub result: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcJob {
    pub job_id: String,
    pub client_agent_id: String,
    pub seller_agent_id: String,
    pub listing_id: Option<String>,
    pub status: String,
    pub acceptance_criteria: Option<Value>,
    pub acceptance_criteria_hash: Option<String>,
    pub requirements: Option<Value>,
    pub agreed_price: String,
    pub delivery_deadline: Option<String>,
    pub negotiation_log: Value,
    pub max_rounds: u32,
    pub current_round: u32,
    /// Stripped unless the job is completed, so a client cannot rig a
    /// failing verification and read the work product anyway.
    pub result: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Job> for RpcJob {
    fn from(job: &Job) -> Self {
        let result = if job.status == JobStatus::Completed { job.result.clone() } else { None };
        Self {
            job_id: job.id.to_string(),
            client_agent_id: job.client.to_string(),
            seller_agent_id: job.seller.to_string(),
            listing_id: job.listing_id.map(|l| l.to_string()),
            status: job.status.to_string(),
            acceptance_criteria: job.acceptance_criteria.clone(),
            acceptance_criteria_hash: job.acceptance_criteria_hash.clone(),
            requirements: job.requirements.clone(),
            agreed_price: job.agreed_price.to_string(),
            delivery_deadline: job.delivery_deadline.map(|d| d.to_rfc3339()),
            negotiation_log: serde_json::to_value(&job.negotiation_log).unwrap_or(Value::Null),
            max_rounds: job.max_rounds,
            current_round: job.current_round,
            result,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcEscrow {
    pub escrow_id: String,
    pub job_id: String,
    pub client_agent_id: String,
    pub seller_agent_id: String,
    pub amount: String,
    pub status: String,
    pub funded_at: Option<String>,
    pub released_at: Option<String>,
}

impl From<&EscrowAccount> for RpcEscrow {
    fn from(escrow: &EscrowAccount) -> Self {
        Self {
            escrow_id: escrow.id.to_string(),
            job_id: escrow.job_id.to_string(),
            client_agent_id: escrow.client.to_string(),
            seller_agent_id: escrow.seller.to_string(),
            amount: escrow.amount.to_string(),
            status: escrow.status.to_string(),
            funded_at: escrow.funded_at.map(|t| t.to_rfc3339()),
            released_at: escrow.released_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcVerify {
    pub job: RpcJob,
    pub verification: Option<SuiteReport>,
    pub fee_charged: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcDeliverResult {
    pub job: RpcJob,
    pub storage_fee: String,
}

// ── Listings / discovery ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcListingCreate {
    pub skill_id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_model: String,
    pub base_price: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub sla: Option<Value>,
}

fn default_currency() -> String {
    "credits".to_string()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcListingUpdate {
    pub description: Option<String>,
    pub price_model: Option<String>,
    pub base_price: Option<String>,
    pub sla: Option<Value>,
    pub status: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcListing {
    pub listing_id: String,
    pub seller_agent_id: String,
    pub skill_id: String,
    pub description: Option<String>,
    pub price_model: String,
    pub base_price: String,
    pub currency: String,
    pub sla: Option<Value>,
    pub status: String,
    pub created_at: String,
}

impl From<&Listing> for RpcListing {
    fn from(listing: &Listing) -> Self {
        Self {
            listing_id: listing.id.to_string(),
            seller_agent_id: listing.seller.to_string(),
            skill_id: listing.skill_id.clone(),
            description: listing.description.clone(),
            price_model: serde_json::to_value(listing.price_model)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            base_price: listing.base_price.to_string(),
            currency: listing.currency.clone(),
            sla: listing.sla.clone(),
            status: listing.status.to_string(),
            created_at: listing.created_at.to_rfc3339(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcDiscoverQuery {
    pub skill_id: Option<String>,
    pub min_rating: Option<f64>,
    pub max_price: Option<String>,
    pub price_model: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcDiscoverHit {
    pub listing: RpcListing,
    pub seller_display_name: String,
    pub seller_reputation: f64,
    pub skill: Option<Value>,
}

// ── Reviews ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcReviewCreate {
    pub rating: u8,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcReview {
    pub review_id: String,
    pub job_id: String,
    pub reviewer_agent_id: String,
    pub reviewee_agent_id: String,
    pub role: String,
    pub rating: u8,
    pub tags: Vec<String>,
    pub comment: Option<String>,
    pub created_at: String,
}

impl From<&Review> for RpcReview {
    fn from(review: &Review) -> Self {
        Self {
            review_id: review.id.to_string(),
            job_id: review.job_id.to_string(),
            reviewer_agent_id: review.reviewer.to_string(),
            reviewee_agent_id: review.reviewee.to_string(),
            role: serde_json::to_value(review.role)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            rating: review.rating,
            tags: review.tags.clone(),
            comment: review.comment.clone(),
            created_at: review.created_at.to_rfc3339(),
        }
    }
}

// ── Wallet ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcDepositAddress {
    pub agent_id: String,
    pub address: String,
    pub derivation_index: u32,
}

impl From<&DepositAddress> for RpcDepositAddress {
    fn from(addr: &DepositAddress) -> Self {
        Self {
            agent_id: addr.agent_id.to_string(),
            address: addr.address.clone(),
            derivation_index: addr.derivation_index,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcDeposit {
    pub deposit_id: String,
    pub tx_hash: String,
    pub from_address: String,
    pub amount_usdc: String,
    pub amount_credits: String,
    pub confirmations: u64,
    pub status: String,
    pub block_number: u64,
    pub detected_at: String,
    pub credited_at: Option<String>,
}

impl From<&DepositTransaction> for RpcDeposit {
    fn from(deposit: &DepositTransaction) -> Self {
        Self {
            deposit_id: deposit.id.to_string(),
            tx_hash: deposit.tx_hash.clone(),
            from_address: deposit.from_address.clone(),
            amount_usdc: deposit.amount_usdc.to_string(),
            amount_credits: deposit.amount_credits.to_string(),
            confirmations: deposit.confirmations,
            status: deposit.status.to_string(),
            block_number: deposit.block_number,
            detected_at: deposit.detected_at.to_rfc3339(),
            credited_at: deposit.credited_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcWithdraw {
    pub amount: String,
    pub destination_address: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcWithdrawal {
    pub withdrawal_id: String,
    pub amount: String,
    pub fee: String,
    pub net_payout: String,
    pub destination_address: String,
    pub status: String,
    pub tx_hash: Option<String>,
    pub requested_at: String,
    pub processed_at: Option<String>,
    pub error_message: Option<String>,
}

impl From<&WithdrawalRequest> for RpcWithdrawal {
    fn from(w: &WithdrawalRequest) -> Self {
        Self {
            withdrawal_id: w.id.to_string(),
            amount: w.amount.to_string(),
            fee: w.fee.to_string(),
            net_payout: w.net_payout.to_string(),
            destination_address: w.destination_address.clone(),
            status: w.status.to_string(),
            tx_hash: w.tx_hash.clone(),
            requested_at: w.requested_at.to_rfc3339(),
            processed_at: w.processed_at.map(|t| t.to_rfc3339()),
            error_message: w.error_message.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcWalletHistory {
    pub deposits: Vec<RpcDeposit>,
    pub withdrawals: Vec<RpcWithdrawal>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcWalletBalance {
    pub agent_id: String,
    pub balance: String,
    pub available: String,
    pub pending_withdrawals: String,
}

// ── Misc ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcHealth {
    pub status: String,
}
