use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use agora_core::agent::Agent;
use agora_core::config::FeeConfig;
use agora_core::escrow::{
    AuditDetail, EscrowAccount, EscrowAuditEntry, EscrowStatus, RefundReason,
};
use agora_core::job::JobStatus;
use agora_core::{AgentId, Credits, EscrowId, JobId, MarketError};
use agora_store::MarketDb;

use crate::fees::{base_fee_split, FeeBreakdown};
use crate::locks::LockManager;

/// The balance-and-escrow engine.
///
/// Every mutation acquires the affected row locks through the shared
/// [`LockManager`] before reading, so concurrent movers of the same balance
/// serialize and the second observer sees the first one's write. This is the
/// only mechanism preventing double-spend.
pub struct Ledger {
    db: Arc<MarketDb>,
    locks: Arc<LockManager>,
    fees: FeeConfig,
}

impl Ledger {
    pub fn new(db: Arc<MarketDb>, locks: Arc<LockManager>, fees: FeeConfig) -> Self {
        Self { db, locks, fees }
    }

    pub fn db(&self) -> &Arc<MarketDb> {
        &self.db
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn fee_config(&self) -> &FeeConfig {
        &self.fees
    }

    fn load_agent(&self, id: AgentId) -> Result<Agent, MarketError> {
        self.db.get_agent(id)?.ok_or(MarketError::NotFound("Agent"))
    }

    fn audit(
        &self,
        escrow_id: EscrowId,
        actor: Option<AgentId>,
        amount: Credits,
        detail: AuditDetail,
    ) -> Result<(), MarketError> {
        self.db.append_audit(&EscrowAuditEntry {
            id: Uuid::new_v4(),
            escrow_id,
            action: detail.action(),
            actor,
            amount,
            timestamp: Utc::now(),
            detail,
        })
    }

    // ── Balance primitives ───────────────────────────────────────────────────

    /// Credit an agent's balance. Returns the new balance.
    pub async fn credit_balance(
        &self,
        agent_id: AgentId,
        amount: Credits,
    ) -> Result<Credits, MarketError> {
        let _guard = self.locks.lock_agent(agent_id).await;
        let mut agent = self.load_agent(agent_id)?;
        agent.balance = agent
            .balance
            .checked_add(amount)
            .ok_or_else(|| MarketError::Internal("balance overflow".into()))?;
        self.db.put_agent(&agent)?;
        Ok(agent.balance)
    }

    /// Deduct a fee from an agent's balance. Returns the new balance.
    pub async fn charge_fee(
        &self,
        agent_id: AgentId,
        fee: &FeeBreakdown,
    ) -> Result<Credits, MarketError> {
        let _guard = self.locks.lock_agent(agent_id).await;
        let mut agent = self.load_agent(agent_id)?;
        if agent.balance < fee.amount {
            return Err(MarketError::InsufficientBalanceForFee {
                fee_kind: fee.fee_kind,
                have: agent.balance,
                need: fee.amount,
            });
        }
        agent.balance = agent
            .balance
            .checked_sub(fee.amount)
            .ok_or_else(|| MarketError::Internal("balance underflow".into()))?;
        self.db.put_agent(&agent)?;
        info!(agent = %agent_id, kind = fee.fee_kind, amount = %fee.amount, "fee charged");
        Ok(agent.balance)
    }

    /// Deduct a withdrawal's gross amount from the balance, failing when the
    /// locked row cannot cover it. Returns the new balance.
    pub async fn reserve_withdrawal(
        &self,
        agent_id: AgentId,
        amount: Credits,
    ) -> Result<Credits, MarketError> {
        let _guard = self.locks.lock_agent(agent_id).await;
        let mut agent = self.load_agent(agent_id)?;
        if agent.balance < amount {
            return Err(MarketError::InsufficientBalance { have: agent.balance, need: amount });
        }
        agent.balance = agent
            .balance
            .checked_sub(amount)
            .ok_or_else(|| MarketError::Internal("balance underflow".into()))?;
        self.db.put_agent(&agent)?;
        Ok(agent.balance)
    }

    // ── Escrow fund ──────────────────────────────────────────────────────────

    /// Fund escrow for an agreed job: lock the client row, re-check the
    /// balance under the lock, debit, create the funded escrow, transition
    /// the job, and write the `created` + `funded` audit entries.
    pub async fn fund_escrow(
        &self,
        job_id: JobId,
        acting: AgentId,
    ) -> Result<EscrowAccount, MarketError> {
        let job = self.db.get_job(job_id)?.ok_or(MarketError::NotFound("Job"))?;
        if acting != job.client {
            return Err(MarketError::Forbidden("Only the client can fund the escrow".into()));
        }

        let _agent_guard = self.locks.lock_agent(job.client).await;
        let _job_guard = self.locks.lock_job(job_id).await;

        // Re-read under the locks; the job may have moved meanwhile.
        let mut job = self.db.get_job(job_id)?.ok_or(MarketError::NotFound("Job"))?;
        if job.status != JobStatus::Agreed {
            return Err(MarketError::InvalidTransition {
                from: job.status,
                to: JobStatus::Funded,
            });
        }
        if !job.agreed_price.is_positive() {
            return Err(MarketError::Validation("Job has no agreed price".into()));
        }
        if self.db.get_escrow_by_job(job_id)?.is_some() {
            return Err(MarketError::EscrowExists);
        }

        let mut client = self.load_agent(job.client)?;
        let amount = job.agreed_price;
        if client.balance < amount {
            return Err(MarketError::InsufficientBalance { have: client.balance, need: amount });
        }
        client.balance = client
            .balance
            .checked_sub(amount)
            .ok_or_else(|| MarketError::Internal("balance underflow".into()))?;

        let now = Utc::now();
        let escrow = EscrowAccount {
            id: EscrowId::new(),
            job_id,
            client: job.client,
            seller: job.seller,
            amount,
            status: EscrowStatus::Funded,
            funded_at: Some(now),
            released_at: None,
        };
        job.status = JobStatus::Funded;
        job.updated_at = now;

        self.db.put_agent(&client)?;
        self.db.put_escrow(&escrow)?;
        self.db.put_job(&job)?;
        self.audit(escrow.id, Some(acting), amount, AuditDetail::Created)?;
        self.audit(escrow.id, Some(acting), amount, AuditDetail::Funded)?;

        info!(job = %job_id, amount = %amount, "escrow funded");
        Ok(escrow)
    }

    // ── Escrow release ───────────────────────────────────────────────────────

    /// Release a funded escrow to the seller: compute the base-fee split,
    /// best-effort collect the client's half, credit the seller with
    /// (amount − seller's half), complete the job, and record the breakdown
    /// in the audit metadata.
    pub async fn release_escrow(&self, job_id: JobId) -> Result<EscrowAccount, MarketError> {
        let probe = self
            .db
            .get_escrow_by_job(job_id)?
            .ok_or(MarketError::NotFound("Escrow"))?;

        let _agent_guards = self.locks.lock_agent_pair(probe.client, probe.seller).await;
        let _job_guard = self.locks.lock_job(job_id).await;

        let mut escrow = self
            .db
            .get_escrow_by_job(job_id)?
            .ok_or(MarketError::NotFound("Escrow"))?;
        if escrow.status != EscrowStatus::Funded {
            return Err(MarketError::EscrowNotFunded { current: escrow.status.to_string() });
        }

        let mut job = self.db.get_job(job_id)?.ok_or(MarketError::NotFound("Job"))?;
        if !matches!(job.status, JobStatus::Delivered | JobStatus::Verifying) {
            return Err(MarketError::Conflict(format!(
                "Job must be delivered to complete, currently {}",
                job.status
            )));
        }

        let (client_fee, seller_fee) = base_fee_split(&self.fees, escrow.amount);
        let total_fee = client_fee
            .amount
            .checked_add(seller_fee.amount)
            .ok_or_else(|| MarketError::Internal("fee overflow".into()))?;
        let seller_payout = escrow
            .amount
            .checked_sub(seller_fee.amount)
            .ok_or_else(|| MarketError::Internal("payout underflow".into()))?;

        // The client's half comes out of their balance, not the escrow. When
        // they cannot cover it the release still completes and the platform
        // absorbs the fee; the audit row records which way it went.
        let mut client = self.load_agent(escrow.client)?;
        let client_fee_collected = client.balance >= client_fee.amount;
        if client_fee_collected {
            client.balance = client
                .balance
                .checked_sub(client_fee.amount)
                .ok_or_else(|| MarketError::Internal("balance underflow".into()))?;
            self.db.put_agent(&client)?;
        } else {
            warn!(job = %job_id, fee = %client_fee.amount, "client base fee absorbed by platform");
        }

        let mut seller = self.load_agent(escrow.seller)?;
        seller.balance = seller
            .balance
            .checked_add(seller_payout)
            .ok_or_else(|| MarketError::Internal("balance overflow".into()))?;
        self.db.put_agent(&seller)?;

        let now = Utc::now();
        escrow.status = EscrowStatus::Released;
        escrow.released_at = Some(now);
        job.status = JobStatus::Completed;
        job.updated_at = now;
        self.db.put_escrow(&escrow)?;
        self.db.put_job(&job)?;

        self.audit(
            escrow.id,
            None,
            seller_payout,
            AuditDetail::Released {
                total_fee,
                client_base_fee: client_fee.amount,
                seller_base_fee: seller_fee.amount,
                fee_base_bps: self.fees.base_bps,
                client_fee_collected,
            },
        )?;

        info!(job = %job_id, payout = %seller_payout, "escrow released");
        Ok(escrow)
    }

    // ── Escrow refund ────────────────────────────────────────────────────────

    /// Refund a funded escrow to the client in full and fail the job (when
    /// it is not already failed).
    pub async fn refund_escrow(
        &self,
        job_id: JobId,
        reason: RefundReason,
    ) -> Result<EscrowAccount, MarketError> {
        let probe = self
            .db
            .get_escrow_by_job(job_id)?
            .ok_or(MarketError::NotFound("Escrow"))?;

        let _agent_guard = self.locks.lock_agent(probe.client).await;
        let _job_guard = self.locks.lock_job(job_id).await;

        let mut escrow = self
            .db
            .get_escrow_by_job(job_id)?
            .ok_or(MarketError::NotFound("Escrow"))?;
        if escrow.status != EscrowStatus::Funded {
            return Err(MarketError::EscrowNotFunded { current: escrow.status.to_string() });
        }

        let mut client = self.load_agent(escrow.client)?;
        client.balance = client
            .balance
            .checked_add(escrow.amount)
            .ok_or_else(|| MarketError::Internal("balance overflow".into()))?;
        self.db.put_agent(&client)?;

        let now = Utc::now();
        escrow.status = EscrowStatus::Refunded;
        escrow.released_at = Some(now);
        self.db.put_escrow(&escrow)?;

        let mut job = self.db.get_job(job_id)?.ok_or(MarketError::NotFound("Job"))?;
        if job.status != JobStatus::Failed {
            job.status = JobStatus::Failed;
            job.updated_at = now;
            self.db.put_job(&job)?;
        }

        self.audit(escrow.id, None, escrow.amount, AuditDetail::Refunded { reason })?;
        info!(job = %job_id, amount = %escrow.amount, ?reason, "escrow refunded");
        Ok(escrow)
    }
}
