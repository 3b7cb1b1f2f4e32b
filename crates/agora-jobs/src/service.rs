use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use agora_coord::DeadlineSet;
use agora_core::agent::Agent;
use agora_core::canonical::serialized_size;
use agora_core::config::SandboxConfig;
use agora_core::constants::{DEFAULT_MAX_ROUNDS, MAX_MAX_ROUNDS, MIN_MAX_ROUNDS};
use agora_core::escrow::{AuditDetail, EscrowAccount, EscrowStatus, RefundReason};
use agora_core::job::{can_transition, Job, JobStatus, NegotiationEntry};
use agora_core::{AgentId, Credits, JobId, ListingId, MarketError, Timestamp};
use agora_crypto::criteria_hash;
use agora_ledger::{storage_fee, verification_fee, Ledger};
use agora_sandbox::suite::{mode_of, VerificationMode};
use agora_sandbox::{run_suite, validate_criteria, ScriptRunner, ScriptSpec, SuiteReport};
use agora_store::MarketDb;

use crate::outbox;

/// A client's opening proposal.
#[derive(Debug, Clone)]
pub struct ProposeJob {
    pub seller: AgentId,
    pub listing_id: Option<ListingId>,
    pub max_budget: Credits,
    pub requirements: Option<Value>,
    pub acceptance_criteria: Option<Value>,
    pub delivery_deadline: Option<Timestamp>,
    pub max_rounds: Option<u32>,
}

/// A counter-offer from either party.
#[derive(Debug, Clone)]
pub struct CounterOffer {
    pub proposed_price: Credits,
    pub counter_terms: Option<Value>,
    pub accepted_terms: Option<Value>,
    pub message: Option<String>,
}

/// What a verify call produced.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub job: Job,
    pub verification: Option<SuiteReport>,
    pub fee_charged: Option<Credits>,
}

/// The job lifecycle service.
///
/// State transitions are linearized per job through the ledger's lock
/// manager; operations that move money delegate to the ledger (which takes
/// its own locks) and are careful never to hold the job lock across that
/// call.
pub struct JobService {
    db: Arc<MarketDb>,
    ledger: Arc<Ledger>,
    runner: Arc<dyn ScriptRunner>,
    deadlines: Arc<dyn DeadlineSet>,
    sandbox_cfg: SandboxConfig,
}

impl JobService {
    pub fn new(
        db: Arc<MarketDb>,
        ledger: Arc<Ledger>,
        runner: Arc<dyn ScriptRunner>,
        deadlines: Arc<dyn DeadlineSet>,
        sandbox_cfg: SandboxConfig,
    ) -> Self {
        Self { db, ledger, runner, deadlines, sandbox_cfg }
    }

    pub fn deadlines(&self) -> &Arc<dyn DeadlineSet> {
        &self.deadlines
    }

    fn load_job(&self, id: JobId) -> Result<Job, MarketError> {
        self.db.get_job(id)?.ok_or(MarketError::NotFound("Job"))
    }

    fn load_active_agent(&self, id: AgentId) -> Result<Agent, MarketError> {
        match self.db.get_agent(id)? {
            Some(agent) if agent.is_active() => Ok(agent),
            _ => Err(MarketError::NotFound("Agent")),
        }
    }

    fn assert_transition(job: &Job, to: JobStatus) -> Result<(), MarketError> {
        if !can_transition(job.status, to) {
            return Err(MarketError::InvalidTransition { from: job.status, to });
        }
        Ok(())
    }

    fn assert_party(job: &Job, agent: AgentId) -> Result<(), MarketError> {
        if !job.is_party(agent) {
            return Err(MarketError::NotAParty);
        }
        Ok(())
    }

    /// Best-effort outbox append; a notification failure never rolls back a
    /// job mutation.
    fn notify(&self, job: &Job, event: &str, recipients: &[AgentId]) {
        let agents: Vec<Agent> = recipients
            .iter()
            .filter_map(|id| self.db.get_agent(*id).ok().flatten())
            .collect();
        let refs: Vec<&Agent> = agents.iter().collect();
        if let Err(e) = outbox::enqueue(&self.db, job, event, &refs) {
            warn!(job = %job.id, event, error = %e, "webhook outbox append failed");
        }
    }

    // ── Propose ──────────────────────────────────────────────────────────────

    pub async fn propose(&self, client: AgentId, data: ProposeJob) -> Result<Job, MarketError> {
        self.load_active_agent(client)?;
        self.load_active_agent(data.seller)?;
        if client == data.seller {
            return Err(MarketError::Validation("Cannot propose a job to yourself".into()));
        }
        if !data.max_budget.is_positive() {
            return Err(MarketError::Validation("max_budget must be positive".into()));
        }
        let max_rounds = data.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS);
        if !(MIN_MAX_ROUNDS..=MAX_MAX_ROUNDS).contains(&max_rounds) {
            return Err(MarketError::Validation(format!(
                "max_rounds must be between {MIN_MAX_ROUNDS} and {MAX_MAX_ROUNDS}"
            )));
        }
        if let Some(listing_id) = data.listing_id {
            self.db.get_listing(listing_id)?.ok_or(MarketError::NotFound("Listing"))?;
        }
        if let Some(criteria) = &data.acceptance_criteria {
            validate_criteria(criteria, &self.sandbox_cfg)?;
        }

        let hash = data.acceptance_criteria.as_ref().map(criteria_hash);
        let now = Utc::now();
        let job = Job {
            id: JobId::new(),
            client,
            seller: data.seller,
            listing_id: data.listing_id,
            status: JobStatus::Proposed,
            acceptance_criteria: data.acceptance_criteria.clone(),
            acceptance_criteria_hash: hash.clone(),
            requirements: data.requirements.clone(),
            agreed_price: data.max_budget,
            delivery_deadline: data.delivery_deadline,
            negotiation_log: vec![NegotiationEntry::Proposal {
                round: 0,
                proposer: client,
                proposed_price: data.max_budget,
                requirements: data.requirements,
                acceptance_criteria: data.acceptance_criteria,
                acceptance_criteria_hash: hash,
                timestamp: now,
            }],
            max_rounds,
            current_round: 0,
            result: None,
            created_at: now,
            updated_at: now,
        };
        self.db.put_job(&job)?;
        info!(job = %job.id, client = %client, seller = %job.seller, "job proposed");
        self.notify(&job, "job.proposed", &[job.seller]);
        Ok(job)
    }

    // ── Negotiation ──────────────────────────────────────────────────────────

    pub async fn counter(
        &self,
        job_id: JobId,
        agent: AgentId,
        offer: CounterOffer,
    ) -> Result<Job, MarketError> {
        let _guard = self.ledger.locks().lock_job(job_id).await;
        let mut job = self.load_job(job_id)?;
        Self::assert_party(&job, agent)?;
        if !matches!(job.status, JobStatus::Proposed | JobStatus::Negotiating) {
            return Err(MarketError::Conflict(format!("Cannot counter in status {}", job.status)));
        }
        if !offer.proposed_price.is_positive() {
            return Err(MarketError::Validation("proposed_price must be positive".into()));
        }
        if job.current_round >= job.max_rounds {
            job.status = JobStatus::Cancelled;
            job.updated_at = Utc::now();
            self.db.put_job(&job)?;
            return Err(MarketError::RoundsExhausted);
        }

        job.status = JobStatus::Negotiating;
        job.current_round += 1;
        job.agreed_price = offer.proposed_price;
        job.negotiation_log.push(NegotiationEntry::Counter {
            round: job.current_round,
            proposer: agent,
            proposed_price: offer.proposed_price,
            counter_terms: offer.counter_terms,
            accepted_terms: offer.accepted_terms,
            message: offer.message,
            timestamp: Utc::now(),
        });
        job.updated_at = Utc::now();
        self.db.put_job(&job)?;

        let counterparty = if agent == job.client { job.seller } else { job.client };
        self.notify(&job, "job.countered", &[counterparty]);
        Ok(job)
    }

    /// Accept the current terms. When acceptance criteria exist the seller
    /// must echo the stored criteria hash, committing both parties to the
    /// same verification procedure; the client (criteria author) is exempt.
    pub async fn accept(
        &self,
        job_id: JobId,
        agent: AgentId,
        provided_hash: Option<String>,
    ) -> Result<Job, MarketError> {
        let _guard = self.ledger.locks().lock_job(job_id).await;
        let mut job = self.load_job(job_id)?;
        Self::assert_party(&job, agent)?;
        Self::assert_transition(&job, JobStatus::Agreed)?;

        let is_seller = agent == job.seller;
        if is_seller && job.acceptance_criteria.is_some() {
            let provided = provided_hash
                .as_deref()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| {
                    MarketError::Validation(
                        "Seller must provide acceptance_criteria_hash to confirm review of the \
                         verification criteria before accepting"
                            .into(),
                    )
                })?;
            if Some(provided) != job.acceptance_criteria_hash.as_deref() {
                return Err(MarketError::CriteriaHashMismatch);
            }
        }

        job.status = JobStatus::Agreed;
        job.negotiation_log.push(NegotiationEntry::Acceptance {
            by: agent,
            agreed_price: job.agreed_price,
            acceptance_criteria_hash: job.acceptance_criteria_hash.clone(),
            timestamp: Utc::now(),
        });
        job.updated_at = Utc::now();
        self.db.put_job(&job)?;

        let counterparty = if agent == job.client { job.seller } else { job.client };
        self.notify(&job, "job.accepted", &[counterparty]);
        Ok(job)
    }

    // ── Funding ──────────────────────────────────────────────────────────────

    pub async fn fund(&self, job_id: JobId, agent: AgentId) -> Result<EscrowAccount, MarketError> {
        let escrow = self.ledger.fund_escrow(job_id, agent).await?;
        let job = self.load_job(job_id)?;
        if let Some(deadline) = job.delivery_deadline {
            self.deadlines.add(job_id, deadline.timestamp()).await?;
        }
        self.notify(&job, "job.funded", &[job.seller]);
        Ok(escrow)
    }

    // ── Work ─────────────────────────────────────────────────────────────────

    pub async fn start(&self, job_id: JobId, agent: AgentId) -> Result<Job, MarketError> {
        let _guard = self.ledger.locks().lock_job(job_id).await;
        let mut job = self.load_job(job_id)?;
        Self::assert_party(&job, agent)?;
        if agent != job.seller {
            return Err(MarketError::SellerOnly);
        }
        Self::assert_transition(&job, JobStatus::InProgress)?;
        job.status = JobStatus::InProgress;
        job.updated_at = Utc::now();
        self.db.put_job(&job)?;
        self.notify(&job, "job.started", &[job.client]);
        Ok(job)
    }

    /// Attach the deliverable. The seller pays the storage fee before the
    /// result is accepted.
    pub async fn deliver(
        &self,
        job_id: JobId,
        agent: AgentId,
        result: Value,
    ) -> Result<(Job, Credits), MarketError> {
        {
            let job = self.load_job(job_id)?;
            Self::assert_party(&job, agent)?;
            if agent != job.seller {
                return Err(MarketError::SellerOnly);
            }
            Self::assert_transition(&job, JobStatus::Delivered)?;
        }

        let fee = storage_fee(self.ledger.fee_config(), serialized_size(&result));
        self.ledger.charge_fee(agent, &fee).await?;

        let _guard = self.ledger.locks().lock_job(job_id).await;
        let mut job = self.load_job(job_id)?;
        if let Err(e) = Self::assert_transition(&job, JobStatus::Delivered) {
            // The state moved between the fee charge and the lock; undo.
            self.ledger.credit_balance(agent, fee.amount).await?;
            return Err(e);
        }
        job.status = JobStatus::Delivered;
        job.result = Some(result);
        job.updated_at = Utc::now();
        self.db.put_job(&job)?;
        drop(_guard);

        self.notify(&job, "job.delivered", &[job.client]);
        Ok((job, fee.amount))
    }

    // ── Verification ─────────────────────────────────────────────────────────

    /// Run the agreed verification procedure, charge the client the compute
    /// fee (including on failed runs), then release or refund escrow.
    pub async fn verify(&self, job_id: JobId, agent: AgentId) -> Result<VerifyOutcome, MarketError> {
        let job = self.load_job(job_id)?;
        if agent != job.client {
            return Err(MarketError::Forbidden(
                "Only the client can trigger verification".into(),
            ));
        }
        if job.status != JobStatus::Delivered {
            return Err(MarketError::Conflict(format!(
                "Job must be delivered to verify, currently {}",
                job.status
            )));
        }

        let output = job.result.clone().unwrap_or(Value::Null);
        let (report, cpu_millis) = match mode_of(job.acceptance_criteria.as_ref()) {
            VerificationMode::None => {
                // No criteria agreed: completion is the client's judgment.
                self.ledger.release_escrow(job_id).await?;
                let _ = self.deadlines.remove(job_id).await;
                let job = self.load_job(job_id)?;
                self.notify(&job, "job.completed", &[job.client, job.seller]);
                return Ok(VerifyOutcome { job, verification: None, fee_charged: None });
            }
            VerificationMode::Declarative => {
                let criteria = job.acceptance_criteria.as_ref().ok_or_else(|| {
                    MarketError::Internal("declarative mode without criteria".into())
                })?;
                let started = Instant::now();
                let report = run_suite(criteria, &output)?;
                (report, started.elapsed().as_millis() as u64)
            }
            VerificationMode::Script => {
                let criteria = job.acceptance_criteria.as_ref().ok_or_else(|| {
                    MarketError::Internal("script mode without criteria".into())
                })?;
                let spec = ScriptSpec::from_criteria(criteria, &self.sandbox_cfg)?;
                let sandbox_result = self.runner.run(&spec, &output).await?;
                let cpu_millis = (sandbox_result.elapsed_seconds * 1_000.0).ceil() as u64;
                (SuiteReport::from_sandbox(sandbox_result), cpu_millis)
            }
        };

        let fee = verification_fee(self.ledger.fee_config(), cpu_millis);
        self.ledger.charge_fee(job.client, &fee).await?;

        let job = if report.passed {
            self.ledger.release_escrow(job_id).await?;
            let _ = self.deadlines.remove(job_id).await;
            let job = self.load_job(job_id)?;
            self.notify(&job, "job.completed", &[job.client, job.seller]);
            job
        } else {
            self.fail_with_refund(job_id, RefundReason::VerificationFailed).await?
        };

        Ok(VerifyOutcome { job, verification: Some(report), fee_charged: Some(fee.amount) })
    }

    /// Client-side completion without (or after) verification: releases
    /// escrow directly.
    pub async fn complete(&self, job_id: JobId, agent: AgentId) -> Result<Job, MarketError> {
        let job = self.load_job(job_id)?;
        if agent != job.client {
            return Err(MarketError::Forbidden("Only the client can complete a job".into()));
        }
        self.ledger.release_escrow(job_id).await?;
        let _ = self.deadlines.remove(job_id).await;
        let job = self.load_job(job_id)?;
        self.notify(&job, "job.completed", &[job.client, job.seller]);
        Ok(job)
    }

    // ── Failure ──────────────────────────────────────────────────────────────

    async fn fail_with_refund(&self, job_id: JobId, reason: RefundReason) -> Result<Job, MarketError> {
        let escrow = self.db.get_escrow_by_job(job_id)?;
        match escrow {
            Some(e) if e.status == EscrowStatus::Funded => {
                self.ledger.refund_escrow(job_id, reason).await?;
            }
            _ => {
                let _guard = self.ledger.locks().lock_job(job_id).await;
                let mut job = self.load_job(job_id)?;
                if job.status != JobStatus::Failed {
                    Self::assert_transition(&job, JobStatus::Failed)?;
                    job.status = JobStatus::Failed;
                    job.updated_at = Utc::now();
                    self.db.put_job(&job)?;
                }
            }
        }
        let _ = self.deadlines.remove(job_id).await;
        let job = self.load_job(job_id)?;
        self.notify(&job, "job.failed", &[job.client, job.seller]);
        Ok(job)
    }

    /// Either party marks the job failed; a funded escrow refunds in the
    /// same step.
    pub async fn fail(&self, job_id: JobId, agent: AgentId) -> Result<Job, MarketError> {
        let job = self.load_job(job_id)?;
        Self::assert_party(&job, agent)?;
        Self::assert_transition(&job, JobStatus::Failed)?;
        self.fail_with_refund(job_id, RefundReason::PartyFailed).await
    }

    // ── Disputes ─────────────────────────────────────────────────────────────

    /// Public dispute endpoint: the state edges exist but v1 has no
    /// arbitration, so this is disabled.
    pub async fn dispute(&self, _job_id: JobId, _agent: AgentId) -> Result<Job, MarketError> {
        Err(MarketError::Disabled(
            "Dispute resolution is not available in v1. Use reviews to provide feedback on \
             completed or failed jobs"
                .into(),
        ))
    }

    /// Record a dispute on a failed job. Wired for the future resolver; not
    /// reachable from the public surface.
    pub async fn mark_disputed(&self, job_id: JobId, agent: AgentId) -> Result<Job, MarketError> {
        let _guard = self.ledger.locks().lock_job(job_id).await;
        let mut job = self.load_job(job_id)?;
        Self::assert_party(&job, agent)?;
        Self::assert_transition(&job, JobStatus::Disputed)?;
        job.status = JobStatus::Disputed;
        job.updated_at = Utc::now();
        self.db.put_job(&job)?;
        if let Some(escrow) = self.db.get_escrow_by_job(job_id)? {
            self.db.append_audit(&agora_core::escrow::EscrowAuditEntry {
                id: uuid::Uuid::new_v4(),
                escrow_id: escrow.id,
                action: AuditDetail::Disputed { by: agent }.action(),
                actor: Some(agent),
                amount: escrow.amount,
                timestamp: Utc::now(),
                detail: AuditDetail::Disputed { by: agent },
            })?;
        }
        Ok(job)
    }

    /// Resolve a recorded dispute. The v1 resolver makes no balance
    /// mutation; it closes the state machine edge and leaves an audit row.
    pub async fn resolve_dispute(&self, job_id: JobId) -> Result<Job, MarketError> {
        let _guard = self.ledger.locks().lock_job(job_id).await;
        let mut job = self.load_job(job_id)?;
        Self::assert_transition(&job, JobStatus::Resolved)?;
        job.status = JobStatus::Resolved;
        job.updated_at = Utc::now();
        self.db.put_job(&job)?;
        if let Some(escrow) = self.db.get_escrow_by_job(job_id)? {
            self.db.append_audit(&agora_core::escrow::EscrowAuditEntry {
                id: uuid::Uuid::new_v4(),
                escrow_id: escrow.id,
                action: AuditDetail::Resolved.action(),
                actor: None,
                amount: escrow.amount,
                timestamp: Utc::now(),
                detail: AuditDetail::Resolved,
            })?;
        }
        Ok(job)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Party-only job read; the RPC layer redacts the result field for
    /// non-completed jobs.
    pub fn get_job_for(&self, job_id: JobId, requester: AgentId) -> Result<Job, MarketError> {
        let job = self.load_job(job_id)?;
        Self::assert_party(&job, requester)?;
        Ok(job)
    }

    // ── Deactivation sweep ───────────────────────────────────────────────────

    /// When an agent deactivates: cancel every pre-funding job and
    /// fail-with-refund every in-flight one. Returns (cancelled, failed).
    pub async fn deactivation_sweep(&self, agent: AgentId) -> Result<(usize, usize), MarketError> {
        let mut cancelled = 0;
        let mut failed = 0;
        for job in self.db.iter_jobs_for_agent(agent)? {
            match job.status {
                JobStatus::Proposed | JobStatus::Negotiating | JobStatus::Agreed => {
                    let _guard = self.ledger.locks().lock_job(job.id).await;
                    let mut job = self.load_job(job.id)?;
                    if matches!(
                        job.status,
                        JobStatus::Proposed | JobStatus::Negotiating | JobStatus::Agreed
                    ) {
                        job.status = JobStatus::Cancelled;
                        job.updated_at = Utc::now();
                        self.db.put_job(&job)?;
                        cancelled += 1;
                    }
                }
                JobStatus::Funded | JobStatus::InProgress | JobStatus::Delivered => {
                    self.fail_with_refund(job.id, RefundReason::AgentDeactivated).await?;
                    failed += 1;
                }
                _ => {}
            }
        }
        info!(agent = %agent, cancelled, failed, "deactivation sweep finished");
        Ok((cancelled, failed))
    }
}
