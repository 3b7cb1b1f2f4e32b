use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use agora_core::agent::Agent;
use agora_core::escrow::{EscrowAccount, EscrowAuditEntry};
use agora_core::job::Job;
use agora_core::listing::{Listing, ListingStatus};
use agora_core::money::Credits;
use agora_core::review::Review;
use agora_core::wallet::{
    DepositStatus, DepositTransaction, WebhookOutboxEntry, WithdrawalRequest, WithdrawalStatus,
};
use agora_core::{AgentId, EscrowId, JobId, ListingId, MarketError};

fn storage_err(e: sled::Error) -> MarketError {
    MarketError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, MarketError> {
    serde_json::to_vec(value).map_err(|e| MarketError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MarketError> {
    serde_json::from_slice(bytes).map_err(|e| MarketError::Serialization(e.to_string()))
}

/// Persistent market database.
///
/// Named trees:
///   agents            — AgentId bytes           → Agent
///   agents_by_pubkey  — pubkey utf8             → AgentId bytes
///   listings          — ListingId bytes         → Listing
///   jobs              — JobId bytes             → Job
///   escrows           — EscrowId bytes          → EscrowAccount
///   escrow_by_job     — JobId bytes             → EscrowId bytes
///   escrow_audit      — EscrowId + seq be bytes → EscrowAuditEntry (append-only)
///   reviews           — JobId + AgentId bytes   → Review
///   deposit_addresses — AgentId bytes           → DepositAddress
///   deposits          — Uuid bytes              → DepositTransaction
///   deposit_by_hash   — tx hash utf8            → Uuid bytes
///   withdrawals       — Uuid bytes              → WithdrawalRequest
///   webhook_outbox    — seq be bytes            → WebhookOutboxEntry (append-only)
///   meta              — utf8 key                → raw bytes (counters)
pub struct MarketDb {
    _db: sled::Db,
    agents: sled::Tree,
    agents_by_pubkey: sled::Tree,
    listings: sled::Tree,
    jobs: sled::Tree,
    escrows: sled::Tree,
    escrow_by_job: sled::Tree,
    escrow_audit: sled::Tree,
    reviews: sled::Tree,
    deposit_addresses: sled::Tree,
    deposits: sled::Tree,
    deposit_by_hash: sled::Tree,
    withdrawals: sled::Tree,
    webhook_outbox: sled::Tree,
    meta: sled::Tree,
}

impl MarketDb {
    /// Open or create the market database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MarketError> {
        let db = sled::open(path).map_err(storage_err)?;
        let open = |name: &str| db.open_tree(name).map_err(storage_err);
        Ok(Self {
            agents: open("agents")?,
            agents_by_pubkey: open("agents_by_pubkey")?,
            listings: open("listings")?,
            jobs: open("jobs")?,
            escrows: open("escrows")?,
            escrow_by_job: open("escrow_by_job")?,
            escrow_audit: open("escrow_audit")?,
            reviews: open("reviews")?,
            deposit_addresses: open("deposit_addresses")?,
            deposits: open("deposits")?,
            deposit_by_hash: open("deposit_by_hash")?,
            withdrawals: open("withdrawals")?,
            webhook_outbox: open("webhook_outbox")?,
            meta: open("meta")?,
            _db: db,
        })
    }

    fn get_tree<T: DeserializeOwned>(
        &self,
        tree: &sled::Tree,
        key: &[u8],
    ) -> Result<Option<T>, MarketError> {
        match tree.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_tree<T: Serialize>(
        &self,
        tree: &sled::Tree,
        key: &[u8],
        value: &T,
    ) -> Result<(), MarketError> {
        tree.insert(key, encode(value)?).map_err(storage_err)?;
        Ok(())
    }

    /// Allocate the next value of a monotonic meta counter.
    fn next_counter(&self, key: &str) -> Result<u64, MarketError> {
        let current = self
            .meta
            .get(key.as_bytes())
            .map_err(storage_err)?
            .map(|b| {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&b[..8]);
                u64::from_be_bytes(arr)
            })
            .unwrap_or(0);
        self.meta
            .insert(key.as_bytes(), (current + 1).to_be_bytes().to_vec())
            .map_err(storage_err)?;
        Ok(current)
    }

    // ── Agents ───────────────────────────────────────────────────────────────

    pub fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, MarketError> {
        self.get_tree(&self.agents, id.0.as_bytes())
    }

    pub fn put_agent(&self, agent: &Agent) -> Result<(), MarketError> {
        self.put_tree(&self.agents, agent.id.0.as_bytes(), agent)?;
        self.agents_by_pubkey
            .insert(agent.public_key.as_bytes(), agent.id.0.as_bytes().as_slice())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_agent_by_pubkey(&self, public_key: &str) -> Result<Option<Agent>, MarketError> {
        match self
            .agents_by_pubkey
            .get(public_key.as_bytes())
            .map_err(storage_err)?
        {
            Some(id_bytes) => {
                let id = AgentId(uuid_from_bytes(&id_bytes)?);
                self.get_agent(id)
            }
            None => Ok(None),
        }
    }

    // ── Listings ─────────────────────────────────────────────────────────────

    pub fn get_listing(&self, id: ListingId) -> Result<Option<Listing>, MarketError> {
        self.get_tree(&self.listings, id.0.as_bytes())
    }

    pub fn put_listing(&self, listing: &Listing) -> Result<(), MarketError> {
        self.put_tree(&self.listings, listing.id.0.as_bytes(), listing)
    }

    pub fn iter_listings(&self) -> Result<Vec<Listing>, MarketError> {
        let mut out = Vec::new();
        for item in self.listings.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    /// The duplicate-listing guard: an existing listing by this seller for
    /// this skill in this status.
    pub fn find_listing(
        &self,
        seller: AgentId,
        skill_id: &str,
        status: ListingStatus,
    ) -> Result<Option<Listing>, MarketError> {
        for listing in self.iter_listings()? {
            if listing.seller == seller && listing.skill_id == skill_id && listing.status == status
            {
                return Ok(Some(listing));
            }
        }
        Ok(None)
    }

    // ── Jobs ─────────────────────────────────────────────────────────────────

    pub fn get_job(&self, id: JobId) -> Result<Option<Job>, MarketError> {
        self.get_tree(&self.jobs, id.0.as_bytes())
    }

    pub fn put_job(&self, job: &Job) -> Result<(), MarketError> {
        self.put_tree(&self.jobs, job.id.0.as_bytes(), job)
    }

    pub fn iter_jobs_for_agent(&self, agent: AgentId) -> Result<Vec<Job>, MarketError> {
        let mut out = Vec::new();
        for item in self.jobs.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let job: Job = decode(&bytes)?;
            if job.client == agent || job.seller == agent {
                out.push(job);
            }
        }
        Ok(out)
    }

    /// Jobs whose deadline still matters, used by startup re-enqueue.
    pub fn iter_jobs_with_active_deadlines(&self) -> Result<Vec<Job>, MarketError> {
        let mut out = Vec::new();
        for item in self.jobs.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let job: Job = decode(&bytes)?;
            if job.status.deadline_applies() && job.delivery_deadline.is_some() {
                out.push(job);
            }
        }
        Ok(out)
    }

    // ── Escrow ───────────────────────────────────────────────────────────────

    pub fn get_escrow(&self, id: EscrowId) -> Result<Option<EscrowAccount>, MarketError> {
        self.get_tree(&self.escrows, id.0.as_bytes())
    }

    pub fn get_escrow_by_job(&self, job_id: JobId) -> Result<Option<EscrowAccount>, MarketError> {
        match self
            .escrow_by_job
            .get(job_id.0.as_bytes())
            .map_err(storage_err)?
        {
            Some(id_bytes) => self.get_escrow(EscrowId(uuid_from_bytes(&id_bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_escrow(&self, escrow: &EscrowAccount) -> Result<(), MarketError> {
        self.put_tree(&self.escrows, escrow.id.0.as_bytes(), escrow)?;
        self.escrow_by_job
            .insert(escrow.job_id.0.as_bytes(), escrow.id.0.as_bytes().as_slice())
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Escrow audit log (append-only; no update or delete exists) ───────────

    pub fn append_audit(&self, entry: &EscrowAuditEntry) -> Result<(), MarketError> {
        let seq = self.next_counter("escrow_audit_seq")?;
        let mut key = entry.escrow_id.0.as_bytes().to_vec();
        key.extend_from_slice(&seq.to_be_bytes());
        self.escrow_audit
            .insert(key, encode(entry)?)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Audit entries for one escrow, in append order.
    pub fn audit_for_escrow(&self, escrow_id: EscrowId) -> Result<Vec<EscrowAuditEntry>, MarketError> {
        let mut out = Vec::new();
        for item in self.escrow_audit.scan_prefix(escrow_id.0.as_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    pub fn iter_all_audit(&self) -> Result<Vec<EscrowAuditEntry>, MarketError> {
        let mut out = Vec::new();
        for item in self.escrow_audit.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Reviews ──────────────────────────────────────────────────────────────

    fn review_key(job_id: JobId, reviewer: AgentId) -> Vec<u8> {
        let mut key = job_id.0.as_bytes().to_vec();
        key.extend_from_slice(reviewer.0.as_bytes());
        key
    }

    pub fn review_exists(&self, job_id: JobId, reviewer: AgentId) -> Result<bool, MarketError> {
        self.reviews
            .contains_key(Self::review_key(job_id, reviewer))
            .map_err(storage_err)
    }

    pub fn put_review(&self, review: &Review) -> Result<(), MarketError> {
        self.put_tree(
            &self.reviews,
            &Self::review_key(review.job_id, review.reviewer),
            review,
        )
    }

    pub fn reviews_for_job(&self, job_id: JobId) -> Result<Vec<Review>, MarketError> {
        let mut out = Vec::new();
        for item in self.reviews.scan_prefix(job_id.0.as_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    pub fn reviews_for_reviewee(&self, agent: AgentId) -> Result<Vec<Review>, MarketError> {
        let mut out = Vec::new();
        for item in self.reviews.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let review: Review = decode(&bytes)?;
            if review.reviewee == agent {
                out.push(review);
            }
        }
        Ok(out)
    }

    // ── Deposit addresses ────────────────────────────────────────────────────

    pub fn deposit_address_for_agent(
        &self,
        agent: AgentId,
    ) -> Result<Option<agora_core::wallet::DepositAddress>, MarketError> {
        self.get_tree(&self.deposit_addresses, agent.0.as_bytes())
    }

    pub fn put_deposit_address(
        &self,
        addr: &agora_core::wallet::DepositAddress,
    ) -> Result<(), MarketError> {
        self.put_tree(&self.deposit_addresses, addr.agent_id.0.as_bytes(), addr)
    }

    /// Allocate the next HD derivation index (monotonic across all agents).
    pub fn next_derivation_index(&self) -> Result<u32, MarketError> {
        Ok(self.next_counter("hd_derivation_index")? as u32)
    }

    // ── Deposits ─────────────────────────────────────────────────────────────

    pub fn get_deposit(&self, id: Uuid) -> Result<Option<DepositTransaction>, MarketError> {
        self.get_tree(&self.deposits, id.as_bytes())
    }

    pub fn get_deposit_by_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<DepositTransaction>, MarketError> {
        match self
            .deposit_by_hash
            .get(tx_hash.as_bytes())
            .map_err(storage_err)?
        {
            Some(id_bytes) => self.get_deposit(uuid_from_bytes(&id_bytes)?),
            None => Ok(None),
        }
    }

    pub fn put_deposit(&self, deposit: &DepositTransaction) -> Result<(), MarketError> {
        self.put_tree(&self.deposits, deposit.id.as_bytes(), deposit)?;
        self.deposit_by_hash
            .insert(deposit.tx_hash.as_bytes(), deposit.id.as_bytes().as_slice())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn deposits_for_agent(
        &self,
        agent: AgentId,
    ) -> Result<Vec<DepositTransaction>, MarketError> {
        let mut out = Vec::new();
        for item in self.deposits.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let dep: DepositTransaction = decode(&bytes)?;
            if dep.agent_id == agent {
                out.push(dep);
            }
        }
        Ok(out)
    }

    pub fn deposits_with_status(
        &self,
        status: DepositStatus,
    ) -> Result<Vec<DepositTransaction>, MarketError> {
        let mut out = Vec::new();
        for item in self.deposits.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let dep: DepositTransaction = decode(&bytes)?;
            if dep.status == status {
                out.push(dep);
            }
        }
        Ok(out)
    }

    // ── Withdrawals ──────────────────────────────────────────────────────────

    pub fn get_withdrawal(&self, id: Uuid) -> Result<Option<WithdrawalRequest>, MarketError> {
        self.get_tree(&self.withdrawals, id.as_bytes())
    }

    pub fn put_withdrawal(&self, withdrawal: &WithdrawalRequest) -> Result<(), MarketError> {
        self.put_tree(&self.withdrawals, withdrawal.id.as_bytes(), withdrawal)
    }

    pub fn withdrawals_for_agent(
        &self,
        agent: AgentId,
    ) -> Result<Vec<WithdrawalRequest>, MarketError> {
        let mut out = Vec::new();
        for item in self.withdrawals.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let w: WithdrawalRequest = decode(&bytes)?;
            if w.agent_id == agent {
                out.push(w);
            }
        }
        Ok(out)
    }

    pub fn withdrawals_with_status(
        &self,
        statuses: &[WithdrawalStatus],
    ) -> Result<Vec<WithdrawalRequest>, MarketError> {
        let mut out = Vec::new();
        for item in self.withdrawals.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let w: WithdrawalRequest = decode(&bytes)?;
            if statuses.contains(&w.status) {
                out.push(w);
            }
        }
        Ok(out)
    }

    /// Sum of in-flight (pending/processing) withdrawals for an agent.
    pub fn pending_withdrawal_total(&self, agent: AgentId) -> Result<Credits, MarketError> {
        let mut total = Credits::ZERO;
        for w in self.withdrawals_for_agent(agent)? {
            if matches!(w.status, WithdrawalStatus::Pending | WithdrawalStatus::Processing) {
                total = total
                    .checked_add(w.amount)
                    .ok_or_else(|| MarketError::Internal("withdrawal total overflow".into()))?;
            }
        }
        Ok(total)
    }

    // ── Webhook outbox (append-only) ─────────────────────────────────────────

    pub fn append_outbox(&self, entry: &WebhookOutboxEntry) -> Result<(), MarketError> {
        let seq = self.next_counter("webhook_outbox_seq")?;
        self.webhook_outbox
            .insert(seq.to_be_bytes(), encode(entry)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_outbox(&self) -> Result<Vec<WebhookOutboxEntry>, MarketError> {
        let mut out = Vec::new();
        for item in self.webhook_outbox.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), MarketError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }
}

fn uuid_from_bytes(bytes: &[u8]) -> Result<Uuid, MarketError> {
    let arr: [u8; 16] = bytes
        .try_into()
        .map_err(|_| MarketError::Storage("corrupt id index entry".into()))?;
    Ok(Uuid::from_bytes(arr))
}
