use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use agora_core::config::ChainConfig;
use agora_core::constants::WALLET_HISTORY_LIMIT;
use agora_core::wallet::{
    DepositAddress, DepositStatus, DepositTransaction, WithdrawalRequest, WithdrawalStatus,
};
use agora_core::{AgentId, Credits, MarketError, UsdcUnits};
use agora_crypto::derive_deposit_address;
use agora_ledger::Ledger;
use agora_store::MarketDb;

use crate::erc20::{decode_transfers, transfer_calldata};
use crate::evm::EvmClient;
use crate::secrets::{SecretStore, HD_WALLET_MASTER_SEED, TREASURY_WALLET_PRIVATE_KEY};
use crate::tx::{address_of_secret, sign_transaction, Eip1559Tx};

const PAYOUT_GAS_LIMIT: u64 = 100_000;

/// Custodial wallet service: deposit addresses, deposit confirmation
/// watchers, withdrawal payout workers and startup recovery.
pub struct WalletService {
    db: Arc<MarketDb>,
    ledger: Arc<Ledger>,
    evm: Arc<dyn EvmClient>,
    chain: ChainConfig,
    hd_seed: Option<Vec<u8>>,
    treasury_key: Option<String>,
    poll_interval: Duration,
}

fn valid_eth_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

fn address_bytes(address: &str) -> Result<[u8; 20], MarketError> {
    hex::decode(address.trim_start_matches("0x"))
        .ok()
        .and_then(|v| <[u8; 20]>::try_from(v).ok())
        .ok_or_else(|| MarketError::Validation(format!("invalid address: {address}")))
}

impl WalletService {
    pub fn new(
        db: Arc<MarketDb>,
        ledger: Arc<Ledger>,
        evm: Arc<dyn EvmClient>,
        chain: ChainConfig,
        secrets: &dyn SecretStore,
    ) -> Self {
        let hd_seed = secrets
            .get(HD_WALLET_MASTER_SEED)
            .and_then(|hex_seed| hex::decode(hex_seed).ok());
        if hd_seed.is_none() {
            warn!("HD seed not configured; deposit addresses are disabled");
        }
        let treasury_key = secrets.get(TREASURY_WALLET_PRIVATE_KEY);
        if treasury_key.is_none() {
            warn!("treasury key not configured; withdrawal payouts are disabled");
        }
        Self {
            db,
            ledger,
            evm,
            chain,
            hd_seed,
            treasury_key,
            poll_interval: Duration::from_secs(4),
        }
    }

    /// Shorten the confirmation poll interval (tests).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    // ── Deposit addresses ────────────────────────────────────────────────────

    /// The agent's deposit address, derived and persisted on first request.
    pub async fn deposit_address(&self, agent_id: AgentId) -> Result<DepositAddress, MarketError> {
        if let Some(existing) = self.db.deposit_address_for_agent(agent_id)? {
            return Ok(existing);
        }
        let seed = self.hd_seed.as_deref().ok_or_else(|| {
            MarketError::Upstream("Wallet infrastructure not configured (missing HD seed)".into())
        })?;
        self.db.get_agent(agent_id)?.ok_or(MarketError::NotFound("Agent"))?;

        let index = self.db.next_derivation_index()?;
        let (address, _raw) = derive_deposit_address(seed, index)?;
        let row = DepositAddress {
            id: Uuid::new_v4(),
            agent_id,
            address,
            derivation_index: index,
            created_at: Utc::now(),
        };
        self.db.put_deposit_address(&row)?;
        info!(agent = %agent_id, index, address = %row.address, "deposit address issued");
        Ok(row)
    }

    // ── Deposit ingestion ────────────────────────────────────────────────────

    /// Register a broadcast tx hash as an inbound deposit: fetch the
    /// receipt, decode the token transfer to this agent's address, and
    /// record a confirming row. Duplicate hashes return the existing row.
    pub async fn notify_deposit(
        &self,
        agent_id: AgentId,
        tx_hash: &str,
    ) -> Result<DepositTransaction, MarketError> {
        if let Some(existing) = self.db.get_deposit_by_hash(tx_hash)? {
            return Ok(existing);
        }
        let deposit_addr = self
            .db
            .deposit_address_for_agent(agent_id)?
            .ok_or(MarketError::NotFound("Deposit address"))?;

        let receipt = self
            .evm
            .transaction_receipt(tx_hash)
            .await?
            .ok_or(MarketError::NotFound("Transaction"))?;
        if !receipt.status_ok {
            return Err(MarketError::ChainTx("Transaction reverted on chain".into()));
        }

        let token = self.chain.resolved_usdc_contract();
        let transfers = decode_transfers(&receipt, &token)?;
        let matched = transfers
            .into_iter()
            .find(|t| t.to.to_lowercase() == deposit_addr.address.to_lowercase())
            .ok_or_else(|| {
                MarketError::ChainTx(format!(
                    "Transaction does not contain a USDC transfer to {}",
                    deposit_addr.address
                ))
            })?;

        let credits = matched.value.to_credits();
        if credits < self.chain.min_deposit {
            return Err(MarketError::ChainTx(format!(
                "Deposit amount {credits} is below minimum of {}",
                self.chain.min_deposit
            )));
        }

        let deposit = DepositTransaction {
            id: Uuid::new_v4(),
            agent_id,
            tx_hash: tx_hash.to_string(),
            from_address: matched.from,
            amount_usdc: matched.value,
            amount_credits: credits,
            confirmations: 0,
            status: DepositStatus::Confirming,
            block_number: receipt.block_number,
            detected_at: Utc::now(),
            credited_at: None,
        };
        self.db.put_deposit(&deposit)?;
        info!(
            tx = tx_hash, agent = %agent_id, amount = %deposit.amount_usdc,
            "deposit registered, awaiting {} confirmations", self.chain.confirmations_required,
        );
        Ok(deposit)
    }

    /// Credit a confirmed deposit. Idempotent on the row status: a second
    /// call (or a watcher racing recovery) observes `credited` and returns.
    pub async fn credit_deposit(&self, deposit_id: Uuid) -> Result<(), MarketError> {
        let _row_guard = self.ledger.locks().lock_row(deposit_id).await;
        let mut deposit = self
            .db
            .get_deposit(deposit_id)?
            .ok_or(MarketError::NotFound("Deposit"))?;
        match deposit.status {
            DepositStatus::Confirming => {}
            _ => return Ok(()),
        }

        // Defense-in-depth: the minimum was checked at notify time.
        if deposit.amount_credits < self.chain.min_deposit {
            warn!(deposit = %deposit_id, "deposit below minimum at credit time, marking failed");
            deposit.status = DepositStatus::Failed;
            self.db.put_deposit(&deposit)?;
            return Ok(());
        }

        self.ledger
            .credit_balance(deposit.agent_id, deposit.amount_credits)
            .await?;
        deposit.status = DepositStatus::Credited;
        deposit.credited_at = Some(Utc::now());
        self.db.put_deposit(&deposit)?;
        info!(deposit = %deposit_id, agent = %deposit.agent_id, amount = %deposit.amount_credits, "deposit credited");
        Ok(())
    }

    /// One watcher poll. Returns true when the watcher should stop (row
    /// terminal or credited now).
    pub async fn confirm_deposit_if_ready(&self, deposit_id: Uuid) -> Result<bool, MarketError> {
        let Some(mut deposit) = self.db.get_deposit(deposit_id)? else {
            warn!(deposit = %deposit_id, "watcher for unknown deposit row");
            return Ok(true);
        };
        if deposit.status != DepositStatus::Confirming {
            return Ok(true);
        }

        let current = self.evm.block_number().await?;
        let confirmations = current.saturating_sub(deposit.block_number);
        if confirmations != deposit.confirmations {
            deposit.confirmations = confirmations;
            self.db.put_deposit(&deposit)?;
        }
        if confirmations >= self.chain.confirmations_required {
            self.credit_deposit(deposit_id).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Spawn the per-deposit confirmation watcher. The watcher has no
    /// timeout; a deposit may sit in confirming indefinitely on an idle
    /// chain.
    pub fn spawn_deposit_watcher(self: &Arc<Self>, deposit_id: Uuid) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match service.confirm_deposit_if_ready(deposit_id).await {
                    Ok(true) => return,
                    Ok(false) => {}
                    Err(e) => {
                        error!(deposit = %deposit_id, error = %e, "confirmation check failed");
                    }
                }
                tokio::time::sleep(service.poll_interval).await;
            }
        });
    }

    // ── Withdrawals ──────────────────────────────────────────────────────────

    /// Create a withdrawal. The gross amount is deducted from the balance
    /// immediately under the agent's lock — that deduction is the
    /// double-spend protection.
    pub async fn request_withdrawal(
        &self,
        agent_id: AgentId,
        amount: Credits,
        destination_address: &str,
    ) -> Result<WithdrawalRequest, MarketError> {
        if !valid_eth_address(destination_address) {
            return Err(MarketError::Validation(format!(
                "invalid destination address: {destination_address}"
            )));
        }
        let fee = self.chain.withdrawal_flat_fee;
        let net_payout = amount
            .checked_sub(fee)
            .filter(|n| n.is_positive())
            .ok_or_else(|| {
                MarketError::Validation(format!("Withdrawal amount must exceed the {fee} fee"))
            })?;
        if amount < self.chain.min_withdrawal {
            return Err(MarketError::Validation(format!(
                "Minimum withdrawal is {}",
                self.chain.min_withdrawal
            )));
        }
        if amount > self.chain.max_withdrawal {
            return Err(MarketError::Validation(format!(
                "Maximum withdrawal is {}",
                self.chain.max_withdrawal
            )));
        }

        self.ledger.reserve_withdrawal(agent_id, amount).await?;

        let withdrawal = WithdrawalRequest {
            id: Uuid::new_v4(),
            agent_id,
            amount,
            fee,
            net_payout,
            destination_address: destination_address.to_string(),
            status: WithdrawalStatus::Pending,
            tx_hash: None,
            requested_at: Utc::now(),
            processed_at: None,
            error_message: None,
        };
        self.db.put_withdrawal(&withdrawal)?;
        info!(
            withdrawal = %withdrawal.id, agent = %agent_id, amount = %amount,
            net = %net_payout, dest = destination_address, "withdrawal created",
        );
        Ok(withdrawal)
    }

    async fn broadcast_payout(&self, withdrawal: &WithdrawalRequest) -> Result<String, MarketError> {
        let key = self
            .treasury_key
            .as_deref()
            .ok_or_else(|| MarketError::Upstream("treasury wallet not configured".into()))?;
        let treasury = address_of_secret(key)?;
        let token = address_bytes(&self.chain.resolved_usdc_contract())?;
        let dest = address_bytes(&withdrawal.destination_address)?;

        let nonce = self.evm.transaction_count(&treasury).await?;
        let gas_price = self.evm.gas_price().await?;
        let max_priority = self.evm.max_priority_fee().await?;

        let tx = Eip1559Tx {
            chain_id: self.chain.network.chain_id(),
            nonce,
            max_priority_fee_per_gas: max_priority,
            max_fee_per_gas: gas_price.saturating_mul(2),
            gas_limit: PAYOUT_GAS_LIMIT,
            to: token,
            value: 0,
            data: transfer_calldata(&dest, UsdcUnits::from_credits(withdrawal.net_payout)),
        };
        let raw = sign_transaction(&tx, key)?;
        self.evm.send_raw_transaction(&raw).await
    }

    /// The payout worker body for one withdrawal: pending → processing →
    /// completed, or failed with the gross amount restored to the balance.
    pub async fn process_withdrawal(&self, withdrawal_id: Uuid) -> Result<(), MarketError> {
        if self.treasury_key.is_none() {
            error!(withdrawal = %withdrawal_id, "treasury wallet not configured, payout deferred");
            return Ok(());
        }

        let _row_guard = self.ledger.locks().lock_row(withdrawal_id).await;
        let mut withdrawal = self
            .db
            .get_withdrawal(withdrawal_id)?
            .ok_or(MarketError::NotFound("Withdrawal"))?;
        match withdrawal.status {
            WithdrawalStatus::Pending => {}
            // A processing row without a hash is a crash before broadcast;
            // resume it. With a hash the payout already went out.
            WithdrawalStatus::Processing if withdrawal.tx_hash.is_none() => {}
            _ => return Ok(()),
        }

        withdrawal.status = WithdrawalStatus::Processing;
        self.db.put_withdrawal(&withdrawal)?;

        match self.broadcast_payout(&withdrawal).await {
            Ok(tx_hash) => {
                withdrawal.tx_hash = Some(tx_hash.clone());
                withdrawal.status = WithdrawalStatus::Completed;
                withdrawal.processed_at = Some(Utc::now());
                self.db.put_withdrawal(&withdrawal)?;
                info!(
                    withdrawal = %withdrawal_id, tx = %tx_hash,
                    amount = %withdrawal.net_payout, "withdrawal completed",
                );
            }
            Err(e) => {
                let mut message = e.to_string();
                message.truncate(1_000);
                error!(withdrawal = %withdrawal_id, error = %message, "withdrawal failed, refunding");
                withdrawal.status = WithdrawalStatus::Failed;
                withdrawal.error_message = Some(message);
                withdrawal.processed_at = Some(Utc::now());
                self.db.put_withdrawal(&withdrawal)?;
                self.ledger
                    .credit_balance(withdrawal.agent_id, withdrawal.amount)
                    .await?;
            }
        }
        Ok(())
    }

    pub fn spawn_withdrawal_worker(self: &Arc<Self>, withdrawal_id: Uuid) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.process_withdrawal(withdrawal_id).await {
                error!(withdrawal = %withdrawal_id, error = %e, "withdrawal worker error");
            }
        });
    }

    // ── Startup recovery ─────────────────────────────────────────────────────

    /// Re-spawn a watcher for every confirming deposit and a worker for
    /// every pending/processing withdrawal. Safe on every boot: handlers
    /// key off row status and exit when a row already settled.
    pub fn recover(self: &Arc<Self>) -> Result<(usize, usize), MarketError> {
        let deposits = self.db.deposits_with_status(DepositStatus::Confirming)?;
        for deposit in &deposits {
            self.spawn_deposit_watcher(deposit.id);
        }
        let withdrawals = self
            .db
            .withdrawals_with_status(&[WithdrawalStatus::Pending, WithdrawalStatus::Processing])?;
        for withdrawal in &withdrawals {
            self.spawn_withdrawal_worker(withdrawal.id);
        }
        if !deposits.is_empty() || !withdrawals.is_empty() {
            info!(
                deposits = deposits.len(),
                withdrawals = withdrawals.len(),
                "recovered in-flight wallet work",
            );
        }
        Ok((deposits.len(), withdrawals.len()))
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn deposit_history(&self, agent_id: AgentId) -> Result<Vec<DepositTransaction>, MarketError> {
        let mut rows = self.db.deposits_for_agent(agent_id)?;
        rows.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        rows.truncate(WALLET_HISTORY_LIMIT);
        Ok(rows)
    }

    pub fn withdrawal_history(
        &self,
        agent_id: AgentId,
    ) -> Result<Vec<WithdrawalRequest>, MarketError> {
        let mut rows = self.db.withdrawals_for_agent(agent_id)?;
        rows.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        rows.truncate(WALLET_HISTORY_LIMIT);
        Ok(rows)
    }

    /// (total, available, pending-withdrawal total). The balance already
    /// reflects withdrawal deductions, so available equals total; pending
    /// reports what is still in flight.
    pub fn wallet_balance(&self, agent_id: AgentId) -> Result<(Credits, Credits, Credits), MarketError> {
        let agent = self.db.get_agent(agent_id)?.ok_or(MarketError::NotFound("Agent"))?;
        let pending = self.db.pending_withdrawal_total(agent_id)?;
        Ok((agent.balance, agent.balance, pending))
    }
}
