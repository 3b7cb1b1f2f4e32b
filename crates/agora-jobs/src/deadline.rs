//! Deadline enforcement.
//!
//! Funding a job with a delivery deadline records `(job, deadline)` in the
//! deadline set. A single long-running consumer peeks the earliest entry,
//! sleeps until it is due (capped at 60 s so newly inserted earlier
//! deadlines are not missed), atomically removes it and fails the job with
//! a refund if the deadline still matters. On startup every active job with
//! a deadline is re-enqueued; the idempotent add makes that safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use agora_coord::DeadlineSet;
use agora_core::escrow::{EscrowStatus, RefundReason};
use agora_core::job::JobStatus;
use agora_core::{JobId, MarketError};
use agora_ledger::Ledger;
use agora_store::MarketDb;

const IDLE_SLEEP: Duration = Duration::from_secs(10);
const MAX_WAIT: Duration = Duration::from_secs(60);
const ERROR_SLEEP: Duration = Duration::from_secs(5);

/// What one consumer step did; `run` sleeps according to this, tests call
/// [`DeadlineConsumer::step`] directly.
#[derive(Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing queued; sleep the idle interval.
    Empty,
    /// Earliest deadline is in the future; sleep this long and re-peek.
    Wait(Duration),
    /// This consumer won the removal and enforced the deadline.
    Processed(JobId),
    /// Another consumer removed the entry first.
    Lost,
}

pub struct DeadlineConsumer {
    db: Arc<MarketDb>,
    ledger: Arc<Ledger>,
    deadlines: Arc<dyn DeadlineSet>,
}

impl DeadlineConsumer {
    pub fn new(db: Arc<MarketDb>, ledger: Arc<Ledger>, deadlines: Arc<dyn DeadlineSet>) -> Self {
        Self { db, ledger, deadlines }
    }

    /// Re-enqueue every job whose deadline still matters. Safe to run on
    /// every startup.
    pub async fn recover(&self) -> Result<usize, MarketError> {
        let jobs = self.db.iter_jobs_with_active_deadlines()?;
        let mut count = 0;
        for job in &jobs {
            if let Some(deadline) = job.delivery_deadline {
                self.deadlines.add(job.id, deadline.timestamp()).await?;
                count += 1;
            }
        }
        if count > 0 {
            info!(count, "re-enqueued active deadlines");
        }
        Ok(count)
    }

    /// One iteration of the consumer loop.
    pub async fn step(&self) -> Result<StepOutcome, MarketError> {
        let Some((job_id, deadline)) = self.deadlines.peek().await? else {
            return Ok(StepOutcome::Empty);
        };

        let now = Utc::now().timestamp();
        if deadline > now {
            let wait = Duration::from_secs((deadline - now) as u64).min(MAX_WAIT);
            return Ok(StepOutcome::Wait(wait));
        }

        if !self.deadlines.remove(job_id).await? {
            return Ok(StepOutcome::Lost);
        }

        self.fail_overdue(job_id).await;
        Ok(StepOutcome::Processed(job_id))
    }

    /// Fail one overdue job and refund its escrow. Errors are logged, never
    /// propagated; the consumer must outlive any single bad job.
    async fn fail_overdue(&self, job_id: JobId) {
        let job = match self.db.get_job(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job = %job_id, "deadline fired for nonexistent job");
                return;
            }
            Err(e) => {
                error!(job = %job_id, error = %e, "deadline enforcement load failed");
                return;
            }
        };

        if !job.status.deadline_applies() {
            info!(job = %job_id, status = %job.status, "already settled, skipping deadline");
            return;
        }

        let has_funded_escrow = matches!(
            self.db.get_escrow_by_job(job_id),
            Ok(Some(ref e)) if e.status == EscrowStatus::Funded
        );
        let outcome = if has_funded_escrow {
            self.ledger
                .refund_escrow(job_id, RefundReason::DeadlineExpired)
                .await
                .map(|_| ())
        } else {
            let locks = Arc::clone(self.ledger.locks());
            let _guard = locks.lock_job(job_id).await;
            match self.db.get_job(job_id) {
                Ok(Some(mut job)) if job.status.deadline_applies() => {
                    job.status = JobStatus::Failed;
                    job.updated_at = Utc::now();
                    self.db.put_job(&job)
                }
                other => other.map(|_| ()),
            }
        };

        match outcome {
            Ok(()) => info!(job = %job_id, "auto-failed overdue job"),
            Err(e) => error!(job = %job_id, error = %e, "deadline enforcement failed"),
        }
    }

    /// The consumer loop. Runs until the shutdown signal flips; an
    /// unexpected error sleeps 5 s and continues — this task must never die.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("deadline consumer started");
        loop {
            let sleep = match self.step().await {
                Ok(StepOutcome::Empty) => IDLE_SLEEP,
                Ok(StepOutcome::Wait(wait)) => wait,
                Ok(StepOutcome::Processed(_)) | Ok(StepOutcome::Lost) => Duration::ZERO,
                Err(e) => {
                    error!(error = %e, "deadline consumer error, retrying in 5s");
                    ERROR_SLEEP
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = shutdown.changed() => {
                    info!("deadline consumer shutting down");
                    return;
                }
            }
        }
    }
}
