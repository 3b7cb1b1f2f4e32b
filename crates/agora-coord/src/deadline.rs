use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use agora_core::{JobId, MarketError};

/// The deadline sorted set: (job, deadline-unix-seconds) scored by time.
///
/// `add` is idempotent; `remove` reports whether this caller actually
/// removed the member, which is how racing consumers decide a winner.
#[async_trait]
pub trait DeadlineSet: Send + Sync {
    async fn add(&self, job: JobId, deadline_unix: i64) -> Result<(), MarketError>;
    async fn remove(&self, job: JobId) -> Result<bool, MarketError>;
    /// Lowest-scored entry, if any.
    async fn peek(&self) -> Result<Option<(JobId, i64)>, MarketError>;
}

/// Process-local driver over an ordered set plus a member index.
#[derive(Default)]
pub struct MemoryDeadlineSet {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    ordered: BTreeSet<(i64, JobId)>,
    scores: HashMap<JobId, i64>,
}

impl MemoryDeadlineSet {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadlineSet for MemoryDeadlineSet {
    async fn add(&self, job: JobId, deadline_unix: i64) -> Result<(), MarketError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| MarketError::Internal("deadline set poisoned".into()))?;
        if let Some(old) = inner.scores.insert(job, deadline_unix) {
            inner.ordered.remove(&(old, job));
        }
        inner.ordered.insert((deadline_unix, job));
        Ok(())
    }

    async fn remove(&self, job: JobId) -> Result<bool, MarketError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| MarketError::Internal("deadline set poisoned".into()))?;
        match inner.scores.remove(&job) {
            Some(score) => {
                inner.ordered.remove(&(score, job));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn peek(&self) -> Result<Option<(JobId, i64)>, MarketError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| MarketError::Internal("deadline set poisoned".into()))?;
        Ok(inner.ordered.iter().next().map(|(score, job)| (*job, *score)))
    }
}
