use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use agora_core::{AgentId, JobId};

type RowLock = Arc<tokio::sync::Mutex<()>>;

/// The embedded-store substitute for SELECT-FOR-UPDATE row locks.
///
/// One async mutex per agent, per job (guarding the job row and its escrow)
/// and per wallet row. Callers must honor the canonical acquisition order:
/// agent locks first (sorted by id when two are held), then the job lock.
/// [`LockManager::lock_agent_pair`] enforces the sort so a two-party credit
/// can never deadlock against its mirror image.
#[derive(Default)]
pub struct LockManager {
    agents: Mutex<HashMap<AgentId, RowLock>>,
    jobs: Mutex<HashMap<JobId, RowLock>>,
    rows: Mutex<HashMap<Uuid, RowLock>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn agent_lock(&self, id: AgentId) -> RowLock {
        let mut map = self.agents.lock().expect("agent lock registry poisoned");
        Arc::clone(map.entry(id).or_default())
    }

    fn job_lock(&self, id: JobId) -> RowLock {
        let mut map = self.jobs.lock().expect("job lock registry poisoned");
        Arc::clone(map.entry(id).or_default())
    }

    fn row_lock(&self, id: Uuid) -> RowLock {
        let mut map = self.rows.lock().expect("row lock registry poisoned");
        Arc::clone(map.entry(id).or_default())
    }

    pub async fn lock_agent(&self, id: AgentId) -> OwnedMutexGuard<()> {
        self.agent_lock(id).lock_owned().await
    }

    /// Lock two agent rows in sorted id order. Returns the guards in the
    /// order the ids were passed.
    pub async fn lock_agent_pair(
        &self,
        first: AgentId,
        second: AgentId,
    ) -> (OwnedMutexGuard<()>, Option<OwnedMutexGuard<()>>) {
        if first == second {
            return (self.lock_agent(first).await, None);
        }
        if first < second {
            let a = self.lock_agent(first).await;
            let b = self.lock_agent(second).await;
            (a, Some(b))
        } else {
            let b = self.lock_agent(second).await;
            let a = self.lock_agent(first).await;
            (a, Some(b))
        }
    }

    /// Lock a job row (and with it the job's escrow). Acquire after any
    /// agent locks, never before.
    pub async fn lock_job(&self, id: JobId) -> OwnedMutexGuard<()> {
        self.job_lock(id).lock_owned().await
    }

    /// Lock a wallet row (deposit or withdrawal) by its id.
    pub async fn lock_row(&self, id: Uuid) -> OwnedMutexGuard<()> {
        self.row_lock(id).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn same_agent_serializes() {
        let locks = Arc::new(LockManager::new());
        let id = AgentId::new();
        let in_critical = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let in_critical = Arc::clone(&in_critical);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock_agent(id).await;
                assert_eq!(in_critical.swap(1, Ordering::SeqCst), 0, "two holders inside");
                tokio::task::yield_now().await;
                in_critical.store(0, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn pair_order_prevents_deadlock() {
        let locks = Arc::new(LockManager::new());
        let a = AgentId::new();
        let b = AgentId::new();
        // Opposite-order acquisitions running concurrently must both finish.
        let l1 = Arc::clone(&locks);
        let h1 = tokio::spawn(async move {
            for _ in 0..50 {
                let _g = l1.lock_agent_pair(a, b).await;
            }
        });
        let l2 = Arc::clone(&locks);
        let h2 = tokio::spawn(async move {
            for _ in 0..50 {
                let _g = l2.lock_agent_pair(b, a).await;
            }
        });
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            h1.await.unwrap();
            h2.await.unwrap();
        })
        .await
        .expect("lock ordering deadlocked");
    }

    #[tokio::test]
    async fn self_pair_locks_once() {
        let locks = LockManager::new();
        let a = AgentId::new();
        let (_g, second) = locks.lock_agent_pair(a, a).await;
        assert!(second.is_none());
    }
}
